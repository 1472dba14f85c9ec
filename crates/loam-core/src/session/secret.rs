//! Platform secure-credential primitive.

use super::{SessionError, SessionResult};

/// Seals credentials into opaque blobs.
///
/// Implementations wrap whatever the platform offers (an OS keyring, a
/// hardware keystore). `is_available` must report `false` when no backend
/// can be reached; `encrypt` and `decrypt` fail in that case.
pub trait SecretCipher: Send + Sync {
    fn is_available(&self) -> bool;

    fn encrypt(&self, plaintext: &[u8]) -> SessionResult<Vec<u8>>;

    fn decrypt(&self, blob: &[u8]) -> SessionResult<Vec<u8>>;

    /// Release any backend state behind a blob that is being discarded.
    fn discard(&self, _blob: &[u8]) -> SessionResult<()> {
        Ok(())
    }
}

/// Cipher for platforms without an encryption backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableCipher;

impl SecretCipher for UnavailableCipher {
    fn is_available(&self) -> bool {
        false
    }

    fn encrypt(&self, _plaintext: &[u8]) -> SessionResult<Vec<u8>> {
        Err(SessionError::SecureStorageUnavailable)
    }

    fn decrypt(&self, _blob: &[u8]) -> SessionResult<Vec<u8>> {
        Err(SessionError::SecureStorageUnavailable)
    }
}
