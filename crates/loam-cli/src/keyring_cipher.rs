//! OS keychain backend for sealed credentials.
//!
//! The blob written to the local store is only an opaque handle; the secret
//! itself lives in the platform keychain under that handle.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;
use loam_core::session::{SecretCipher, SessionError, SessionResult};
use uuid::Uuid;

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "loam-cli";
#[cfg(not(test))]
const PROBE_USERNAME: &str = "loam:availability-probe";

#[derive(Debug, Default)]
pub struct KeyringCipher {
    #[cfg(not(test))]
    available: std::sync::OnceLock<bool>,
}

impl KeyringCipher {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_from_blob(blob: &[u8]) -> SessionResult<String> {
        let handle = std::str::from_utf8(blob)
            .map_err(|error| SessionError::SecureStorage(format!("corrupt handle: {error}")))?;
        Uuid::parse_str(handle)
            .map_err(|error| SessionError::SecureStorage(format!("corrupt handle: {error}")))?;
        Ok(format!("credential:{handle}"))
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, Vec<u8>>> {
        static STORE: OnceLock<Mutex<HashMap<String, Vec<u8>>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(username: &str) -> SessionResult<Entry> {
        Entry::new(KEYRING_SERVICE_NAME, username)
            .map_err(|error| SessionError::SecureStorage(error.to_string()))
    }
}

#[cfg(not(test))]
impl SecretCipher for KeyringCipher {
    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| {
            let probe = Self::entry(PROBE_USERNAME).and_then(|entry| {
                match entry.get_secret() {
                    Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
                    Err(error) => Err(SessionError::SecureStorage(error.to_string())),
                }
            });
            if let Err(error) = &probe {
                tracing::warn!("OS keychain unavailable: {error}");
            }
            probe.is_ok()
        })
    }

    fn encrypt(&self, plaintext: &[u8]) -> SessionResult<Vec<u8>> {
        if !self.is_available() {
            return Err(SessionError::SecureStorageUnavailable);
        }
        let handle = Uuid::now_v7().to_string();
        let blob = handle.into_bytes();
        Self::entry(&Self::handle_from_blob(&blob)?)?
            .set_secret(plaintext)
            .map_err(|error| SessionError::SecureStorage(error.to_string()))?;
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> SessionResult<Vec<u8>> {
        match Self::entry(&Self::handle_from_blob(blob)?)?.get_secret() {
            Ok(secret) => Ok(secret),
            Err(keyring::Error::NoEntry) => Err(SessionError::SecureStorage(
                "credential missing from keychain".to_string(),
            )),
            Err(error) => Err(SessionError::SecureStorage(error.to_string())),
        }
    }

    fn discard(&self, blob: &[u8]) -> SessionResult<()> {
        match Self::entry(&Self::handle_from_blob(blob)?)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(SessionError::SecureStorage(error.to_string())),
        }
    }
}

#[cfg(test)]
impl SecretCipher for KeyringCipher {
    fn is_available(&self) -> bool {
        true
    }

    fn encrypt(&self, plaintext: &[u8]) -> SessionResult<Vec<u8>> {
        let blob = Uuid::now_v7().to_string().into_bytes();
        let key = Self::handle_from_blob(&blob)?;
        Self::test_store()
            .lock()
            .map_err(|error| SessionError::SecureStorage(error.to_string()))?
            .insert(key, plaintext.to_vec());
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> SessionResult<Vec<u8>> {
        let key = Self::handle_from_blob(blob)?;
        Self::test_store()
            .lock()
            .map_err(|error| SessionError::SecureStorage(error.to_string()))?
            .get(&key)
            .cloned()
            .ok_or_else(|| SessionError::SecureStorage("credential missing from keychain".into()))
    }

    fn discard(&self, blob: &[u8]) -> SessionResult<()> {
        let key = Self::handle_from_blob(blob)?;
        Self::test_store()
            .lock()
            .map_err(|error| SessionError::SecureStorage(error.to_string()))?
            .remove(&key);
        Ok(())
    }
}
