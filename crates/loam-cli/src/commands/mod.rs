pub mod common;
pub mod completions;
pub mod connect;
pub mod profile;
pub mod records;
pub mod sync;

pub use common::Engine;
pub use completions::run_completions;
pub use connect::run_connect;
pub use profile::run_profile;
pub use records::run_records;
pub use sync::{run_resolve, run_status, run_sync, run_sync_conflicts, run_watch};
