//! Shared services used across front-ends.

mod database;

pub use database::{DatabaseService, SettledRecord};
