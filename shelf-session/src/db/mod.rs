//! Database access layer
//!
//! Provides schema initialization and the settings key/value table, which
//! holds both runtime settings and the durable position keys.

pub mod init;
pub mod settings;

pub use init::initialize_database;
