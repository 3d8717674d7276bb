//! # Shelf Common Library
//!
//! Shared code for the shelf audiobook session crates:
//! - Event types (ShelfEvent enum) and the EventBus
//! - Durable position key scheme shared with the host application
//! - Configuration file and data folder resolution
//! - Time utilities

pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod time;

pub use error::{Error, Result};
