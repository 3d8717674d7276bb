//! # Shelf Session Engine (shelf-session)
//!
//! Playback session and position synchronization for audiobooks.
//!
//! **Purpose:** Load a book's tracks into a playback engine lazily and in order,
//! move to a saved position once the playlist is confirmed, persist positions
//! through the host or a durable fallback store, and run the sleep and
//! inactivity timers.
//!
//! **Architecture:** One owner task per engine ([`engine::EngineHandle`]); every
//! other component is a tokio task that talks to it through the handle and
//! shares state through an explicitly passed [`session::SessionContext`].

pub mod config;
pub mod db;
pub mod duration_cache;
pub mod engine;
pub mod error;
pub mod model;
pub mod persistence;
pub mod playback;
pub mod service;
pub mod session;
pub mod timers;

pub use error::{Error, Result};
pub use service::{SessionHandle, SessionService, SetPlaylistRequest};
