//! Playlist loading and initial positioning
//!
//! **Module Structure:**
//! - `loader.rs`: [`PlaylistLoader`], background population with ordered insertion
//! - `track_switch.rs`: [`TrackSwitchCoordinator`], event handshake + polling fallback

pub mod loader;
pub mod track_switch;

pub use loader::{priority_order, LoadOutcome, LoadProgress, PlaylistLoader};
pub use track_switch::{AbandonReason, SwitchOutcome, TrackSwitchCoordinator};
