//! Tapedeck - segmented stream recorder and playback server
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod inventory;
pub mod playback;
pub mod probe;
pub mod record;
pub mod server;
