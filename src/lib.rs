//! Jellyfin status board
//!
//! Periodically collects server health and library inventory from a Jellyfin
//! server and keeps a single, continuously edited status message in a
//! dedicated Discord channel.

pub mod config;
pub mod error;
pub mod jobs;
pub mod services;

pub use error::{Error, Result};
