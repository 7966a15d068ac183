//! Core utilities shared by every vkframe crate.
//!
//! This crate provides:
//! - Error types and result aliases
//! - Logging initialization
//! - Runtime configuration
//! - Frame timing

mod config;
mod error;
mod logging;
mod timer;

pub use config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE, MAX_FRAMES_IN_FLIGHT, RendererConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FrameStats, FrameTimer};
