//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance, physical device and logical device creation
//! - Swapchain negotiation, acquire and present
//! - Buffer and image allocation with deferred staging release
//! - Render passes, framebuffers, pipelines and descriptor sets
//! - Command recording and synchronization primitives

mod error;

pub mod allocator;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod layout;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
