//! Platform layer: the winit window and its Vulkan surface.
//!
//! This crate provides:
//! - A shared window handle with resize tracking
//! - Surface instance extension discovery
//! - Vulkan surface creation from raw window handles

mod window;

pub use window::{Surface, Window};

pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
