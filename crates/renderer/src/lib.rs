//! Frame lifecycle and pass orchestration.
//!
//! This crate coordinates:
//! - Frame slots in flight and the images-in-flight map ([`FrameSync`])
//! - The offscreen, post and UI passes and their framebuffer sets
//! - Swapchain recreation on resize or out-of-date results
//! - Resource helpers for scene and overlay code ([`Renderer`])

pub mod backend;
pub mod draw;
mod error;
pub mod frame_slot;
pub mod frame_sync;
pub mod passes;
pub mod renderer;
pub mod targets;
pub mod vertex;
pub mod vulkan_backend;

pub use backend::FrameBackend;
pub use draw::{CameraUniform, DrawCall, ScenePushConstants};
pub use error::{RendererError, RendererResult};
pub use frame_sync::{BeginFrame, EndFrame, FrameInfo, FrameSync, SlotState};
pub use passes::{ClearValues, DEFAULT_CLEAR_COLOR, PassId, PassSetLayout, TargetFormats};
pub use renderer::{PipelineDesc, Renderer};
pub use vertex::MeshVertex;
