//! Renderer error types.

use thiserror::Error;
use vkframe_rhi::RhiError;

/// Error returned by the frame loop and the renderer facade.
///
/// Every variant is fatal: recoverable swapchain conditions never surface
/// as errors.
#[derive(Error, Debug)]
pub enum RendererError {
    /// Failure in the Vulkan layer
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Failure in window or configuration handling
    #[error(transparent)]
    Core(#[from] vkframe_core::Error),
}

/// Result type alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RendererError>;

impl From<ash::vk::Result> for RendererError {
    fn from(result: ash::vk::Result) -> Self {
        RendererError::Rhi(RhiError::VulkanError(result))
    }
}
