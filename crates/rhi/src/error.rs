//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
///
/// Every variant except `VulkanError` wrapping `ERROR_OUT_OF_DATE_KHR` is
/// treated as fatal by the frame loop; out-of-date and suboptimal results are
/// reported through [`crate::swapchain::SwapchainStatus`] instead.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// A required instance or device extension is not available
    #[error("Missing required extension: {0}")]
    MissingExtension(String),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The surface reports no formats
    #[error("Surface exposes no formats")]
    NoSurfaceFormats,

    /// The surface reports no present modes
    #[error("Surface exposes no present modes")]
    NoPresentModes,

    /// None of the candidate formats support the requested usage
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A fence did not signal within the wait timeout
    #[error("Fence wait timed out")]
    FenceTimeout,

    /// Acquire or present returned something other than success, suboptimal or out-of-date
    #[error("Unexpected result from {operation}: {result}")]
    UnexpectedResult {
        /// The swapchain operation that failed.
        operation: &'static str,
        /// The raw Vulkan result.
        result: vk::Result,
    },

    /// Staging buffers were flushed before the copies reading them completed
    #[error("{pending} staging buffer(s) flushed before their upload was submitted and waited on")]
    StagingInFlight {
        /// Number of staging buffers still awaiting their upload.
        pending: usize,
    },

    /// A caller-supplied argument is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The allocator mutex was poisoned by a panic on another thread
    #[error("GPU allocator lock poisoned")]
    AllocatorPoisoned,

    /// Shader module error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
