//! GPU operations the frame loop is built from.
//!
//! [`FrameSync`](crate::frame_sync::FrameSync) owns the ordering rules and
//! the images-in-flight map; a [`FrameBackend`] performs the individual
//! operations. [`VulkanBackend`](crate::vulkan_backend::VulkanBackend) is the
//! real implementation. Tests substitute a recording backend.

use vkframe_rhi::swapchain::{AcquiredImage, SwapchainStatus};
use vkframe_rhi::vk;

use crate::error::RendererResult;
use crate::passes::{ClearValues, PassId};

/// Per-slot fence, semaphore and command buffer operations plus the
/// swapchain calls of one frame.
///
/// Slots are indices in `0..slot_count()`; images are indices returned by
/// [`acquire_image`](Self::acquire_image).
pub trait FrameBackend {
    /// Command buffer handed to callers recording draw work.
    type CommandBuffer;

    /// Number of frame slots.
    fn slot_count(&self) -> usize;

    /// Number of swapchain images.
    fn image_count(&self) -> usize;

    /// Blocks until the slot's frame-complete fence is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()>;

    /// Resets the slot's frame-complete fence to unsignaled.
    fn reset_slot(&mut self, slot: usize) -> RendererResult<()>;

    /// Acquires the next swapchain image, signaling the slot's
    /// image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> RendererResult<AcquiredImage>;

    /// Resets the slot's command buffer and begins recording.
    fn begin_commands(&mut self, slot: usize) -> RendererResult<()>;

    /// Begins `pass` against the framebuffer of `image_index`.
    fn begin_pass(
        &mut self,
        slot: usize,
        image_index: u32,
        pass: PassId,
        clear: &ClearValues,
    ) -> RendererResult<()>;

    /// Ends the currently open pass.
    fn end_pass(&mut self, slot: usize, pass: PassId);

    /// Ends recording.
    fn end_commands(&mut self, slot: usize) -> RendererResult<()>;

    /// Submits the slot's command buffer, waiting on image-available at the
    /// color-attachment-output stage, signaling render-finished and the
    /// slot's fence.
    fn submit(&mut self, slot: usize) -> RendererResult<()>;

    /// Presents `image_index` after the slot's render-finished semaphore.
    fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<SwapchainStatus>;

    /// The slot's command buffer.
    fn command_buffer(&self, slot: usize) -> &Self::CommandBuffer;

    /// Current framebuffer size in pixels, zero while minimized.
    fn framebuffer_extent(&mut self) -> vk::Extent2D;

    /// Pauses before the framebuffer extent is polled again.
    fn wait_for_extent(&mut self);

    /// Consumes the window's resize notification, returning whether one was
    /// pending.
    fn take_resized(&mut self) -> bool;

    /// Rebuilds the swapchain and everything sized by it.
    ///
    /// Called with the device idle and a non-zero extent.
    fn recreate(&mut self, extent: vk::Extent2D) -> RendererResult<()>;

    /// Blocks until the device has no pending work.
    fn wait_idle(&mut self) -> RendererResult<()>;
}
