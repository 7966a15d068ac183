//! Per-slot synchronization objects and command buffer.

use std::sync::Arc;

use tracing::debug;

use vkframe_rhi::RhiResult;
use vkframe_rhi::command::{CommandBuffer, CommandPool};
use vkframe_rhi::device::Device;
use vkframe_rhi::sync::{Fence, FenceState, Semaphore};

/// Resources owned by one frame slot.
///
/// The command buffer is only reset after `in_flight` has been waited on.
pub struct FrameSlot {
    command_buffer: CommandBuffer,
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSlot {
    pub fn new(device: Arc<Device>, command_pool: &CommandPool) -> RhiResult<Self> {
        let command_buffer = CommandBuffer::new(device.clone(), command_pool)?;
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        // Signaled so the first wait on a fresh slot returns at once
        let in_flight = Fence::new(device, FenceState::Signaled)?;

        Ok(Self {
            command_buffer,
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Creates `count` slots sharing `command_pool`.
    pub fn create_all(
        device: &Arc<Device>,
        command_pool: &CommandPool,
        count: usize,
    ) -> RhiResult<Vec<Self>> {
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            slots.push(Self::new(device.clone(), command_pool)?);
            debug!("Created frame slot {}", i);
        }
        Ok(slots)
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}
