//! Semaphores and fences owned by frame slots.
//!
//! A slot's `image_available` semaphore orders acquire before rendering, its
//! `render_finished` semaphore orders rendering before present, and its
//! in-flight [`Fence`] tells the CPU when the slot may be reused.

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Unbounded fence wait. A fence that never signals means the device is
/// lost, which surfaces as an error from the wait itself.
pub const FENCE_TIMEOUT_INFINITE: u64 = u64::MAX;

/// Binary semaphore.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let semaphore = unsafe {
            device
                .handle()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_semaphore(self.semaphore, None) };
    }
}

/// Initial state of a [`Fence`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    /// The first wait returns immediately. Used for frame slots, which have
    /// no prior submission to wait on.
    Signaled,
    Unsignaled,
}

impl FenceState {
    fn flags(self) -> vk::FenceCreateFlags {
        match self {
            FenceState::Signaled => vk::FenceCreateFlags::SIGNALED,
            FenceState::Unsignaled => vk::FenceCreateFlags::empty(),
        }
    }
}

/// Fence signaled by a queue submission and waited on by the CPU.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    pub fn new(device: Arc<Device>, state: FenceState) -> RhiResult<Self> {
        let info = vk::FenceCreateInfo::default().flags(state.flags());
        let fence = unsafe { device.handle().create_fence(&info, None)? };
        trace!("Created fence ({:?})", state);
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FenceTimeout`] if the driver reports a timeout.
    pub fn wait(&self) -> RhiResult<()> {
        let result = unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, FENCE_TIMEOUT_INFINITE)
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::FenceTimeout),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the fence to the unsignaled state. Only valid once the
    /// submission that last signaled it has been waited on.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_fence(self.fence, None) };
    }
}
