//! Resource allocation with deferred staging release.
//!
//! [`ResourceAllocator`] creates buffers and images through gpu-allocator and
//! uploads device-local data through host-visible staging buffers. Uploads
//! follow a two-phase protocol:
//!
//! 1. [`ResourceAllocator::create_device_local_buffer`] records the copy into a
//!    caller-supplied command buffer and enqueues the staging buffer.
//! 2. The caller submits and waits with
//!    [`ResourceAllocator::end_single_time_commands`], then calls
//!    [`ResourceAllocator::flush_staging`] to free the staging buffers.
//!
//! Flushing before the wait is refused with [`RhiError::StagingInFlight`].

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::{debug, error};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc, Sampler};
use crate::layout::LayoutTransition;

/// FIFO of resources that must outlive a recorded upload.
///
/// Each entry is tagged with the command buffer its copy was recorded into.
/// An entry becomes releasable once [`mark_complete`](Self::mark_complete)
/// is called for that command buffer after it has executed. Completing one
/// command buffer never releases entries recorded into another.
#[derive(Debug)]
pub struct StagingQueue<T> {
    entries: Vec<StagingEntry<T>>,
}

#[derive(Debug)]
struct StagingEntry<T> {
    recorded_into: vk::CommandBuffer,
    complete: bool,
    value: T,
}

impl<T> Default for StagingQueue<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> StagingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `entry` alive until `recorded_into` is marked complete and the
    /// queue is flushed.
    pub fn enqueue(&mut self, recorded_into: vk::CommandBuffer, entry: T) {
        self.entries.push(StagingEntry {
            recorded_into,
            complete: false,
            value: entry,
        });
    }

    /// Records that `cmd` has executed. Returns how many entries it released.
    ///
    /// Only entries already queued are affected, so a later upload recorded
    /// into a recycled handle stays pending.
    pub fn mark_complete(&mut self, cmd: vk::CommandBuffer) -> usize {
        let mut marked = 0;
        for entry in &mut self.entries {
            if !entry.complete && entry.recorded_into == cmd {
                entry.complete = true;
                marked += 1;
            }
        }
        marked
    }

    /// Entries whose upload has not been waited on yet.
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.complete).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns every entry.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::StagingInFlight`] and keeps every entry queued if
    /// any upload has not been waited on.
    pub fn flush(&mut self) -> RhiResult<Vec<T>> {
        let pending = self.pending();
        if pending > 0 {
            error!(
                "Staging flush requested with {} upload(s) not yet submitted and waited on",
                pending
            );
            return Err(RhiError::StagingInFlight { pending });
        }
        Ok(std::mem::take(&mut self.entries)
            .into_iter()
            .map(|entry| entry.value)
            .collect())
    }

    /// Removes and returns the completed entries, leaving pending ones queued.
    pub fn release_completed(&mut self) -> Vec<T> {
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.complete);
        self.entries = pending;
        done.into_iter().map(|entry| entry.value).collect()
    }
}

/// Buffer and image factory bound to one device.
pub struct ResourceAllocator {
    device: Arc<Device>,
    upload_pool: CommandPool,
    staging: StagingQueue<Buffer>,
}

impl ResourceAllocator {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let upload_pool = CommandPool::new_transient(device.clone(), device.queue_families().graphics)?;
        Ok(Self {
            device,
            upload_pool,
            staging: StagingQueue::new(),
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Creates a buffer with an owning handle.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RhiResult<Buffer> {
        Buffer::new(self.device.clone(), size, usage, location, "buffer")
    }

    /// Creates an image and its default view.
    pub fn create_image(&self, desc: &ImageDesc) -> RhiResult<Image> {
        Image::new(self.device.clone(), desc)
    }

    pub fn create_sampler(&self) -> RhiResult<Sampler> {
        Sampler::linear(self.device.clone())
    }

    /// Uploads `data` into a new device-local buffer.
    ///
    /// The copy is only recorded into `cmd`. The staging buffer stays queued
    /// until `cmd` has been submitted and waited on and [`flush_staging`](Self::flush_staging)
    /// is called.
    pub fn create_device_local_buffer(
        &mut self,
        cmd: &CommandBuffer,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<Buffer> {
        let size = data.len() as vk::DeviceSize;

        let staging = Buffer::with_usage(self.device.clone(), BufferUsage::Staging, size)?;
        staging.write_data(0, data)?;

        let buffer = Buffer::new(
            self.device.clone(),
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            "device_local",
        )?;

        cmd.copy_buffer(staging.handle(), buffer.handle(), size);

        self.staging.enqueue(cmd.handle(), staging);
        debug!(
            "Recorded {} byte device-local upload ({} staging buffer(s) queued)",
            size,
            self.staging.len()
        );

        Ok(buffer)
    }

    /// Creates a sampled RGBA8 texture from tightly packed pixels.
    pub fn create_texture_image(&mut self, pixels: &[u8], extent: vk::Extent2D) -> RhiResult<Image> {
        let expected = extent.width as usize * extent.height as usize * 4;
        if pixels.len() != expected {
            return Err(RhiError::InvalidArgument(format!(
                "texture of {}x{} needs {} bytes, got {}",
                extent.width,
                extent.height,
                expected,
                pixels.len()
            )));
        }

        let staging = Buffer::with_usage(
            self.device.clone(),
            BufferUsage::Staging,
            pixels.len() as vk::DeviceSize,
        )?;
        staging.write_data(0, pixels)?;

        let image = self.create_image(&ImageDesc::new(
            "texture",
            extent,
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        ))?;

        self.transition_image_layout(
            image.handle(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;

        let cmd = self.begin_single_time_commands()?;
        cmd.copy_buffer_to_color_image(staging.handle(), image.handle(), extent);
        self.staging.enqueue(cmd.handle(), staging);
        self.end_single_time_commands(cmd)?;

        self.transition_image_layout(
            image.handle(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        Ok(image)
    }

    /// Frees every queued staging buffer.
    ///
    /// Intended for points where every upload is known to be finished, such
    /// as the end of loading.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::StagingInFlight`] if a recorded upload has not been
    /// submitted and waited on. Nothing is freed in that case.
    pub fn flush_staging(&mut self) -> RhiResult<usize> {
        let released = self.staging.flush()?;
        let count = released.len();
        drop(released);
        if count > 0 {
            debug!("Released {} staging buffer(s)", count);
        }
        Ok(count)
    }

    /// Frees the staging buffers whose upload has completed. Buffers recorded
    /// into a command buffer that has not been waited on stay queued.
    pub fn release_completed_staging(&mut self) -> usize {
        let released = self.staging.release_completed();
        let count = released.len();
        drop(released);
        if count > 0 {
            debug!("Released {} completed staging buffer(s)", count);
        }
        count
    }

    /// Records that `cmd`, submitted by the caller, has finished executing.
    ///
    /// Only staging buffers whose copy was recorded into `cmd` become
    /// releasable.
    pub fn mark_upload_complete(&mut self, cmd: &CommandBuffer) {
        let marked = self.staging.mark_complete(cmd.handle());
        debug!("{} staging buffer(s) released by upload completion", marked);
    }

    /// Staging buffers still waiting for their upload to complete.
    pub fn pending_staging(&self) -> usize {
        self.staging.pending()
    }

    /// Allocates a one-shot command buffer in the recording state.
    pub fn begin_single_time_commands(&self) -> RhiResult<CommandBuffer> {
        let cmd = CommandBuffer::new(self.device.clone(), &self.upload_pool)?;
        if let Err(e) = cmd.begin() {
            self.upload_pool.free(&cmd);
            return Err(e);
        }
        Ok(cmd)
    }

    /// Ends, submits and waits for `cmd`, then frees it.
    ///
    /// Staging buffers whose copy was recorded into `cmd` become releasable.
    pub fn end_single_time_commands(&mut self, cmd: CommandBuffer) -> RhiResult<()> {
        let result = self.submit_and_wait(&cmd);
        if result.is_ok() {
            self.staging.mark_complete(cmd.handle());
        }
        self.upload_pool.free(&cmd);
        result
    }

    fn submit_and_wait(&self, cmd: &CommandBuffer) -> RhiResult<()> {
        cmd.end()?;
        let command_buffers = [cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            self.device
                .submit_graphics(&[submit_info], vk::Fence::null())?;
        }
        self.device.graphics_queue_wait_idle()
    }

    /// Transitions `image` with a blocking one-shot barrier.
    ///
    /// # Panics
    ///
    /// Panics if the layout pair is not one of the supported transitions.
    pub fn transition_image_layout(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> RhiResult<()> {
        let transition = LayoutTransition::for_pair(old_layout, new_layout);
        let cmd = self.begin_single_time_commands()?;
        transition.record(&cmd, image, aspect);
        self.end_single_time_commands(cmd)
    }
}

impl Drop for ResourceAllocator {
    fn drop(&mut self) {
        if self.staging.pending() > 0 {
            error!(
                "Dropping allocator with {} staging buffer(s) whose upload never completed",
                self.staging.pending()
            );
            if let Err(e) = self.device.wait_idle() {
                error!("Failed to wait for device idle: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn cmd(raw: u64) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(raw)
    }

    #[test]
    fn test_flush_after_completion_releases_everything() {
        let mut queue = StagingQueue::new();
        queue.enqueue(cmd(1), "a");
        queue.enqueue(cmd(1), "b");
        assert_eq!(queue.mark_complete(cmd(1)), 2);
        assert_eq!(queue.flush().unwrap(), vec!["a", "b"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_without_wait_is_refused() {
        let mut queue = StagingQueue::new();
        queue.enqueue(cmd(1), 1u32);

        let err = queue.flush().unwrap_err();
        assert!(matches!(err, RhiError::StagingInFlight { pending: 1 }));
        // The staging entry must survive the refused flush.
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending(), 1);
    }

    #[test]
    fn test_completing_another_command_buffer_keeps_upload_pending() {
        use std::rc::Rc;

        let tracker = Rc::new(());
        let mut queue = StagingQueue::new();
        queue.enqueue(cmd(1), Rc::clone(&tracker));

        // A blocking one-shot submission of a different command buffer.
        assert_eq!(queue.mark_complete(cmd(2)), 0);

        assert!(matches!(
            queue.flush(),
            Err(RhiError::StagingInFlight { pending: 1 })
        ));
        assert_eq!(Rc::strong_count(&tracker), 2);

        queue.mark_complete(cmd(1));
        drop(queue.flush().unwrap());
        assert_eq!(Rc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_upload_after_wait_is_pending_again() {
        let mut queue = StagingQueue::new();
        queue.enqueue(cmd(1), 1u32);
        queue.mark_complete(cmd(1));
        // Same handle, recycled by the pool for a new recording.
        queue.enqueue(cmd(1), 2u32);

        assert_eq!(queue.pending(), 1);
        assert!(queue.flush().is_err());

        queue.mark_complete(cmd(1));
        assert_eq!(queue.flush().unwrap(), vec![1, 2]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_release_completed_leaves_pending_entries() {
        let mut queue = StagingQueue::new();
        queue.enqueue(cmd(1), "user");
        queue.enqueue(cmd(2), "texture");
        queue.mark_complete(cmd(2));

        assert_eq!(queue.release_completed(), vec!["texture"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending(), 1);
        assert!(queue.release_completed().is_empty());
    }

    #[test]
    fn test_empty_flush_is_ok() {
        let mut queue: StagingQueue<u8> = StagingQueue::new();
        assert!(queue.flush().unwrap().is_empty());
    }
}
