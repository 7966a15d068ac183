//! Frame synchronization core.
//!
//! [`FrameSync`] drives each frame slot through
//! `Idle -> Recording -> Submitted -> Idle`:
//!
//! - [`begin_frame`](FrameSync::begin_frame) waits on the slot's fence,
//!   acquires an image, waits on whichever slot last wrote that image, then
//!   resets the fence and begins recording
//! - [`begin_pass`](FrameSync::begin_pass) / [`end_pass`](FrameSync::end_pass)
//!   bracket the offscreen, post and UI passes in that order
//! - [`end_frame`](FrameSync::end_frame) ends recording, submits, presents
//!   and, if the swapchain went stale or the window was resized, recreates
//!   it after the present
//!
//! Slot count and swapchain image count are independent. The images-in-flight
//! map records, per swapchain image, the slot whose submission last wrote it,
//! so an image is never recorded into while another slot's work on it is
//! still pending.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_renderer::backend::FrameBackend;
//! use vkframe_renderer::frame_sync::{BeginFrame, FrameSync};
//! use vkframe_renderer::passes::{ClearValues, PassId, DEFAULT_CLEAR_COLOR};
//!
//! # fn example<B: FrameBackend>(sync: &mut FrameSync<B>) -> vkframe_renderer::RendererResult<()> {
//! if let BeginFrame::Ready(_) = sync.begin_frame()? {
//!     for pass in [PassId::Offscreen, PassId::Ui] {
//!         sync.begin_pass(pass, &ClearValues::for_pass(pass, DEFAULT_CLEAR_COLOR))?;
//!         let _cmd = sync.current_command_buffer();
//!         sync.end_pass();
//!     }
//!     sync.end_frame()?;
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Instant;

use tracing::{debug, info, trace};

use vkframe_rhi::swapchain::{AcquiredImage, SwapchainStatus};
use vkframe_rhi::vk;

use crate::backend::FrameBackend;
use crate::error::RendererResult;
use crate::passes::{ClearValues, PassId};

/// Lifecycle state of a frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// The slot's previous submission is known to be complete.
    Idle,
    /// The slot's command buffer is being recorded.
    Recording,
    /// The slot's command buffer was submitted and its fence not yet waited on.
    Submitted,
}

/// The frame that [`FrameSync::begin_frame`] opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub slot: usize,
    pub image_index: u32,
    /// Number of frames begun before this one.
    pub frame_number: u64,
}

/// Outcome of [`FrameSync::begin_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeginFrame {
    /// Recording has begun; passes may be opened.
    Ready(FrameInfo),
    /// The swapchain was out of date and has been recreated. Nothing may be
    /// recorded this frame.
    Skipped,
}

/// Outcome of [`FrameSync::end_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndFrame {
    Presented,
    /// Presented, then the swapchain was recreated.
    Recreated,
}

#[derive(Clone, Copy, Debug)]
struct OpenFrame {
    info: FrameInfo,
    suboptimal: bool,
}

impl OpenFrame {
    #[inline]
    fn slot(&self) -> usize {
        self.info.slot
    }

    #[inline]
    fn image_index(&self) -> u32 {
        self.info.image_index
    }
}

/// Frame lifecycle state machine over a [`FrameBackend`].
pub struct FrameSync<B: FrameBackend> {
    backend: B,
    slots: Vec<SlotState>,
    /// Slot whose submission last wrote each swapchain image.
    images_in_flight: Vec<Option<usize>>,
    current_slot: usize,
    open_frame: Option<OpenFrame>,
    open_pass: Option<PassId>,
    last_pass: Option<PassId>,
    resized: bool,
    frame_number: u64,
    recreate_count: u64,
}

impl<B: FrameBackend> FrameSync<B> {
    /// Wraps `backend`, whose slots must all be idle with signaled fences.
    ///
    /// # Panics
    ///
    /// Panics if the backend has no frame slots.
    pub fn new(backend: B) -> Self {
        let slot_count = backend.slot_count();
        assert!(slot_count > 0, "frame sync needs at least one frame slot");

        let image_count = backend.image_count();
        info!(
            "Frame sync created: {} slot(s), {} swapchain image(s)",
            slot_count, image_count
        );

        Self {
            backend,
            slots: vec![SlotState::Idle; slot_count],
            images_in_flight: vec![None; image_count],
            current_slot: 0,
            open_frame: None,
            open_pass: None,
            last_pass: None,
            resized: false,
            frame_number: 0,
            recreate_count: 0,
        }
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    /// Slot guarding `image_index`, if any.
    #[inline]
    pub fn image_guard(&self, image_index: usize) -> Option<usize> {
        self.images_in_flight[image_index]
    }

    /// Slot the next (or currently open) frame records into.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    #[inline]
    pub fn is_frame_open(&self) -> bool {
        self.open_frame.is_some()
    }

    /// The open frame, if any.
    #[inline]
    pub fn current_frame(&self) -> Option<FrameInfo> {
        self.open_frame.map(|frame| frame.info)
    }

    /// The open pass, if any.
    #[inline]
    pub fn open_pass(&self) -> Option<PassId> {
        self.open_pass
    }

    /// Number of completed swapchain recreations.
    #[inline]
    pub fn recreate_count(&self) -> u64 {
        self.recreate_count
    }

    /// Flags the swapchain for recreation after the next present.
    pub fn notify_resized(&mut self) {
        if !self.resized {
            debug!("Resize flagged, swapchain will be recreated after the next present");
        }
        self.resized = true;
    }

    #[inline]
    pub fn resize_pending(&self) -> bool {
        self.resized
    }

    /// Opens a frame.
    ///
    /// # Panics
    ///
    /// Panics if a frame is already open.
    pub fn begin_frame(&mut self) -> RendererResult<BeginFrame> {
        if let Some(open) = self.open_frame {
            panic!(
                "begin_frame called while the frame on slot {} is still open",
                open.slot()
            );
        }

        let slot = self.current_slot;
        self.wait_slot(slot)?;

        let (image_index, suboptimal) = match self.backend.acquire_image(slot)? {
            AcquiredImage::Acquired { index, suboptimal } => (index, suboptimal),
            AcquiredImage::OutOfDate => {
                debug!("Swapchain out of date on acquire, skipping frame");
                self.recreate_swapchain()?;
                return Ok(BeginFrame::Skipped);
            }
        };

        let image = image_index as usize;
        if let Some(guard) = self.images_in_flight[image]
            && guard != slot
        {
            trace!("Image {} still guarded by slot {}, waiting", image, guard);
            self.wait_slot(guard)?;
        }
        self.images_in_flight[image] = Some(slot);

        self.backend.reset_slot(slot)?;
        self.backend.begin_commands(slot)?;
        self.slots[slot] = SlotState::Recording;

        let info = FrameInfo {
            slot,
            image_index,
            frame_number: self.frame_number,
        };
        self.frame_number += 1;
        self.open_frame = Some(OpenFrame { info, suboptimal });
        self.last_pass = None;

        trace!("Frame {} begun on slot {}, image {}", info.frame_number, slot, image_index);
        Ok(BeginFrame::Ready(info))
    }

    /// Opens `pass` in the current frame.
    ///
    /// # Panics
    ///
    /// Panics outside a frame, while another pass is open, or if `pass` does
    /// not come after the previously recorded pass.
    pub fn begin_pass(&mut self, pass: PassId, clear: &ClearValues) -> RendererResult<()> {
        let Some(frame) = self.open_frame else {
            panic!("begin_pass({pass}) called outside begin_frame/end_frame");
        };
        if let Some(open) = self.open_pass {
            panic!("begin_pass({pass}) called while the {open} pass is still open");
        }
        if let Some(last) = self.last_pass
            && pass <= last
        {
            panic!("{pass} pass recorded after the {last} pass; passes run offscreen, post, ui");
        }

        self.backend
            .begin_pass(frame.slot(), frame.image_index(), pass, clear)?;
        self.open_pass = Some(pass);
        Ok(())
    }

    /// Closes the open pass.
    ///
    /// # Panics
    ///
    /// Panics if no pass is open.
    pub fn end_pass(&mut self) {
        let (Some(frame), Some(pass)) = (self.open_frame, self.open_pass.take()) else {
            panic!("end_pass called without an open pass");
        };
        self.backend.end_pass(frame.slot(), pass);
        self.last_pass = Some(pass);
    }

    /// Checks that draw work built for `pass` may be recorded now.
    ///
    /// # Panics
    ///
    /// Panics if no pass is open or the open pass is not `pass`. A pipeline
    /// is only valid inside the render pass it was built against.
    pub fn require_open_pass(&self, pass: PassId) {
        match self.open_pass {
            Some(open) if open == pass => {}
            Some(open) => panic!("draw for the {pass} pass recorded inside the {open} pass"),
            None => panic!("draw for the {pass} pass recorded outside begin_pass/end_pass"),
        }
    }

    /// Command buffer of the open frame.
    ///
    /// # Panics
    ///
    /// Panics outside a frame.
    pub fn current_command_buffer(&self) -> &B::CommandBuffer {
        let Some(frame) = self.open_frame else {
            panic!("command buffer requested outside begin_frame/end_frame");
        };
        self.backend.command_buffer(frame.slot())
    }

    /// Ends recording, submits and presents, then recreates the swapchain
    /// if needed.
    ///
    /// # Panics
    ///
    /// Panics without an open frame, with a pass still open, or if the UI
    /// pass was not recorded.
    pub fn end_frame(&mut self) -> RendererResult<EndFrame> {
        let Some(frame) = self.open_frame else {
            panic!("end_frame called without a matching begin_frame");
        };
        if let Some(open) = self.open_pass {
            panic!("end_frame called while the {open} pass is still open");
        }
        if self.last_pass != Some(PassId::Ui) {
            panic!("end_frame called before the ui pass prepared the swapchain image for present");
        }
        if self.backend.take_resized() {
            self.notify_resized();
        }
        self.open_frame = None;
        self.last_pass = None;

        let slot = frame.slot();
        self.backend.end_commands(slot)?;
        self.backend.submit(slot)?;
        self.slots[slot] = SlotState::Submitted;

        let status = self.backend.present(slot, frame.image_index())?;
        self.current_slot = (slot + 1) % self.slots.len();

        if status.needs_recreate() || frame.suboptimal || self.resized {
            debug!(
                "Recreating after present (present: {:?}, acquire suboptimal: {}, resized: {})",
                status, frame.suboptimal, self.resized
            );
            self.recreate_swapchain()?;
            return Ok(EndFrame::Recreated);
        }

        debug_assert_eq!(status, SwapchainStatus::Success);
        Ok(EndFrame::Presented)
    }

    /// Rebuilds the swapchain for the current framebuffer extent.
    ///
    /// Polls until the extent is non-zero, idles the device, then rebuilds.
    /// Every image guard is cleared since the device is idle. Any window
    /// resize seen so far is consumed, as the new extent already reflects it.
    ///
    /// # Panics
    ///
    /// Panics while a frame is open.
    pub fn recreate_swapchain(&mut self) -> RendererResult<()> {
        if self.open_frame.is_some() {
            panic!("recreate_swapchain called while a frame is being recorded");
        }

        self.backend.take_resized();
        let extent = self.wait_for_nonzero_extent();
        let start = Instant::now();

        self.backend.wait_idle()?;
        self.slots.fill(SlotState::Idle);

        self.backend.recreate(extent)?;
        self.images_in_flight = vec![None; self.backend.image_count()];
        self.resized = false;
        self.recreate_count += 1;

        info!(
            "Swapchain recreated at {}x{} with {} image(s) in {:.2?}",
            extent.width,
            extent.height,
            self.images_in_flight.len(),
            start.elapsed()
        );
        Ok(())
    }

    /// Blocks until the device is idle and marks every slot idle.
    pub fn wait_idle(&mut self) -> RendererResult<()> {
        self.backend.wait_idle()?;
        self.slots.fill(SlotState::Idle);
        Ok(())
    }

    fn wait_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.backend.wait_for_slot(slot)?;
        self.slots[slot] = SlotState::Idle;
        Ok(())
    }

    fn wait_for_nonzero_extent(&mut self) -> vk::Extent2D {
        let mut extent = self.backend.framebuffer_extent();
        if extent.width == 0 || extent.height == 0 {
            info!("Framebuffer is zero-sized, waiting for the window to be restored");
            while extent.width == 0 || extent.height == 0 {
                self.backend.wait_for_extent();
                extent = self.backend.framebuffer_extent();
            }
        }
        extent
    }
}
