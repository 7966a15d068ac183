//! Recording mock backend for frame loop tests.
//!
//! The mock simulates a GPU that finishes a slot's work only when the slot's
//! fence is waited on, and records a violation whenever the frame loop
//! re-records a slot or writes a swapchain image while earlier work on it
//! may still be executing.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use vkframe_renderer::backend::FrameBackend;
use vkframe_renderer::frame_sync::{BeginFrame, EndFrame, FrameSync};
use vkframe_renderer::passes::{
    ClearValues, DEFAULT_CLEAR_COLOR, PassId, PassSetLayout, TargetFormats,
};
use vkframe_renderer::{RendererError, RendererResult};
use vkframe_rhi::RhiError;
use vkframe_rhi::swapchain::{AcquiredImage, SwapchainStatus};
use vkframe_rhi::vk;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    WaitSlot(usize),
    ResetSlot(usize),
    Acquire { slot: usize, image: Option<u32> },
    BeginCommands(usize),
    BeginPass { slot: usize, image: u32, pass: PassId },
    EndPass { slot: usize, pass: PassId },
    Draw { slot: usize },
    EndCommands(usize),
    Submit(usize),
    Present { slot: usize, image: u32 },
    WaitForExtent,
    WaitIdle,
    Recreate { width: u32, height: u32 },
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// Command buffer handle that logs draws.
pub struct MockCommandBuffer {
    slot: usize,
    log: EventLog,
}

impl MockCommandBuffer {
    pub fn draw(&self) {
        self.log.borrow_mut().push(Event::Draw { slot: self.slot });
    }
}

pub struct MockBackend {
    log: EventLog,
    command_buffers: Vec<MockCommandBuffer>,
    image_count: usize,
    image_count_after_recreate: Option<usize>,
    formats: TargetFormats,

    acquire_calls: usize,
    out_of_date_calls: Vec<usize>,
    acquire_error: Option<vk::Result>,
    acquire_script: VecDeque<AcquiredImage>,
    next_image: u32,
    present_script: VecDeque<SwapchainStatus>,
    extents: VecDeque<vk::Extent2D>,
    /// Resize notification the window has not handed over yet.
    window_resized: bool,

    /// Submitted and not yet waited on.
    pending: Vec<bool>,
    fence_signaled: Vec<bool>,
    /// Image each slot's open frame renders to.
    slot_image: Vec<Option<u32>>,
    /// Slot whose submission last wrote each image.
    image_writer: Vec<Option<usize>>,

    /// Pass layout at creation, then one per recreation.
    pub layouts: Vec<PassSetLayout>,
    pub violations: Vec<String>,
}

impl MockBackend {
    pub fn new(slots: usize, images: usize) -> Self {
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        let formats = TargetFormats {
            swapchain: vk::Format::B8G8R8A8_UNORM,
            depth: vk::Format::D32_SFLOAT,
            samples: vk::SampleCountFlags::TYPE_4,
            post_pass: true,
        };
        let extent = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        let command_buffers = (0..slots)
            .map(|slot| MockCommandBuffer {
                slot,
                log: log.clone(),
            })
            .collect();

        Self {
            log,
            command_buffers,
            image_count: images,
            image_count_after_recreate: None,
            formats,
            acquire_calls: 0,
            out_of_date_calls: Vec::new(),
            acquire_error: None,
            acquire_script: VecDeque::new(),
            next_image: 0,
            present_script: VecDeque::new(),
            extents: VecDeque::from([extent]),
            window_resized: false,
            pending: vec![false; slots],
            fence_signaled: vec![true; slots],
            slot_image: vec![None; slots],
            image_writer: vec![None; images],
            layouts: vec![PassSetLayout::new(&formats, images, extent)],
            violations: Vec::new(),
        }
    }

    /// The `call`-th acquire (1-based) reports out-of-date.
    pub fn out_of_date_on_acquire(mut self, call: usize) -> Self {
        self.out_of_date_calls.push(call);
        self
    }

    /// Every acquire fails with `result`.
    pub fn fail_acquire(mut self, result: vk::Result) -> Self {
        self.acquire_error = Some(result);
        self
    }

    /// Acquire results returned before falling back to round-robin.
    pub fn acquire_script(mut self, script: impl IntoIterator<Item = AcquiredImage>) -> Self {
        self.acquire_script = script.into_iter().collect();
        self
    }

    /// Present results returned before falling back to success.
    pub fn present_script(mut self, script: impl IntoIterator<Item = SwapchainStatus>) -> Self {
        self.present_script = script.into_iter().collect();
        self
    }

    /// Framebuffer extents reported by successive polls; the last one repeats.
    pub fn extents(mut self, extents: impl IntoIterator<Item = (u32, u32)>) -> Self {
        self.extents = extents
            .into_iter()
            .map(|(width, height)| vk::Extent2D { width, height })
            .collect();
        self
    }

    /// Simulates the window reporting a resize.
    pub fn resize_window(&mut self) {
        self.window_resized = true;
    }

    pub fn window_resize_pending(&self) -> bool {
        self.window_resized
    }

    pub fn image_count_after_recreate(mut self, images: usize) -> Self {
        self.image_count_after_recreate = Some(images);
        self
    }

    pub fn formats(&self) -> &TargetFormats {
        &self.formats
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.log.borrow_mut().clear();
    }

    fn push(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }
}

impl FrameBackend for MockBackend {
    type CommandBuffer = MockCommandBuffer;

    fn slot_count(&self) -> usize {
        self.command_buffers.len()
    }

    fn image_count(&self) -> usize {
        self.image_count
    }

    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.push(Event::WaitSlot(slot));
        self.pending[slot] = false;
        self.fence_signaled[slot] = true;
        Ok(())
    }

    fn reset_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.push(Event::ResetSlot(slot));
        if !self.fence_signaled[slot] {
            self.violations
                .push(format!("fence of slot {slot} reset before it was waited on"));
        }
        self.fence_signaled[slot] = false;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> RendererResult<AcquiredImage> {
        self.acquire_calls += 1;

        if let Some(result) = self.acquire_error {
            return Err(RendererError::Rhi(RhiError::UnexpectedResult {
                operation: "vkAcquireNextImageKHR",
                result,
            }));
        }

        let acquired = if self.out_of_date_calls.contains(&self.acquire_calls) {
            AcquiredImage::OutOfDate
        } else if let Some(scripted) = self.acquire_script.pop_front() {
            scripted
        } else {
            let index = self.next_image % self.image_count as u32;
            self.next_image = index + 1;
            AcquiredImage::Acquired {
                index,
                suboptimal: false,
            }
        };

        self.push(Event::Acquire {
            slot,
            image: acquired.index(),
        });
        Ok(acquired)
    }

    fn begin_commands(&mut self, slot: usize) -> RendererResult<()> {
        self.push(Event::BeginCommands(slot));
        if self.pending[slot] {
            self.violations.push(format!(
                "slot {slot} re-recorded while its previous submission is pending"
            ));
        }
        Ok(())
    }

    fn begin_pass(
        &mut self,
        slot: usize,
        image_index: u32,
        pass: PassId,
        clear: &ClearValues,
    ) -> RendererResult<()> {
        self.push(Event::BeginPass {
            slot,
            image: image_index,
            pass,
        });

        if let Some(layout) = self.layouts.last().and_then(|l| l.pass(pass)) {
            clear.for_attachments(layout.attachment_count());
        }

        if pass == PassId::Ui {
            if let Some(writer) = self.image_writer[image_index as usize]
                && self.pending[writer]
            {
                self.violations.push(format!(
                    "image {image_index} written by slot {slot} while slot {writer}'s work on it is pending"
                ));
            }
            self.slot_image[slot] = Some(image_index);
        }
        Ok(())
    }

    fn end_pass(&mut self, slot: usize, pass: PassId) {
        self.push(Event::EndPass { slot, pass });
    }

    fn end_commands(&mut self, slot: usize) -> RendererResult<()> {
        self.push(Event::EndCommands(slot));
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> RendererResult<()> {
        self.push(Event::Submit(slot));
        self.pending[slot] = true;
        if let Some(image) = self.slot_image[slot].take() {
            self.image_writer[image as usize] = Some(slot);
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<SwapchainStatus> {
        self.push(Event::Present {
            slot,
            image: image_index,
        });
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(SwapchainStatus::Success))
    }

    fn command_buffer(&self, slot: usize) -> &MockCommandBuffer {
        &self.command_buffers[slot]
    }

    fn framebuffer_extent(&mut self) -> vk::Extent2D {
        if self.extents.len() > 1 {
            self.extents.pop_front().unwrap()
        } else {
            *self.extents.front().unwrap()
        }
    }

    fn wait_for_extent(&mut self) {
        self.push(Event::WaitForExtent);
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.window_resized)
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        self.push(Event::Recreate {
            width: extent.width,
            height: extent.height,
        });
        if extent.width == 0 || extent.height == 0 {
            self.violations
                .push("swapchain recreated with a zero extent".to_string());
        }
        if self.pending.iter().any(|&pending| pending) {
            self.violations
                .push("swapchain recreated while work was pending".to_string());
        }

        if let Some(images) = self.image_count_after_recreate.take() {
            self.image_count = images;
        }
        self.image_writer = vec![None; self.image_count];
        self.next_image = 0;
        self.layouts
            .push(PassSetLayout::new(&self.formats, self.image_count, extent));
        Ok(())
    }

    fn wait_idle(&mut self) -> RendererResult<()> {
        self.push(Event::WaitIdle);
        self.pending.fill(false);
        self.fence_signaled.fill(true);
        Ok(())
    }
}

/// Records every pass with `draws` draws in the offscreen pass, then ends
/// the frame. Returns `None` when the frame was skipped.
pub fn run_frame(
    sync: &mut FrameSync<MockBackend>,
    draws: usize,
) -> RendererResult<Option<EndFrame>> {
    match sync.begin_frame()? {
        BeginFrame::Skipped => Ok(None),
        BeginFrame::Ready(_) => {
            for pass in PassId::ALL {
                sync.begin_pass(pass, &ClearValues::for_pass(pass, DEFAULT_CLEAR_COLOR))?;
                if pass == PassId::Offscreen {
                    for _ in 0..draws {
                        sync.require_open_pass(PassId::Offscreen);
                        sync.current_command_buffer().draw();
                    }
                }
                sync.end_pass();
            }
            sync.end_frame().map(Some)
        }
    }
}

/// Asserts every `ResetSlot(s)` and `BeginCommands(s)` follows a
/// `WaitSlot(s)` issued after the slot's last `Submit(s)`.
pub fn assert_waits_precede_reuse(events: &[Event], slots: usize) {
    let mut waited_since_submit = vec![true; slots];
    for (i, event) in events.iter().enumerate() {
        match *event {
            Event::WaitSlot(s) => waited_since_submit[s] = true,
            Event::Submit(s) => waited_since_submit[s] = false,
            Event::WaitIdle => waited_since_submit.fill(true),
            Event::ResetSlot(s) | Event::BeginCommands(s) => assert!(
                waited_since_submit[s],
                "event #{i} {event:?} reuses slot {s} before waiting on its fence"
            ),
            _ => {}
        }
    }
}

pub fn count(events: &[Event], predicate: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| predicate(e)).count()
}

pub fn position(events: &[Event], predicate: impl Fn(&Event) -> bool) -> Option<usize> {
    events.iter().position(predicate)
}
