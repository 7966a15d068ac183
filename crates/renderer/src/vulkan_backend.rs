//! [`FrameBackend`] over real Vulkan objects.

use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use vkframe_core::RendererConfig;
use vkframe_platform::{Surface, Window};
use vkframe_rhi::allocator::ResourceAllocator;
use vkframe_rhi::command::{CommandBuffer, CommandPool};
use vkframe_rhi::device::Device;
use vkframe_rhi::instance::Instance;
use vkframe_rhi::physical_device::{clamp_sample_count, find_depth_format, select_physical_device};
use vkframe_rhi::swapchain::{AcquiredImage, Swapchain, SwapchainStatus};
use vkframe_rhi::{RhiError, vk};

use crate::backend::FrameBackend;
use crate::error::RendererResult;
use crate::frame_slot::FrameSlot;
use crate::passes::{ClearValues, PassId, TargetFormats};
use crate::targets::{RenderTargets, TargetDescriptors};

/// Pause between framebuffer extent polls while the window is minimized.
const EXTENT_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Owns the Vulkan context, the swapchain, the frame slots and the render
/// targets.
///
/// Fields are released in reverse dependency order by `Drop`.
pub struct VulkanBackend {
    window: Window,
    formats: TargetFormats,

    descriptors: ManuallyDrop<TargetDescriptors>,
    targets: ManuallyDrop<RenderTargets>,
    slots: ManuallyDrop<Vec<FrameSlot>>,
    command_pool: ManuallyDrop<CommandPool>,
    allocator: ManuallyDrop<ResourceAllocator>,
    swapchain: ManuallyDrop<Swapchain>,
    surface: ManuallyDrop<Surface>,
    device: ManuallyDrop<Arc<Device>>,
    instance: ManuallyDrop<Instance>,
}

impl VulkanBackend {
    /// Creates the whole Vulkan context for `window`.
    pub fn new(window: &Window, config: &RendererConfig) -> RendererResult<Self> {
        let extent = window.framebuffer_extent();
        info!(
            "Initializing Vulkan backend ({}x{}, {} frame slot(s))",
            extent.width, extent.height, config.frames_in_flight
        );

        let surface_extensions = window.required_instance_extensions()?;
        let instance = Instance::new(config.enable_validation, &surface_extensions)?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;

        let depth_format = find_depth_format(instance.handle(), physical_device.device)?;
        let samples = clamp_sample_count(
            config.msaa_samples,
            physical_device.framebuffer_sample_counts(),
        );
        if samples.as_raw() != config.msaa_samples {
            warn!(
                "Requested {}x MSAA, using {}x",
                config.msaa_samples,
                samples.as_raw()
            );
        }

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            extent,
            config.vsync,
        )?;

        let mut allocator = ResourceAllocator::new(device.clone())?;
        let formats = TargetFormats {
            swapchain: swapchain.format(),
            depth: depth_format,
            samples,
            post_pass: config.post_pass,
        };
        let targets = RenderTargets::new(&mut allocator, &formats, &swapchain)?;
        let descriptors = TargetDescriptors::new(device.clone(), &targets)?;

        let command_pool = CommandPool::new(device.clone(), device.queue_families().graphics)?;
        let slots = FrameSlot::create_all(
            &device,
            &command_pool,
            config.frames_in_flight as usize,
        )?;

        info!(
            "Vulkan backend ready: {} swapchain image(s), depth {:?}, {}x MSAA",
            swapchain.image_count(),
            depth_format,
            samples.as_raw()
        );

        Ok(Self {
            window: window.clone(),
            formats,
            descriptors: ManuallyDrop::new(descriptors),
            targets: ManuallyDrop::new(targets),
            slots: ManuallyDrop::new(slots),
            command_pool: ManuallyDrop::new(command_pool),
            allocator: ManuallyDrop::new(allocator),
            swapchain: ManuallyDrop::new(swapchain),
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            instance: ManuallyDrop::new(instance),
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    #[inline]
    pub fn allocator_mut(&mut self) -> &mut ResourceAllocator {
        &mut self.allocator
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    #[inline]
    pub fn descriptors(&self) -> &TargetDescriptors {
        &self.descriptors
    }

    #[inline]
    pub fn formats(&self) -> &TargetFormats {
        &self.formats
    }

    fn slot(&self, slot: usize) -> &FrameSlot {
        &self.slots[slot]
    }
}

impl FrameBackend for VulkanBackend {
    type CommandBuffer = CommandBuffer;

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.slot(slot).in_flight().wait()?;
        Ok(())
    }

    fn reset_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.slot(slot).in_flight().reset()?;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> RendererResult<AcquiredImage> {
        let semaphore = self.slot(slot).image_available().handle();
        Ok(self.swapchain.acquire_next_image(semaphore)?)
    }

    fn begin_commands(&mut self, slot: usize) -> RendererResult<()> {
        let cmd = self.slot(slot).command_buffer();
        cmd.reset()?;
        cmd.begin()?;
        Ok(())
    }

    fn begin_pass(
        &mut self,
        slot: usize,
        image_index: u32,
        pass: PassId,
        clear: &ClearValues,
    ) -> RendererResult<()> {
        let Some(targets) = self.targets.pass(pass) else {
            panic!("{pass} pass was begun but this renderer was built without it");
        };
        let framebuffer = targets
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| {
                RhiError::SwapchainError(format!(
                    "no {pass} framebuffer for swapchain image {image_index}"
                ))
            })?;

        let extent = framebuffer.extent();
        let clear_values = clear.for_attachments(targets.render_pass.desc().attachment_count());

        let cmd = self.slot(slot).command_buffer();
        cmd.begin_render_pass(
            targets.render_pass.handle(),
            framebuffer.handle(),
            extent,
            clear_values,
        );
        cmd.set_viewport_and_scissor(extent);
        Ok(())
    }

    fn end_pass(&mut self, slot: usize, _pass: PassId) {
        self.slot(slot).command_buffer().end_render_pass();
    }

    fn end_commands(&mut self, slot: usize) -> RendererResult<()> {
        self.slot(slot).command_buffer().end()?;
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> RendererResult<()> {
        let frame = self.slot(slot);

        let wait_semaphores = [frame.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.render_finished().handle()];
        let command_buffers = [frame.command_buffer().handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer has been ended and the fence was reset
        // in begin_frame after its previous signal was waited on.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], frame.in_flight().handle())?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RendererResult<SwapchainStatus> {
        let wait_semaphore = self.slot(slot).render_finished().handle();
        Ok(self.swapchain.present(image_index, wait_semaphore)?)
    }

    fn command_buffer(&self, slot: usize) -> &CommandBuffer {
        self.slot(slot).command_buffer()
    }

    fn framebuffer_extent(&mut self) -> vk::Extent2D {
        self.window.framebuffer_extent()
    }

    fn wait_for_extent(&mut self) {
        std::thread::sleep(EXTENT_POLL_INTERVAL);
    }

    fn take_resized(&mut self) -> bool {
        self.window.take_resized()
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        self.swapchain
            .recreate(&self.instance, self.surface.handle(), extent)?;
        self.formats.swapchain = self.swapchain.format();

        let targets = RenderTargets::new(&mut self.allocator, &self.formats, &self.swapchain)?;
        *self.targets = targets;
        self.descriptors.write(&self.targets);

        debug!(
            "Backend rebuilt for {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(())
    }

    fn wait_idle(&mut self) -> RendererResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!(
                "Failed to wait for device idle during backend drop: {:?}",
                e
            );
        }

        // SAFETY: each field is dropped exactly once, here, after the device
        // is idle, dependents before the objects they were created from.
        unsafe {
            ManuallyDrop::drop(&mut self.descriptors);
            ManuallyDrop::drop(&mut self.targets);
            ManuallyDrop::drop(&mut self.slots);
            ManuallyDrop::drop(&mut self.command_pool);
            ManuallyDrop::drop(&mut self.allocator);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Vulkan backend destroyed");
    }
}
