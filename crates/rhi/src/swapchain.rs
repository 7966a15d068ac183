//! Swapchain management.
//!
//! This module handles VkSwapchainKHR creation, image acquisition, and presentation.
//!
//! # Overview
//!
//! - [`SwapchainSupportDetails`] captures what a surface offers.
//! - [`SwapchainPlan`] negotiates format, present mode, extent and image count
//!   from those details. It is pure so it can be checked without a GPU.
//! - [`Swapchain`] owns the `VkSwapchainKHR` and its image views and implements
//!   the acquire/present protocol, reporting [`SwapchainStatus`] so the frame
//!   loop can decide when to recreate.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use vkframe_rhi::{instance::Instance, device::Device, swapchain::{Swapchain, AcquiredImage}};
//! # use ash::vk;
//! # fn example(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR,
//! #            image_available: vk::Semaphore, render_finished: vk::Semaphore)
//! #            -> vkframe_rhi::RhiResult<()> {
//! let mut swapchain = Swapchain::new(instance, device, surface, vk::Extent2D { width: 1280, height: 720 }, false)?;
//!
//! match swapchain.acquire_next_image(image_available)? {
//!     AcquiredImage::Acquired { index, .. } => {
//!         // ... record and submit work for `index` ...
//!         let status = swapchain.present(index, render_finished)?;
//!         if status.needs_recreate() {
//!             swapchain.recreate(instance, surface, vk::Extent2D { width: 1280, height: 720 })?;
//!         }
//!     }
//!     AcquiredImage::OutOfDate => {
//!         swapchain.recreate(instance, surface, vk::Extent2D { width: 1280, height: 720 })?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::create_image_view;
use crate::instance::Instance;

/// Outcome of an acquire or present call that the frame loop can recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    /// The swapchain matches the surface.
    Success,
    /// Presentation still works but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// The swapchain can no longer be used.
    OutOfDate,
}

impl SwapchainStatus {
    /// Whether the swapchain should be rebuilt.
    #[inline]
    pub fn needs_recreate(self) -> bool {
        self != SwapchainStatus::Success
    }
}

/// Result of [`Swapchain::acquire_next_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquiredImage {
    /// An image was acquired; the image-available semaphore will be signaled.
    Acquired {
        /// Index into the swapchain images.
        index: u32,
        /// The swapchain should be rebuilt after this frame.
        suboptimal: bool,
    },
    /// No image was acquired; the swapchain must be rebuilt before rendering.
    OutOfDate,
}

impl AcquiredImage {
    /// Collapse into the acquire/present status taxonomy.
    pub fn status(self) -> SwapchainStatus {
        match self {
            AcquiredImage::Acquired {
                suboptimal: false, ..
            } => SwapchainStatus::Success,
            AcquiredImage::Acquired {
                suboptimal: true, ..
            } => SwapchainStatus::Suboptimal,
            AcquiredImage::OutOfDate => SwapchainStatus::OutOfDate,
        }
    }

    /// The acquired image index, if any.
    pub fn index(self) -> Option<u32> {
        match self {
            AcquiredImage::Acquired { index, .. } => Some(index),
            AcquiredImage::OutOfDate => None,
        }
    }
}

/// Maps the raw result of `vkAcquireNextImageKHR`.
///
/// Anything other than success, suboptimal or out-of-date is fatal.
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquiredImage> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquiredImage::Acquired { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage::OutOfDate),
        Err(result) => Err(RhiError::UnexpectedResult {
            operation: "vkAcquireNextImageKHR",
            result,
        }),
    }
}

/// Maps the raw result of `vkQueuePresentKHR`.
pub fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<SwapchainStatus> {
    match result {
        Ok(false) => Ok(SwapchainStatus::Success),
        Ok(true) => Ok(SwapchainStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
        Err(result) => Err(RhiError::UnexpectedResult {
            operation: "vkQueuePresentKHR",
            result,
        }),
    }
}

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// The negotiated parameters of a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// Negotiates swapchain parameters against a surface.
    ///
    /// # Errors
    ///
    /// A surface with zero formats or zero present modes cannot be rendered
    /// to and yields [`RhiError::NoSurfaceFormats`] or [`RhiError::NoPresentModes`].
    pub fn negotiate(
        support: &SwapchainSupportDetails,
        requested: vk::Extent2D,
        vsync: bool,
    ) -> RhiResult<Self> {
        if support.formats.is_empty() {
            return Err(RhiError::NoSurfaceFormats);
        }
        if support.present_modes.is_empty() {
            return Err(RhiError::NoPresentModes);
        }

        Ok(Self {
            surface_format: choose_surface_format(&support.formats),
            present_mode: choose_present_mode(&support.present_modes, vsync),
            extent: choose_extent(&support.capabilities, requested.width, requested.height),
            image_count: determine_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Vulkan swapchain wrapper.
///
/// Owns the swapchain handle and one image view per swapchain image. The
/// images themselves belong to the swapchain.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    plan: SwapchainPlan,
    vsync: bool,
}

impl Swapchain {
    /// Creates a new swapchain for `surface`.
    ///
    /// # Errors
    ///
    /// Returns an error if the surface cannot be queried, exposes no formats
    /// or present modes, or swapchain creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        vsync: bool,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let (swapchain, images, image_views, plan) = Self::create_internal(
            instance,
            &device,
            &swapchain_loader,
            surface,
            extent,
            vsync,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            image_views,
            plan,
            vsync,
        })
    }

    #[allow(clippy::type_complexity)]
    fn create_internal(
        instance: &Instance,
        device: &Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<(
        vk::SwapchainKHR,
        Vec<vk::Image>,
        Vec<vk::ImageView>,
        SwapchainPlan,
    )> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, &surface_loader)?;
        let plan = SwapchainPlan::negotiate(&support, extent, vsync)?;

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
            plan.extent.width,
            plan.extent.height,
            plan.surface_format.format,
            plan.surface_format.color_space,
            plan.present_mode,
            plan.image_count
        );

        let queue_families = device.queue_families();
        let graphics_family = queue_families.graphics;
        let present_family = queue_families.present;
        let queue_family_indices = [graphics_family, present_family];

        let (sharing_mode, queue_family_indices_slice) = if graphics_family != present_family {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                graphics_family, present_family
            );
            (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices_slice)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_image_view(
                device,
                image,
                plan.surface_format.format,
                vk::ImageAspectFlags::COLOR,
            ) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for view in image_views {
                            device.handle().destroy_image_view(view, None);
                        }
                        swapchain_loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(e);
                }
            }
        }

        info!("Swapchain created with {} images", images.len());
        Ok((swapchain, images, image_views, plan))
    }

    /// Rebuilds the swapchain for a new extent.
    ///
    /// Idles the device first. The caller is responsible for rebuilding
    /// anything that referenced the old image views.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!(
            "Recreating swapchain for {}x{}",
            extent.width, extent.height
        );

        self.destroy_image_views();

        let old_swapchain = self.swapchain;
        let result = Self::create_internal(
            instance,
            &self.device,
            &self.swapchain_loader,
            surface,
            extent,
            self.vsync,
            old_swapchain,
        );

        // The old swapchain is retired either way.
        unsafe {
            self.swapchain_loader.destroy_swapchain(old_swapchain, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();

        let (swapchain, images, image_views, plan) = result?;
        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;
        self.plan = plan;
        Ok(())
    }

    /// Acquires the next presentable image, waiting without timeout.
    ///
    /// `semaphore` is signaled once the image is ready to be written.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<AcquiredImage> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        classify_acquire(result)
    }

    /// Queues `image_index` for presentation after `wait_semaphore` signals.
    pub fn present(
        &self,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<SwapchainStatus> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.present_queue(), &present_info)
        };
        let status = classify_present(result)?;
        if status != SwapchainStatus::Success {
            warn!("Present reported {:?}", status);
        }
        Ok(status)
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn plan(&self) -> &SwapchainPlan {
        &self.plan
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.plan.surface_format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.plan.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    fn destroy_image_views(&mut self) {
        for &image_view in &self.image_views {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }
        self.image_views.clear();
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();

        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.plan.extent.width,
                self.plan.extent.height,
                self.images.len()
            );
        }
    }
}

/// Chooses the surface format.
///
/// Prefers B8G8R8A8_UNORM with SRGB_NONLINEAR, then B8G8R8A8_SRGB, then the
/// first format the surface lists.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    const PREFERRED: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::B8G8R8A8_SRGB];

    for wanted in PREFERRED {
        if let Some(&format) = formats.iter().find(|f| {
            f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) {
            debug!("Selected surface format {:?} with SRGB_NONLINEAR", wanted);
            return format;
        }
    }

    warn!(
        "Using first available surface format: {:?}",
        formats[0].format
    );
    formats[0]
}

/// Chooses the present mode.
///
/// With vsync FIFO is requested. Without it MAILBOX, then IMMEDIATE. When the
/// wanted modes are absent FIFO is used if listed, else the first listed mode.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let wanted: &[vk::PresentModeKHR] = if vsync {
        &[vk::PresentModeKHR::FIFO]
    } else {
        &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
    };

    if let Some(&mode) = wanted.iter().find(|mode| present_modes.contains(mode)) {
        debug!("Selected present mode {:?} (vsync: {})", mode, vsync);
        return mode;
    }

    if present_modes.contains(&vk::PresentModeKHR::FIFO) {
        debug!("Falling back to FIFO present mode");
        return vk::PresentModeKHR::FIFO;
    }

    warn!("Using first available present mode: {:?}", present_modes[0]);
    present_modes[0]
}

/// Chooses the swapchain extent.
///
/// If the surface dictates its extent it is used as-is; otherwise the requested
/// size is clamped to the surface limits.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, clamped to the maximum when the surface sets one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}
