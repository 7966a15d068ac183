//! Window management using winit.
//!
//! [`Window`] is a cheaply cloneable handle shared between the application's
//! event handler and the renderer. The event handler marks resizes; the
//! renderer polls the framebuffer extent and consumes the resize flag at the
//! end of each frame.

use std::ffi::CStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use vkframe_core::{Error, RendererConfig, Result};

/// RAII wrapper for a Vulkan surface.
///
/// The Vulkan instance must outlive this surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for surface capability, format and present mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: The surface was created by ash_window::create_surface from the
        // instance the loader was created with, and is destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Shared handle to the application window.
#[derive(Clone)]
pub struct Window {
    window: Arc<WinitWindow>,
    resized: Arc<AtomicBool>,
}

impl Window {
    /// Creates a resizable window with the configured title and size.
    pub fn new(event_loop: &ActiveEventLoop, config: &RendererConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.window_title.as_str())
            .with_inner_size(PhysicalSize::new(config.window_width, config.window_height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!(
            "Window created: {}x{} \"{}\"",
            config.window_width,
            config.window_height,
            config.window_title
        );

        Ok(Self {
            window: Arc::new(window),
            resized: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Current framebuffer size in pixels. Zero while minimized on some
    /// platforms.
    pub fn framebuffer_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    pub fn is_minimized(&self) -> bool {
        let extent = self.framebuffer_extent();
        extent.width == 0 || extent.height == 0 || self.window.is_minimized().unwrap_or(false)
    }

    /// Records that the framebuffer was resized.
    pub fn mark_resized(&self) {
        self.resized.store(true, Ordering::Release);
    }

    /// Returns whether a resize was recorded since the last call, clearing
    /// the flag.
    pub fn take_resized(&self) -> bool {
        self.resized.swap(false, Ordering::AcqRel)
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface for this window.
    pub fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| Error::Vulkan(format!("Failed to enumerate required extensions: {}", e)))?;

        let extensions: Vec<&'static CStr> = extensions
            .iter()
            // SAFETY: ash_window returns pointers to static, null-terminated
            // extension name constants.
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect();

        tracing::debug!("Required Vulkan extensions for surface: {:?}", extensions);
        Ok(extensions)
    }

    /// Creates a Vulkan surface for this window.
    ///
    /// # Errors
    ///
    /// Returns an error if the window handles are unavailable or surface
    /// creation fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: The entry and instance are valid and the handles come from a
        // live winit window. The surface is destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}
