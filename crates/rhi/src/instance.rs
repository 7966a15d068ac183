//! Vulkan instance creation.
//!
//! [`Instance`] loads the Vulkan library, checks that every surface
//! extension the window system asks for is present, and optionally enables
//! the Khronos validation layer with a messenger that forwards reports to
//! `tracing`.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_rhi::instance::Instance;
//!
//! # fn example() -> Result<(), vkframe_rhi::RhiError> {
//! let instance = Instance::new(cfg!(debug_assertions), &[ash::khr::surface::NAME])?;
//! let _raw = instance.handle();
//! # Ok(())
//! # }
//! ```

use std::borrow::Cow;
use std::ffi::{CStr, c_char, c_void};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::physical_device::missing_extensions;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const API_VERSION: u32 = vk::API_VERSION_1_2;

/// Validation messenger and the loader that destroys it.
struct Validation {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Owns the `VkInstance` and, when enabled, its validation messenger.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    validation: Option<Validation>,
}

impl Instance {
    /// Creates an instance with `VK_KHR_surface` plus `surface_extensions`.
    ///
    /// A requested but unavailable validation layer is skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// - [`RhiError::LoadingError`] if no Vulkan loader is installed
    /// - [`RhiError::MissingExtension`] naming every absent extension
    /// - [`RhiError::VulkanError`] if instance or messenger creation fails
    pub fn new(enable_validation: bool, surface_extensions: &[&CStr]) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && has_validation_layer(&entry)?;
        if enable_validation && !validation {
            warn!("Validation layer requested but not installed, continuing without it");
        }

        let required = required_extensions(surface_extensions);
        let available = unsafe { entry.enumerate_instance_extension_properties(None)? };
        let missing = missing_extensions(&available, &required);
        if !missing.is_empty() {
            error!("Missing required instance extensions: {:?}", missing);
            return Err(RhiError::MissingExtension(missing.join(", ")));
        }

        let mut extensions: Vec<*const c_char> = required.iter().map(|ext| ext.as_ptr()).collect();
        let mut layers: Vec<*const c_char> = Vec::new();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"vkframe")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vkframe")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(API_VERSION);

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan instance created: {} extension(s), validation {}",
            extensions.len(),
            if validation { "on" } else { "off" }
        );

        let validation = if validation {
            match create_validation(&entry, &instance) {
                Ok(validation) => Some(validation),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            validation,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.validation.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(validation) = self.validation.take() {
                validation
                    .loader
                    .destroy_debug_utils_messenger(validation.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// `VK_KHR_surface` followed by `surface_extensions`, without duplicates.
fn required_extensions<'a>(surface_extensions: &[&'a CStr]) -> Vec<&'a CStr> {
    let mut required: Vec<&CStr> = vec![ash::khr::surface::NAME];
    for &ext in surface_extensions {
        if !required.contains(&ext) {
            required.push(ext);
        }
    }
    required
}

fn has_validation_layer(entry: &Entry) -> RhiResult<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER)))
}

fn create_validation(entry: &Entry, instance: &ash::Instance) -> RhiResult<Validation> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(validation_callback));

    let messenger = unsafe { loader.create_debug_utils_messenger(&info, None)? };
    Ok(Validation { loader, messenger })
}

fn message_kind(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

/// Forwards validation reports to `tracing` at the matching level.
unsafe extern "system" fn validation_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the layer passes either null or a valid callback data pointer
    // whose message is a null-terminated string for the call's duration.
    let message = match unsafe { callback_data.as_ref() } {
        Some(data) if !data.p_message.is_null() => unsafe {
            CStr::from_ptr(data.p_message).to_string_lossy()
        },
        _ => Cow::Borrowed("(no message)"),
    };
    let kind = message_kind(message_type);

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "[{}] {}", kind, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "[{}] {}", kind, message);
    } else {
        debug!(target: "vulkan", "[{}] {}", kind, message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_extensions_lead_with_surface_and_dedup() {
        let xlib = c"VK_KHR_xlib_surface";
        let required = required_extensions(&[ash::khr::surface::NAME, xlib, xlib]);
        assert_eq!(required, vec![ash::khr::surface::NAME, xlib]);
    }

    #[test]
    fn test_message_kind_prefers_validation() {
        let both = vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
        assert_eq!(message_kind(both), "validation");
        assert_eq!(
            message_kind(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL),
            "general"
        );
    }

    #[test]
    fn test_unknown_surface_extension_is_rejected() {
        // Needs a Vulkan loader; machines without one skip.
        match Instance::new(false, &[c"VK_VKFRAME_not_a_real_extension"]) {
            Ok(_) => panic!("instance created with a bogus extension"),
            Err(RhiError::LoadingError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => assert!(matches!(e, RhiError::MissingExtension(_)), "{e:?}"),
        }
    }
}
