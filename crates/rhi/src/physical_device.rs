//! Physical device (GPU) selection.
//!
//! This module handles GPU enumeration and selection based on capabilities.
//!
//! # Overview
//!
//! The physical device selection process involves:
//! 1. Enumerating all available GPUs
//! 2. Checking each GPU for graphics and present queue families
//! 3. Verifying required device extensions (swapchain) and features
//! 4. Selecting the most suitable GPU (preferring discrete GPUs)
//!
//! It also hosts the format and sample-count negotiation helpers that depend
//! only on physical device properties.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Device extensions every candidate GPU must expose.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Depth formats tried in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue family indices found while probing a device.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueFamilyIndices {
    /// Index of the queue family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// Index of the queue family that supports presentation to a surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Checks if both graphics and present families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Converts into resolved families once both are known.
    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics_family?,
            present: self.present_family?,
        })
    }
}

/// Queue families chosen for a logical device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Returns the distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Information about a physical device (GPU).
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features.
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue families used for rendering and presentation.
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    /// Sample counts usable for a color + depth framebuffer on this device.
    pub fn framebuffer_sample_counts(&self) -> vk::SampleCountFlags {
        self.properties.limits.framebuffer_color_sample_counts
            & self.properties.limits.framebuffer_depth_sample_counts
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the most suitable physical device for rendering to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU has graphics and present
/// queues, the swapchain extension and sampler anisotropy.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut suitable_devices: Vec<(PhysicalDeviceInfo, u32)> = Vec::new();

    for device in devices {
        if let Some(info) = check_device_suitability(instance, device, surface, surface_loader) {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            suitable_devices.push((info, score));
        }
    }

    suitable_devices.sort_by(|a, b| b.1.cmp(&a.1));
    let Some((selected_device, score)) = suitable_devices.into_iter().next() else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected_device.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected_device.device_name(),
        selected_device.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected_device)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let device_name = unsafe {
        CStr::from_ptr(properties.device_name.as_ptr())
            .to_str()
            .unwrap_or("Unknown")
    };

    let indices = find_queue_families(instance, device, surface, surface_loader);
    let Some(queue_families) = indices.resolve() else {
        debug!(
            "GPU '{}' skipped: missing required queue families (graphics={}, present={})",
            device_name,
            indices.graphics_family.is_some(),
            indices.present_family.is_some()
        );
        return None;
    };

    let available = match unsafe { instance.enumerate_device_extension_properties(device) } {
        Ok(extensions) => extensions,
        Err(e) => {
            debug!("GPU '{}' skipped: cannot list extensions ({})", device_name, e);
            return None;
        }
    };
    if let Some(missing) = missing_extensions(&available, REQUIRED_DEVICE_EXTENSIONS).first() {
        debug!("GPU '{}' skipped: missing extension {}", device_name, missing);
        return None;
    }

    if features.sampler_anisotropy == vk::FALSE {
        debug!(
            "GPU '{}' skipped: sampler anisotropy not supported",
            device_name
        );
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
    })
}

/// Names from `required` that do not appear in `available`.
pub fn missing_extensions(
    available: &[vk::ExtensionProperties],
    required: &[&CStr],
) -> Vec<String> {
    required
        .iter()
        .copied()
        .filter(|name| {
            !available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == *name))
        })
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();

    for (i, family) in queue_families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present_support = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        };

        // A family doing both avoids concurrent sharing of swapchain images.
        if has_graphics && present_support {
            indices.graphics_family = Some(i);
            indices.present_family = Some(i);
            break;
        }

        if has_graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present_support && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = 0u32;

    match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => score += 10000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => score += 1000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => score += 100,
        vk::PhysicalDeviceType::CPU => score += 10,
        _ => score += 1,
    }

    score += info.properties.limits.max_image_dimension2_d;

    let vram_mb = (info.device_local_memory() / (1024 * 1024)) as u32;
    score += vram_mb.min(16000);

    score
}

/// Picks the first candidate depth format usable as an optimal-tiling depth attachment.
pub fn find_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> RhiResult<vk::Format> {
    find_supported_format(
        &DEPTH_FORMAT_CANDIDATES,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |format| unsafe {
            instance
                .get_physical_device_format_properties(physical_device, format)
                .optimal_tiling_features
        },
    )
}

/// First format in `candidates` whose optimal-tiling features contain `features`.
pub fn find_supported_format<F>(
    candidates: &[vk::Format],
    features: vk::FormatFeatureFlags,
    mut optimal_features: F,
) -> RhiResult<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatFeatureFlags,
{
    candidates
        .iter()
        .copied()
        .find(|&format| optimal_features(format).contains(features))
        .ok_or_else(|| {
            RhiError::UnsupportedFormat(format!(
                "none of {:?} support {:?}",
                candidates, features
            ))
        })
}

/// Clamps a requested sample count to the highest count in `supported` not above it.
///
/// Non-power-of-two requests round down. Single sampling is always available.
pub fn clamp_sample_count(requested: u32, supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
    const COUNTS: [(u32, vk::SampleCountFlags); 7] = [
        (64, vk::SampleCountFlags::TYPE_64),
        (32, vk::SampleCountFlags::TYPE_32),
        (16, vk::SampleCountFlags::TYPE_16),
        (8, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
        (1, vk::SampleCountFlags::TYPE_1),
    ];

    COUNTS
        .iter()
        .find(|(count, flag)| *count <= requested && supported.contains(*flag))
        .map(|&(_, flag)| flag)
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_resolve() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.resolve().is_none());

        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!indices.is_complete());
        assert!(indices.resolve().is_none());

        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert!(indices.is_complete());
        assert_eq!(
            indices.resolve(),
            Some(QueueFamilies {
                graphics: 0,
                present: 2
            })
        );
    }

    #[test]
    fn test_unique_families() {
        let same = QueueFamilies {
            graphics: 1,
            present: 1,
        };
        assert_eq!(same.unique_families(), vec![1]);

        let split = QueueFamilies {
            graphics: 0,
            present: 3,
        };
        assert_eq!(split.unique_families(), vec![0, 3]);
    }

    #[test]
    fn test_find_supported_format_prefers_first_match() {
        let format = find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| {
                if format == vk::Format::D32_SFLOAT {
                    vk::FormatFeatureFlags::empty()
                } else {
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                }
            },
        )
        .unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn test_find_supported_format_none() {
        let result = find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatFeatureFlags::SAMPLED_IMAGE,
        );
        assert!(matches!(result, Err(RhiError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_clamp_sample_count() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4;
        assert_eq!(
            clamp_sample_count(8, supported),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            clamp_sample_count(2, supported),
            vk::SampleCountFlags::TYPE_2
        );
        assert_eq!(
            clamp_sample_count(3, supported),
            vk::SampleCountFlags::TYPE_2
        );
        assert_eq!(
            clamp_sample_count(1, supported),
            vk::SampleCountFlags::TYPE_1
        );
        assert_eq!(
            clamp_sample_count(16, vk::SampleCountFlags::empty()),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn test_missing_extensions() {
        let swapchain = vk::ExtensionProperties::default()
            .extension_name(ash::khr::swapchain::NAME)
            .unwrap();
        assert!(missing_extensions(&[swapchain], REQUIRED_DEVICE_EXTENSIONS).is_empty());

        let missing = missing_extensions(&[], REQUIRED_DEVICE_EXTENSIONS);
        assert_eq!(missing, vec!["VK_KHR_swapchain".to_string()]);
    }
}
