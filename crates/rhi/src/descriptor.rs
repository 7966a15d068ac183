//! Descriptor set layouts, pools and sets.
//!
//! - [`DescriptorSetLayout`] keeps its bindings so writes can be checked against them
//! - [`DescriptorPool`] sizes itself from the layouts it will serve
//! - [`DescriptorSet`] writes buffer and image descriptors into an allocated set
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use vkframe_rhi::device::Device;
//! use vkframe_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkframe_rhi::RhiError> {
//! let layout = DescriptorSetLayout::new(
//!     device.clone(),
//!     &[DescriptorBindingBuilder::combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)],
//! )?;
//! let pool = DescriptorPool::for_layouts(device.clone(), &[(&layout, 2)])?;
//! let set = pool.allocate(&layout)?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Descriptor set layout that remembers its bindings.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding<'static>],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self {
            device,
            layout,
            bindings: bindings.to_vec(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Pool sizes needed to allocate `sets` copies of a layout with `bindings`.
pub fn pool_sizes(
    layouts: &[(&[vk::DescriptorSetLayoutBinding<'static>], u32)],
) -> Vec<vk::DescriptorPoolSize> {
    let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
    for (bindings, sets) in layouts {
        for binding in bindings.iter() {
            *counts.entry(binding.descriptor_type.as_raw()).or_default() +=
                binding.descriptor_count * sets;
        }
    }

    counts
        .into_iter()
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(ty),
            descriptor_count,
        })
        .collect()
}

pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Creates a pool large enough for the given `(layout, set count)` pairs.
    pub fn for_layouts(
        device: Arc<Device>,
        layouts: &[(&DescriptorSetLayout, u32)],
    ) -> RhiResult<Self> {
        let requests: Vec<_> = layouts
            .iter()
            .map(|(layout, sets)| (layout.bindings(), *sets))
            .collect();
        let sizes = pool_sizes(&requests);
        let max_sets = layouts.iter().map(|(_, sets)| sets).sum();
        Self::new(device, max_sets, &sizes)
    }

    /// Allocates one set of `layout`.
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> RhiResult<DescriptorSet> {
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };

        Ok(DescriptorSet {
            set: sets[0],
            bindings: layout.bindings().to_vec(),
        })
    }

    pub fn free(&self, sets: &[DescriptorSet]) -> RhiResult<()> {
        let handles: Vec<_> = sets.iter().map(DescriptorSet::handle).collect();
        unsafe {
            self.device
                .handle()
                .free_descriptor_sets(self.pool, &handles)?;
        }

        debug!("Freed {} descriptor set(s)", sets.len());

        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Descriptor set allocated from a [`DescriptorPool`].
///
/// Freed with its pool.
#[derive(Clone, Debug)]
pub struct DescriptorSet {
    set: vk::DescriptorSet,
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorSet {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    fn layout_binding(&self, binding: u32) -> &vk::DescriptorSetLayoutBinding<'static> {
        match self.bindings.iter().find(|b| b.binding == binding) {
            Some(layout_binding) => layout_binding,
            None => panic!("descriptor write to binding {binding}, which the layout does not declare"),
        }
    }

    /// Writes a buffer descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the layout has no such binding.
    pub fn write_buffer(&self, device: &Device, binding: u32, info: vk::DescriptorBufferInfo) {
        let ty = self.layout_binding(binding).descriptor_type;
        let infos = [info];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .descriptor_type(ty)
            .buffer_info(&infos);
        unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
    }

    /// Writes an image descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the layout has no such binding.
    pub fn write_image(&self, device: &Device, binding: u32, info: vk::DescriptorImageInfo) {
        let ty = self.layout_binding(binding).descriptor_type;
        let infos = [info];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .descriptor_type(ty)
            .image_info(&infos);
        unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
    }
}

#[inline]
pub fn buffer_info(
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range)
}

#[inline]
pub fn image_info(
    sampler: vk::Sampler,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(image_view)
        .image_layout(image_layout)
}

pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    #[inline]
    pub fn storage_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    #[inline]
    pub fn combined_image_sampler(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}
