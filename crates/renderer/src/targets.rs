//! Render targets, render passes and framebuffer sets.
//!
//! [`RenderTargets`] instantiates a [`PassSetLayout`] for one swapchain
//! configuration and is rebuilt from scratch whenever the swapchain is
//! recreated. The multisampled color, depth, resolve and post images are
//! shared by every swapchain image; the render passes' external
//! dependencies order consecutive frames on the graphics queue.
//!
//! [`TargetDescriptors`] exposes the resolved offscreen image and the post
//! output as combined-image-sampler descriptor sets. The sets themselves
//! survive recreation and are rewritten to point at the new images.

use std::sync::Arc;

use tracing::{debug, info};

use vkframe_rhi::RhiResult;
use vkframe_rhi::allocator::ResourceAllocator;
use vkframe_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSet, DescriptorSetLayout, image_info,
};
use vkframe_rhi::device::Device;
use vkframe_rhi::image::{Image, ImageDesc, Sampler};
use vkframe_rhi::render_pass::{Framebuffer, RenderPass};
use vkframe_rhi::swapchain::Swapchain;
use vkframe_rhi::vk;

use crate::passes::{OFFSCREEN_COLOR_FORMAT, POST_COLOR_FORMAT, PassId, PassSetLayout, TargetFormats};

/// One instantiated pass: its render pass and a framebuffer per swapchain image.
pub struct PassTargets {
    pub pass: PassId,
    pub render_pass: RenderPass,
    pub framebuffers: Vec<Framebuffer>,
}

/// Images, render passes and framebuffers for one swapchain configuration.
pub struct RenderTargets {
    layout: PassSetLayout,
    // Framebuffers reference the images below, so passes drop first.
    passes: Vec<PassTargets>,
    /// Multisampled color, absent when rendering single-sampled.
    offscreen_msaa: Option<Image>,
    /// Resolve target, or the color attachment itself when single-sampled.
    offscreen_color: Image,
    depth: Image,
    post_color: Option<Image>,
}

impl RenderTargets {
    /// Creates every target for `swapchain`.
    ///
    /// Attachment images are transitioned to the layouts the render passes
    /// expect with blocking one-shot barriers.
    pub fn new(
        allocator: &mut ResourceAllocator,
        formats: &TargetFormats,
        swapchain: &Swapchain,
    ) -> RhiResult<Self> {
        let extent = swapchain.extent();
        let layout = PassSetLayout::new(formats, swapchain.image_count(), extent);
        let multisampled = formats.samples != vk::SampleCountFlags::TYPE_1;

        let offscreen_msaa = if multisampled {
            let image = allocator.create_image(
                &ImageDesc::new(
                    "offscreen_msaa",
                    extent,
                    OFFSCREEN_COLOR_FORMAT,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT,
                )
                .samples(formats.samples),
            )?;
            Some(image)
        } else {
            None
        };

        let offscreen_color = allocator.create_image(&ImageDesc::new(
            "offscreen_color",
            extent,
            OFFSCREEN_COLOR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::STORAGE,
        ))?;

        let depth = allocator.create_image(
            &ImageDesc::new(
                "offscreen_depth",
                extent,
                formats.depth,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .samples(formats.samples),
        )?;

        let post_color = if formats.post_pass {
            let image = allocator.create_image(&ImageDesc::new(
                "post_color",
                extent,
                POST_COLOR_FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            ))?;
            Some(image)
        } else {
            None
        };

        for image in offscreen_msaa.iter().chain(std::iter::once(&offscreen_color)) {
            allocator.transition_image_layout(
                image.handle(),
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
            )?;
        }
        allocator.transition_image_layout(
            depth.handle(),
            vkframe_rhi::image::aspect_for_format(formats.depth),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )?;

        let device = allocator.device().clone();
        let mut passes = Vec::with_capacity(layout.passes().len());
        for pass_layout in layout.passes() {
            let render_pass = RenderPass::new(device.clone(), &pass_layout.render_pass)?;

            let mut framebuffers = Vec::with_capacity(pass_layout.framebuffer_count);
            for image_index in 0..pass_layout.framebuffer_count {
                let views = match pass_layout.pass {
                    PassId::Offscreen => match &offscreen_msaa {
                        Some(msaa) => vec![msaa.view(), depth.view(), offscreen_color.view()],
                        None => vec![offscreen_color.view(), depth.view()],
                    },
                    PassId::Post => post_color.iter().map(Image::view).collect(),
                    PassId::Ui => vec![swapchain.image_view(image_index)],
                };
                framebuffers.push(Framebuffer::new(
                    device.clone(),
                    &render_pass,
                    &views,
                    extent,
                )?);
            }

            debug!(
                "{} pass: {} framebuffer(s), {} attachment(s)",
                pass_layout.pass,
                framebuffers.len(),
                pass_layout.attachment_count()
            );
            passes.push(PassTargets {
                pass: pass_layout.pass,
                render_pass,
                framebuffers,
            });
        }

        info!(
            "Render targets created: {}x{}, {} sample(s), post pass {}",
            extent.width,
            extent.height,
            formats.samples.as_raw(),
            if formats.post_pass { "on" } else { "off" }
        );

        Ok(Self {
            layout,
            passes,
            offscreen_msaa,
            offscreen_color,
            depth,
            post_color,
        })
    }

    #[inline]
    pub fn layout(&self) -> &PassSetLayout {
        &self.layout
    }

    pub fn pass(&self, pass: PassId) -> Option<&PassTargets> {
        self.passes.iter().find(|targets| targets.pass == pass)
    }

    pub fn render_pass(&self, pass: PassId) -> Option<&RenderPass> {
        self.pass(pass).map(|targets| &targets.render_pass)
    }

    pub fn framebuffer(&self, pass: PassId, image_index: usize) -> Option<&Framebuffer> {
        self.pass(pass)
            .and_then(|targets| targets.framebuffers.get(image_index))
    }

    #[inline]
    pub fn offscreen_color(&self) -> &Image {
        &self.offscreen_color
    }

    #[inline]
    pub fn offscreen_msaa(&self) -> Option<&Image> {
        self.offscreen_msaa.as_ref()
    }

    #[inline]
    pub fn depth(&self) -> &Image {
        &self.depth
    }

    #[inline]
    pub fn post_color(&self) -> Option<&Image> {
        self.post_color.as_ref()
    }
}

/// Sampled views of the offscreen and post targets.
pub struct TargetDescriptors {
    device: Arc<Device>,
    sampler: Sampler,
    offscreen: DescriptorSet,
    post: DescriptorSet,
    // Sets are freed with the pool; the layout must outlive both.
    _pool: DescriptorPool,
    layout: DescriptorSetLayout,
}

impl TargetDescriptors {
    pub fn new(device: Arc<Device>, targets: &RenderTargets) -> RhiResult<Self> {
        let layout = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::combined_image_sampler(
                0,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;
        let pool = DescriptorPool::for_layouts(device.clone(), &[(&layout, 2)])?;
        let offscreen = pool.allocate(&layout)?;
        let post = pool.allocate(&layout)?;
        let sampler = Sampler::linear(device.clone())?;

        let descriptors = Self {
            device,
            sampler,
            offscreen,
            post,
            _pool: pool,
            layout,
        };
        descriptors.write(targets);
        Ok(descriptors)
    }

    /// Points the sets at `targets`' images.
    ///
    /// Without a post pass the post set aliases the offscreen image.
    pub fn write(&self, targets: &RenderTargets) {
        self.offscreen.write_image(
            &self.device,
            0,
            image_info(
                self.sampler.handle(),
                targets.offscreen_color().view(),
                vk::ImageLayout::GENERAL,
            ),
        );

        let post_info = match targets.post_color() {
            Some(post) => image_info(
                self.sampler.handle(),
                post.view(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            None => image_info(
                self.sampler.handle(),
                targets.offscreen_color().view(),
                vk::ImageLayout::GENERAL,
            ),
        };
        self.post.write_image(&self.device, 0, post_info);
        debug!("Target descriptors rewritten");
    }

    #[inline]
    pub fn layout(&self) -> &DescriptorSetLayout {
        &self.layout
    }

    #[inline]
    pub fn offscreen(&self) -> &DescriptorSet {
        &self.offscreen
    }

    #[inline]
    pub fn post(&self) -> &DescriptorSet {
        &self.post
    }
}
