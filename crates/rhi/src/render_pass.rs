//! Render pass and framebuffer objects.
//!
//! A [`RenderPassDesc`] is a plain description of a single-subpass render pass.
//! The renderer builds three of them per swapchain configuration:
//!
//! - [`RenderPassDesc::offscreen`]: multisampled color and depth, resolved
//!   into a single-sampled target kept in `GENERAL` layout
//! - [`RenderPassDesc::post`]: single-sampled color ending in
//!   `SHADER_READ_ONLY_OPTIMAL`
//! - [`RenderPassDesc::ui`]: the swapchain image, ending in `PRESENT_SRC_KHR`
//!
//! Descriptions compare by value, so two recreations with the same inputs
//! yield equal descriptions.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Depth attachment part of a [`RenderPassDesc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthAttachmentDesc {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

/// Single-subpass render pass description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub color_load_op: vk::AttachmentLoadOp,
    pub color_initial_layout: vk::ImageLayout,
    pub color_final_layout: vk::ImageLayout,
    pub depth: Option<DepthAttachmentDesc>,
    /// Resolve the multisampled color attachment into a single-sampled one.
    pub resolve: bool,
}

impl RenderPassDesc {
    /// Geometry pass into multisampled color and depth.
    ///
    /// With a single sample there is nothing to resolve and the color
    /// attachment is the offscreen target itself.
    pub fn offscreen(
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            color_format,
            samples,
            color_load_op: vk::AttachmentLoadOp::CLEAR,
            color_initial_layout: vk::ImageLayout::GENERAL,
            color_final_layout: vk::ImageLayout::GENERAL,
            depth: Some(DepthAttachmentDesc {
                format: depth_format,
                load_op: vk::AttachmentLoadOp::CLEAR,
                initial_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }),
            resolve: samples != vk::SampleCountFlags::TYPE_1,
        }
    }

    /// Single-sampled composite pass whose output is sampled afterwards.
    pub fn post(color_format: vk::Format) -> Self {
        Self {
            color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            color_load_op: vk::AttachmentLoadOp::CLEAR,
            color_initial_layout: vk::ImageLayout::UNDEFINED,
            color_final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            depth: None,
            resolve: false,
        }
    }

    /// Overlay pass over the swapchain image.
    pub fn ui(swapchain_format: vk::Format) -> Self {
        Self {
            color_format: swapchain_format,
            samples: vk::SampleCountFlags::TYPE_1,
            color_load_op: vk::AttachmentLoadOp::CLEAR,
            color_initial_layout: vk::ImageLayout::UNDEFINED,
            color_final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            depth: None,
            resolve: false,
        }
    }

    /// Number of attachments, which is also the number of clear values
    /// `vkCmdBeginRenderPass` reads.
    pub fn attachment_count(&self) -> usize {
        1 + usize::from(self.depth.is_some()) + usize::from(self.resolve)
    }

    /// Attachments in framebuffer order: color, depth, resolve.
    pub fn attachments(&self) -> Vec<vk::AttachmentDescription> {
        let mut attachments = Vec::with_capacity(self.attachment_count());

        attachments.push(
            vk::AttachmentDescription::default()
                .format(self.color_format)
                .samples(self.samples)
                .load_op(self.color_load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(self.color_initial_layout)
                .final_layout(self.color_final_layout),
        );

        if let Some(depth) = &self.depth {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(depth.format)
                    .samples(self.samples)
                    .load_op(depth.load_op)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(depth.initial_layout)
                    .final_layout(depth.final_layout),
            );
        }

        if self.resolve {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(self.color_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(self.color_initial_layout)
                    .final_layout(self.color_final_layout),
            );
        }

        attachments
    }

    /// External dependencies into and out of the subpass.
    ///
    /// The incoming one orders attachment writes after the previous frame's
    /// writes and shader reads of the same images; the outgoing one makes
    /// color writes visible to later fragment-shader reads.
    pub fn dependencies(&self) -> [vk::SubpassDependency; 2] {
        let has_depth = self.depth.is_some();

        let mut src_stage =
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::FRAGMENT_SHADER;
        let mut src_access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        let mut dst_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let mut dst_access =
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        if has_depth {
            src_stage |= vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
            src_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
            dst_stage |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
            dst_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }

        [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(src_stage)
                .src_access_mask(src_access)
                .dst_stage_mask(dst_stage)
                .dst_access_mask(dst_access),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_access_mask(vk::AccessFlags::SHADER_READ),
        ]
    }
}

/// Owned `VkRenderPass` created from a [`RenderPassDesc`].
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    pub fn new(device: Arc<Device>, desc: &RenderPassDesc) -> RhiResult<Self> {
        let attachments = desc.attachments();

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_refs = [vk::AttachmentReference {
            attachment: if desc.depth.is_some() { 2 } else { 1 },
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if desc.depth.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        if desc.resolve {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }

        let subpasses = [subpass];
        let dependencies = desc.dependencies();
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        debug!(
            "Render pass created: {:?} x{} ({} attachment(s))",
            desc.color_format,
            desc.samples.as_raw(),
            attachments.len()
        );

        Ok(Self {
            device,
            render_pass,
            desc: *desc,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Owned `VkFramebuffer`.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Creates a framebuffer for `render_pass` from views in attachment order.
    ///
    /// # Errors
    ///
    /// Returns an error if the view count does not match the render pass.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let expected = render_pass.desc().attachment_count();
        if attachments.len() != expected {
            return Err(RhiError::InvalidArgument(format!(
                "framebuffer needs {} attachment(s), got {}",
                expected,
                attachments.len()
            )));
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };

        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HDR: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

    #[test]
    fn test_offscreen_pass_resolves_multisampled_color() {
        let desc = RenderPassDesc::offscreen(HDR, vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_4);
        assert!(desc.resolve);
        assert_eq!(desc.attachment_count(), 3);

        let attachments = desc.attachments();
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[1].format, vk::Format::D32_SFLOAT);
        assert_eq!(attachments[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            attachments[1].final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[2].final_layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn test_single_sample_offscreen_has_no_resolve() {
        let desc = RenderPassDesc::offscreen(HDR, vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_1);
        assert!(!desc.resolve);
        assert_eq!(desc.attachment_count(), 2);
        assert_eq!(desc.attachments()[0].final_layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn test_post_pass_ends_shader_readable() {
        let desc = RenderPassDesc::post(HDR);
        assert_eq!(desc.attachment_count(), 1);
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            desc.attachments()[0].final_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_ui_pass_presents_swapchain_image() {
        let desc = RenderPassDesc::ui(vk::Format::B8G8R8A8_UNORM);
        let attachment = desc.attachments()[0];
        assert_eq!(attachment.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_depth_dependency_only_with_depth() {
        let with_depth =
            RenderPassDesc::offscreen(HDR, vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_2)
                .dependencies();
        assert!(
            with_depth[0]
                .dst_stage_mask
                .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );

        let without = RenderPassDesc::ui(vk::Format::B8G8R8A8_UNORM).dependencies();
        assert!(
            !without[0]
                .dst_stage_mask
                .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );
        assert_eq!(without[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(without[1].dst_subpass, vk::SUBPASS_EXTERNAL);
    }

    #[test]
    fn test_descriptions_compare_by_value() {
        let a = RenderPassDesc::offscreen(HDR, vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_4);
        let b = RenderPassDesc::offscreen(HDR, vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_4);
        assert_eq!(a, b);
        assert_ne!(a, RenderPassDesc::post(HDR));
    }
}
