//! The three fixed passes and their framebuffer layout.
//!
//! Every frame records, in order:
//!
//! 1. [`PassId::Offscreen`]: scene geometry into multisampled color and
//!    depth, resolved into a single-sampled target that stays in `GENERAL`
//! 2. [`PassId::Post`] (optional): composite of the resolved target
//! 3. [`PassId::Ui`]: overlay drawn onto the swapchain image, which ends the
//!    frame in `PRESENT_SRC_KHR`
//!
//! [`PassSetLayout`] is the plain description of all three passes for one
//! swapchain configuration. The Vulkan backend builds its render passes and
//! framebuffers from it, so two recreations with the same inputs produce
//! structurally identical objects.

use std::fmt;

use vkframe_rhi::render_pass::RenderPassDesc;
use vkframe_rhi::vk;

/// Format of the offscreen color target and its multisampled source.
pub const OFFSCREEN_COLOR_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Format of the post pass output.
pub const POST_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Default clear color for all passes.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.15, 1.0];

/// One of the fixed passes, ordered by recording order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PassId {
    Offscreen,
    Post,
    Ui,
}

impl PassId {
    pub const ALL: [PassId; 3] = [PassId::Offscreen, PassId::Post, PassId::Ui];

    pub fn name(self) -> &'static str {
        match self {
            PassId::Offscreen => "offscreen",
            PassId::Post => "post",
            PassId::Ui => "ui",
        }
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Clear values for one pass, in attachment order.
#[derive(Clone, Copy)]
pub struct ClearValues {
    values: [vk::ClearValue; 3],
    len: usize,
}

impl ClearValues {
    /// A single color clear value.
    pub fn color(rgba: [f32; 4]) -> Self {
        let color = color_value(rgba);
        Self {
            values: [color, color, color],
            len: 1,
        }
    }

    /// Color, depth (1.0, 0) and resolve values for the offscreen pass.
    pub fn offscreen(rgba: [f32; 4]) -> Self {
        let color = color_value(rgba);
        let depth = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        };
        Self {
            values: [color, depth, color],
            len: 3,
        }
    }

    /// The conventional clear values for `pass`.
    pub fn for_pass(pass: PassId, rgba: [f32; 4]) -> Self {
        match pass {
            PassId::Offscreen => Self::offscreen(rgba),
            PassId::Post | PassId::Ui => Self::color(rgba),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The first `count` values.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `count` values were provided.
    pub fn for_attachments(&self, count: usize) -> &[vk::ClearValue] {
        assert!(
            count <= self.len,
            "render pass has {} attachment(s) but only {} clear value(s) were given",
            count,
            self.len
        );
        &self.values[..count]
    }
}

impl fmt::Debug for ClearValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClearValues").field("len", &self.len).finish()
    }
}

fn color_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

/// Formats the pass set is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetFormats {
    pub swapchain: vk::Format,
    pub depth: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub post_pass: bool,
}

/// Description of one pass and its framebuffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassLayout {
    pub pass: PassId,
    pub render_pass: RenderPassDesc,
    /// One framebuffer per swapchain image.
    pub framebuffer_count: usize,
    pub extent: vk::Extent2D,
}

impl PassLayout {
    #[inline]
    pub fn attachment_count(&self) -> usize {
        self.render_pass.attachment_count()
    }
}

/// Description of every pass for one swapchain configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassSetLayout {
    passes: Vec<PassLayout>,
}

impl PassSetLayout {
    pub fn new(formats: &TargetFormats, image_count: usize, extent: vk::Extent2D) -> Self {
        let mut passes = Vec::with_capacity(PassId::ALL.len());

        let layout = |pass, render_pass| PassLayout {
            pass,
            render_pass,
            framebuffer_count: image_count,
            extent,
        };

        passes.push(layout(
            PassId::Offscreen,
            RenderPassDesc::offscreen(OFFSCREEN_COLOR_FORMAT, formats.depth, formats.samples),
        ));
        if formats.post_pass {
            passes.push(layout(PassId::Post, RenderPassDesc::post(POST_COLOR_FORMAT)));
        }
        passes.push(layout(PassId::Ui, RenderPassDesc::ui(formats.swapchain)));

        Self { passes }
    }

    pub fn pass(&self, pass: PassId) -> Option<&PassLayout> {
        self.passes.iter().find(|layout| layout.pass == pass)
    }

    pub fn passes(&self) -> &[PassLayout] {
        &self.passes
    }

    pub fn contains(&self, pass: PassId) -> bool {
        self.pass(pass).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats(samples: vk::SampleCountFlags, post_pass: bool) -> TargetFormats {
        TargetFormats {
            swapchain: vk::Format::B8G8R8A8_UNORM,
            depth: vk::Format::D32_SFLOAT,
            samples,
            post_pass,
        }
    }

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 1280,
        height: 720,
    };

    #[test]
    fn test_pass_order() {
        assert!(PassId::Offscreen < PassId::Post);
        assert!(PassId::Post < PassId::Ui);
        assert_eq!(PassId::Ui.to_string(), "ui");
    }

    #[test]
    fn test_offscreen_clear_values() {
        let clear = ClearValues::offscreen([0.2, 0.3, 0.4, 1.0]);
        assert_eq!(clear.len(), 3);

        let values = clear.for_attachments(3);
        unsafe {
            assert_eq!(values[0].color.float32, [0.2, 0.3, 0.4, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
            assert_eq!(values[2].color.float32, [0.2, 0.3, 0.4, 1.0]);
        }
    }

    #[test]
    #[should_panic(expected = "only 1 clear value")]
    fn test_too_few_clear_values_panics() {
        ClearValues::color(DEFAULT_CLEAR_COLOR).for_attachments(2);
    }

    #[test]
    fn test_multisampled_layout() {
        let layout = PassSetLayout::new(&formats(vk::SampleCountFlags::TYPE_4, true), 3, EXTENT);

        let counts: Vec<_> = layout
            .passes()
            .iter()
            .map(|p| (p.pass, p.attachment_count(), p.framebuffer_count))
            .collect();
        assert_eq!(
            counts,
            vec![
                (PassId::Offscreen, 3, 3),
                (PassId::Post, 1, 3),
                (PassId::Ui, 1, 3),
            ]
        );

        let ui = layout.pass(PassId::Ui).unwrap();
        assert_eq!(ui.render_pass.color_format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(
            ui.render_pass.color_final_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    fn test_single_sampled_layout_has_no_resolve() {
        let layout = PassSetLayout::new(&formats(vk::SampleCountFlags::TYPE_1, true), 2, EXTENT);
        let offscreen = layout.pass(PassId::Offscreen).unwrap();
        assert_eq!(offscreen.attachment_count(), 2);
        assert!(!offscreen.render_pass.resolve);
    }

    #[test]
    fn test_post_pass_can_be_disabled() {
        let layout = PassSetLayout::new(&formats(vk::SampleCountFlags::TYPE_4, false), 2, EXTENT);
        assert!(!layout.contains(PassId::Post));
        assert_eq!(layout.passes().len(), 2);
    }

    #[test]
    fn test_same_inputs_same_layout() {
        let f = formats(vk::SampleCountFlags::TYPE_8, true);
        assert_eq!(
            PassSetLayout::new(&f, 3, EXTENT),
            PassSetLayout::new(&f, 3, EXTENT)
        );
        assert_ne!(
            PassSetLayout::new(&f, 3, EXTENT),
            PassSetLayout::new(&f, 2, EXTENT)
        );
    }
}
