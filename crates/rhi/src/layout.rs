//! Image layout transitions.
//!
//! Only a fixed set of `(old, new)` layout pairs is supported. Each pair maps
//! to the access masks and pipeline stages of its barrier; any other pair is
//! a caller bug and panics.

use ash::vk;

use crate::command::CommandBuffer;

/// Access masks and stages for one supported layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

const TRANSITIONS: [LayoutTransition; 4] = [
    LayoutTransition {
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::TRANSFER_WRITE,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
    },
    LayoutTransition {
        old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_access: vk::AccessFlags::SHADER_READ,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
    },
    LayoutTransition {
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::GENERAL,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::empty(),
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    },
    LayoutTransition {
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
    },
];

impl LayoutTransition {
    /// Looks up the barrier parameters for `old -> new`.
    pub fn lookup(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<Self> {
        TRANSITIONS
            .iter()
            .find(|t| t.old_layout == old && t.new_layout == new)
            .copied()
    }

    /// Like [`lookup`](Self::lookup), but panics on an unsupported pair.
    pub fn for_pair(old: vk::ImageLayout, new: vk::ImageLayout) -> Self {
        match Self::lookup(old, new) {
            Some(transition) => transition,
            None => panic!("unsupported image layout transition {old:?} -> {new:?}"),
        }
    }

    /// Every supported transition.
    pub fn all() -> &'static [LayoutTransition] {
        &TRANSITIONS
    }

    /// Builds the barrier for the whole first mip and layer of `image`.
    pub fn barrier(&self, image: vk::Image, aspect: vk::ImageAspectFlags) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
    }

    /// Records the barrier into `cmd`.
    pub fn record(&self, cmd: &CommandBuffer, image: vk::Image, aspect: vk::ImageAspectFlags) {
        let barrier = self.barrier(image, aspect);
        cmd.image_barrier(self.src_stage, self.dst_stage, &barrier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transitions() {
        let to_dst = LayoutTransition::for_pair(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(to_dst.src_access, vk::AccessFlags::empty());
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_read = LayoutTransition::for_pair(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_general_and_depth_transitions() {
        let general =
            LayoutTransition::for_pair(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL);
        assert_eq!(general.dst_access, vk::AccessFlags::empty());
        assert_eq!(general.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);

        let depth = LayoutTransition::for_pair(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(
            depth.dst_access,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
        assert_eq!(depth.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn test_table_has_exactly_four_pairs() {
        assert_eq!(LayoutTransition::all().len(), 4);
        assert!(
            LayoutTransition::lookup(
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            )
            .is_none()
        );
    }

    #[test]
    #[should_panic(expected = "unsupported image layout transition")]
    fn test_unsupported_pair_panics() {
        LayoutTransition::for_pair(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
    }

    #[test]
    fn test_barrier_carries_masks() {
        let transition = LayoutTransition::for_pair(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let barrier = transition.barrier(vk::Image::null(), vk::ImageAspectFlags::COLOR);
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.subresource_range.level_count, 1);
    }
}
