mod common;

use common::{Event, MockBackend, assert_waits_precede_reuse, count, position, run_frame};
use vkframe_renderer::frame_sync::{BeginFrame, EndFrame, FrameSync, SlotState};
use vkframe_renderer::passes::{ClearValues, DEFAULT_CLEAR_COLOR, PassId};
use vkframe_renderer::RendererError;
use vkframe_rhi::RhiError;
use vkframe_rhi::swapchain::{AcquiredImage, SwapchainStatus};
use vkframe_rhi::vk;

fn begin(sync: &mut FrameSync<MockBackend>) -> vkframe_renderer::FrameInfo {
    match sync.begin_frame().unwrap() {
        BeginFrame::Ready(info) => info,
        BeginFrame::Skipped => panic!("frame unexpectedly skipped"),
    }
}

fn record_passes(sync: &mut FrameSync<MockBackend>) {
    for pass in PassId::ALL {
        sync.begin_pass(pass, &ClearValues::for_pass(pass, DEFAULT_CLEAR_COLOR))
            .unwrap();
        sync.end_pass();
    }
}

#[test]
fn test_fences_waited_before_slot_reuse() {
    let mut sync = FrameSync::new(MockBackend::new(3, 3));

    for _ in 0..30 {
        assert_eq!(run_frame(&mut sync, 2).unwrap(), Some(EndFrame::Presented));
    }

    let events = sync.backend().events();
    assert_waits_precede_reuse(&events, 3);
    assert!(sync.backend().violations.is_empty(), "{:?}", sync.backend().violations);
    assert_eq!(count(&events, |e| matches!(e, Event::Submit(_))), 30);
}

#[test]
fn test_slot_states_follow_lifecycle() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    assert_eq!(sync.slot_state(0), SlotState::Idle);

    let info = begin(&mut sync);
    assert_eq!(info.slot, 0);
    assert_eq!(info.frame_number, 0);
    assert_eq!(sync.slot_state(0), SlotState::Recording);

    record_passes(&mut sync);
    sync.end_frame().unwrap();
    assert_eq!(sync.slot_state(0), SlotState::Submitted);
    assert_eq!(sync.current_slot(), 1);

    run_frame(&mut sync, 0).unwrap();
    assert_eq!(sync.slot_state(1), SlotState::Submitted);

    let info = begin(&mut sync);
    assert_eq!(info.slot, 0);
    assert_eq!(info.frame_number, 2);
    assert_eq!(sync.slot_state(0), SlotState::Recording);
    assert_eq!(sync.slot_state(1), SlotState::Submitted);
}

#[test]
fn test_image_reacquired_by_other_slot_waits_on_previous_writer() {
    // Two slots over three images: frame 3 lands on image 0 with slot 1
    // while slot 0 (frames 0 and 2) may still be executing.
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    for _ in 0..3 {
        run_frame(&mut sync, 1).unwrap();
    }
    assert_eq!(sync.image_guard(0), Some(0));
    sync.backend().clear_events();

    let info = begin(&mut sync);
    assert_eq!((info.slot, info.image_index), (1, 0));
    assert_eq!(sync.image_guard(0), Some(1));

    let events = sync.backend().events();
    let acquire = position(&events, |e| matches!(e, Event::Acquire { .. })).unwrap();
    let begin_commands = position(&events, |e| *e == Event::BeginCommands(1)).unwrap();
    assert!(
        events[acquire..begin_commands].contains(&Event::WaitSlot(0)),
        "no wait on slot 0 between acquire and recording: {events:?}"
    );

    record_passes(&mut sync);
    sync.end_frame().unwrap();
    assert!(sync.backend().violations.is_empty(), "{:?}", sync.backend().violations);
}

#[test]
fn test_more_slots_than_images() {
    let mut sync = FrameSync::new(MockBackend::new(3, 2));
    for _ in 0..2 {
        run_frame(&mut sync, 1).unwrap();
    }
    sync.backend().clear_events();

    let info = begin(&mut sync);
    assert_eq!((info.slot, info.image_index), (2, 0));

    let events = sync.backend().events();
    assert_eq!(
        &events[..4],
        &[
            Event::WaitSlot(2),
            Event::Acquire {
                slot: 2,
                image: Some(0)
            },
            Event::WaitSlot(0),
            Event::ResetSlot(2),
        ]
    );

    record_passes(&mut sync);
    sync.end_frame().unwrap();
    for _ in 0..20 {
        run_frame(&mut sync, 1).unwrap();
    }
    assert!(sync.backend().violations.is_empty(), "{:?}", sync.backend().violations);
}

#[test]
fn test_image_guarded_by_own_slot_needs_no_extra_wait() {
    let mut sync = FrameSync::new(MockBackend::new(2, 2));
    for _ in 0..2 {
        run_frame(&mut sync, 1).unwrap();
    }
    sync.backend().clear_events();

    let info = begin(&mut sync);
    assert_eq!((info.slot, info.image_index), (0, 0));
    let events = sync.backend().events();
    assert_eq!(count(&events, |e| matches!(e, Event::WaitSlot(_))), 1);
}

#[test]
fn test_two_slots_three_images_ten_frames() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));

    for frame in 0..10u64 {
        let info = begin(&mut sync);
        assert_eq!(info.frame_number, frame);
        assert_eq!(info.slot, (frame % 2) as usize);
        assert_eq!(info.image_index, (frame % 3) as u32);

        for pass in PassId::ALL {
            sync.begin_pass(pass, &ClearValues::for_pass(pass, DEFAULT_CLEAR_COLOR))
                .unwrap();
            assert_eq!(sync.open_pass(), Some(pass));
            sync.current_command_buffer().draw();
            sync.end_pass();
        }
        assert_eq!(sync.end_frame().unwrap(), EndFrame::Presented);
    }

    let events = sync.backend().events();
    assert_waits_precede_reuse(&events, 2);
    assert!(sync.backend().violations.is_empty(), "{:?}", sync.backend().violations);
    assert_eq!(count(&events, |e| matches!(e, Event::Present { .. })), 10);
    assert_eq!(count(&events, |e| matches!(e, Event::Draw { .. })), 30);
    assert_eq!(sync.recreate_count(), 0);
}

#[test]
fn test_recreate_with_same_extent_yields_equal_layout() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    run_frame(&mut sync, 1).unwrap();

    sync.recreate_swapchain().unwrap();
    sync.recreate_swapchain().unwrap();
    assert_eq!(sync.recreate_count(), 2);

    let layouts = &sync.backend().layouts;
    assert_eq!(layouts.len(), 3);
    assert_eq!(layouts[1], layouts[2]);
    assert_eq!(layouts[0], layouts[1]);

    let shape: Vec<_> = layouts[2]
        .passes()
        .iter()
        .map(|p| (p.pass, p.attachment_count(), p.framebuffer_count))
        .collect();
    assert_eq!(
        shape,
        vec![
            (PassId::Offscreen, 3, 3),
            (PassId::Post, 1, 3),
            (PassId::Ui, 1, 3),
        ]
    );

    run_frame(&mut sync, 1).unwrap();
    assert!(sync.backend().violations.is_empty(), "{:?}", sync.backend().violations);
}

#[test]
fn test_recreate_clears_image_guards() {
    let backend = MockBackend::new(2, 3).image_count_after_recreate(4);
    let mut sync = FrameSync::new(backend);
    for _ in 0..3 {
        run_frame(&mut sync, 0).unwrap();
    }
    assert!(sync.image_guard(0).is_some());

    sync.recreate_swapchain().unwrap();
    for image in 0..4 {
        assert_eq!(sync.image_guard(image), None);
    }
    assert_eq!(sync.slot_state(0), SlotState::Idle);
    assert_eq!(sync.slot_state(1), SlotState::Idle);

    for _ in 0..8 {
        run_frame(&mut sync, 0).unwrap();
    }
    assert!(sync.backend().violations.is_empty(), "{:?}", sync.backend().violations);
}

#[test]
fn test_minimized_window_polls_until_extent_is_nonzero() {
    let backend = MockBackend::new(2, 3).extents([(0, 0), (0, 600), (0, 0), (800, 600)]);
    let mut sync = FrameSync::new(backend);

    sync.recreate_swapchain().unwrap();

    let events = sync.backend().events();
    assert_eq!(count(&events, |e| *e == Event::WaitForExtent), 3);
    assert_eq!(
        count(&events, |e| matches!(e, Event::Recreate { .. })),
        1
    );
    let last_poll = events
        .iter()
        .rposition(|e| *e == Event::WaitForExtent)
        .unwrap();
    let idle = position(&events, |e| *e == Event::WaitIdle).unwrap();
    assert!(last_poll < idle);
    assert_eq!(
        events.last(),
        Some(&Event::Recreate {
            width: 800,
            height: 600
        })
    );
    assert!(sync.backend().violations.is_empty(), "{:?}", sync.backend().violations);
}

#[test]
fn test_out_of_date_acquire_skips_frame_and_recreates_once() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3).out_of_date_on_acquire(5));

    let mut outcomes = Vec::new();
    for _ in 0..10 {
        outcomes.push(run_frame(&mut sync, 3).unwrap());
    }

    assert_eq!(outcomes[4], None);
    assert_eq!(outcomes.iter().filter(|o| o.is_none()).count(), 1);
    assert_eq!(sync.recreate_count(), 1);

    let events = sync.backend().events();
    assert_eq!(
        count(&events, |e| matches!(e, Event::Recreate { .. })),
        1
    );

    let failed = events
        .iter()
        .position(|e| matches!(e, Event::Acquire { image: None, .. }))
        .unwrap();
    let next_acquire = failed
        + 1
        + position(&events[failed + 1..], |e| matches!(e, Event::Acquire { .. })).unwrap();
    for event in &events[failed..next_acquire] {
        assert!(
            !matches!(
                event,
                Event::BeginCommands(_)
                    | Event::BeginPass { .. }
                    | Event::Draw { .. }
                    | Event::Submit(_)
                    | Event::Present { .. }
            ),
            "recorded {event:?} for a skipped frame"
        );
    }

    assert_waits_precede_reuse(&events, 2);
    assert!(sync.backend().violations.is_empty(), "{:?}", sync.backend().violations);
}

#[test]
fn test_suboptimal_present_recreates_after_present() {
    let backend = MockBackend::new(2, 3)
        .present_script([SwapchainStatus::Success, SwapchainStatus::Suboptimal]);
    let mut sync = FrameSync::new(backend);

    assert_eq!(run_frame(&mut sync, 1).unwrap(), Some(EndFrame::Presented));
    assert_eq!(run_frame(&mut sync, 1).unwrap(), Some(EndFrame::Recreated));
    assert_eq!(run_frame(&mut sync, 1).unwrap(), Some(EndFrame::Presented));

    let events = sync.backend().events();
    let second_present = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, Event::Present { .. }))
        .nth(1)
        .map(|(i, _)| i)
        .unwrap();
    let recreate = position(&events, |e| matches!(e, Event::Recreate { .. })).unwrap();
    assert!(second_present < recreate);
    assert_eq!(sync.recreate_count(), 1);
}

#[test]
fn test_out_of_date_present_recreates() {
    let backend = MockBackend::new(2, 3).present_script([SwapchainStatus::OutOfDate]);
    let mut sync = FrameSync::new(backend);

    assert_eq!(run_frame(&mut sync, 1).unwrap(), Some(EndFrame::Recreated));
    assert_eq!(sync.recreate_count(), 1);
    assert_eq!(sync.current_slot(), 1);
}

#[test]
fn test_suboptimal_acquire_renders_then_recreates() {
    let backend = MockBackend::new(2, 3).acquire_script([AcquiredImage::Acquired {
        index: 1,
        suboptimal: true,
    }]);
    let mut sync = FrameSync::new(backend);

    let info = begin(&mut sync);
    assert_eq!(info.image_index, 1);
    record_passes(&mut sync);
    assert_eq!(sync.end_frame().unwrap(), EndFrame::Recreated);

    let events = sync.backend().events();
    let present = position(&events, |e| matches!(e, Event::Present { .. })).unwrap();
    let recreate = position(&events, |e| matches!(e, Event::Recreate { .. })).unwrap();
    assert!(present < recreate);
}

#[test]
fn test_resize_is_deferred_until_after_present() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3).extents([(1280, 720)]));
    run_frame(&mut sync, 1).unwrap();

    sync.notify_resized();
    assert!(sync.resize_pending());
    sync.backend().clear_events();

    begin(&mut sync);
    let events = sync.backend().events();
    assert_eq!(count(&events, |e| matches!(e, Event::Recreate { .. })), 0);

    record_passes(&mut sync);
    assert_eq!(sync.end_frame().unwrap(), EndFrame::Recreated);
    assert!(!sync.resize_pending());

    let events = sync.backend().events();
    let present = position(&events, |e| matches!(e, Event::Present { .. })).unwrap();
    let recreate = position(&events, |e| matches!(e, Event::Recreate { .. })).unwrap();
    assert!(present < recreate);
    assert_eq!(
        events[recreate],
        Event::Recreate {
            width: 1280,
            height: 720
        }
    );
}

#[test]
fn test_window_resize_recreates_after_present() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3).extents([(1280, 720)]));
    run_frame(&mut sync, 1).unwrap();

    sync.backend_mut().resize_window();
    assert_eq!(run_frame(&mut sync, 1).unwrap(), Some(EndFrame::Recreated));
    assert!(!sync.backend().window_resize_pending());
    assert_eq!(run_frame(&mut sync, 1).unwrap(), Some(EndFrame::Presented));
    assert_eq!(sync.recreate_count(), 1);
}

#[test]
fn test_window_resize_consumed_by_out_of_date_recreate() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3).out_of_date_on_acquire(2));
    run_frame(&mut sync, 1).unwrap();

    // The resize that made the next acquire report out-of-date.
    sync.backend_mut().resize_window();
    assert_eq!(run_frame(&mut sync, 1).unwrap(), None);
    assert!(!sync.backend().window_resize_pending());

    for _ in 0..3 {
        assert_eq!(run_frame(&mut sync, 1).unwrap(), Some(EndFrame::Presented));
    }
    assert_eq!(sync.recreate_count(), 1);

    let events = sync.backend().events();
    assert_eq!(count(&events, |e| matches!(e, Event::Recreate { .. })), 1);
    assert_eq!(count(&events, |e| matches!(e, Event::WaitIdle)), 1);
}

#[test]
fn test_draw_accepted_in_its_own_pass() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    begin(&mut sync);
    for pass in PassId::ALL {
        sync.begin_pass(pass, &ClearValues::for_pass(pass, DEFAULT_CLEAR_COLOR))
            .unwrap();
        sync.require_open_pass(pass);
        sync.end_pass();
    }
    sync.end_frame().unwrap();
}

#[test]
fn test_acquire_failure_propagates() {
    let backend = MockBackend::new(2, 3).fail_acquire(vk::Result::ERROR_DEVICE_LOST);
    let mut sync = FrameSync::new(backend);

    let err = sync.begin_frame().unwrap_err();
    assert!(matches!(
        err,
        RendererError::Rhi(RhiError::UnexpectedResult {
            result: vk::Result::ERROR_DEVICE_LOST,
            ..
        })
    ));
    assert!(!sync.is_frame_open());

    let events = sync.backend().events();
    assert_eq!(count(&events, |e| matches!(e, Event::BeginCommands(_))), 0);
}

#[test]
#[should_panic(expected = "still open")]
fn test_begin_frame_twice_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    begin(&mut sync);
    let _ = sync.begin_frame();
}

#[test]
#[should_panic(expected = "outside begin_frame/end_frame")]
fn test_begin_pass_outside_frame_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    let _ = sync.begin_pass(PassId::Offscreen, &ClearValues::offscreen(DEFAULT_CLEAR_COLOR));
}

#[test]
#[should_panic(expected = "passes run offscreen, post, ui")]
fn test_out_of_order_pass_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    begin(&mut sync);
    sync.begin_pass(PassId::Ui, &ClearValues::color(DEFAULT_CLEAR_COLOR))
        .unwrap();
    sync.end_pass();
    let _ = sync.begin_pass(PassId::Offscreen, &ClearValues::offscreen(DEFAULT_CLEAR_COLOR));
}

#[test]
#[should_panic(expected = "still open")]
fn test_nested_pass_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    begin(&mut sync);
    sync.begin_pass(PassId::Offscreen, &ClearValues::offscreen(DEFAULT_CLEAR_COLOR))
        .unwrap();
    let _ = sync.begin_pass(PassId::Post, &ClearValues::color(DEFAULT_CLEAR_COLOR));
}

#[test]
#[should_panic(expected = "without an open pass")]
fn test_end_pass_without_pass_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    begin(&mut sync);
    sync.end_pass();
}

#[test]
#[should_panic(expected = "before the ui pass")]
fn test_end_frame_without_ui_pass_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    begin(&mut sync);
    sync.begin_pass(PassId::Offscreen, &ClearValues::offscreen(DEFAULT_CLEAR_COLOR))
        .unwrap();
    sync.end_pass();
    let _ = sync.end_frame();
}

#[test]
#[should_panic(expected = "without a matching begin_frame")]
fn test_end_frame_without_begin_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    let _ = sync.end_frame();
}

#[test]
#[should_panic(expected = "outside begin_frame/end_frame")]
fn test_command_buffer_outside_frame_panics() {
    let sync = FrameSync::new(MockBackend::new(2, 3));
    sync.current_command_buffer().draw();
}

#[test]
#[should_panic(expected = "while a frame is being recorded")]
fn test_recreate_inside_frame_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    begin(&mut sync);
    let _ = sync.recreate_swapchain();
}

#[test]
#[should_panic(expected = "clear value(s)")]
fn test_too_few_clear_values_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    begin(&mut sync);
    let _ = sync.begin_pass(PassId::Offscreen, &ClearValues::color(DEFAULT_CLEAR_COLOR));
}

#[test]
#[should_panic(expected = "draw for the offscreen pass recorded inside the ui pass")]
fn test_draw_for_other_pass_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    begin(&mut sync);
    sync.begin_pass(PassId::Ui, &ClearValues::color(DEFAULT_CLEAR_COLOR))
        .unwrap();
    sync.require_open_pass(PassId::Offscreen);
}

#[test]
#[should_panic(expected = "draw for the post pass recorded outside begin_pass/end_pass")]
fn test_draw_outside_pass_panics() {
    let mut sync = FrameSync::new(MockBackend::new(2, 3));
    begin(&mut sync);
    sync.require_open_pass(PassId::Post);
}
