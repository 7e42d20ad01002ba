//! Frame loop tests driven by a scripted backend.

use std::collections::VecDeque;

use ash::vk;

use kiln_renderer::orchestrator::{FrameBackend, FrameOrchestrator, FrameStatus};
use kiln_renderer::{RendererError, RendererResult};
use kiln_rhi::swapchain::{AcquireOutcome, PresentOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Wait(usize),
    Reset(usize),
    Acquire(usize),
    Update(usize),
    Submit(usize, usize),
    Present(usize, usize),
    WaitIdle,
    Rebuild,
}

/// Backend that hands out images round-robin unless a script says
/// otherwise, and logs every call.
struct MockBackend {
    calls: Vec<Call>,
    image_count: usize,
    next_image: usize,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    extent: vk::Extent2D,
    rebuilt_image_count: usize,
}

impl MockBackend {
    fn new(image_count: usize) -> Self {
        Self {
            calls: Vec::new(),
            image_count,
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            rebuilt_image_count: image_count,
        }
    }

    fn acquired(index: u32) -> AcquireOutcome {
        AcquireOutcome::Acquired {
            index,
            suboptimal: false,
        }
    }

    fn count(&self, call: Call) -> usize {
        self.calls.iter().filter(|&&c| c == call).count()
    }
}

impl FrameBackend for MockBackend {
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.calls.push(Call::Wait(slot));
        Ok(())
    }

    fn reset_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.calls.push(Call::Reset(slot));
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> RendererResult<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        if let Some(outcome) = self.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(Self::acquired(index as u32))
    }

    fn update_frame_data(&mut self, image: usize) -> RendererResult<()> {
        self.calls.push(Call::Update(image));
        Ok(())
    }

    fn submit(&mut self, slot: usize, image: usize) -> RendererResult<()> {
        self.calls.push(Call::Submit(slot, image));
        Ok(())
    }

    fn present(&mut self, slot: usize, image: usize) -> RendererResult<PresentOutcome> {
        self.calls.push(Call::Present(slot, image));
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn wait_idle(&mut self) -> RendererResult<()> {
        self.calls.push(Call::WaitIdle);
        Ok(())
    }

    fn rebuild_swapchain(&mut self) -> RendererResult<usize> {
        self.calls.push(Call::Rebuild);
        self.image_count = self.rebuilt_image_count;
        self.next_image = 0;
        Ok(self.image_count)
    }
}

fn orchestrator(frames: usize, images: usize) -> FrameOrchestrator<MockBackend> {
    FrameOrchestrator::new(MockBackend::new(images), frames, images)
}

#[test]
fn test_slot_is_frame_count_mod_n() {
    for frames in 1..=3 {
        let mut orchestrator = orchestrator(frames, 3);
        for k in 1..=7 {
            orchestrator.draw_frame().unwrap();
            assert_eq!(orchestrator.current_slot(), k % frames);
        }
        assert_eq!(orchestrator.recreations(), 0);
    }
}

#[test]
fn test_tick_order() {
    let mut orchestrator = orchestrator(2, 3);
    let status = orchestrator.draw_frame().unwrap();

    assert_eq!(status, FrameStatus::Presented { image: 0 });
    assert_eq!(
        orchestrator.backend().calls,
        vec![
            Call::Wait(0),
            Call::Acquire(0),
            Call::Reset(0),
            Call::Update(0),
            Call::Submit(0, 0),
            Call::Present(0, 0),
        ]
    );
}

#[test]
fn test_reused_image_waits_on_previous_slot() {
    let mut orchestrator = orchestrator(2, 2);
    orchestrator.backend_mut().acquire_script =
        VecDeque::from([MockBackend::acquired(1), MockBackend::acquired(1)]);

    orchestrator.draw_frame().unwrap();
    orchestrator.backend_mut().calls.clear();
    orchestrator.draw_frame().unwrap();

    // Slot 1 acquires image 1, which slot 0 rendered last frame.
    assert_eq!(
        &orchestrator.backend().calls[..4],
        &[Call::Wait(1), Call::Acquire(1), Call::Wait(0), Call::Reset(1)]
    );
}

#[test]
fn test_stale_acquire_recreates_once_and_retries() {
    let mut orchestrator = orchestrator(2, 3);
    orchestrator.backend_mut().acquire_script = VecDeque::from([AcquireOutcome::Stale]);

    let status = orchestrator.draw_frame().unwrap();

    assert_eq!(status, FrameStatus::Presented { image: 0 });
    assert_eq!(orchestrator.recreations(), 1);
    let backend = orchestrator.backend();
    assert_eq!(backend.count(Call::Rebuild), 1);
    assert_eq!(backend.count(Call::Acquire(0)), 2);
    // The fence is only reset once an image was acquired.
    assert_eq!(backend.count(Call::Reset(0)), 1);
    assert_eq!(orchestrator.current_slot(), 1);
}

#[test]
fn test_second_stale_acquire_skips_frame() {
    let mut orchestrator = orchestrator(2, 3);
    orchestrator.backend_mut().acquire_script =
        VecDeque::from([AcquireOutcome::Stale, AcquireOutcome::Stale]);

    let status = orchestrator.draw_frame().unwrap();

    assert_eq!(status, FrameStatus::Skipped);
    assert_eq!(orchestrator.recreations(), 1);
    let backend = orchestrator.backend();
    assert_eq!(backend.count(Call::Reset(0)), 0);
    assert!(!backend.calls.iter().any(|c| matches!(c, Call::Submit(..))));
    assert_eq!(orchestrator.current_slot(), 0);

    // Next tick runs normally.
    assert_eq!(
        orchestrator.draw_frame().unwrap(),
        FrameStatus::Presented { image: 0 }
    );
    assert_eq!(orchestrator.recreations(), 1);
}

#[test]
fn test_stale_present_recreates_once() {
    let mut orchestrator = orchestrator(2, 3);
    orchestrator.backend_mut().present_script = VecDeque::from([PresentOutcome::Stale]);

    let status = orchestrator.draw_frame().unwrap();

    assert_eq!(status, FrameStatus::Presented { image: 0 });
    assert_eq!(orchestrator.recreations(), 1);
    let calls = &orchestrator.backend().calls;
    assert_eq!(
        &calls[calls.len() - 3..],
        &[Call::Present(0, 0), Call::WaitIdle, Call::Rebuild]
    );

    orchestrator.draw_frame().unwrap();
    assert_eq!(orchestrator.recreations(), 1);
}

#[test]
fn test_resize_flag_recreates_after_present() {
    let mut orchestrator = orchestrator(2, 3);
    orchestrator.notify_resized();

    orchestrator.draw_frame().unwrap();
    assert_eq!(orchestrator.recreations(), 1);

    // The flag is consumed.
    orchestrator.draw_frame().unwrap();
    assert_eq!(orchestrator.recreations(), 1);
}

#[test]
fn test_resize_with_stale_acquire_recreates_once() {
    let mut orchestrator = orchestrator(2, 3);
    orchestrator.notify_resized();
    orchestrator.backend_mut().acquire_script = VecDeque::from([AcquireOutcome::Stale]);

    assert_eq!(
        orchestrator.draw_frame().unwrap(),
        FrameStatus::Presented { image: 0 }
    );

    let backend = orchestrator.backend();
    assert_eq!(backend.count(Call::Rebuild), 1);
    assert_eq!(backend.count(Call::WaitIdle), 1);
    assert_eq!(orchestrator.recreations(), 1);
}

#[test]
fn test_deferred_recreation_absorbs_resize_flag() {
    let mut orchestrator = orchestrator(2, 3);
    orchestrator.backend_mut().extent = vk::Extent2D {
        width: 0,
        height: 0,
    };
    assert!(!orchestrator.recreate_swapchain().unwrap());

    // Restored while a resize event is still queued.
    orchestrator.notify_resized();
    orchestrator.backend_mut().extent = vk::Extent2D {
        width: 1280,
        height: 720,
    };

    assert_eq!(
        orchestrator.draw_frame().unwrap(),
        FrameStatus::Presented { image: 0 }
    );
    assert_eq!(orchestrator.backend().count(Call::Rebuild), 1);
    assert_eq!(orchestrator.recreations(), 1);
    assert!(!orchestrator.is_recreate_pending());
}

#[test]
fn test_recreation_resizes_image_table() {
    let mut orchestrator = orchestrator(2, 2);
    orchestrator.backend_mut().rebuilt_image_count = 4;
    orchestrator.draw_frame().unwrap();

    assert!(orchestrator.recreate_swapchain().unwrap());

    let sync = orchestrator.sync();
    assert_eq!(sync.image_count(), 4);
    assert!((0..4).all(|i| sync.slot_for_image(i).is_none()));
}

#[test]
fn test_zero_extent_defers_recreation() {
    let mut orchestrator = orchestrator(2, 3);
    orchestrator.backend_mut().extent = vk::Extent2D {
        width: 0,
        height: 0,
    };

    assert!(!orchestrator.recreate_swapchain().unwrap());
    assert!(orchestrator.is_recreate_pending());

    for _ in 0..3 {
        assert_eq!(orchestrator.draw_frame().unwrap(), FrameStatus::Skipped);
    }
    assert_eq!(orchestrator.recreations(), 0);
    assert!(orchestrator.backend().calls.is_empty());

    orchestrator.backend_mut().extent = vk::Extent2D {
        width: 640,
        height: 480,
    };
    assert_eq!(
        orchestrator.draw_frame().unwrap(),
        FrameStatus::Presented { image: 0 }
    );
    assert_eq!(orchestrator.recreations(), 1);
    assert!(!orchestrator.is_recreate_pending());
}

#[test]
fn test_stale_acquire_while_minimized_skips() {
    let mut orchestrator = orchestrator(2, 3);
    orchestrator.backend_mut().acquire_script = VecDeque::from([AcquireOutcome::Stale]);
    orchestrator.backend_mut().extent = vk::Extent2D {
        width: 1024,
        height: 0,
    };

    assert_eq!(orchestrator.draw_frame().unwrap(), FrameStatus::Skipped);
    assert!(orchestrator.is_recreate_pending());
    assert_eq!(orchestrator.backend().count(Call::Rebuild), 0);
}

#[test]
fn test_out_of_range_image_is_an_error() {
    let mut orchestrator = orchestrator(2, 2);
    orchestrator.backend_mut().acquire_script = VecDeque::from([MockBackend::acquired(5)]);

    let err = orchestrator.draw_frame().unwrap_err();
    assert!(matches!(
        err,
        RendererError::ImageOutOfRange { index: 5, count: 2 }
    ));
}
