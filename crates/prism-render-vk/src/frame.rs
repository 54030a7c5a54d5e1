// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use tracing::trace;

use crate::deletion::DeletionStack;
use crate::error::{EngineError, EngineResult};

/// Frames whose GPU work may be outstanding at once.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Sync objects owned by one slot of the frame ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait returns at once.
    pub in_flight: vk::Fence,
}

/// Image index -> fence of the slot that last rendered into that image.
/// Holds borrowed slot fences only; it never releases anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageFenceTable {
    fences: Vec<Option<vk::Fence>>,
}

impl ImageFenceTable {
    pub fn new(image_count: usize) -> Self {
        Self {
            fences: vec![None; image_count],
        }
    }

    pub fn get(&self, image_index: u32) -> Option<vk::Fence> {
        self.fences.get(image_index as usize).copied().flatten()
    }

    pub fn set(&mut self, image_index: u32, fence: vk::Fence) {
        if let Some(entry) = self.fences.get_mut(image_index as usize) {
            *entry = Some(fence);
        }
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }
}

/// The GPU-facing calls one frame makes, in the order `draw_frame` makes them.
pub trait FrameBackend {
    /// Blocks until `fence` is signaled. No timeout.
    fn wait_fence(&mut self, fence: vk::Fence) -> EngineResult<()>;
    fn reset_fence(&mut self, fence: vk::Fence) -> EngineResult<()>;
    /// Next presentable image; signals `signal` once it is usable.
    fn acquire(&mut self, signal: vk::Semaphore) -> EngineResult<u32>;
    /// Submits the image's recorded commands.
    fn submit(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> EngineResult<()>;
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> EngineResult<()>;
    fn wait_present_idle(&mut self) -> EngineResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub slot: usize,
    pub image_index: u32,
    /// True if the acquired image was still in use by another slot's frame.
    pub waited_on_image: bool,
}

pub struct FrameScheduler {
    slots: [FrameSlot; MAX_FRAMES_IN_FLIGHT],
    images: ImageFenceTable,
    current: usize,
    frame: u64,
}

impl FrameScheduler {
    pub fn new(slots: [FrameSlot; MAX_FRAMES_IN_FLIGHT], image_count: usize) -> Self {
        Self {
            slots,
            images: ImageFenceTable::new(image_count),
            current: 0,
            frame: 0,
        }
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frame
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn image_fences(&self) -> &ImageFenceTable {
        &self.images
    }

    /// One full acquire -> submit -> present cycle. Blocks on the slot fence,
    /// on the image's previous fence when another slot still owns it, and on
    /// the present queue.
    pub fn draw_frame<B: FrameBackend>(&mut self, gpu: &mut B) -> EngineResult<FrameReport> {
        let slot_index = self.current;
        let slot = self.slots[slot_index];

        gpu.wait_fence(slot.in_flight)?;

        let image_index = gpu.acquire(slot.image_available)?;

        // the fence is only worth waiting on if it is not the one we just waited for
        let mut waited_on_image = false;
        if let Some(fence) = self.images.get(image_index) {
            if fence != slot.in_flight {
                gpu.wait_fence(fence)?;
                waited_on_image = true;
            }
        }

        gpu.reset_fence(slot.in_flight)?;
        gpu.submit(
            image_index,
            slot.image_available,
            slot.render_finished,
            slot.in_flight,
        )?;
        self.images.set(image_index, slot.in_flight);

        gpu.present(image_index, slot.render_finished)?;
        gpu.wait_present_idle()?;

        let report = FrameReport {
            frame: self.frame,
            slot: slot_index,
            image_index,
            waited_on_image,
        };
        trace!(
            frame = report.frame,
            slot = report.slot,
            image = report.image_index,
            waited_on_image = report.waited_on_image,
            "frame presented"
        );

        self.frame += 1;
        self.current = (self.current + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(report)
    }
}

/// Two semaphores and a signaled fence per slot, each registered for release.
///
/// # Safety
/// `device` must be live.
pub unsafe fn create_frame_slots(
    device: &ash::Device,
    stack: &mut DeletionStack,
) -> EngineResult<[FrameSlot; MAX_FRAMES_IN_FLIGHT]> {
    let sem_ci = vk::SemaphoreCreateInfo::default();
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };

    let mut slots = [FrameSlot::default(); MAX_FRAMES_IN_FLIGHT];
    for slot in &mut slots {
        let image_available = device
            .create_semaphore(&sem_ci, None)
            .map_err(EngineError::SyncObjectCreation)?;
        let dev = device.clone();
        stack.push("image-available semaphore", move || unsafe {
            dev.destroy_semaphore(image_available, None)
        });

        let render_finished = device
            .create_semaphore(&sem_ci, None)
            .map_err(EngineError::SyncObjectCreation)?;
        let dev = device.clone();
        stack.push("render-finished semaphore", move || unsafe {
            dev.destroy_semaphore(render_finished, None)
        });

        let in_flight = device
            .create_fence(&fence_ci, None)
            .map_err(EngineError::SyncObjectCreation)?;
        let dev = device.clone();
        stack.push("in-flight fence", move || unsafe {
            dev.destroy_fence(in_flight, None)
        });

        *slot = FrameSlot {
            image_available,
            render_finished,
            in_flight,
        };
    }
    Ok(slots)
}

/// `FrameBackend` over a real device and swapchain.
pub struct VkFrameBackend<'a> {
    pub device: &'a ash::Device,
    pub swap_d: &'a swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    /// Pre-recorded, indexed by swapchain image.
    pub command_buffers: &'a [vk::CommandBuffer],
}

impl FrameBackend for VkFrameBackend<'_> {
    fn wait_fence(&mut self, fence: vk::Fence) -> EngineResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(EngineError::FenceWait)
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> EngineResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.map_err(EngineError::FenceReset)
    }

    fn acquire(&mut self, signal: vk::Semaphore) -> EngineResult<u32> {
        let (index, suboptimal) = unsafe {
            self.swap_d
                .acquire_next_image(self.swapchain, u64::MAX, signal, vk::Fence::null())
        }
        .map_err(EngineError::Acquire)?;
        if suboptimal {
            return Err(EngineError::Acquire(vk::Result::SUBOPTIMAL_KHR));
        }
        Ok(index)
    }

    fn submit(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> EngineResult<()> {
        let cmd = self
            .command_buffers
            .get(image_index as usize)
            .copied()
            .ok_or(EngineError::Submit(vk::Result::ERROR_UNKNOWN))?;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, std::slice::from_ref(&submit), fence)
        }
        .map_err(EngineError::Submit)
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> EngineResult<()> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let suboptimal = unsafe { self.swap_d.queue_present(self.present_queue, &present) }
            .map_err(EngineError::Present)?;
        if suboptimal {
            return Err(EngineError::Present(vk::Result::SUBOPTIMAL_KHR));
        }
        Ok(())
    }

    fn wait_present_idle(&mut self) -> EngineResult<()> {
        unsafe { self.device.queue_wait_idle(self.present_queue) }.map_err(EngineError::WaitIdle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, VecDeque};

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum FenceState {
        Signaled,
        Reset,
        Pending,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        Wait(u64),
        Reset(u64),
        Acquire,
        Submit { image: u32, fence: u64 },
        Present(u32),
        PresentIdle,
    }

    /// Simulated GPU: work stays pending until someone waits on its fence.
    struct SimGpu {
        fences: HashMap<vk::Fence, FenceState>,
        /// fence guarding the last submit that wrote each image
        image_writer: HashMap<u32, vk::Fence>,
        acquire_order: VecDeque<u32>,
        image_count: u32,
        next_image: u32,
        calls: Vec<Call>,
        max_pending: usize,
        fail_acquire: Option<vk::Result>,
        fail_reset: Option<vk::Result>,
    }

    impl SimGpu {
        fn new(slots: &[FrameSlot], image_count: u32) -> Self {
            Self {
                fences: slots
                    .iter()
                    .map(|s| (s.in_flight, FenceState::Signaled))
                    .collect(),
                image_writer: HashMap::new(),
                acquire_order: VecDeque::new(),
                image_count,
                next_image: 0,
                calls: Vec::new(),
                max_pending: 0,
                fail_acquire: None,
                fail_reset: None,
            }
        }

        fn pending(&self) -> usize {
            self.fences
                .values()
                .filter(|s| **s == FenceState::Pending)
                .count()
        }
    }

    impl FrameBackend for SimGpu {
        fn wait_fence(&mut self, fence: vk::Fence) -> EngineResult<()> {
            self.calls.push(Call::Wait(fence.as_raw()));
            let state = self.fences.get_mut(&fence).expect("unknown fence");
            assert_ne!(*state, FenceState::Reset, "waiting on a fence nobody will signal");
            *state = FenceState::Signaled;
            Ok(())
        }

        fn reset_fence(&mut self, fence: vk::Fence) -> EngineResult<()> {
            self.calls.push(Call::Reset(fence.as_raw()));
            if let Some(err) = self.fail_reset {
                return Err(EngineError::FenceReset(err));
            }
            let state = self.fences.get_mut(&fence).expect("unknown fence");
            assert_eq!(*state, FenceState::Signaled, "reset of a fence still in use");
            *state = FenceState::Reset;
            Ok(())
        }

        fn acquire(&mut self, _signal: vk::Semaphore) -> EngineResult<u32> {
            self.calls.push(Call::Acquire);
            if let Some(err) = self.fail_acquire {
                return Err(EngineError::Acquire(err));
            }
            Ok(self.acquire_order.pop_front().unwrap_or_else(|| {
                let i = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                i
            }))
        }

        fn submit(
            &mut self,
            image_index: u32,
            _wait: vk::Semaphore,
            _signal: vk::Semaphore,
            fence: vk::Fence,
        ) -> EngineResult<()> {
            self.calls.push(Call::Submit {
                image: image_index,
                fence: fence.as_raw(),
            });
            if let Some(prev) = self.image_writer.get(&image_index) {
                assert_ne!(
                    self.fences[prev],
                    FenceState::Pending,
                    "image {image_index} written by two submissions at once"
                );
            }
            let state = self.fences.get_mut(&fence).expect("unknown fence");
            assert_eq!(*state, FenceState::Reset);
            *state = FenceState::Pending;
            self.image_writer.insert(image_index, fence);
            self.max_pending = self.max_pending.max(self.pending());
            Ok(())
        }

        fn present(&mut self, image_index: u32, _wait: vk::Semaphore) -> EngineResult<()> {
            self.calls.push(Call::Present(image_index));
            Ok(())
        }

        fn wait_present_idle(&mut self) -> EngineResult<()> {
            self.calls.push(Call::PresentIdle);
            Ok(())
        }
    }

    fn fake_slots() -> [FrameSlot; MAX_FRAMES_IN_FLIGHT] {
        std::array::from_fn(|i| {
            let i = i as u64;
            FrameSlot {
                image_available: vk::Semaphore::from_raw(100 + i),
                render_finished: vk::Semaphore::from_raw(200 + i),
                in_flight: vk::Fence::from_raw(300 + i),
            }
        })
    }

    #[test]
    fn first_frame_runs_the_six_steps_in_order() {
        let slots = fake_slots();
        let mut gpu = SimGpu::new(&slots, 3);
        let mut sched = FrameScheduler::new(slots, 3);

        let report = sched.draw_frame(&mut gpu).unwrap();
        assert_eq!(
            report,
            FrameReport {
                frame: 0,
                slot: 0,
                image_index: 0,
                waited_on_image: false
            }
        );
        assert_eq!(
            gpu.calls,
            vec![
                Call::Wait(300),
                Call::Acquire,
                Call::Reset(300),
                Call::Submit {
                    image: 0,
                    fence: 300
                },
                Call::Present(0),
                Call::PresentIdle,
            ]
        );
        assert_eq!(sched.current_slot(), 1);
        assert_eq!(sched.image_fences().get(0), Some(vk::Fence::from_raw(300)));
    }

    #[test]
    fn frame_n_plus_two_waits_for_frame_n() {
        let slots = fake_slots();
        let mut gpu = SimGpu::new(&slots, 3);
        let mut sched = FrameScheduler::new(slots, 3);

        for _ in 0..2 {
            sched.draw_frame(&mut gpu).unwrap();
        }
        assert_eq!(gpu.pending(), 2);

        gpu.calls.clear();
        let report = sched.draw_frame(&mut gpu).unwrap();
        assert_eq!(report.slot, 0);
        // frame 0 was submitted with fence 300; frame 2 blocks on it before acquiring
        assert_eq!(gpu.calls[0], Call::Wait(300));
        assert_eq!(gpu.calls[1], Call::Acquire);
    }

    #[test]
    fn image_held_by_other_slot_is_waited_on() {
        let slots = fake_slots();
        let mut gpu = SimGpu::new(&slots, 3);
        gpu.acquire_order = VecDeque::from([0, 0]);
        let mut sched = FrameScheduler::new(slots, 3);

        sched.draw_frame(&mut gpu).unwrap();
        gpu.calls.clear();

        let report = sched.draw_frame(&mut gpu).unwrap();
        assert!(report.waited_on_image);
        assert_eq!(
            &gpu.calls[..4],
            &[
                Call::Wait(301),
                Call::Acquire,
                Call::Wait(300),
                Call::Reset(301)
            ]
        );
        assert_eq!(sched.image_fences().get(0), Some(vk::Fence::from_raw(301)));
    }

    #[test]
    fn image_held_by_same_slot_is_not_waited_twice() {
        let slots = fake_slots();
        let mut gpu = SimGpu::new(&slots, 2);
        let mut sched = FrameScheduler::new(slots, 2);

        // two images, two slots: slot k always gets image k
        for _ in 0..4 {
            let report = sched.draw_frame(&mut gpu).unwrap();
            assert!(!report.waited_on_image);
            assert_eq!(report.image_index as usize, report.slot);
        }
    }

    #[test]
    fn never_more_than_two_frames_pending() {
        let slots = fake_slots();
        let mut gpu = SimGpu::new(&slots, 4);
        gpu.acquire_order = VecDeque::from([0, 1, 2, 3, 0, 0, 3, 1, 2, 2, 1, 0]);
        let mut sched = FrameScheduler::new(slots, 4);

        for i in 0..40u64 {
            let report = sched.draw_frame(&mut gpu).unwrap();
            assert_eq!(report.frame, i);
            assert_eq!(report.slot, (i % 2) as usize);
        }
        assert_eq!(gpu.max_pending, MAX_FRAMES_IN_FLIGHT);
        assert_eq!(sched.frames_drawn(), 40);
    }

    #[test]
    fn acquire_failure_propagates_and_leaves_fence_signaled() {
        let slots = fake_slots();
        let mut gpu = SimGpu::new(&slots, 3);
        gpu.fail_acquire = Some(vk::Result::ERROR_OUT_OF_DATE_KHR);
        let mut sched = FrameScheduler::new(slots, 3);

        let err = sched.draw_frame(&mut gpu).unwrap_err();
        assert!(matches!(err, EngineError::Acquire(vk::Result::ERROR_OUT_OF_DATE_KHR)));
        assert_eq!(gpu.fences[&vk::Fence::from_raw(300)], FenceState::Signaled);
        assert_eq!(sched.frames_drawn(), 0);
        assert_eq!(sched.current_slot(), 0);
    }

    #[test]
    fn fence_table_starts_empty_and_sized_to_images() {
        let table = ImageFenceTable::new(3);
        assert_eq!(table.len(), 3);
        assert!((0..3).all(|i| table.get(i).is_none()));
        assert_eq!(table.get(7), None);
    }

    #[test]
    fn slot_ring_wraps_after_every_slot_is_used() {
        let slots = fake_slots();
        let mut gpu = SimGpu::new(&slots, 3);
        let mut sched = FrameScheduler::new(slots, 3);
        assert_eq!(sched.slots().len(), MAX_FRAMES_IN_FLIGHT);

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            sched.draw_frame(&mut gpu).unwrap();
        }
        assert_eq!(sched.current_slot(), 0);
    }

    #[test]
    fn reset_failure_is_reported_as_reset_and_nothing_is_submitted() {
        let slots = fake_slots();
        let mut gpu = SimGpu::new(&slots, 3);
        gpu.fail_reset = Some(vk::Result::ERROR_DEVICE_LOST);
        let mut sched = FrameScheduler::new(slots, 3);

        let err = sched.draw_frame(&mut gpu).unwrap_err();
        assert!(matches!(err, EngineError::FenceReset(vk::Result::ERROR_DEVICE_LOST)));
        assert!(!gpu.calls.iter().any(|c| matches!(c, Call::Submit { .. })));
        assert_eq!(sched.frames_drawn(), 0);
    }
}
