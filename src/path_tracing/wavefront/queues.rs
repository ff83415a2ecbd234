// src/path_tracing/wavefront/queues.rs
// Queue management structures for wavefront path tracing
// Fixed-capacity arenas with an atomic reserve-then-write push, reset between bounces without reallocation

use crate::error::{RenderError, RenderResult};
use crate::path_tracing::workitem::{
    HitLightWorkItem, MediumSampleWorkItem, MediumScatterWorkItem, MissRayWorkItem, RayWorkItem,
    ScatterRayWorkItem, ShadowRayWorkItem,
};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Append-only work queue shared by the producers of one stage.
///
/// `push` takes `&self` and may run from many threads at once; each call
/// reserves a distinct slot with one atomic add before writing it. Reading
/// and resetting take `&mut self`, so they cannot overlap a push.
pub struct WorkQueue<T> {
    name: &'static str,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    len: AtomicUsize,
}

// Slots are written only through distinct reserved indices and read only under `&mut self`.
unsafe impl<T: Send> Sync for WorkQueue<T> {}

impl<T: Copy + Send> WorkQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self {
            name,
            slots,
            len: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Items pushed so far, clamped to capacity.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve a slot and write `item` into it. Returns the slot index.
    pub fn push(&self, item: T) -> RenderResult<usize> {
        let index = self.len.fetch_add(1, Ordering::AcqRel);
        let Some(slot) = self.slots.get(index) else {
            return Err(RenderError::render(format!(
                "{} queue overflow: capacity {}",
                self.name,
                self.capacity()
            )));
        };
        // SAFETY: `index` came from a unique fetch_add, so no other push writes this slot,
        // and readers need `&mut self`.
        unsafe { (*slot.get()).write(item) };
        Ok(index)
    }

    pub fn as_slice(&mut self) -> &[T] {
        let len = self.len();
        // SAFETY: slots `0..len` were initialized by completed pushes; `&mut self`
        // excludes concurrent writers. `UnsafeCell<MaybeUninit<T>>` has the layout of `T`.
        unsafe { std::slice::from_raw_parts(self.slots.as_ptr().cast::<T>(), len) }
    }

    /// Forget every item. Capacity is kept.
    pub fn reset(&mut self) {
        *self.len.get_mut() = 0;
    }
}

/// Every queue the wavefront loop cycles through.
pub struct WavefrontQueues {
    pub ray: WorkQueue<RayWorkItem>,
    pub next_ray: WorkQueue<RayWorkItem>,
    pub miss: WorkQueue<MissRayWorkItem>,
    pub hit_light: WorkQueue<HitLightWorkItem>,
    pub shadow: WorkQueue<ShadowRayWorkItem>,
    pub scatter: WorkQueue<ScatterRayWorkItem>,
    pub medium_sample: WorkQueue<MediumSampleWorkItem>,
    pub medium_scatter: WorkQueue<MediumScatterWorkItem>,
}

impl WavefrontQueues {
    /// Every queue holds at most one item per in-flight path.
    pub fn new(capacity: usize) -> Self {
        Self {
            ray: WorkQueue::new("ray", capacity),
            next_ray: WorkQueue::new("next-ray", capacity),
            miss: WorkQueue::new("miss", capacity),
            hit_light: WorkQueue::new("hit-light", capacity),
            shadow: WorkQueue::new("shadow", capacity),
            scatter: WorkQueue::new("scatter", capacity),
            medium_sample: WorkQueue::new("medium-sample", capacity),
            medium_scatter: WorkQueue::new("medium-scatter", capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ray.capacity()
    }

    /// Promote the continuation rays and clear every other queue.
    pub fn advance(&mut self) {
        std::mem::swap(&mut self.ray, &mut self.next_ray);
        self.next_ray.reset();
        self.reset_stage_queues();
    }

    pub fn reset_all(&mut self) {
        self.ray.reset();
        self.next_ray.reset();
        self.reset_stage_queues();
    }

    fn reset_stage_queues(&mut self) {
        self.miss.reset();
        self.hit_light.reset();
        self.shadow.reset();
        self.scatter.reset();
        self.medium_sample.reset();
        self.medium_scatter.reset();
    }
}
