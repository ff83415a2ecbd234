// src/path_tracing/wavefront/stats.rs
// Per-frame queue ledger: how many items entered the ray queue and how every path ended

use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts gathered over one frame.
///
/// Every ray-queue entry is either continued (a re-entry) or terminated in
/// exactly one class, so `ray_queue_entries == terminated() + re_entries` and
/// `camera_rays == terminated()`. Shadow rays form a separate ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub camera_rays: u64,
    pub ray_queue_entries: u64,
    pub re_entries: u64,
    pub miss: u64,
    pub hit_light: u64,
    pub absorbed: u64,
    pub rr_terminated: u64,
    pub depth_terminated: u64,
    pub zero_throughput: u64,
    pub shadow_spawned: u64,
    pub shadow_contributed: u64,
    pub shadow_occluded: u64,
    pub medium_samples: u64,
    pub medium_scatters: u64,
    pub surface_scatters: u64,
    pub iterations: u64,
}

impl FrameStats {
    pub fn terminated(&self) -> u64 {
        self.miss
            + self.hit_light
            + self.absorbed
            + self.rr_terminated
            + self.depth_terminated
            + self.zero_throughput
    }

    pub fn is_conserved(&self) -> bool {
        self.ray_queue_entries == self.terminated() + self.re_entries
            && self.camera_rays == self.terminated()
            && self.shadow_spawned == self.shadow_contributed + self.shadow_occluded
    }
}

impl AddAssign for FrameStats {
    fn add_assign(&mut self, rhs: Self) {
        self.camera_rays += rhs.camera_rays;
        self.ray_queue_entries += rhs.ray_queue_entries;
        self.re_entries += rhs.re_entries;
        self.miss += rhs.miss;
        self.hit_light += rhs.hit_light;
        self.absorbed += rhs.absorbed;
        self.rr_terminated += rhs.rr_terminated;
        self.depth_terminated += rhs.depth_terminated;
        self.zero_throughput += rhs.zero_throughput;
        self.shadow_spawned += rhs.shadow_spawned;
        self.shadow_contributed += rhs.shadow_contributed;
        self.shadow_occluded += rhs.shadow_occluded;
        self.medium_samples += rhs.medium_samples;
        self.medium_scatters += rhs.medium_scatters;
        self.surface_scatters += rhs.surface_scatters;
        self.iterations += rhs.iterations;
    }
}

/// Atomic counters bumped by the stage kernels.
#[derive(Debug, Default)]
pub(crate) struct FrameCounters {
    pub camera_rays: AtomicU64,
    pub ray_queue_entries: AtomicU64,
    pub re_entries: AtomicU64,
    pub miss: AtomicU64,
    pub hit_light: AtomicU64,
    pub absorbed: AtomicU64,
    pub rr_terminated: AtomicU64,
    pub depth_terminated: AtomicU64,
    pub zero_throughput: AtomicU64,
    pub shadow_spawned: AtomicU64,
    pub shadow_contributed: AtomicU64,
    pub shadow_occluded: AtomicU64,
    pub medium_samples: AtomicU64,
    pub medium_scatters: AtomicU64,
    pub surface_scatters: AtomicU64,
    pub iterations: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl FrameCounters {
    pub fn snapshot(&self) -> FrameStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FrameStats {
            camera_rays: get(&self.camera_rays),
            ray_queue_entries: get(&self.ray_queue_entries),
            re_entries: get(&self.re_entries),
            miss: get(&self.miss),
            hit_light: get(&self.hit_light),
            absorbed: get(&self.absorbed),
            rr_terminated: get(&self.rr_terminated),
            depth_terminated: get(&self.depth_terminated),
            zero_throughput: get(&self.zero_throughput),
            shadow_spawned: get(&self.shadow_spawned),
            shadow_contributed: get(&self.shadow_contributed),
            shadow_occluded: get(&self.shadow_occluded),
            medium_samples: get(&self.medium_samples),
            medium_scatters: get(&self.medium_scatters),
            surface_scatters: get(&self.surface_scatters),
            iterations: get(&self.iterations),
        }
    }
}
