// src/accel/cpu_bvh.rs
// Median-split BVH over primitive bounds with a flattened, GPU-compatible node layout.
// Children are emitted before their parent so a single forward sweep refits the tree bottom-up.
// RELEVANT FILES:src/accel/types.rs,src/accel/single_level.rs,src/accel/multi_level.rs

use super::types::{Aabb, Ray};
use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use std::time::Instant;

/// GPU-compatible BVH node layout
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left: u32,      // if internal: left child index; if leaf: first primitive slot
    pub aabb_max: [f32; 3],
    pub right: u32,     // if internal: right child index; if leaf: primitive count
    pub flags: u32,     // bit 0: leaf flag (1 = leaf, 0 = internal)
    pub _pad: u32,
}

impl BvhNode {
    pub fn internal(aabb: Aabb, left_idx: u32, right_idx: u32) -> Self {
        Self {
            aabb_min: aabb.min,
            left: left_idx,
            aabb_max: aabb.max,
            right: right_idx,
            flags: 0,
            _pad: 0,
        }
    }

    pub fn leaf(aabb: Aabb, first: u32, count: u32) -> Self {
        Self {
            aabb_min: aabb.min,
            left: first,
            aabb_max: aabb.max,
            right: count,
            flags: 1,
            _pad: 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        (self.flags & 1) != 0
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.aabb_min, self.aabb_max)
    }

    fn set_aabb(&mut self, aabb: Aabb) {
        self.aabb_min = aabb.min;
        self.aabb_max = aabb.max;
    }
}

// Verify the struct layout matches expected GPU layout at compile time
const _: () = {
    assert!(std::mem::size_of::<BvhNode>() == 40);
    assert!(std::mem::align_of::<BvhNode>() == 4);
};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub max_leaf_size: u32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { max_leaf_size: 4 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub build_time_ms: f32,
    pub primitive_count: u32,
    pub node_count: u32,
    pub leaf_count: u32,
    pub max_depth: u32,
    pub memory_usage_bytes: u64,
}

/// Flattened BVH. `prim_indices` maps leaf slots back to caller primitive ids.
#[derive(Debug, Clone, Default)]
pub struct BvhCPU {
    pub nodes: Vec<BvhNode>,
    pub prim_indices: Vec<u32>,
    pub build_stats: BuildStats,
}

struct BuildInfo {
    aabb: Aabb,
    first: u32,
    count: u32,
    depth: u32,
}

impl BvhCPU {
    /// Root node index; the root is the last node emitted.
    pub fn root(&self) -> Option<usize> {
        self.nodes.len().checked_sub(1)
    }

    pub fn world_aabb(&self) -> Aabb {
        self.root()
            .map_or_else(Aabb::empty, |root| self.nodes[root].aabb())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Build from one AABB per primitive. No primitives gives an empty tree.
    pub fn build(prim_aabbs: &[Aabb], options: &BuildOptions) -> Result<Self> {
        let start_time = Instant::now();
        if prim_aabbs.is_empty() {
            return Ok(Self::default());
        }
        if let Some(bad) = prim_aabbs.iter().position(|a| !a.is_finite()) {
            anyhow::bail!("primitive {bad} has non-finite bounds");
        }
        let count = u32::try_from(prim_aabbs.len()).context("too many primitives for one BVH")?;

        let centroids: Vec<[f32; 3]> = prim_aabbs.iter().map(|a| a.center().to_array()).collect();
        let mut world = Aabb::empty();
        for aabb in prim_aabbs {
            world.expand_aabb(aabb);
        }

        let mut bvh = Self {
            nodes: Vec::with_capacity(2 * prim_aabbs.len()),
            prim_indices: (0..count).collect(),
            build_stats: BuildStats {
                primitive_count: count,
                ..Default::default()
            },
        };
        let info = BuildInfo {
            aabb: world,
            first: 0,
            count,
            depth: 0,
        };
        bvh.build_recursive(prim_aabbs, &centroids, info, options.max_leaf_size.max(1));

        let stats = &mut bvh.build_stats;
        stats.node_count = bvh.nodes.len() as u32;
        stats.memory_usage_bytes = (bvh.nodes.len() * std::mem::size_of::<BvhNode>()
            + bvh.prim_indices.len() * std::mem::size_of::<u32>()) as u64;
        stats.build_time_ms = start_time.elapsed().as_secs_f32() * 1000.0;
        Ok(bvh)
    }

    fn push_leaf(&mut self, info: &BuildInfo) -> u32 {
        self.build_stats.leaf_count += 1;
        self.nodes.push(BvhNode::leaf(info.aabb, info.first, info.count));
        self.nodes.len() as u32 - 1
    }

    fn build_recursive(
        &mut self,
        prim_aabbs: &[Aabb],
        centroids: &[[f32; 3]],
        info: BuildInfo,
        max_leaf_size: u32,
    ) -> u32 {
        self.build_stats.max_depth = self.build_stats.max_depth.max(info.depth);
        if info.count <= max_leaf_size || info.depth > 64 {
            return self.push_leaf(&info);
        }

        let range = info.first as usize..(info.first + info.count) as usize;
        let extent = info.aabb.extent();
        // Find axis with largest extent
        let axis = if extent.x > extent.y && extent.x > extent.z {
            0
        } else if extent.y > extent.z {
            1
        } else {
            2
        };

        // Median split: partial sort so the lower half lands left
        let slots = &mut self.prim_indices[range.clone()];
        let mid = slots.len() / 2;
        slots.select_nth_unstable_by(mid, |a, b| {
            centroids[*a as usize][axis]
                .partial_cmp(&centroids[*b as usize][axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let split = info.first + mid as u32;

        let bounds = |indices: &[u32]| {
            let mut aabb = Aabb::empty();
            for &i in indices {
                aabb.expand_aabb(&prim_aabbs[i as usize]);
            }
            aabb
        };
        let left_info = BuildInfo {
            aabb: bounds(&self.prim_indices[info.first as usize..split as usize]),
            first: info.first,
            count: split - info.first,
            depth: info.depth + 1,
        };
        let right_info = BuildInfo {
            aabb: bounds(&self.prim_indices[split as usize..range.end]),
            first: split,
            count: info.first + info.count - split,
            depth: info.depth + 1,
        };
        if left_info.count == 0 || right_info.count == 0 {
            return self.push_leaf(&info);
        }

        let left = self.build_recursive(prim_aabbs, centroids, left_info, max_leaf_size);
        let right = self.build_recursive(prim_aabbs, centroids, right_info, max_leaf_size);
        self.nodes.push(BvhNode::internal(info.aabb, left, right));
        self.nodes.len() as u32 - 1
    }

    /// Recompute every node's bounds from new primitive bounds. Topology is unchanged.
    pub fn refit(&mut self, prim_aabbs: &[Aabb]) -> Result<()> {
        if prim_aabbs.len() != self.prim_indices.len() {
            anyhow::bail!(
                "primitive count mismatch: expected {}, got {}",
                self.prim_indices.len(),
                prim_aabbs.len()
            );
        }
        for idx in 0..self.nodes.len() {
            let node = self.nodes[idx];
            let mut aabb = Aabb::empty();
            if node.is_leaf() {
                for slot in node.left..node.left + node.right {
                    aabb.expand_aabb(&prim_aabbs[self.prim_indices[slot as usize] as usize]);
                }
            } else {
                aabb.expand_aabb(&self.nodes[node.left as usize].aabb());
                aabb.expand_aabb(&self.nodes[node.right as usize].aabb());
            }
            self.nodes[idx].set_aabb(aabb);
        }
        Ok(())
    }

    /// Visit primitives whose leaf boxes the ray enters, nearest box first.
    ///
    /// `visit` returns a hit distance to shrink the search range; `any_hit`
    /// stops at the first reported hit.
    pub fn traverse(
        &self,
        ray: &Ray,
        mut t_max: f32,
        any_hit: bool,
        mut visit: impl FnMut(u32, f32) -> Option<f32>,
    ) -> bool {
        let Some(root) = self.root() else {
            return false;
        };
        let inv_dir = ray.inv_dir();
        let mut found = false;
        let mut stack = Vec::with_capacity(64);
        stack.push(root as u32);
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            if node.aabb().hit(ray.origin, inv_dir, t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                for slot in node.left..node.left + node.right {
                    if let Some(t) = visit(self.prim_indices[slot as usize], t_max) {
                        found = true;
                        if any_hit {
                            return true;
                        }
                        t_max = t_max.min(t);
                    }
                }
                continue;
            }
            let near = |child: u32| {
                self.nodes[child as usize]
                    .aabb()
                    .hit(ray.origin, inv_dir, t_max)
                    .unwrap_or(f32::INFINITY)
            };
            let (first, second) = if near(node.left) <= near(node.right) {
                (node.left, node.right)
            } else {
                (node.right, node.left)
            };
            stack.push(second);
            stack.push(first);
        }
        found
    }
}
