// src/device/storage.rs
// Variant pool: per-kind block arenas addressed by tagged pointers
// Exists so light and medium slots keep a fixed device address for the lifetime of the pool

use super::{DeviceHandle, DevicePtr, DeviceSlice, DeviceVariant, Tagged, TaggedPtr, TypedBuffer};
use super::VariantRecord;
use crate::error::{RenderError, RenderResult};
use crate::scene::LeafId;
use std::collections::HashMap;

/// Records per arena block. Blocks are appended, never reallocated.
const BLOCK_RECORDS: usize = 32;
const RECORD_ALIGN: usize = 16;

struct Block {
    ptr: DevicePtr,
    capacity: usize,
    used: usize,
}

struct KindArena<K> {
    kind: K,
    stride: usize,
    blocks: Vec<Block>,
    count: usize,
}

impl<K: DeviceVariant> KindArena<K> {
    fn new(kind: K) -> Self {
        let stride = kind.record_size().max(1);
        Self {
            kind,
            stride: (stride + RECORD_ALIGN - 1) / RECORD_ALIGN * RECORD_ALIGN,
            blocks: Vec::new(),
            count: 0,
        }
    }

    fn reserve(&mut self, memory: &DeviceHandle) -> RenderResult<DevicePtr> {
        let full = self.blocks.last().map_or(true, |b| b.used == b.capacity);
        if full {
            let ptr = memory.alloc(self.stride * BLOCK_RECORDS)?;
            log::debug!(
                "{} pool: new block of {BLOCK_RECORDS} records at {ptr:?}",
                self.kind.name()
            );
            self.blocks.push(Block {
                ptr,
                capacity: BLOCK_RECORDS,
                used: 0,
            });
        }
        let block = self
            .blocks
            .last_mut()
            .ok_or_else(|| RenderError::upload("variant arena has no block"))?;
        let ptr = block.ptr.offset(block.used * self.stride);
        block.used += 1;
        self.count += 1;
        Ok(ptr)
    }
}

/// Device storage for a closed set of record kinds, keyed by scene leaf.
///
/// Emplace order within a kind defines slot order. `add_pointers` builds the
/// ordered, type-erased pointer list that samplers iterate over.
pub struct MultiTypeStorage<K: DeviceVariant> {
    memory: DeviceHandle,
    arenas: Vec<KindArena<K>>,
    entities: HashMap<LeafId, Tagged<K>>,
    pointers: Vec<TaggedPtr>,
    pointer_buffer: TypedBuffer<TaggedPtr>,
}

impl<K: DeviceVariant> MultiTypeStorage<K> {
    pub fn new(memory: DeviceHandle) -> Self {
        Self {
            arenas: K::ALL.iter().copied().map(KindArena::new).collect(),
            entities: HashMap::new(),
            pointers: Vec::new(),
            pointer_buffer: TypedBuffer::new(memory.clone()),
            memory,
        }
    }

    fn arena_mut(&mut self, kind: K) -> RenderResult<&mut KindArena<K>> {
        self.arenas
            .iter_mut()
            .find(|arena| arena.kind == kind)
            .ok_or_else(|| RenderError::upload(format!("no arena for kind {kind:?}")))
    }

    /// Reserve a slot for a record of type `R` owned by `leaf`.
    ///
    /// The slot stays zeroed until the caller writes the record.
    pub fn emplace_entity<R: VariantRecord<Kind = K>>(
        &mut self,
        leaf: LeafId,
    ) -> RenderResult<Tagged<K>> {
        if let Some(existing) = self.entities.get(&leaf) {
            return Err(RenderError::upload(format!(
                "{leaf:?} already owns a {} slot",
                existing.kind().name()
            )));
        }
        debug_assert_eq!(std::mem::size_of::<R>(), R::KIND.record_size());
        let memory = self.memory.clone();
        let ptr = self.arena_mut(R::KIND)?.reserve(&memory)?;
        let tagged = Tagged::new(R::KIND, ptr);
        self.entities.insert(leaf, tagged);
        Ok(tagged)
    }

    pub fn get_pointer(&self, leaf: LeafId) -> Option<Tagged<K>> {
        self.entities.get(&leaf).copied()
    }

    /// Append a pointer that is not backed by a leaf slot (e.g. a mesh light).
    pub fn add_pointer(&mut self, ptr: TaggedPtr) {
        self.pointers.push(ptr);
    }

    /// Append the pointers of `leaves` in order; leaves without a slot are skipped.
    pub fn add_pointers<I>(&mut self, leaves: I) -> usize
    where
        I: IntoIterator<Item = LeafId>,
    {
        let mut added = 0;
        for leaf in leaves {
            match self.entities.get(&leaf) {
                Some(tagged) => {
                    self.pointers.push(tagged.raw());
                    added += 1;
                }
                None => log::debug!("{leaf:?} has no device slot; not registered"),
            }
        }
        added
    }

    pub fn pointers(&self) -> &[TaggedPtr] {
        &self.pointers
    }

    pub fn kind_pointers(&self, kind: K) -> Vec<TaggedPtr> {
        self.pointers
            .iter()
            .copied()
            .filter(|ptr| ptr.kind::<K>() == Some(kind))
            .collect()
    }

    pub fn count_of(&self, kind: K) -> usize {
        self.arenas
            .iter()
            .find(|arena| arena.kind == kind)
            .map_or(0, |arena| arena.count)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Copy the ordered pointer list into device memory.
    pub fn upload_pointers(&mut self) -> RenderResult<DeviceSlice> {
        self.pointer_buffer.resize(self.pointers.len())?;
        self.pointer_buffer.copy_from_host(&self.pointers)?;
        Ok(self.pointer_buffer.as_slice())
    }

    pub fn pointer_slice(&self) -> DeviceSlice {
        self.pointer_buffer.as_slice()
    }
}

impl<K: DeviceVariant> Drop for MultiTypeStorage<K> {
    fn drop(&mut self) {
        for arena in &self.arenas {
            for block in &arena.blocks {
                if let Err(err) = self.memory.free(block.ptr) {
                    log::warn!("failed to free {} block: {err}", arena.kind.name());
                }
            }
        }
    }
}
