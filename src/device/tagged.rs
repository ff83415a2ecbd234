// src/device/tagged.rs
// Tagged device pointers for closed sets of variant records (lights, media)
// Exists so kernels dispatch by switching on a tag instead of through virtual calls

use super::DevicePtr;
use bytemuck::{Pod, Zeroable};
use std::fmt::Debug;

/// A closed set of concrete device record kinds.
///
/// Tags are non-zero; tag 0 is reserved for the null handle.
pub trait DeviceVariant: Copy + Eq + Debug + Send + Sync + 'static {
    const ALL: &'static [Self];

    fn tag(self) -> u32;

    fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.tag() == tag)
    }

    /// Size of the device record stored for this kind.
    fn record_size(self) -> usize;

    fn name(self) -> &'static str;
}

/// Device-side record of one concrete variant kind.
pub trait VariantRecord: Pod {
    type Kind: DeviceVariant;
    const KIND: Self::Kind;
}

/// `{address, tag}` pair as laid out in device memory.
///
/// The tag can only be written when the handle is created.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct TaggedPtr {
    ptr: DevicePtr,
    tag: u32,
    _pad: u32,
}

const _: () = assert!(std::mem::size_of::<TaggedPtr>() == 16);

impl TaggedPtr {
    pub const NULL: TaggedPtr = TaggedPtr {
        ptr: DevicePtr::NULL,
        tag: 0,
        _pad: 0,
    };

    pub(crate) fn new<K: DeviceVariant>(kind: K, ptr: DevicePtr) -> Self {
        debug_assert!(kind.tag() != 0, "tag 0 is reserved for null");
        Self {
            ptr,
            tag: kind.tag(),
            _pad: 0,
        }
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn is_null(&self) -> bool {
        self.tag == 0 || self.ptr.is_null()
    }

    pub fn kind<K: DeviceVariant>(&self) -> Option<K> {
        if self.is_null() {
            None
        } else {
            K::from_tag(self.tag)
        }
    }
}

/// Host-side typed view of a `TaggedPtr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tagged<K: DeviceVariant> {
    kind: K,
    ptr: DevicePtr,
}

impl<K: DeviceVariant> Tagged<K> {
    pub(crate) fn new(kind: K, ptr: DevicePtr) -> Self {
        Self { kind, ptr }
    }

    pub fn kind(&self) -> K {
        self.kind
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn raw(&self) -> TaggedPtr {
        TaggedPtr::new(self.kind, self.ptr)
    }

    /// Typed view of a raw pointer, `None` for null or an unknown tag.
    pub fn from_raw(raw: TaggedPtr) -> Option<Self> {
        raw.kind::<K>().map(|kind| Self::new(kind, raw.ptr()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Shape {
        Sphere,
        Box,
    }

    impl DeviceVariant for Shape {
        const ALL: &'static [Self] = &[Shape::Sphere, Shape::Box];

        fn tag(self) -> u32 {
            match self {
                Shape::Sphere => 1,
                Shape::Box => 2,
            }
        }

        fn record_size(self) -> usize {
            16
        }

        fn name(self) -> &'static str {
            match self {
                Shape::Sphere => "sphere",
                Shape::Box => "box",
            }
        }
    }

    #[test]
    fn tag_survives_raw_round_trip() {
        let tagged = Tagged::new(Shape::Box, DevicePtr(0x1000));
        let raw = tagged.raw();
        assert_eq!(raw.tag(), 2);
        assert_eq!(Tagged::<Shape>::from_raw(raw), Some(tagged));
        let bytes = bytemuck::bytes_of(&raw).to_vec();
        let back: TaggedPtr = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(back.kind::<Shape>(), Some(Shape::Box));
    }

    #[test]
    fn null_and_unknown_tags_resolve_to_none() {
        assert!(TaggedPtr::NULL.is_null());
        assert_eq!(TaggedPtr::NULL.kind::<Shape>(), None);
        assert_eq!(Shape::from_tag(7), None);
    }
}
