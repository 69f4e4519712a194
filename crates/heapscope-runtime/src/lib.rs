//! Host-side runtime model inspected by heapscope.
//!
//! The heap stores objects as raw instance bytes described by per-class binary
//! type metadata, the same way a native object runtime would. Nothing in here
//! knows how a sweep works; `heapscope-sweep` only sees this crate through
//! checked accessors that report a [`Fault`] instead of touching invalid
//! storage.

pub mod encoding;
pub mod guard;
mod heap;
pub mod metadata;

// Compiled for this crate's own unit tests, and behind `fixtures` for the demo
// host and downstream integration suites.
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

use std::fmt;

pub use encoding::{ScalarKind, TypeTag};
pub use guard::{protect, Fault};
pub use heap::{BodyKind, ClassMeta, Elements, Heap, HeapError, Hold, MethodInfo, ObjectInfo};
pub use metadata::{ClassBuilder, CompactKind, Qualifier};

/// Name of the base type every class implicitly derives from.
pub const ROOT_CLASS: &str = "Object";
pub const STRING_CLASS: &str = "String";
pub const ARRAY_CLASS: &str = "Array";
pub const SET_CLASS: &str = "Set";
pub const DICTIONARY_CLASS: &str = "Dictionary";

/// Size in bytes of a reference stored in instance storage.
pub const REF_SIZE: usize = 8;

/// Identity of a heap object.
///
/// Slots are recycled once an object is destroyed; the generation disambiguates
/// a stale reference from the new occupant of the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    slot: u32,
    generation: u32,
}

impl ObjectRef {
    pub(crate) fn new(slot: u32, generation: u32) -> Self {
        debug_assert!(slot != 0, "slot 0 is reserved for nil");
        Self { slot, generation }
    }

    pub fn slot(self) -> u32 {
        self.slot
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Encoding used inside raw instance storage.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.slot) << 32) | u64::from(self.generation)
    }

    /// Decode a stored reference. The all-zero pattern is nil.
    pub fn from_bits(bits: u64) -> Option<Self> {
        let slot = (bits >> 32) as u32;
        if slot == 0 {
            return None;
        }
        Some(Self {
            slot,
            generation: bits as u32,
        })
    }

    pub fn to_le_bytes(self) -> [u8; REF_SIZE] {
        self.to_bits().to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; REF_SIZE]) -> Option<Self> {
        Self::from_bits(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.to_bits())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Metatype fields store `index + 1`; zero means no class.
    pub fn to_raw(self) -> u32 {
        self.0 + 1
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        raw.checked_sub(1).map(Self)
    }
}
