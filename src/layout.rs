//! On-map struct layouts (spec.md §3).
//!
//! Every non-scalar field here is an [`Offset`], never a pointer — these
//! structs are read back directly out of caller-supplied bytes, possibly
//! after the bytes have been rebased to a different address, so nothing in
//! this module may hold a process-local reference across a call boundary.
//! All of them are `#[repr(C)]` so field order and size are stable across
//! compilations of this crate (mirrors the teacher's `#[repr(C)]` on
//! `ObjectPage8k` together with its `const_assert_eq!` on `size_of`).

use crate::offset::Offset;

/// The allocator's coarse unit of supply (spec.md glossary).
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Number of preallocated cache record slots in the header.
///
/// Only [`crate::router::NUM_CLASSES`] of these are populated by
/// `region_init`. The remaining slots mirror the 16 preallocated, named
/// cache slots sketched (and left disabled) for custom cache registration
/// in the studied allocator (spec.md §9 DESIGN NOTES, "Per-cache custom
/// registration") — reserved here for that future surface, unused by this
/// crate today.
pub const MAX_CACHES: usize = 16;

pub const CACHE_NAME_LEN: usize = 16;

/// Round `value` up to the nearest multiple of `multiple`.
pub(crate) const fn round_up(value: usize, multiple: usize) -> usize {
    (value + multiple - 1) / multiple * multiple
}

/// Describes one page bitmap: where its bit array lives and how many bits
/// it holds (rounded up to a multiple of 8, spec.md §3).
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct BitmapDescriptor {
    pub bits: Offset,
    pub bit_count: u32,
}

/// A `(head_offset, count)` pair. Used both for a cache's three slab lists
/// and for a slab's free-object-cell list (spec.md §3) — same shape, two
/// different meanings depending on where it's embedded.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct ListHead {
    pub head: Offset,
    pub count: u32,
}

impl ListHead {
    pub const EMPTY: ListHead = ListHead {
        head: Offset::NULL,
        count: 0,
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }
}

/// One size-class record: name, its three slab lists, and the object
/// geometry for that class (spec.md §3).
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct CacheRecord {
    pub name: [u8; CACHE_NAME_LEN],
    pub full: ListHead,
    pub partial: ListHead,
    pub free: ListHead,
    pub object_size: u32,
    pub align: u32,
    pub aligned_size: u32,
    pub object_count: u32,
}

impl Default for CacheRecord {
    fn default() -> Self {
        CacheRecord {
            name: [0; CACHE_NAME_LEN],
            full: ListHead::EMPTY,
            partial: ListHead::EMPTY,
            free: ListHead::EMPTY,
            object_size: 0,
            align: 0,
            aligned_size: 0,
            object_count: 0,
        }
    }
}

/// Which of a cache's three lists a slab belongs to.
///
/// Used to compute the offset a [`SlabHeader::list`] field points at, so a
/// slab can tell which list it's on without its cache scanning for it
/// (spec.md §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ListKind {
    Full,
    Partial,
    Free,
}

/// Offset, relative to `cache`, of the [`ListHead`] field for `kind`.
pub(crate) fn list_offset(cache: Offset, kind: ListKind) -> Offset {
    let field = match kind {
        ListKind::Full => core::mem::offset_of!(CacheRecord, full),
        ListKind::Partial => core::mem::offset_of!(CacheRecord, partial),
        ListKind::Free => core::mem::offset_of!(CacheRecord, free),
    };
    Offset::new(cache.get() + field)
}

/// The fixed-capacity table of cache records plus the bitmap that tracks
/// which pages belong to slabs (as opposed to the heap).
#[repr(C)]
pub(crate) struct CachesBlock {
    pub slab_bitmap: BitmapDescriptor,
    pub num_caches: u32,
    pub records: [CacheRecord; MAX_CACHES],
}

/// The region descriptor, stored at offset 0 of the region (spec.md §3).
#[repr(C)]
pub(crate) struct RegionHeader {
    pub size: usize,
    pub pages: Offset,
    pub free_page: Offset,
    pub heap_bitmap: BitmapDescriptor,
    pub caches: CachesBlock,
}

/// The header written at the top of every slab page (spec.md §3).
#[repr(C)]
pub(crate) struct SlabHeader {
    /// Next slab in the same list.
    pub next: Offset,
    /// The owning cache record.
    pub cache: Offset,
    /// Offset of the [`ListHead`] field of the list this slab is currently
    /// on — lets `push_object`/`free` tell which list to unlink from
    /// without the cache scanning all three.
    pub list: Offset,
    /// Offset where the object cells begin.
    pub objects: Offset,
    /// This slab's free-object-cell list.
    pub free: ListHead,
}
