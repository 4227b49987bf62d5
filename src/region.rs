//! Region lifecycle: initialisation, the public allocate/free surface, and
//! diagnostics (spec.md §4.7, §5).
//!
//! Grounded in the teacher's top-level `SafeZoneAllocator`/`ZoneAllocator`
//! (`allocate`/`deallocate` dispatching by size class, `try_acquire_slab_page`
//! pulling from an external page source) — reworked so the "external page
//! source" is the region's own bitmap-backed space (`page_manager`) and the
//! dispatch table is the fixed-offset `CachesBlock` in the header rather
//! than a `[Cache<'a>; NUM_CLASSES]` array of live Rust references, since
//! everything here must survive being remapped to a new base address.
//!
//! `RegionHeader::stats`/`CacheRecord` accounting is grounded in
//! `examples/js2xxx-oceanic/h2o/libs/heap/src/lib.rs`'s `Stat` and
//! `examples/other_examples/01549076_DragonOS-Community-DragonOS__kernel-crates-rust-slabmalloc-src-zone.rs.rs`'s
//! `SlabUsage`/`free_space`.

use crate::bitmap::Bitmap;
use crate::cache;
use crate::error::InitError;
use crate::layout::{
    round_up, BitmapDescriptor, CacheRecord, CachesBlock, RegionHeader, SlabHeader, PAGE_MASK, PAGE_SIZE,
};
use crate::offset::{self, Offset};
use crate::router;

use core::mem::size_of;
use core::ptr;

/// A region header overlaid in place at the base of a mapping.
///
/// `Region` holds no state of its own beyond the header it wraps
/// (`#[repr(transparent)]`): a `&mut Region` *is* the first bytes of the
/// mapping, reinterpreted. There is no separately stored base pointer —
/// `base_ptr` is always `self as *mut Region as *mut u8`, so a `Region`
/// handle obtained from one base address is only valid for calls that pass
/// that same address; if the mapping is moved, re-derive the handle at the
/// new address instead of reusing the old one (spec.md §4.1).
///
/// Not `Sync`: spec.md §4.8 requires a single writer with no internal
/// synchronisation, and `&mut Region` already statically enforces that
/// within one address space. Multiple processes mapping the same region
/// concurrently is out of scope (spec.md §6 Non-goals) and this type makes
/// no attempt to detect it.
#[repr(transparent)]
pub struct Region(
    RegionHeader,
    // Zero-sized: suppresses the auto-derived `Sync` impl `RegionHeader`'s
    // all-plain-data fields would otherwise get, without affecting layout
    // (`repr(transparent)` only requires every other field be a ZST) or
    // blocking `Send`, which this type keeps (`UnsafeCell<()>` is `Send`).
    core::marker::PhantomData<core::cell::UnsafeCell<()>>,
);

/// Per-size-class allocation counters (spec.md §5 diagnostics).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub object_size: u32,
    pub slabs_full: u32,
    pub slabs_partial: u32,
    pub slabs_free: u32,
    pub objects_free: u64,
}

/// Region-wide usage snapshot (spec.md §5 diagnostics).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionStats {
    pub size: usize,
    pub total_pages: u32,
    pub free_pages: u32,
}

fn min_useful_pages() -> usize {
    // header page + at least one data page per size-class cache. Cheap
    // early-out before the bitmap-placement math below; the exact bound
    // (which also accounts for bitmap tail pages) is enforced later once
    // `reserved_pages` is known.
    1 + router::NUM_CLASSES + 1
}

unsafe fn zero_range(base: *mut u8, offset: usize, len: usize) {
    ptr::write_bytes(base.add(offset), 0, len);
}

/// Lay out and initialise a fresh region over `[base, base + size)`
/// (spec.md §4.7).
///
/// On success, every byte of the buffer is owned by the returned `Region`
/// until it's dropped (which does nothing — the caller owns the
/// underlying memory and is responsible for unmapping it).
///
/// # Safety
///
/// `base` must point to at least `size` writable bytes that no other code
/// will touch concurrently with this call or the returned `Region`'s
/// subsequent use.
pub unsafe fn region_init<'a>(base: *mut u8, size: usize) -> Result<&'a mut Region, InitError> {
    if base as usize & PAGE_MASK != 0 {
        return Err(InitError::MisalignedBase);
    }
    if size & PAGE_MASK != 0 {
        return Err(InitError::SizeNotPageMultiple);
    }
    let num_pages = size / PAGE_SIZE;
    if num_pages < min_useful_pages() {
        return Err(InitError::TooSmall);
    }

    let bitmap_bits = round_up(num_pages, 8);
    let bitmap_bytes = bitmap_bits / 8;
    let header_size = size_of::<RegionHeader>();
    let header_room = PAGE_SIZE - header_size;

    // Prefer packing both bitmaps into the header page's tail; fall back
    // to dedicated pages at the region's end only if they don't fit
    // (spec.md §4.7 Open Question: "bitmap tail placement" resolved in
    // favour of back-to-back placement, heap bitmap then slab bitmap).
    let (heap_bits_off, slab_bits_off, reserved_pages);
    if 2 * bitmap_bytes <= header_room {
        heap_bits_off = header_size;
        slab_bits_off = header_size + bitmap_bytes;
        reserved_pages = 1;
    } else {
        let tail_bytes = 2 * bitmap_bytes;
        let tail_pages = round_up(tail_bytes, PAGE_SIZE) / PAGE_SIZE;
        reserved_pages = 1 + tail_pages;
        heap_bits_off = PAGE_SIZE;
        slab_bits_off = PAGE_SIZE + bitmap_bytes;
    }

    // spec.md §4.7: the number of data pages left over must exceed the
    // number of size-class caches, or a single allocation burst across all
    // classes couldn't be served even once.
    if reserved_pages >= num_pages || num_pages - reserved_pages <= router::NUM_CLASSES {
        return Err(InitError::TooSmall);
    }

    zero_range(base, 0, size);

    let header = base as *mut RegionHeader;
    (*header).size = size;
    (*header).pages = Offset::new(reserved_pages * PAGE_SIZE);
    (*header).free_page = Offset::new(reserved_pages * PAGE_SIZE);
    (*header).heap_bitmap = BitmapDescriptor {
        bits: Offset::new(heap_bits_off),
        bit_count: bitmap_bits as u32,
    };
    (*header).caches.slab_bitmap = BitmapDescriptor {
        bits: Offset::new(slab_bits_off),
        bit_count: bitmap_bits as u32,
    };
    (*header).caches.num_caches = router::NUM_CLASSES as u32;
    for rec in (*header).caches.records.iter_mut() {
        *rec = CacheRecord::default();
    }
    for (i, &class_size) in router::CLASS_SIZES.iter().enumerate() {
        let aligned = router::aligned_size(i);
        let rec = &mut (*header).caches.records[i];
        rec.object_size = class_size;
        rec.align = router::ALIGNMENT;
        rec.aligned_size = aligned;
        rec.object_count = router::object_count(aligned);
    }

    // Mark the reserved pages (header + any dedicated bitmap tail pages) as
    // permanently occupied in the slab bitmap, so the page manager never
    // hands them out.
    {
        let mut slab_bm = Bitmap::from_descriptor(base, (*header).caches.slab_bitmap);
        for page in 0..reserved_pages {
            slab_bm.set(page, true);
        }
    }

    log::debug!(
        "region_init: {} bytes, {} pages, {} reserved for bookkeeping",
        size,
        num_pages,
        reserved_pages
    );

    Ok(&mut *(base as *mut Region))
}

impl Region {
    #[inline]
    fn base_ptr(&self) -> *mut u8 {
        self as *const Region as *mut u8
    }

    #[inline]
    fn header(&self) -> &RegionHeader {
        &self.0
    }

    #[inline]
    fn header_mut(&mut self) -> &mut RegionHeader {
        &mut self.0
    }

    /// Translate `offset` to a process-local pointer valid right now, for
    /// this region's current base address (spec.md §4.1).
    pub fn swizzle(&self, off: Offset) -> *mut u8 {
        unsafe { offset::swizzle(self.base_ptr(), off) }
    }

    /// Translate a process-local pointer, obtained from [`Region::swizzle`]
    /// on this same region, back to an [`Offset`].
    ///
    /// # Safety
    ///
    /// `addr` must point within this region.
    pub unsafe fn unswizzle(&self, addr: *mut u8) -> Offset {
        offset::unswizzle(self.base_ptr(), addr)
    }

    /// The size class that would serve a request of `size` bytes, or
    /// `None` if it's too large for every class (spec.md §4.6).
    pub fn size_class_for(&self, size: usize) -> Option<u32> {
        router::class_for(size).map(|i| router::CLASS_SIZES[i])
    }

    /// Allocate an object of `size` bytes.
    ///
    /// Returns [`Offset::NULL`] if `size` exceeds [`router::MAX_OBJECT_SIZE`]
    /// (the heap path for larger requests is deliberately unimplemented,
    /// spec.md §6 Non-goals) or if the region is out of pages — both are
    /// ordinary, recoverable conditions, not errors (spec.md §7).
    pub fn allocate(&mut self, size: usize) -> Offset {
        let class = match router::class_for(size) {
            Some(c) => c,
            None => {
                log::debug!("region: request for {} bytes exceeds the largest size class", size);
                return Offset::NULL;
            }
        };
        let base = self.base_ptr();
        let header = self.header_mut();
        let cache_off = cache_offset(class);
        let obj = unsafe { cache::allocate(base, header, cache_off) };
        log::trace!("region: allocate({}) -> {:?} (class {} bytes)", size, obj, router::CLASS_SIZES[class]);
        obj
    }

    /// Return `offset` to whichever cache owns it.
    ///
    /// A no-op if `offset` is [`Offset::NULL`]. Fatal (via assertion) if
    /// `offset` doesn't belong to any live object of any cache — spec.md
    /// §4.8 treats an invalid free as corruption, not a recoverable caller
    /// error, since by construction every valid offset in this crate's API
    /// comes from a prior `allocate` call.
    pub fn free(&mut self, offset: Offset) {
        if offset.is_null() {
            return;
        }
        let base = self.base_ptr();
        let page_start = Offset::new(offset.get() & !PAGE_MASK);
        let slab_header = unsafe { &*(self.swizzle(page_start) as *const SlabHeader) };
        let cache_off = slab_header.cache;
        if cache_off.is_null() {
            log::error!("free of {:?}: containing page {:?} is not a slab page", offset, page_start);
        }
        assert!(
            !cache_off.is_null(),
            "free of {:?}: containing page {:?} is not a slab page",
            offset,
            page_start
        );
        log::trace!("region: free({:?}) on slab {:?}, cache {:?}", offset, page_start, cache_off);
        unsafe { cache::free(base, cache_off, page_start, offset) };
    }

    /// Whether `offset` currently identifies a live, allocated object
    /// (spec.md §5 diagnostics) — `false` for [`Offset::NULL`], an offset
    /// on a heap page, or a free cell within a slab page.
    pub fn is_object(&self, offset: Offset) -> bool {
        if offset.is_null() || offset.get() >= self.header().size {
            return false;
        }
        let page_bit = offset.get() / PAGE_SIZE;
        let base = self.base_ptr();
        let is_slab_page = unsafe { Bitmap::from_descriptor(base, self.header().caches.slab_bitmap).get(page_bit) };
        if !is_slab_page {
            return false;
        }

        let page_start = offset.get() & !PAGE_MASK;
        let slab_header = unsafe { &*(self.swizzle(Offset::new(page_start)) as *const SlabHeader) };
        if slab_header.cache.is_null() {
            return false;
        }
        if offset.get() < slab_header.objects.get() {
            return false;
        }

        let mut cursor = slab_header.free.head;
        while !cursor.is_null() {
            if cursor == offset {
                return false;
            }
            let next_ptr = self.swizzle(cursor) as *const Offset;
            cursor = unsafe { ptr::read_unaligned(next_ptr) };
        }
        true
    }

    /// A region-wide usage snapshot (spec.md §5 diagnostics).
    pub fn stats(&self) -> RegionStats {
        let header = self.header();
        let total_pages = (header.size / PAGE_SIZE) as u32;
        let base = self.base_ptr();
        let slab_bm = unsafe { Bitmap::from_descriptor(base, header.caches.slab_bitmap) };
        let heap_bm = unsafe { Bitmap::from_descriptor(base, header.heap_bitmap) };
        let mut free_pages = 0u32;
        for page in 0..total_pages as usize {
            if !slab_bm.get(page) && !heap_bm.get(page) {
                free_pages += 1;
            }
        }
        RegionStats {
            size: header.size,
            total_pages,
            free_pages,
        }
    }

    /// Per-size-class usage, in cache declaration order (spec.md §5
    /// diagnostics).
    pub fn cache_stats(&self) -> [CacheStats; router::NUM_CLASSES] {
        let mut out = [CacheStats::default(); router::NUM_CLASSES];
        for (i, rec) in self.header().caches.records[..router::NUM_CLASSES].iter().enumerate() {
            out[i] = CacheStats {
                object_size: rec.object_size,
                slabs_full: rec.full.count,
                slabs_partial: rec.partial.count,
                slabs_free: rec.free.count,
                objects_free: list_objects_free(self.base_ptr(), rec),
            };
        }
        out
    }

    /// Walk the region's bookkeeping and assert the invariants spec.md §4.8
    /// and §9 name: no page is both slab and heap (P1), and every cache
    /// record's `object_count` accounting is internally consistent (P5).
    ///
    /// Debug/test tooling only — not called on any allocate/free path, and
    /// deliberately expensive (O(pages) + O(slabs)).
    #[cfg(any(test, feature = "validate"))]
    pub fn validate(&self) {
        let header = self.header();
        let total_pages = (header.size / PAGE_SIZE) as usize;
        let base = self.base_ptr();
        let slab_bm = unsafe { Bitmap::from_descriptor(base, header.caches.slab_bitmap) };
        let heap_bm = unsafe { Bitmap::from_descriptor(base, header.heap_bitmap) };
        for page in 0..total_pages {
            assert!(
                !(slab_bm.get(page) && heap_bm.get(page)),
                "page {} is marked both slab and heap",
                page
            );
        }

        for rec in header.caches.records[..router::NUM_CLASSES].iter() {
            let lists = [
                (rec.full.head, 0u32),
                (rec.partial.head, rec.object_count),
                (rec.free.head, rec.object_count),
            ];
            for (list_idx, &(kind_head, _)) in lists.iter().enumerate() {
                let mut cursor = kind_head;
                while !cursor.is_null() {
                    let slab_header = unsafe { &*(offset::swizzle(base, cursor) as *const SlabHeader) };
                    let free_count = slab_header.free.count;
                    match list_idx {
                        0 => assert_eq!(free_count, 0, "slab {:?} on full has free objects", cursor),
                        1 => assert!(
                            free_count > 0 && free_count < rec.object_count,
                            "slab {:?} on partial but not actually partially free",
                            cursor
                        ),
                        _ => assert_eq!(
                            free_count, rec.object_count,
                            "slab {:?} on free but not fully free",
                            cursor
                        ),
                    }
                    cursor = slab_header.next;
                }
            }
        }
    }
}

/// Free-function form of [`Region::swizzle`] (spec.md §4.1's literal
/// `swizzle(R, off)` signature), for callers that prefer it to the
/// inherent method.
pub fn swizzle(region: &Region, off: Offset) -> *mut u8 {
    region.swizzle(off)
}

/// Free-function form of [`Region::unswizzle`].
///
/// # Safety
///
/// Same as [`Region::unswizzle`].
pub unsafe fn unswizzle(region: &Region, addr: *mut u8) -> Offset {
    region.unswizzle(addr)
}

fn cache_offset(class: usize) -> Offset {
    let records_off = core::mem::offset_of!(RegionHeader, caches) + core::mem::offset_of!(CachesBlock, records);
    Offset::new(records_off + class * size_of::<CacheRecord>())
}

fn list_objects_free(base: *mut u8, rec: &CacheRecord) -> u64 {
    let mut total = 0u64;
    for &head in &[rec.partial.head, rec.free.head] {
        let mut cursor = head;
        while !cursor.is_null() {
            let slab_header = unsafe { &*(offset::swizzle(base, cursor) as *const SlabHeader) };
            total += slab_header.free.count as u64;
            cursor = slab_header.next;
        }
    }
    total
}
