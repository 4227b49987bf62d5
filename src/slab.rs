//! Slab formatting and the per-page intrusive free list (spec.md §4.4).
//!
//! Grounded in the teacher's `pages.rs::ObjectPage8k`/`AllocablePage`
//! (header-plus-cells layout, `pop`/`push` mutating in-place) but reworked
//! from a per-object bitmap to an offset-linked free list, per spec.md's
//! data model: a freed cell's first word stores the offset of the next
//! free cell, so no separate occupancy bitmap is needed inside the page.

use crate::layout::{CacheRecord, ListHead, SlabHeader, PAGE_SIZE};
use crate::offset::{swizzle, Offset};

use core::mem::size_of;
use core::ptr;

/// Format a freshly allocated page at `page` as a slab for `cache`.
///
/// Zeros the page past its first word (spec.md §4.4); the first word holds
/// `SlabHeader::next`, which the caller overwrites right after this call
/// when it links the formatted slab onto `cache`'s live `free` list
/// (spec.md §4.5 step 3) — left alone here since by the time `cache_rec`
/// was snapshotted that list may already be stale.
///
/// # Safety
///
/// `page` must be the offset of a page the page manager just handed out
/// (and so aliases no other slab or object); `cache` must be the offset of
/// `cache_rec` itself within the region.
pub(crate) unsafe fn format_slab(base: *mut u8, page: Offset, cache: Offset, cache_rec: &CacheRecord) {
    let page_ptr = swizzle(base, page);
    ptr::write_bytes(page_ptr.add(size_of::<usize>()), 0, PAGE_SIZE - size_of::<usize>());

    let header = page_ptr as *mut SlabHeader;
    let aligned_size = cache_rec.aligned_size as usize;
    let object_count = cache_rec.object_count as usize;
    let objects_off = page.get() + PAGE_SIZE - object_count * aligned_size;

    (*header).cache = cache;
    (*header).objects = Offset::new(objects_off);

    // Thread the free list from the last cell down to the first, so
    // earlier (lower-address) cells are handed out first (spec.md §4.4:
    // "better locality").
    let mut next = Offset::NULL;
    for i in (0..object_count).rev() {
        let cell_off = objects_off + i * aligned_size;
        let cell_ptr = swizzle(base, Offset::new(cell_off)) as *mut Offset;
        ptr::write_unaligned(cell_ptr, next);
        next = Offset::new(cell_off);
    }

    (*header).free = ListHead {
        head: Offset::new(objects_off),
        count: object_count as u32,
    };

    log::debug!(
        "slab: formatted page {:?} for cache {:?}, {} objects of size {}",
        page,
        cache,
        object_count,
        aligned_size
    );
}

/// Unlink and return the head of `slab`'s free-object list.
///
/// # Safety
///
/// `slab` must be the offset of a slab page with a non-empty free list.
pub(crate) unsafe fn pop_object(base: *mut u8, slab: Offset) -> Offset {
    let header = swizzle(base, slab) as *mut SlabHeader;
    let head = (*header).free.head;
    debug_assert!(!head.is_null(), "pop_object called on an empty slab");

    let cell_ptr = swizzle(base, head) as *const Offset;
    let next = ptr::read_unaligned(cell_ptr);

    (*header).free.head = next;
    (*header).free.count -= 1;
    head
}

/// Push `obj` back onto `slab`'s free-object list.
///
/// Walks the existing free list first to assert `obj` doesn't already
/// appear on it and that every visited cell lies within the slab's page —
/// the double-free detection spec.md §4.4/§4.8 requires. A failed
/// assertion here means corruption or an allocator bug, not a recoverable
/// caller error, so it's fatal.
///
/// # Safety
///
/// `slab` must be a valid slab offset and `obj` a cell belonging to it
/// that the caller believes is currently allocated.
pub(crate) unsafe fn push_object(base: *mut u8, slab: Offset, obj: Offset) {
    let header = swizzle(base, slab) as *mut SlabHeader;
    let page_start = slab.get();
    let page_end = page_start + PAGE_SIZE;

    let mut cursor = (*header).free.head;
    while !cursor.is_null() {
        if cursor.get() < page_start || cursor.get() >= page_end {
            log::error!(
                "corrupt free list: cell {:?} outside slab page [{:#x}, {:#x})",
                cursor,
                page_start,
                page_end
            );
        }
        assert!(
            cursor.get() >= page_start && cursor.get() < page_end,
            "corrupt free list: cell {:?} outside slab page [{:#x}, {:#x})",
            cursor,
            page_start,
            page_end,
        );
        if cursor == obj {
            log::error!("double free of object at {:?}", obj);
        }
        assert_ne!(cursor, obj, "double free of object at {:?}", obj);
        let next_ptr = swizzle(base, cursor) as *const Offset;
        cursor = ptr::read_unaligned(next_ptr);
    }

    let obj_ptr = swizzle(base, obj) as *mut Offset;
    ptr::write_unaligned(obj_ptr, (*header).free.head);
    (*header).free.head = obj;
    (*header).free.count += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PAGE_MASK;

    #[repr(align(4096))]
    struct Page([u8; PAGE_SIZE]);

    fn make_cache_rec(aligned_size: usize, object_count: usize) -> CacheRecord {
        let mut rec = CacheRecord::default();
        rec.aligned_size = aligned_size as u32;
        rec.object_count = object_count as u32;
        rec
    }

    #[test]
    fn format_threads_free_list_low_address_first() {
        let mut page = Page([0; PAGE_SIZE]);
        let base = &mut page as *mut Page as *mut u8;
        assert_eq!(base as usize & PAGE_MASK, 0);

        let cache_rec = make_cache_rec(64, 10);
        unsafe {
            format_slab(base, Offset::new(0), Offset::new(0x2000), &cache_rec);

            let header = base as *const SlabHeader;
            assert_eq!((*header).free.count, 10);
            let first = (*header).free.head;
            assert_eq!(first, (*header).objects);

            // Pop all ten; they should come back in ascending address order.
            let mut popped = std::vec::Vec::new();
            for _ in 0..10 {
                popped.push(pop_object(base, Offset::new(0)));
            }
            for w in popped.windows(2) {
                assert!(w[0].get() < w[1].get());
            }
            assert_eq!((*header).free.count, 0);
        }
    }

    #[test]
    fn push_detects_double_free() {
        let mut page = Page([0; PAGE_SIZE]);
        let base = &mut page as *mut Page as *mut u8;
        let cache_rec = make_cache_rec(64, 4);

        unsafe {
            format_slab(base, Offset::new(0), Offset::new(0x2000), &cache_rec);
            let a = pop_object(base, Offset::new(0));
            push_object(base, Offset::new(0), a);

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                push_object(base, Offset::new(0), a);
            }));
            assert!(result.is_err(), "double free must be fatal");
        }
    }
}
