//! Cache: one size class's three slab lists and the allocate/free
//! transition rules between them (spec.md §4.5).
//!
//! Grounded in `examples/other_examples/542e1364_theseus-os-rust-slabmalloc__src-sc.rs.rs`'s
//! `SCAllocator` (`empty_slabs`/`slabs`/`full_slabs`, `move_to_empty`/
//! `move_partial_to_full`/`move_full_to_partial`, LIFO `insert_front`/
//! `pop`) — ported from pointer-linked `PageList`s to the offset-linked
//! lists spec.md's data model requires.

use crate::layout::{list_offset, CacheRecord, ListHead, ListKind, RegionHeader, SlabHeader, PAGE_SIZE};
use crate::offset::{swizzle, Offset};
use crate::page_manager;
use crate::slab;

use core::ptr;

unsafe fn list_ref<'a>(base: *mut u8, cache: Offset, kind: ListKind) -> &'a ListHead {
    &*(swizzle(base, list_offset(cache, kind)) as *const ListHead)
}

unsafe fn list_mut<'a>(base: *mut u8, cache: Offset, kind: ListKind) -> &'a mut ListHead {
    &mut *(swizzle(base, list_offset(cache, kind)) as *mut ListHead)
}

/// Push `slab_off` onto the front of `kind`'s list (LIFO — spec.md §4.5:
/// "lists are LIFO; newest slab is the head; keeps hot pages at the
/// front").
unsafe fn list_push_front(base: *mut u8, cache: Offset, kind: ListKind, slab_off: Offset) {
    let list = list_mut(base, cache, kind);
    let header = swizzle(base, slab_off) as *mut SlabHeader;
    (*header).next = list.head;
    (*header).list = list_offset(cache, kind);
    list.head = slab_off;
    list.count += 1;
}

/// Pop the front slab off `kind`'s list, or [`Offset::NULL`] if empty.
unsafe fn list_pop_front(base: *mut u8, cache: Offset, kind: ListKind) -> Offset {
    let list = list_mut(base, cache, kind);
    let head = list.head;
    if head.is_null() {
        return Offset::NULL;
    }
    let header = swizzle(base, head) as *mut SlabHeader;
    list.head = (*header).next;
    list.count -= 1;
    (*header).next = Offset::NULL;
    head
}

/// Unlink `slab_off` from `list`, scanning for it since a slab only
/// records *which* list it's on (via [`SlabHeader::list`]), not its
/// predecessor (spec.md §4.5: "unlink it (by scanning the list — slab
/// knows its list via `slab->list` but not its predecessor)").
unsafe fn list_remove(base: *mut u8, list: &mut ListHead, slab_off: Offset) {
    let mut cursor = list.head;
    let mut prev: Option<Offset> = None;
    while !cursor.is_null() {
        let header = swizzle(base, cursor) as *mut SlabHeader;
        let next = (*header).next;
        if cursor == slab_off {
            match prev {
                None => list.head = next,
                Some(p) => (*(swizzle(base, p) as *mut SlabHeader)).next = next,
            }
            (*header).next = Offset::NULL;
            list.count -= 1;
            return;
        }
        prev = Some(cursor);
        cursor = next;
    }
    log::error!("slab {:?} not found on the list it claims to be on", slab_off);
    unreachable!("slab {:?} not found on the list it claims to be on", slab_off);
}

unsafe fn mark_slab_page(base: *mut u8, header: &mut RegionHeader, page: Offset) {
    use crate::bitmap::Bitmap;
    let mut slab_bm = Bitmap::from_descriptor(base, header.caches.slab_bitmap);
    slab_bm.set(page.get() / PAGE_SIZE, true);
}

/// Allocate one object from `cache` (spec.md §4.5 steps 1-4).
///
/// # Safety
///
/// `header` must be a valid, initialised region header based at `base`;
/// `cache` must be the offset of one of its `CacheRecord`s.
pub(crate) unsafe fn allocate(base: *mut u8, header: &mut RegionHeader, cache: Offset) -> Offset {
    loop {
        if !list_ref(base, cache, ListKind::Partial).is_empty() {
            let slab_off = list_ref(base, cache, ListKind::Partial).head;
            let obj = slab::pop_object(base, slab_off);

            let slab_now_empty = (*(swizzle(base, slab_off) as *const SlabHeader)).free.head.is_null();
            if slab_now_empty {
                list_remove(base, list_mut(base, cache, ListKind::Partial), slab_off);
                list_push_front(base, cache, ListKind::Full, slab_off);
            }
            return obj;
        }

        if !list_ref(base, cache, ListKind::Free).is_empty() {
            let slab_off = list_pop_front(base, cache, ListKind::Free);
            let obj = slab::pop_object(base, slab_off);

            let object_count = (*(swizzle(base, cache) as *const CacheRecord)).object_count;
            let dest = if object_count == 1 {
                ListKind::Full
            } else {
                ListKind::Partial
            };
            list_push_front(base, cache, dest, slab_off);
            return obj;
        }

        let page = page_manager::allocate_page(base, header);
        if page.is_null() {
            log::debug!("cache {:?}: out of pages", cache);
            return Offset::NULL;
        }

        let cache_rec = ptr::read(swizzle(base, cache) as *const CacheRecord);
        slab::format_slab(base, page, cache, &cache_rec);
        mark_slab_page(base, header, page);
        list_push_front(base, cache, ListKind::Free, page);
        // Loop back around to serve from the page we just formatted.
    }
}

/// Release `obj`, belonging to `slab_off` on `cache`, back to its slab
/// (spec.md §4.5 free path).
///
/// If the slab becomes entirely free it's moved onto `free`; per spec.md
/// this is the only documented source list (`partial`), but a cache whose
/// `object_count == 1` sends slabs straight from `free` to `full` on
/// allocate (step 2), so freeing their sole object must also handle moving
/// off `full`.
///
/// # Safety
///
/// `cache` and `slab_off` must be valid, and `obj` a live object cell of
/// `slab_off`.
pub(crate) unsafe fn free(base: *mut u8, cache: Offset, slab_off: Offset, obj: Offset) {
    slab::push_object(base, slab_off, obj);

    let object_count = (*(swizzle(base, cache) as *const CacheRecord)).object_count;
    let slab_header = swizzle(base, slab_off) as *const SlabHeader;
    let free_count = (*slab_header).free.count;

    if free_count != object_count {
        return;
    }

    let current_list = (*slab_header).list;
    if current_list == list_offset(cache, ListKind::Partial) {
        list_remove(base, list_mut(base, cache, ListKind::Partial), slab_off);
        list_push_front(base, cache, ListKind::Free, slab_off);
    } else if current_list == list_offset(cache, ListKind::Full) {
        list_remove(base, list_mut(base, cache, ListKind::Full), slab_off);
        list_push_front(base, cache, ListKind::Free, slab_off);
    }
    // Already on `free`: nothing to do.
}
