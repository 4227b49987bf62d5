//! End-to-end scenarios and invariant checks run against the public API
//! over a real, page-aligned buffer (spec.md §8).

use region::{region_init, Region};

const PAGE_SIZE: usize = 4096;

#[derive(Clone, Copy)]
#[repr(align(4096))]
struct Page([u8; PAGE_SIZE]);

/// A heap-allocated, page-aligned buffer. `Vec<Page>`'s allocation is laid
/// out according to `Page`'s `repr(align(4096))`, so the first byte of
/// `pages` is always page-aligned regardless of where the `Vec` itself
/// lives.
struct AlignedBuf {
    pages: Vec<Page>,
}

impl AlignedBuf {
    fn new(byte_len: usize) -> Self {
        assert_eq!(byte_len % PAGE_SIZE, 0);
        AlignedBuf {
            pages: vec![Page([0; PAGE_SIZE]); byte_len / PAGE_SIZE],
        }
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.pages.as_mut_ptr() as *mut u8
    }

    fn len(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    fn init(&mut self) -> &mut Region {
        let ptr = self.as_mut_ptr();
        let len = self.len();
        unsafe { region_init(ptr, len).expect("region_init") }
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn scenario_1_write_and_read_back() {
    init_logger();
    let mut buf = AlignedBuf::new(20 * PAGE_SIZE);
    let region = buf.init();

    let o1 = region.allocate(7);
    assert!(!o1.is_null());

    let payload = b"foobar\0";
    unsafe {
        region.swizzle(o1).copy_from(payload.as_ptr(), payload.len());
        let read_back = core::slice::from_raw_parts(region.swizzle(o1), payload.len());
        assert_eq!(read_back, payload);
    }
}

#[test]
fn scenario_2_free_then_allocate_reuses_offset() {
    init_logger();
    let mut buf = AlignedBuf::new(20 * PAGE_SIZE);
    let region = buf.init();

    let o1 = region.allocate(7);
    region.free(o1);
    let o2 = region.allocate(7);
    assert_eq!(o1, o2, "P7: stable LIFO reuse");
}

#[test]
fn scenario_3_exhaust_largest_class() {
    init_logger();
    let mut buf = AlignedBuf::new(20 * PAGE_SIZE);
    let region = buf.init();

    let before = region.stats();

    // Read the class's actual per-slab capacity back out of stats rather
    // than hardcoding the header-size formula, so the test can't encode
    // the same bug it would otherwise be checking for.
    let objects_per_page = {
        let o = region.allocate(256);
        assert!(!o.is_null());
        region.free(o);
        region.cache_stats()[5].objects_free as usize
    };

    let mut count = 0usize;
    loop {
        let o = region.allocate(256);
        if o.is_null() {
            break;
        }
        count += 1;
    }

    assert_eq!(count, objects_per_page * before.free_pages as usize);
}

#[test]
fn scenario_4_full_partial_free_transitions() {
    init_logger();
    let mut buf = AlignedBuf::new(20 * PAGE_SIZE);
    let region = buf.init();

    let stats_before = region.cache_stats()[0];
    assert_eq!(stats_before.slabs_full, 0);
    assert_eq!(stats_before.slabs_partial, 0);

    // Force the class's first slab to form, then read its capacity back
    // out of stats so the test doesn't hardcode the page layout.
    let per_slab = {
        let o = region.allocate(8);
        assert!(!o.is_null());
        region.free(o);
        region.cache_stats()[0].objects_free
    };

    let mut offsets = Vec::new();
    for _ in 0..per_slab {
        let o = region.allocate(8);
        assert!(!o.is_null());
        offsets.push(o);
    }

    let filled = region.cache_stats()[0];
    assert_eq!(filled.slabs_full, 1);
    assert_eq!(filled.slabs_partial, 0);
    assert_eq!(filled.objects_free, 0);

    let first = offsets.pop().unwrap();
    region.free(first);
    let after_one_free = region.cache_stats()[0];
    assert_eq!(after_one_free.slabs_full, 0);
    assert_eq!(after_one_free.slabs_partial, 1);

    for o in offsets {
        region.free(o);
    }
    let after_all_free = region.cache_stats()[0];
    assert_eq!(after_all_free.slabs_partial, 0);
    assert_eq!(after_all_free.slabs_free, 1);
}

#[test]
fn scenario_5_rebasing_preserves_contents() {
    init_logger();
    let mut buf = AlignedBuf::new(20 * PAGE_SIZE);
    let len = buf.len();
    let region = buf.init();

    let sizes = [8usize, 16, 64, 200];
    let mut offsets = Vec::new();
    for (i, &size) in sizes.iter().enumerate() {
        let o = region.allocate(size);
        assert!(!o.is_null());
        unsafe {
            *region.swizzle(o) = i as u8;
        }
        offsets.push(o);
    }

    let original = unsafe { core::slice::from_raw_parts(region as *const Region as *const u8, len) };
    let mut copy = AlignedBuf::new(len);
    copy.pages.copy_from_slice(unsafe {
        core::slice::from_raw_parts(original.as_ptr() as *const Page, copy.pages.len())
    });

    let copy_base = copy.as_mut_ptr();
    for (i, &o) in offsets.iter().enumerate() {
        let byte = unsafe { *copy_base.add(o.get()) };
        assert_eq!(byte, i as u8, "P4: rebased contents must match");
    }
}

#[test]
fn scenario_6_init_rejects_bad_input() {
    init_logger();

    // Un-aligned base.
    let mut misaligned = vec![0u8; 20 * PAGE_SIZE + 1];
    let base = unsafe { misaligned.as_mut_ptr().add(1) };
    assert!(unsafe { region_init(base, 20 * PAGE_SIZE) }.is_err());

    // Non-page-multiple size.
    let mut buf = AlignedBuf::new(20 * PAGE_SIZE);
    assert!(unsafe { region_init(buf.as_mut_ptr(), 20 * PAGE_SIZE - 1) }.is_err());

    // Too small to hold its own bookkeeping.
    let mut tiny = AlignedBuf::new(PAGE_SIZE);
    assert!(unsafe { region_init(tiny.as_mut_ptr(), PAGE_SIZE) }.is_err());

    // Enough pages to pass the header-page check, but not enough data
    // pages left over to cover every size-class cache (spec.md §4.7: data
    // pages must exceed the number of classes, six here).
    let mut starved = AlignedBuf::new(7 * PAGE_SIZE);
    assert!(unsafe { region_init(starved.as_mut_ptr(), 7 * PAGE_SIZE) }.is_err());

    // One more data page tips it over the line.
    let mut enough = AlignedBuf::new(8 * PAGE_SIZE);
    assert!(unsafe { region_init(enough.as_mut_ptr(), 8 * PAGE_SIZE) }.is_ok());
}

#[test]
fn property_p6_size_class_correctness() {
    init_logger();
    let mut buf = AlignedBuf::new(20 * PAGE_SIZE);
    let region = buf.init();

    for s in [1usize, 7, 8, 9, 33, 256] {
        let o = region.allocate(s);
        assert!(!o.is_null());
        assert_eq!(o.get() % 8, 0, "every object is 8-byte aligned");
    }
}

#[test]
fn property_p1_p2_via_random_workload() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    init_logger();
    let mut buf = AlignedBuf::new(64 * PAGE_SIZE);
    let region = buf.init();

    let mut rng = StdRng::seed_from_u64(0xA11E_DADE);
    let mut live = Vec::new();
    for _ in 0..2000 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let size = [8usize, 16, 32, 64, 128, 256][rng.gen_range(0, 6)];
            let o = region.allocate(size);
            if !o.is_null() {
                assert!(region.is_object(o), "P2: every allocate() result satisfies is_object");
                live.push(o);
            }
        } else {
            let idx = rng.gen_range(0, live.len());
            let o = live.swap_remove(idx);
            region.free(o);
            assert!(!region.is_object(o));
        }
    }

    let stats = region.stats();
    assert!(stats.free_pages <= stats.total_pages);
}
