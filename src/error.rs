//! Region initialisation errors (spec.md §4.7, §7).
//!
//! Grounded in `examples/js2xxx-oceanic/h2o/libs/heap/src/lib.rs`'s `Error`
//! enum, which splits failure at construction time into distinct named
//! variants rather than a single opaque error — narrowed to the three
//! preconditions `region_init` actually checks. Every other fallible
//! operation in this crate (`allocate`, `free`, `is_object`) uses the
//! sentinel/no-op/fatal-assert taxonomy spec.md §7 mandates instead of
//! `Result`, since those run inside an already-initialised region where
//! the only remaining failures are either benign (out of memory) or
//! corruption (fatal).

use core::fmt;

/// Why [`crate::region_init`](crate::region_init) refused a buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InitError {
    /// The supplied base address isn't aligned to the page size.
    MisalignedBase,
    /// The supplied size isn't a whole multiple of the page size.
    SizeNotPageMultiple,
    /// The buffer is too small to hold a header page, the bitmaps, and at
    /// least one page of usable space.
    TooSmall,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::MisalignedBase => write!(f, "region base address is not page-aligned"),
            InitError::SizeNotPageMultiple => write!(f, "region size is not a multiple of the page size"),
            InitError::TooSmall => write!(f, "region is too small to hold its own bookkeeping"),
        }
    }
}
