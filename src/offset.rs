//! Region-relative addressing (spec.md §4.1).
//!
//! An [`Offset`] identifies a byte within a region. It is never implicitly
//! convertible to a process-local address: the only way to go from an
//! `Offset` to a pointer (and back) is through [`swizzle`]/[`unswizzle`],
//! which take the region's base address explicitly. Everything else in
//! this crate — free lists, cache records, slab headers — stores
//! `Offset`s, never raw pointers, so the whole region can be moved to a
//! different base address (remapped, copy-on-write duplicated) without
//! invalidating any internal reference.

use core::fmt;

/// A byte offset relative to a region's base address.
///
/// `Offset` of zero is a reserved sentinel meaning "no object" / "end of
/// list" (spec.md §3); it is never a valid object offset, since every
/// object lies strictly past the header page.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(usize);

impl Offset {
    /// The sentinel offset: "no object" / "end of list".
    pub const NULL: Offset = Offset(0);

    #[inline]
    pub const fn new(value: usize) -> Self {
        Offset(value)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset({:#x})", self.0)
    }
}

/// Translate a region offset to a process-local address.
///
/// Contract: `swizzle(base, unswizzle(base, p)) == p` for any `p` within
/// the region, and vice versa (spec.md §4.1).
///
/// # Safety
///
/// `base` must be the current base address of a region of at least
/// `off.get() + 1` bytes.
#[inline]
pub unsafe fn swizzle(base: *mut u8, off: Offset) -> *mut u8 {
    base.add(off.get())
}

/// Translate a process-local address back to a region offset.
///
/// # Safety
///
/// `addr` must point within the region based at `base`.
#[inline]
pub unsafe fn unswizzle(base: *mut u8, addr: *mut u8) -> Offset {
    Offset::new(addr as usize - base as usize)
}
