//! A region-based object allocator over a fixed, position-independent
//! memory mapping.
//!
//! Everything this crate hands back — free lists, cache records, slab
//! headers — is addressed by [`Offset`], a byte offset relative to the
//! mapping's own base address, never by pointer. A region can therefore be
//! copy-on-write duplicated, moved to a different address, or persisted
//! and remapped later without invalidating anything it contains: callers
//! translate an `Offset` to a real pointer with [`Region::swizzle`] only at
//! the point of use.
//!
//! The allocator itself is a straightforward slab design: fixed-size
//! object classes, each backed by pages carved into equal-size cells
//! linked through an intrusive free list, with slabs tracked on
//! full/partial/free lists per class. See [`region_init`] to set one up
//! over caller-supplied memory, and [`Region::allocate`]/[`Region::free`]
//! for the object API.
//!
//! `Region` is `!Sync`: this crate assumes a single writer with no
//! internal synchronisation, matching its target use as the allocator
//! backing one mapping owned by one process (or, across a fork, one
//! process at a time).
#![cfg_attr(not(test), no_std)]

mod bitmap;
mod cache;
mod error;
mod layout;
mod offset;
mod page_manager;
mod router;
mod slab;

mod region;

pub use error::InitError;
pub use offset::Offset;
pub use region::{region_init, swizzle, unswizzle, CacheStats, Region, RegionStats};

pub use router::{ALIGNMENT, CLASS_SIZES, MAX_OBJECT_SIZE, NUM_CLASSES};
