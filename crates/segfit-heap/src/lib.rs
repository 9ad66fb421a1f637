//! # Segregated-fit heap allocator
//!
//! A dynamic storage allocator over a single contiguous, monotonically
//! growable memory region. Blocks carry boundary tags — a matching header
//! and footer word holding the block's size and allocation bit — so both
//! physical neighbors of any block can be found in constant time, and
//! free blocks are indexed by a segregated family of doubly-linked lists
//! keyed by power-of-two size class.
//!
//! The allocation path rounds the request up to a block size, searches
//! the matching size class first-fit, and splits off any usable surplus.
//! On a miss it grows the region and retries on the (coalesced) tail.
//! Freeing merges with free neighbors immediately, so no two adjacent
//! free blocks ever exist between operations. [`SegFitHeap::check`]
//! verifies the full set of structural invariants on demand, and the
//! `verify` cargo feature runs it after every free.
//!
//! The memory itself comes from a [`RegionProvider`](segfit_region::RegionProvider)
//! implementation; see the `segfit-region` crate.
//!
//! ```rust
//! use core::ptr::NonNull;
//! use segfit_heap::SegFitHeap;
//! use segfit_region::BumpRegion;
//!
//! let mut backing = vec![0_u64; 1024];
//! let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
//! let region = unsafe { BumpRegion::new(base, backing.len() * 8) };
//!
//! let mut heap = SegFitHeap::new(region);
//! heap.init()?;
//!
//! let p = unsafe { heap.allocate(100) };
//! assert!(!p.is_null());
//! assert_eq!(p as usize % 8, 0);
//!
//! unsafe { heap.free(p) };
//! assert!(heap.check());
//! # Ok::<(), segfit_heap::HeapError>(())
//! ```
//!
//! For use as a `#[global_allocator]`, wrap the heap in [`LockedHeap`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod block;
mod check;
mod free_list;
mod global;
mod heap;
mod tag;

pub use block::{ALIGNMENT, CHUNK, MAX_BLOCK, MIN_BLOCK};
pub use free_list::{NUM_LISTS, class_of};
pub use global::LockedHeap;
pub use heap::{HeapError, HeapStats, SegFitHeap};
pub use tag::BoundaryTag;
