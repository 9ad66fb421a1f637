//! # Heap region providers
//!
//! This crate defines the seam between the allocator core and the memory
//! that backs it: a [`RegionProvider`] hands out a single contiguous byte
//! range that grows monotonically at the high end, `sbrk`-style.
//!
//! The allocator core never maps, reserves or frees memory itself. It asks
//! its provider to extend the region and overlays its own block structure
//! on the returned bytes. Providers therefore only need to implement three
//! things: rewinding to an empty region, growing by `n` bytes, and
//! reporting the current bounds.
//!
//! The bundled [`BumpRegion`] implements the trait over a caller-supplied
//! fixed-capacity range, which covers both static placement in a kernel or
//! embedded image (see [`RegionStorage`]) and plain heap-backed buffers in
//! host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod bump;

pub use bump::{BumpRegion, RegionStorage};

use core::ptr::NonNull;

/// Failure surface of a [`RegionProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    /// The provider cannot grow the region any further.
    #[error("region exhausted: {requested} bytes requested, {available} available")]
    Exhausted {
        /// Bytes the caller asked for.
        requested: usize,
        /// Bytes the provider could still hand out.
        available: usize,
    },
}

/// A monotonically growable, contiguous memory region.
///
/// The region is the byte range `[lo, hi)`. `hi` only ever moves up, and
/// every [`sbrk`](Self::sbrk) call returns the first byte of the newly
/// grown suffix, so consecutive calls yield adjacent ranges.
///
/// # Contract
/// - Memory handed out by `sbrk` stays valid and exclusive to the caller
///   until [`reset`](Self::reset).
/// - The provider never relocates previously returned bytes.
/// - `sbrk` is all-or-nothing: on error the region is unchanged.
pub trait RegionProvider {
    /// Rewind the region so the next [`sbrk`](Self::sbrk) returns
    /// [`lo`](Self::lo) again. Previously returned ranges become invalid.
    fn reset(&mut self);

    /// Grow the region by exactly `incr` bytes and return a pointer to the
    /// first new byte.
    ///
    /// # Errors
    /// [`RegionError::Exhausted`] when the provider cannot grow; the
    /// region bounds are unchanged in that case.
    fn sbrk(&mut self, incr: usize) -> Result<NonNull<u8>, RegionError>;

    /// Lowest address of the region.
    fn lo(&self) -> *mut u8;

    /// One past the highest currently provided address (the break).
    fn hi(&self) -> *mut u8;
}
