//! The heap descriptor: placement, coalescing, extension, reallocation.

use crate::block::{
    ALIGNMENT, CHUNK, DSIZE, MAX_BLOCK, MIN_BLOCK, WSIZE, align_up, block_size, header_of, next_of,
    prev_of, set_tags, tag_of, write_tag,
};
use crate::free_list::{Directory, NIL, NUM_LISTS, payload_at};
use crate::tag::BoundaryTag;
use core::cmp;
use core::ptr::{self, null_mut};
use log::{debug, trace};
use segfit_region::{RegionError, RegionProvider};

/// Failure surface of heap initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    /// The region provider refused to supply the bootstrap bytes.
    #[error("region provider refused initial growth: {0}")]
    Bootstrap(#[from] RegionError),
}

/// Point-in-time snapshot of the heap's shape, taken by a read-only walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes currently obtained from the region provider.
    pub heap_bytes: usize,
    /// Blocks in the payload region, sentinels excluded.
    pub blocks: usize,
    /// Blocks currently handed out to callers.
    pub allocated_blocks: usize,
    /// Blocks on the free lists.
    pub free_blocks: usize,
    /// Total bytes held by free blocks, tags included.
    pub free_bytes: usize,
    /// Size of the largest free block.
    pub largest_free: usize,
    /// Length of each size-class list.
    pub class_lengths: [usize; NUM_LISTS],
}

/// A segregated-fit heap with boundary-tagged blocks over a growable
/// region.
///
/// The heap overlays its block structure on bytes obtained from the
/// [`RegionProvider`]: a permanently allocated prologue sentinel at the
/// low end, a zero-sized epilogue sentinel header at the break, and
/// between them the payload blocks. Free blocks are indexed by the
/// segregated free-list directory.
///
/// # Invariants
/// Between public operations:
/// - every block's header equals its footer, its size is a multiple of 8
///   and at least 16 bytes;
/// - no two physically adjacent blocks are both free (freeing coalesces
///   immediately);
/// - the set of blocks reachable from the directory is exactly the set of
///   free blocks in the payload region, each in the list of its class.
///
/// [`check`](Self::check) verifies all of these on demand.
pub struct SegFitHeap<R: RegionProvider> {
    /// The memory behind the heap.
    pub(crate) region: R,
    /// Segregated free-list heads.
    pub(crate) directory: Directory,
    /// Payload pointer of the prologue sentinel; the payload region
    /// starts one block above it.
    pub(crate) prologue: *mut u8,
    /// Set once [`init`](Self::init) has laid out the sentinels.
    pub(crate) initialized: bool,
}

// Safety: the heap exclusively owns the region behind its raw pointers;
// moving it across threads moves that ownership along.
unsafe impl<R: RegionProvider + Send> Send for SegFitHeap<R> {}

impl<R: RegionProvider> SegFitHeap<R> {
    /// A heap over `region`. Unusable until [`init`](Self::init).
    #[must_use]
    pub const fn new(region: R) -> Self {
        Self {
            region,
            directory: Directory::new(),
            prologue: null_mut(),
            initialized: false,
        }
    }

    /// Whether [`init`](Self::init) has completed.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Reset the region and lay out an empty heap: alignment padding, the
    /// prologue block, the epilogue header, and one initial extension of
    /// [`CHUNK`] bytes.
    ///
    /// May be called again later to discard all allocations and start
    /// over.
    ///
    /// # Errors
    /// [`HeapError::Bootstrap`] when the provider cannot supply the
    /// bootstrap bytes; the heap stays uninitialized.
    pub fn init(&mut self) -> Result<(), HeapError> {
        self.region.reset();
        self.directory.clear();
        self.prologue = null_mut();
        self.initialized = false;

        // Padding so that every payload ends up 8-aligned.
        let lo = self.region.lo();
        let pad = (ALIGNMENT - (lo as usize + WSIZE) % ALIGNMENT) % ALIGNMENT;

        let base = self.region.sbrk(pad + MIN_BLOCK + WSIZE)?.as_ptr();
        let prologue = unsafe { base.add(pad + WSIZE) };
        unsafe {
            set_tags(prologue, MIN_BLOCK, true);
            write_tag(header_of(prologue.add(MIN_BLOCK)), BoundaryTag::epilogue());
        }
        self.prologue = prologue;

        unsafe { self.extend(CHUNK / WSIZE) }?;
        self.initialized = true;
        debug!(
            "heap initialized: lo={:p} hi={:p}",
            self.region.lo(),
            self.region.hi()
        );
        Ok(())
    }

    /// Allocate `size` bytes, returning an 8-aligned payload pointer or
    /// null when `size` is zero, unrepresentable, or the provider refuses
    /// to grow the region. The heap stays consistent in every failure
    /// case.
    ///
    /// # Safety
    /// The heap must be initialized. The returned payload is exclusive to
    /// the caller until passed to [`free`](Self::free) or
    /// [`reallocate`](Self::reallocate).
    pub unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
        if !self.initialized || size == 0 {
            return null_mut();
        }
        let Some(asize) = adjust_request(size) else {
            return null_mut();
        };

        let lo = self.region.lo();
        if let Some(bp) = unsafe { self.directory.first_fit(lo, asize) } {
            return unsafe { self.place(bp, asize) };
        }

        // Miss: grow the region and retry on the (coalesced) tail block.
        let words = cmp::max(asize, CHUNK) / WSIZE;
        match unsafe { self.extend(words) } {
            Ok(bp) => unsafe { self.place(bp, asize) },
            Err(err) => {
                debug!("allocation of {size} bytes failed: {err}");
                null_mut()
            }
        }
    }

    /// Return `ptr`'s block to the free lists, merging it with free
    /// neighbors. Null is accepted and ignored.
    ///
    /// # Safety
    /// `ptr` must be null or a payload pointer previously returned by this
    /// heap and not freed since.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() || !self.initialized {
            return;
        }
        unsafe {
            let size = block_size(ptr);
            set_tags(ptr, size, false);
            self.coalesce(ptr);
        }

        #[cfg(feature = "verify")]
        if !self.check() {
            log::error!("heap inconsistent after free({ptr:p})");
        }
    }

    /// Resize the allocation at `ptr` to `size` bytes.
    ///
    /// Shrinks in place, grows in place when the physically next block is
    /// free and large enough, and falls back to allocate-copy-free
    /// otherwise (preserving the old payload and zero-filling any grown
    /// remainder). A null `ptr` behaves like [`allocate`](Self::allocate);
    /// `size == 0` frees and returns null; a size exceeding `isize::MAX`
    /// returns null with the allocation untouched.
    ///
    /// # Safety
    /// As [`free`](Self::free); on success the old pointer must no longer
    /// be used unless it is the returned one.
    pub unsafe fn reallocate(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return unsafe { self.allocate(size) };
        }
        if size > isize::MAX as usize {
            return null_mut();
        }
        if size == 0 {
            unsafe { self.free(ptr) };
            return null_mut();
        }

        let required = align_up(size) + DSIZE;
        let current = unsafe { block_size(ptr) };
        if required == current {
            return ptr;
        }
        if required < current {
            return unsafe { self.shrink_in_place(ptr, required, current) };
        }

        // Grow in place when the next block is free and closes the gap.
        let lo = self.region.lo();
        unsafe {
            let next = next_of(ptr);
            let next_tag = tag_of(next);
            let combined = current + next_tag.size() as usize;
            if !next_tag.allocated() && combined >= required {
                self.directory.remove(lo, next);
                set_tags(ptr, combined, true);
                return self.shrink_in_place(ptr, required, combined);
            }
        }

        // Relocate.
        unsafe {
            let new = self.allocate(required);
            if new.is_null() {
                return null_mut();
            }
            let copied = cmp::min(required, current) - DSIZE;
            ptr::copy_nonoverlapping(ptr, new, copied);
            let payload = block_size(new) - DSIZE;
            if payload > copied {
                ptr::write_bytes(new.add(copied), 0, payload - copied);
            }
            self.free(ptr);
            new
        }
    }

    /// Snapshot of the heap's current shape.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_bytes: self.region.hi() as usize - self.region.lo() as usize,
            blocks: 0,
            allocated_blocks: 0,
            free_blocks: 0,
            free_bytes: 0,
            largest_free: 0,
            class_lengths: [0; NUM_LISTS],
        };
        if !self.initialized {
            return stats;
        }

        unsafe {
            let mut bp = next_of(self.prologue);
            loop {
                let tag = tag_of(bp);
                let size = tag.size() as usize;
                if size == 0 {
                    break;
                }
                stats.blocks += 1;
                if tag.allocated() {
                    stats.allocated_blocks += 1;
                } else {
                    stats.free_blocks += 1;
                    stats.free_bytes += size;
                    stats.largest_free = cmp::max(stats.largest_free, size);
                }
                bp = next_of(bp);
            }

            let lo = self.region.lo();
            for (class, len) in stats.class_lengths.iter_mut().enumerate() {
                let mut cursor = self.directory.head(class);
                while cursor != NIL {
                    *len += 1;
                    cursor = Directory::successor(payload_at(lo, cursor));
                }
            }
        }
        stats
    }

    /// Grow the region by `words` words (rounded up to keep alignment),
    /// overlay a free block on the new bytes re-using the old epilogue
    /// slot as its header, write the new epilogue, and coalesce with the
    /// old tail.
    pub(crate) unsafe fn extend(&mut self, words: usize) -> Result<*mut u8, RegionError> {
        let bytes = ((words + 1) & !1) * WSIZE;
        let bp = self.region.sbrk(bytes)?.as_ptr();
        trace!("extending heap by {bytes} bytes");
        unsafe {
            set_tags(bp, bytes, false);
            write_tag(header_of(next_of(bp)), BoundaryTag::epilogue());
            Ok(self.coalesce(bp))
        }
    }

    /// Carve an allocation of `asize` bytes out of free block `bp`,
    /// splitting off the surplus when it can stand as a block of its own.
    unsafe fn place(&mut self, bp: *mut u8, asize: usize) -> *mut u8 {
        let lo = self.region.lo();
        unsafe {
            self.directory.remove(lo, bp);
            let size = block_size(bp);
            if size - asize >= MIN_BLOCK {
                set_tags(bp, asize, true);
                let rest = next_of(bp);
                set_tags(rest, size - asize, false);
                self.directory.insert(lo, rest);
            } else {
                set_tags(bp, size, true);
            }
        }
        bp
    }

    /// Merge the free block at `bp` (tagged free, not yet on any list)
    /// with whichever physical neighbors are free, insert the result into
    /// its class, and return it.
    ///
    /// The sentinels guarantee both neighbor reads are in bounds.
    unsafe fn coalesce(&mut self, bp: *mut u8) -> *mut u8 {
        let lo = self.region.lo();
        unsafe {
            let prev = prev_of(bp);
            let next = next_of(bp);
            let mut start = bp;
            let mut size = block_size(bp);

            if !tag_of(next).allocated() {
                self.directory.remove(lo, next);
                size += block_size(next);
            }
            if !tag_of(prev).allocated() {
                self.directory.remove(lo, prev);
                size += block_size(prev);
                start = prev;
            }

            set_tags(start, size, false);
            self.directory.insert(lo, start);
            start
        }
    }

    /// Shrink the allocated block at `bp` from `current` to `required`
    /// bytes, releasing the tail through the coalescing path when it is
    /// large enough to stand alone.
    unsafe fn shrink_in_place(&mut self, bp: *mut u8, required: usize, current: usize) -> *mut u8 {
        unsafe {
            if current - required < MIN_BLOCK {
                set_tags(bp, current, true);
            } else {
                set_tags(bp, required, true);
                let rest = next_of(bp);
                set_tags(rest, current - required, false);
                self.coalesce(rest);
            }
        }
        bp
    }
}

/// Block size serving a request of `size` payload bytes: tag overhead
/// added, rounded up to alignment, clamped below at the minimum block.
/// `None` when the result would not fit the tag's size field.
fn adjust_request(size: usize) -> Option<usize> {
    if size <= DSIZE {
        Some(MIN_BLOCK)
    } else if size > MAX_BLOCK - DSIZE {
        None
    } else {
        Some(align_up(size + DSIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_up_to_blocks() {
        assert_eq!(adjust_request(1), Some(MIN_BLOCK));
        assert_eq!(adjust_request(8), Some(MIN_BLOCK));
        assert_eq!(adjust_request(9), Some(24));
        assert_eq!(adjust_request(16), Some(24));
        assert_eq!(adjust_request(40), Some(48));
        assert_eq!(adjust_request(100), Some(112));
        assert_eq!(adjust_request(MAX_BLOCK), None);
        assert_eq!(adjust_request(usize::MAX), None);
    }
}
