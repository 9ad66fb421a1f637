//! On-demand verification of the heap's structural invariants.

use crate::block::{
    DSIZE, MIN_BLOCK, WSIZE, footer_of, header_of, next_of, prev_of, read_tag, tag_of,
};
use crate::free_list::{Directory, NIL, NUM_LISTS, class_of, payload_at};
use crate::heap::SegFitHeap;
use log::error;
use segfit_region::RegionProvider;

impl<R: RegionProvider> SegFitHeap<R> {
    /// Verify every structural invariant of the heap.
    ///
    /// The scan is read-only and never repairs anything: each violation is
    /// reported through [`log::error!`] and the final result says whether
    /// the heap is consistent. An uninitialized heap is trivially
    /// consistent.
    ///
    /// Checked, in order: the sentinels are allocated and well-formed;
    /// walking the payload region, every block has matching header and
    /// footer tags, a size that is a multiple of 8 and at least the
    /// minimum block, and strictly increasing addresses up to the break;
    /// no two adjacent blocks are both free; every block reachable from
    /// the directory is free, sits in the list of its size class with
    /// consistent back-links, and has two allocated physical neighbors;
    /// and the directory reaches exactly as many blocks as the walk found
    /// free.
    #[must_use]
    pub fn check(&self) -> bool {
        if !self.initialized {
            return true;
        }

        let lo = self.region.lo();
        let hi = self.region.hi();
        let heap_bytes = hi as usize - lo as usize;
        // A corrupt heap could loop forever; no well-formed heap holds
        // more blocks than this.
        let max_blocks = heap_bytes / MIN_BLOCK + 1;
        let mut ok = true;

        // Sentinels.
        unsafe {
            let prologue_tag = tag_of(self.prologue);
            if !prologue_tag.allocated() || prologue_tag.size() as usize != MIN_BLOCK {
                error!(
                    "prologue at {:p} damaged: size {} allocated {}",
                    self.prologue,
                    prologue_tag.size(),
                    prologue_tag.allocated()
                );
                ok = false;
            }
            let epilogue_header = hi.sub(WSIZE);
            let epilogue_tag = read_tag(epilogue_header);
            if !epilogue_tag.allocated() || epilogue_tag.size() != 0 {
                error!("epilogue header at {epilogue_header:p} damaged");
                ok = false;
            }
        }

        // Heap walk from the first payload block to the epilogue.
        let mut walked_free = 0_usize;
        let mut prev_was_free = false;
        let mut steps = 0_usize;
        unsafe {
            let mut bp = next_of(self.prologue);
            loop {
                let tag = tag_of(bp);
                let size = tag.size() as usize;
                if size == 0 {
                    if header_of(bp) != hi.sub(WSIZE) {
                        error!("epilogue at {bp:p} is not at the break {hi:p}");
                        ok = false;
                    }
                    break;
                }

                if size < MIN_BLOCK || size % DSIZE != 0 {
                    error!("block at {bp:p} has malformed size {size}");
                    return false;
                }
                if bp.add(size) > hi {
                    error!("block at {bp:p} of size {size} overruns the break {hi:p}");
                    return false;
                }
                if read_tag(footer_of(bp)).into_bits() != tag.into_bits() {
                    error!("block at {bp:p}: footer does not match header");
                    ok = false;
                }
                if !tag.allocated() {
                    walked_free += 1;
                    if prev_was_free {
                        error!("adjacent free blocks at {bp:p}: coalescing was missed");
                        ok = false;
                    }
                }
                prev_was_free = !tag.allocated();

                steps += 1;
                if steps > max_blocks {
                    error!("heap walk did not reach the epilogue");
                    return false;
                }
                bp = next_of(bp);
            }
        }

        // Directory scan.
        let mut listed = 0_usize;
        for class in 0..NUM_LISTS {
            let mut expected_prev = NIL;
            let mut cursor = self.directory.head(class);
            let mut steps = 0_usize;
            while cursor != NIL {
                if cursor as usize >= heap_bytes {
                    error!("list {class} links outside the heap (offset {cursor})");
                    return false;
                }
                unsafe {
                    let bp = payload_at(lo, cursor);
                    let tag = tag_of(bp);
                    if tag.allocated() {
                        error!("list {class} holds allocated block {bp:p}");
                        ok = false;
                    }
                    let size = tag.size() as usize;
                    if class_of(size) != class {
                        error!("block {bp:p} of size {size} threaded into list {class}");
                        ok = false;
                    }
                    if Directory::predecessor(bp) != expected_prev {
                        error!("list {class} back-link broken at {bp:p}");
                        ok = false;
                    }
                    if !tag_of(prev_of(bp)).allocated() || !tag_of(next_of(bp)).allocated() {
                        error!("listed block {bp:p} has a free physical neighbor");
                        ok = false;
                    }

                    listed += 1;
                    steps += 1;
                    if steps > max_blocks {
                        error!("list {class} does not terminate");
                        return false;
                    }
                    expected_prev = cursor;
                    cursor = Directory::successor(bp);
                }
            }
        }

        if listed != walked_free {
            error!("directory reaches {listed} free blocks but the heap walk found {walked_free}");
            ok = false;
        }

        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::set_tags;
    use core::ptr::NonNull;
    use segfit_region::BumpRegion;

    fn fresh_heap(backing: &mut Vec<u64>) -> SegFitHeap<BumpRegion> {
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        let region = unsafe { BumpRegion::new(base, backing.len() * 8) };
        let mut heap = SegFitHeap::new(region);
        heap.init().unwrap();
        heap
    }

    #[test]
    fn fresh_heap_is_consistent() {
        let mut backing = vec![0_u64; 512];
        let heap = fresh_heap(&mut backing);
        assert!(heap.check());
    }

    #[test]
    fn uninitialized_heap_is_trivially_consistent() {
        let mut backing = vec![0_u64; 16];
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        let region = unsafe { BumpRegion::new(base, backing.len() * 8) };
        let heap = SegFitHeap::new(region);
        assert!(heap.check());
    }

    #[test]
    fn detects_header_footer_mismatch() {
        let mut backing = vec![0_u64; 512];
        let mut heap = fresh_heap(&mut backing);
        let p = unsafe { heap.allocate(24) };
        assert!(!p.is_null());

        // Corrupt the footer by stamping a different size over the block.
        unsafe {
            let tag = crate::tag::BoundaryTag::block(40, true);
            crate::block::write_tag(crate::block::footer_of(p), tag);
        }
        assert!(!heap.check());
    }

    #[test]
    fn detects_missed_coalescing() {
        let mut backing = vec![0_u64; 512];
        let mut heap = fresh_heap(&mut backing);
        let p = unsafe { heap.allocate(40) };
        assert!(!p.is_null());

        // Hand-split the allocated block into two free halves without
        // going through the coalescing path.
        unsafe {
            set_tags(p, 24, false);
            let rest = next_of(p);
            set_tags(rest, 24, false);
            let lo = heap.region.lo();
            heap.directory.insert(lo, p);
            heap.directory.insert(lo, rest);
        }
        assert!(!heap.check());
    }
}
