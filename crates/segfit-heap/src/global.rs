//! `GlobalAlloc` adapter.
//!
//! The heap core is single-threaded by design; this wrapper adds the
//! spinlock and the lazy one-time bootstrap needed to serve as a
//! `#[global_allocator]`.

use crate::block::ALIGNMENT;
use crate::heap::SegFitHeap;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, null_mut};
use log::error;
use segfit_region::RegionProvider;

/// Spin-locked wrapper turning a [`SegFitHeap`] into a global allocator.
///
/// The heap is bootstrapped lazily on the first allocation, so the value
/// can be built in a `const` context before any runtime exists. Layouts
/// asking for more than the heap's 8-byte payload alignment are refused
/// with null.
///
/// ```rust,no_run
/// use core::ptr::NonNull;
/// use segfit_heap::{LockedHeap, SegFitHeap};
/// use segfit_region::{BumpRegion, RegionStorage};
///
/// static mut STORAGE: RegionStorage<65536> = RegionStorage::new();
///
/// #[global_allocator]
/// static HEAP: LockedHeap<BumpRegion> = LockedHeap::new(SegFitHeap::new(unsafe {
///     BumpRegion::new(
///         NonNull::new_unchecked((&raw mut STORAGE).cast::<u8>()),
///         65536,
///     )
/// }));
/// ```
pub struct LockedHeap<R: RegionProvider> {
    inner: spin::Mutex<SegFitHeap<R>>,
}

impl<R: RegionProvider> LockedHeap<R> {
    /// Wrap `heap`, deferring its bootstrap to the first allocation.
    #[must_use]
    pub const fn new(heap: SegFitHeap<R>) -> Self {
        Self {
            inner: spin::Mutex::new(heap),
        }
    }

    /// Run `f` with exclusive access to the wrapped heap.
    pub fn with_lock<T>(&self, f: impl FnOnce(&mut SegFitHeap<R>) -> T) -> T {
        f(&mut self.inner.lock())
    }

    fn ensure_init(heap: &mut SegFitHeap<R>) {
        if !heap.is_initialized() {
            if let Err(err) = heap.init() {
                error!("heap bootstrap failed: {err}");
            }
        }
    }
}

unsafe impl<R: RegionProvider + Send> GlobalAlloc for LockedHeap<R> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return null_mut();
        }
        let mut heap = self.inner.lock();
        Self::ensure_init(&mut heap);
        unsafe { heap.allocate(layout.size()) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let mut heap = self.inner.lock();
        unsafe { heap.free(ptr) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return null_mut();
        }
        let mut heap = self.inner.lock();
        Self::ensure_init(&mut heap);
        unsafe { heap.reallocate(ptr, new_size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr::NonNull;
    use segfit_region::BumpRegion;

    fn locked(backing: &mut Vec<u64>) -> LockedHeap<BumpRegion> {
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        let region = unsafe { BumpRegion::new(base, backing.len() * 8) };
        LockedHeap::new(SegFitHeap::new(region))
    }

    #[test]
    fn serves_layouts_up_to_its_alignment() {
        let mut backing = vec![0_u64; 1024];
        let heap = locked(&mut backing);

        let layout = Layout::from_size_align(100, 8).unwrap();
        let p = unsafe { heap.alloc(layout) };
        assert!(!p.is_null());
        assert_eq!(p as usize % 8, 0);
        unsafe { heap.dealloc(p, layout) };
        assert!(heap.with_lock(|h| h.check()));
    }

    #[test]
    fn refuses_over_aligned_layouts() {
        let mut backing = vec![0_u64; 1024];
        let heap = locked(&mut backing);

        let layout = Layout::from_size_align(64, 64).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
    }

    #[test]
    fn alloc_zeroed_clears_the_payload() {
        let mut backing = vec![0_u64; 1024];
        let heap = locked(&mut backing);

        let layout = Layout::from_size_align(48, 8).unwrap();
        unsafe {
            // Dirty the arena first so the zeroing is observable.
            let p = heap.alloc(layout);
            ptr::write_bytes(p, 0xA5, 48);
            heap.dealloc(p, layout);

            let q = heap.alloc_zeroed(layout);
            assert!(!q.is_null());
            for i in 0..48 {
                assert_eq!(q.add(i).read(), 0, "byte {i} not zeroed");
            }
            heap.dealloc(q, layout);
        }
    }

    #[test]
    fn realloc_preserves_prefix() {
        let mut backing = vec![0_u64; 4096];
        let heap = locked(&mut backing);

        let layout = Layout::from_size_align(16, 8).unwrap();
        unsafe {
            let p = heap.alloc(layout);
            for i in 0..16 {
                p.add(i).write(i as u8);
            }
            let q = heap.realloc(p, layout, 4096);
            assert!(!q.is_null());
            for i in 0..16 {
                assert_eq!(q.add(i).read(), i as u8);
            }
            heap.dealloc(q, Layout::from_size_align(4096, 8).unwrap());
        }
        assert!(heap.with_lock(|h| h.check()));
    }
}
