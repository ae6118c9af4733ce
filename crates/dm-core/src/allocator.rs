//! Raw aligned memory for array storage.
//!
//! An [`Allocator`] hands out zeroed blocks aligned to its
//! [`Allocator::alignment`]. It knows nothing about arrays; the
//! [`crate::SharedBuffer`] built on top of a block owns the reference counts.
//! The process-wide default allocator is installed lazily, exactly once, on
//! first use. Call [`set_default_allocator`] before any array is created to
//! replace it.

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use log::debug;

use crate::{Error, Result};

/// Cache-line alignment used by [`SystemAllocator`].
pub const DEFAULT_ALIGNMENT: usize = 64;

/// Strategy for obtaining raw storage.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Alignment of every block returned by [`Allocator::allocate`].
    fn alignment(&self) -> usize {
        DEFAULT_ALIGNMENT
    }

    /// Allocates a zeroed block of `size` bytes, rounded up to the alignment.
    ///
    /// Failure is reported as [`Error::OutOfMemory`], never as a dangling or
    /// null pointer.
    fn allocate(&self, size: usize) -> Result<NonNull<u8>>;

    /// Returns a block to the allocator.
    ///
    /// # Safety
    /// `ptr` must come from `self.allocate(size)` and must not be freed twice
    /// or used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize);
}

/// Rounds `size` up to a multiple of `align` (a power of two).
#[inline]
pub fn align_size(size: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    size.checked_add(align - 1).map(|s| s & !(align - 1))
}

/// Global-heap allocator with a fixed power-of-two alignment.
#[derive(Debug, Clone, Copy)]
pub struct SystemAllocator {
    align: usize,
}

impl SystemAllocator {
    pub fn with_alignment(align: usize) -> Result<Self> {
        if !align.is_power_of_two() {
            return Err(Error::Unsupported("alignment must be a power of two"));
        }
        Ok(Self { align })
    }

    fn layout(&self, size: usize) -> Result<Layout> {
        let padded = align_size(size.max(1), self.align)
            .ok_or(Error::OutOfMemory { requested: size })?;
        Layout::from_size_align(padded, self.align).map_err(|_| Error::OutOfMemory {
            requested: size,
        })
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self {
            align: DEFAULT_ALIGNMENT,
        }
    }
}

impl Allocator for SystemAllocator {
    fn alignment(&self) -> usize {
        self.align
    }

    fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let layout = self.layout(size)?;
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or(Error::OutOfMemory { requested: size })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        // `allocate(size)` succeeded, so rounding `size` up cannot overflow.
        let padded = (size.max(1) + self.align - 1) & !(self.align - 1);
        // SAFETY: caller guarantees `ptr` came from `allocate(size)`, which
        // built this exact layout and validated it.
        unsafe {
            let layout = Layout::from_size_align_unchecked(padded, self.align);
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

static DEFAULT_ALLOCATOR: OnceLock<Arc<dyn Allocator>> = OnceLock::new();

/// Returns the process-wide allocator, installing [`SystemAllocator`] on
/// first use.
pub fn default_allocator() -> Arc<dyn Allocator> {
    DEFAULT_ALLOCATOR
        .get_or_init(|| {
            debug!("installing system allocator (align {DEFAULT_ALIGNMENT})");
            Arc::new(SystemAllocator::default())
        })
        .clone()
}

/// Installs `allocator` as the process-wide default.
///
/// Fails with [`Error::AllocatorAlreadySet`] once the default has been
/// installed, either explicitly or by the first allocation.
pub fn set_default_allocator(allocator: Arc<dyn Allocator>) -> Result<()> {
    debug!("installing custom default allocator {allocator:?}");
    DEFAULT_ALLOCATOR
        .set(allocator)
        .map_err(|_| Error::AllocatorAlreadySet)
}

#[cfg(test)]
mod tests {
    use super::{Allocator, DEFAULT_ALIGNMENT, SystemAllocator, align_size, default_allocator};

    #[test]
    fn align_size_rounds_up() {
        assert_eq!(align_size(0, 64), Some(0));
        assert_eq!(align_size(1, 64), Some(64));
        assert_eq!(align_size(64, 64), Some(64));
        assert_eq!(align_size(65, 16), Some(80));
        assert_eq!(align_size(usize::MAX, 64), None);
    }

    #[test]
    fn system_allocator_returns_aligned_zeroed_blocks() {
        let alloc = SystemAllocator::with_alignment(128).expect("power of two");
        let ptr = alloc.allocate(100).expect("small allocation succeeds");
        assert_eq!(ptr.as_ptr() as usize % 128, 0);
        // SAFETY: block is at least 100 bytes.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 100) };
        assert!(bytes.iter().all(|&b| b == 0));
        // SAFETY: allocated above with the same size.
        unsafe { alloc.deallocate(ptr, 100) };
    }

    #[test]
    fn frees_blocks_of_any_requested_size() {
        let alloc = SystemAllocator::default();
        for size in [0, 1, 63, 64, 65, 4097] {
            let ptr = alloc.allocate(size).expect("small allocation succeeds");
            // SAFETY: allocated above with the same size.
            unsafe { alloc.deallocate(ptr, size) };
        }
    }

    #[test]
    fn huge_request_is_reported_not_null() {
        let alloc = SystemAllocator::default();
        let err = alloc.allocate(usize::MAX - 8).expect_err("cannot allocate");
        assert_eq!(
            err,
            crate::Error::OutOfMemory {
                requested: usize::MAX - 8
            }
        );
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        assert!(SystemAllocator::with_alignment(48).is_err());
    }

    #[test]
    fn default_is_installed_once() {
        let a = default_allocator();
        let b = default_allocator();
        assert_eq!(a.alignment(), DEFAULT_ALIGNMENT);
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}
