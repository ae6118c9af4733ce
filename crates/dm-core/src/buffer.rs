//! Reference-counted storage blocks shared by arrays and their views.
//!
//! A [`SharedBuffer`] tracks two counts packed into one atomic word: owner
//! references (held by [`BufferRef`], one per array that aliases the block)
//! and view references (held by [`MapGuard`] while the bytes are mapped for
//! access). The block is released exactly once, by whichever handle brings
//! both counts to zero. Blocks wrapping caller memory are never freed.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use log::{debug, trace};
use parking_lot::{Mutex, MutexGuard, const_mutex};

use crate::{Allocator, Result};

const OWNER_UNIT: u64 = 1 << 32;
const VIEW_UNIT: u64 = 1;
const VIEW_MASK: u64 = OWNER_UNIT - 1;

const LOCK_TABLE_SIZE: usize = 31;

static LOCK_TABLE: [Mutex<()>; LOCK_TABLE_SIZE] = [const { const_mutex(()) }; LOCK_TABLE_SIZE];

fn lock_for(buf: *const SharedBuffer) -> &'static Mutex<()> {
    let addr = buf as usize;
    &LOCK_TABLE[(addr >> 4) % LOCK_TABLE_SIZE]
}

/// Descriptor of one storage block.
pub struct SharedBuffer {
    data: NonNull<u8>,
    size: usize,
    refs: AtomicU64,
    /// `None` marks caller-supplied memory.
    allocator: Option<Arc<dyn Allocator>>,
}

impl SharedBuffer {
    /// Allocates a zeroed block of `size` bytes and returns the first owner
    /// handle.
    pub fn allocate(allocator: Arc<dyn Allocator>, size: usize) -> Result<BufferRef> {
        let data = allocator.allocate(size)?;
        debug!("allocated {size} bytes at {:p}", data.as_ptr());
        Ok(BufferRef::from_descriptor(Self {
            data,
            size,
            refs: AtomicU64::new(OWNER_UNIT),
            allocator: Some(allocator),
        }))
    }

    /// Wraps caller-owned memory. The block is never freed by the buffer.
    ///
    /// # Safety
    /// `data` must be valid for reads and writes of `size` bytes for as long
    /// as any handle to the returned buffer (or any array built on it) lives.
    pub unsafe fn wrap_user_memory(data: NonNull<u8>, size: usize) -> BufferRef {
        BufferRef::from_descriptor(Self {
            data,
            size,
            refs: AtomicU64::new(OWNER_UNIT),
            allocator: None,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    pub fn is_user_memory(&self) -> bool {
        self.allocator.is_none()
    }

    pub fn owner_refs(&self) -> usize {
        (self.refs.load(Ordering::Acquire) >> 32) as usize
    }

    pub fn view_refs(&self) -> usize {
        (self.refs.load(Ordering::Acquire) & VIEW_MASK) as usize
    }

    /// Serializes map/unmap bookkeeping with other users of this buffer.
    pub fn lock(&self) -> MutexGuard<'static, ()> {
        lock_for(self).lock()
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("data", &self.data)
            .field("size", &self.size)
            .field("owner_refs", &self.owner_refs())
            .field("view_refs", &self.view_refs())
            .field("user_memory", &self.is_user_memory())
            .finish()
    }
}

/// Drops one reference of kind `unit`; frees the block on the last one.
///
/// # Safety
/// `inner` must point at a live descriptor and the caller must own one
/// reference of kind `unit`.
unsafe fn release(inner: NonNull<SharedBuffer>, unit: u64) {
    // SAFETY: the caller's reference keeps the descriptor alive until here.
    let buf = unsafe { inner.as_ref() };
    let prev = buf.refs.fetch_sub(unit, Ordering::Release);
    if unit == OWNER_UNIT {
        debug_assert!(prev >> 32 > 0, "owner count underflow");
    } else {
        debug_assert!(prev & VIEW_MASK > 0, "view count underflow");
    }
    if prev != unit {
        return;
    }
    fence(Ordering::Acquire);

    // SAFETY: both counts reached zero; no other handle can observe `inner`.
    let buf = unsafe { Box::from_raw(inner.as_ptr()) };
    match &buf.allocator {
        Some(allocator) => {
            debug!("freeing {} bytes at {:p}", buf.size, buf.data.as_ptr());
            // SAFETY: `data` came from `allocator.allocate(size)` in
            // `SharedBuffer::allocate` and is released only here.
            unsafe { allocator.deallocate(buf.data, buf.size) };
        }
        None => trace!("dropping descriptor of user memory at {:p}", buf.data.as_ptr()),
    }
}

/// Owner handle: keeps the block alive while any array aliases it.
pub struct BufferRef {
    inner: NonNull<SharedBuffer>,
}

// SAFETY: the descriptor is only mutated through atomics and the lock table;
// the payload bytes are accessed through raw pointers by array code, which
// carries its own aliasing rules.
unsafe impl Send for BufferRef {}
// SAFETY: see above.
unsafe impl Sync for BufferRef {}

impl BufferRef {
    fn from_descriptor(desc: SharedBuffer) -> Self {
        let inner = NonNull::from(Box::leak(Box::new(desc)));
        Self { inner }
    }

    /// Maps the block for access, holding a view reference until the guard
    /// drops.
    pub fn map(&self) -> MapGuard {
        let _lock = self.lock();
        self.refs.fetch_add(VIEW_UNIT, Ordering::Relaxed);
        trace!("mapped buffer at {:p}", self.as_ptr());
        MapGuard { inner: self.inner }
    }

    pub fn ptr_eq(a: &BufferRef, b: &BufferRef) -> bool {
        a.inner == b.inner
    }
}

impl std::ops::Deref for BufferRef {
    type Target = SharedBuffer;

    fn deref(&self) -> &SharedBuffer {
        // SAFETY: this handle owns a reference, so the descriptor is alive.
        unsafe { self.inner.as_ref() }
    }
}

impl Clone for BufferRef {
    fn clone(&self) -> Self {
        self.refs.fetch_add(OWNER_UNIT, Ordering::Relaxed);
        Self { inner: self.inner }
    }
}

impl Drop for BufferRef {
    fn drop(&mut self) {
        // SAFETY: this handle owns exactly one owner reference.
        unsafe { release(self.inner, OWNER_UNIT) };
    }
}

impl fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// A live mapping of a buffer's bytes.
pub struct MapGuard {
    inner: NonNull<SharedBuffer>,
}

// SAFETY: same reasoning as `BufferRef`.
unsafe impl Send for MapGuard {}

impl MapGuard {
    pub fn as_ptr(&self) -> *mut u8 {
        self.buffer().as_ptr()
    }

    pub fn len(&self) -> usize {
        self.buffer().size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn buffer(&self) -> &SharedBuffer {
        // SAFETY: the guard owns a view reference.
        unsafe { self.inner.as_ref() }
    }
}

impl Drop for MapGuard {
    fn drop(&mut self) {
        {
            let _lock = self.buffer().lock();
            trace!("unmapping buffer at {:p}", self.as_ptr());
        }
        // SAFETY: this guard owns exactly one view reference.
        unsafe { release(self.inner, VIEW_UNIT) };
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::ptr::NonNull;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::SharedBuffer;
    use crate::{Allocator, Result, SystemAllocator};

    /// Counts allocations and frees.
    #[derive(Debug, Default)]
    pub(crate) struct CountingAllocator {
        pub(crate) allocs: AtomicUsize,
        pub(crate) frees: AtomicUsize,
        inner: SystemAllocator,
    }

    impl Allocator for CountingAllocator {
        fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            self.inner.allocate(size)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
            self.frees.fetch_add(1, Ordering::SeqCst);
            // SAFETY: forwarded from the caller.
            unsafe { self.inner.deallocate(ptr, size) };
        }
    }

    #[test]
    fn owner_refs_track_clones_and_free_once() {
        let alloc = Arc::new(CountingAllocator::default());
        let a = SharedBuffer::allocate(alloc.clone(), 256).expect("allocates");
        assert_eq!(a.owner_refs(), 1);
        assert_eq!(a.as_ptr() as usize % 64, 0);

        let b = a.clone();
        assert_eq!(a.owner_refs(), 2);
        drop(b);
        assert_eq!(a.owner_refs(), 1);
        assert_eq!(alloc.frees.load(Ordering::SeqCst), 0);

        drop(a);
        assert_eq!(alloc.allocs.load(Ordering::SeqCst), 1);
        assert_eq!(alloc.frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mapped_view_defers_free_until_unmapped() {
        let alloc = Arc::new(CountingAllocator::default());
        let owner = SharedBuffer::allocate(alloc.clone(), 32).expect("allocates");
        let guard = owner.map();
        assert_eq!(owner.view_refs(), 1);
        assert_eq!(guard.len(), 32);

        drop(owner);
        assert_eq!(alloc.frees.load(Ordering::SeqCst), 0);
        // SAFETY: the mapping keeps the 32-byte block alive.
        unsafe { guard.as_ptr().write(5) };

        drop(guard);
        assert_eq!(alloc.frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn user_memory_is_never_freed() {
        let mut storage = vec![1u8; 16];
        let ptr = NonNull::new(storage.as_mut_ptr()).expect("vec pointer is non-null");
        // SAFETY: `storage` outlives the buffer.
        let buf = unsafe { SharedBuffer::wrap_user_memory(ptr, storage.len()) };
        assert!(buf.is_user_memory());
        let view = buf.clone();
        drop(buf);
        drop(view);
        assert_eq!(storage, vec![1u8; 16]);
    }

    #[test]
    fn clones_across_threads_balance() {
        let alloc = Arc::new(CountingAllocator::default());
        let root = SharedBuffer::allocate(alloc.clone(), 8).expect("allocates");
        std::thread::scope(|s| {
            for _ in 0..4 {
                let local = root.clone();
                s.spawn(move || {
                    for _ in 0..1000 {
                        let c = local.clone();
                        let g = c.map();
                        drop(c);
                        drop(g);
                    }
                });
            }
        });
        assert_eq!(root.owner_refs(), 1);
        assert_eq!(root.view_refs(), 0);
        drop(root);
        assert_eq!(alloc.frees.load(Ordering::SeqCst), 1);
    }
}
