//! Engine-owned thread-local context storage.
//!
//! Worker threads claim a per-operator context on first touch; merge
//! pipelines later iterate every claimed context from a single thread. The
//! language's own thread-local storage cannot do the second half, so the
//! engine keeps its own table: an open-addressed thread-token map in front
//! of a preallocated, cache-line-padded object pool with a bump allocator.
//!
//! Capacity is `next_power_of_two(10 * threads / 7)`, which caps the load
//! factor at 0.7 and guarantees probe termination. Insert races resolve by
//! compare-and-swap on the slot's context pointer; the pool hands out at
//! most one slot per thread, in arrival order.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use super::murmur::hash64;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::SeqCst);
}

/// Process-unique token of the calling thread. Tokens start at 1; 0 marks
/// an empty slot.
pub fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

/// Fixed pool of default-constructed contexts with a bump allocator.
struct ObjectPool<T> {
    cursor: CachePadded<AtomicUsize>,
    items: Box<[CachePadded<UnsafeCell<T>>]>,
}

impl<T: Default> ObjectPool<T> {
    fn new(size: usize) -> ObjectPool<T> {
        ObjectPool {
            cursor: CachePadded::new(AtomicUsize::new(0)),
            items: (0..size)
                .map(|_| CachePadded::new(UnsafeCell::new(T::default())))
                .collect(),
        }
    }

    fn alloc(&self) -> *mut T {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        assert!(idx < self.items.len(), "context pool exhausted");
        self.at(idx)
    }

    fn at(&self, idx: usize) -> *mut T {
        self.items[idx].get()
    }

    fn allocated(&self) -> usize {
        self.cursor.load(Ordering::SeqCst).min(self.items.len())
    }
}

struct Slot<T> {
    data: AtomicPtr<T>,
    token: AtomicU64,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot {
            data: AtomicPtr::new(std::ptr::null_mut()),
            token: AtomicU64::new(0),
        }
    }
}

/// Open-addressed thread-token → context map over a fixed pool.
pub struct ThreadLocalStorage<T> {
    slots: Box<[CachePadded<Slot<T>>]>,
    mask: u64,
    pool: ObjectPool<T>,
}

// Contexts are only handed to the thread that claimed them; iteration
// happens after the claiming pipelines joined.
unsafe impl<T: Send> Send for ThreadLocalStorage<T> {}
unsafe impl<T: Send> Sync for ThreadLocalStorage<T> {}

impl<T: Default> ThreadLocalStorage<T> {
    pub fn new(threads: usize) -> ThreadLocalStorage<T> {
        let threads = threads.max(1);
        let capacity = (threads * 10 / 7).max(1).next_power_of_two();
        ThreadLocalStorage {
            slots: (0..capacity).map(|_| CachePadded::default()).collect(),
            mask: capacity as u64 - 1,
            pool: ObjectPool::new(threads),
        }
    }

    /// The calling thread's context, allocating it on first touch. Two
    /// calls from the same thread return the same pointer.
    pub fn get_or_insert(&self) -> *mut T {
        let token = thread_token();
        let start = (hash64(token) & self.mask) as usize;

        if let Some(found) = self.search(start, token) {
            return found;
        }

        let fresh = self.pool.alloc();
        let mut idx = start;
        loop {
            let slot = &self.slots[idx];
            if slot
                .data
                .compare_exchange(
                    std::ptr::null_mut(),
                    fresh,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                slot.token.store(token, Ordering::SeqCst);
                return fresh;
            }
            // slot taken by a concurrent first-touch of another thread
            idx = (idx + 1) & self.mask as usize;
            assert!(idx != start, "thread context table full");
        }
    }

    fn search(&self, start: usize, token: u64) -> Option<*mut T> {
        let mut idx = start;
        loop {
            let slot = &self.slots[idx];
            if slot.data.load(Ordering::SeqCst).is_null() {
                return None;
            }
            if slot.token.load(Ordering::SeqCst) == token {
                return Some(slot.data.load(Ordering::SeqCst));
            }
            idx = (idx + 1) & self.mask as usize;
            if idx == start {
                return None;
            }
        }
    }

    /// Number of contexts claimed so far.
    pub fn allocated(&self) -> usize {
        self.pool.allocated()
    }

    /// Pool slot `idx`, claimed or not. Slots are default-constructed up
    /// front, so an unclaimed slot is an empty context.
    pub fn at(&self, idx: usize) -> *mut T {
        self.pool.at(idx)
    }

    /// Iterate claimed contexts in pool (thread-arrival) order.
    pub fn for_each(&self, mut f: impl FnMut(&mut T)) {
        for idx in 0..self.allocated() {
            f(unsafe { &mut *self.pool.at(idx) });
        }
    }
}
