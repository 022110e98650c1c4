//! Operator runtime contexts.
//!
//! Each materializing operator owns one context for the whole query plus a
//! thread-local context per worker. The per-thread side is touched only by
//! its owning worker; the shared side is read by merge pipelines after the
//! producing pipelines joined, or mutated through the lock-free hash-table
//! path during the join insertion continuation.

use std::sync::atomic::AtomicU64;

use super::hash_table::{HashTable, HashTableEntry};
use super::hyperloglog::Sketch;
use super::thread_local::ThreadLocalStorage;
use super::tuple_buffer::{Buffer, TupleBuffer};

/// Buckets of the per-thread aggregation table.
pub const LOCAL_AGG_TABLE_SIZE: u64 = 1024;

/// Per-worker build side of a join: materialized tuples plus the
/// cardinality sketch that sizes the shared table.
pub struct ThreadJoinContext {
    pub buffer: TupleBuffer,
    pub sketch: Sketch,
}

impl Default for ThreadJoinContext {
    fn default() -> Self {
        ThreadJoinContext {
            buffer: TupleBuffer::default(),
            sketch: Sketch::default(),
        }
    }
}

impl ThreadJoinContext {
    /// Feed the sketch and hand out buffer space for one build tuple.
    pub fn insert_entry(&mut self, hash: u64, elem_size: u64) -> *mut u8 {
        self.sketch.add(hash);
        self.buffer.alloc(elem_size)
    }

    /// Insert every buffered entry into the shared table with the lock-free
    /// tagged variant. Entry hashes still sit in the header word.
    pub fn insert_into(&self, table: &HashTable, elem_size: u64) {
        for region in self.buffer.buffers() {
            let mut offset = 0;
            while offset < region.pos {
                let entry = unsafe { region.mem.add(offset as usize) }.cast::<HashTableEntry>();
                let hash = unsafe { (*entry).word };
                table.insert_tagged_atomic(entry, hash);
                offset += elem_size;
            }
        }
    }
}

/// Per-worker aggregation state: local table, tuple slab, sketch.
pub struct ThreadAggregationContext {
    pub buffer: TupleBuffer,
    pub table: HashTable,
    pub sketch: Sketch,
    pub inserted: u64,
}

impl Default for ThreadAggregationContext {
    fn default() -> Self {
        ThreadAggregationContext {
            buffer: TupleBuffer::default(),
            table: HashTable::with_estimate(LOCAL_AGG_TABLE_SIZE),
            sketch: Sketch::default(),
            inserted: 0,
        }
    }
}

impl ThreadAggregationContext {
    /// Chain a fresh group entry into the local table. Reaching the load
    /// threshold zeroes the table and replays every live buffer entry, so
    /// each group keeps exactly one entry.
    pub fn insert_entry(&mut self, hash: u64, entry: *mut HashTableEntry, elem_size: u64) {
        self.sketch.add(hash);
        unsafe {
            (*entry).hash = hash;
        }
        if self.inserted >= self.table.threshold() {
            self.table.flush();
            self.inserted = self.rebuild(elem_size);
        } else {
            self.table.insert(entry, hash);
            self.inserted += 1;
        }
    }

    /// Reinsert all buffered entries (the newest included) from their
    /// persistent hash slots. Returns the new live count.
    fn rebuild(&mut self, elem_size: u64) -> u64 {
        let mut count = 0;
        for region in self.buffer.buffers() {
            let mut offset = 0;
            while offset < region.pos {
                let entry = unsafe { region.mem.add(offset as usize) }.cast::<HashTableEntry>();
                let hash = unsafe { (*entry).hash };
                self.table.insert(entry, hash);
                count += 1;
                offset += elem_size;
            }
        }
        count
    }
}

/// Per-worker sort state: packed tuples and their count.
pub struct ThreadSortContext {
    pub buffer: TupleBuffer,
    pub rows: u64,
}

impl Default for ThreadSortContext {
    fn default() -> Self {
        ThreadSortContext {
            buffer: TupleBuffer::default(),
            rows: 0,
        }
    }
}

/// Shared join state across all pipelines of one join.
pub struct JoinContext {
    pub tls: ThreadLocalStorage<ThreadJoinContext>,
    pub table: HashTable,
    pub claim: AtomicU64,
}

impl JoinContext {
    pub fn new(threads: usize) -> JoinContext {
        JoinContext {
            tls: ThreadLocalStorage::new(threads),
            table: HashTable::default(),
            claim: AtomicU64::new(0),
        }
    }
}

/// Shared aggregation state: the global table plus a pointer-sized tuple
/// buffer whose slots keep the global chains in entry-header form.
pub struct AggregationContext {
    pub tls: ThreadLocalStorage<ThreadAggregationContext>,
    pub table: HashTable,
    pub pointers: TupleBuffer,
}

impl AggregationContext {
    pub fn new(threads: usize) -> AggregationContext {
        AggregationContext {
            tls: ThreadLocalStorage::new(threads),
            table: HashTable::default(),
            pointers: TupleBuffer::default(),
        }
    }
}

/// Shared sort state: the single contiguous output buffer.
pub struct SortContext {
    pub tls: ThreadLocalStorage<ThreadSortContext>,
    pub buffer: Buffer,
}

impl SortContext {
    pub fn new(threads: usize) -> SortContext {
        SortContext {
            tls: ThreadLocalStorage::new(threads),
            buffer: Buffer::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::hash_table::{entry_alloc_size, strip_tag};
    use crate::runtime::murmur::hash64;

    #[test]
    fn local_agg_flush_keeps_every_entry_reachable() {
        let mut ctx = ThreadAggregationContext::default();
        let elem_size = u64::from(entry_alloc_size(8));
        let groups = ctx.table.threshold() + 100;

        let mut pointers = Vec::new();
        for g in 0..groups {
            let hash = hash64(g);
            let entry: *mut crate::runtime::hash_table::HashTableEntry = ctx.buffer.alloc(elem_size).cast();
            unsafe {
                (*entry).word = hash;
            }
            ctx.insert_entry(hash, entry, elem_size);
            pointers.push((hash, entry as u64));
        }

        // every group must be reachable from the (rebuilt) local table
        for (hash, entry) in pointers {
            let mut word = ctx.table.lookup(hash);
            let mut found = false;
            while strip_tag(word) != 0 {
                let e = strip_tag(word);
                if e == entry {
                    found = true;
                    break;
                }
                word = unsafe { (*(e as *const crate::runtime::hash_table::HashTableEntry)).word };
            }
            assert!(found, "entry for hash {hash:#x} unreachable after flush");
        }
    }

    #[test]
    fn join_context_moves_buffered_entries_into_shared_table() {
        let mut ctx = ThreadJoinContext::default();
        let elem_size = u64::from(entry_alloc_size(16));
        for i in 0..100u64 {
            let hash = hash64(i);
            let entry = ctx.insert_entry(hash, elem_size).cast::<crate::runtime::hash_table::HashTableEntry>();
            unsafe {
                (*entry).word = hash;
            }
        }
        assert!(ctx.sketch.estimate() > 50);

        let table = HashTable::with_estimate(128);
        ctx.insert_into(&table, elem_size);

        let mut reachable = 0;
        for bucket in 0..table.size() {
            let mut word = table.lookup(bucket);
            while strip_tag(word) != 0 {
                reachable += 1;
                word = unsafe {
                    (*(strip_tag(word) as *const crate::runtime::hash_table::HashTableEntry)).word
                };
            }
        }
        assert_eq!(reachable, 100);
    }
}
