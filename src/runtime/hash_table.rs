//! Chained hash tables over buffer-resident entries.
//!
//! The table is a fixed power-of-two array of bucket heads; entries live in
//! tuple buffers and are linked through their header word. Bucket heads of
//! the shared join table carry a 16-bit tag in their top bits: the OR of
//! the high hash bits of everything reachable through that pointer. A probe
//! whose tag bits are not all present can stop immediately, because tags
//! only accumulate toward the head of the chain.
//!
//! Tagging assumes the target leaves pointer bits 48..64 unused (canonical
//! x86-64 form). On other targets [`POINTER_TAGGING`] is false, tagged
//! inserts degrade to plain prepends and the tag test compiles to a
//! constant "compatible".

use std::sync::atomic::{AtomicU64, Ordering};

/// Whether bucket heads carry hash tags in their top 16 bits.
pub const POINTER_TAGGING: bool = cfg!(target_arch = "x86_64");

/// Bit position where the head tag begins.
pub const TAG_SHIFT: u32 = 48;
const LOW_48: u64 = (1 << TAG_SHIFT) - 1;

/// Entry header. `word` is a union in time: the entry's hash while it sits
/// in a tuple buffer, the (possibly tagged) next pointer once it is linked
/// into a chain. `hash` keeps a persistent copy so the local aggregation
/// table can be rebuilt after a flush.
#[repr(C)]
pub struct HashTableEntry {
    pub word: u64,
    pub hash: u64,
}

/// Header bytes preceding the packed tuple payload.
pub const ENTRY_HEADER_SIZE: u32 = std::mem::size_of::<HashTableEntry>() as u32;

/// Allocation size of an entry holding a `tuple_size` payload, kept
/// 16-aligned so headers stay aligned across a region.
pub fn entry_alloc_size(tuple_size: u32) -> u32 {
    (ENTRY_HEADER_SIZE + tuple_size + 15) & !15
}

/// Recover the canonical pointer from a tagged bucket word by
/// sign-extending bit 47.
pub fn strip_tag(word: u64) -> u64 {
    if POINTER_TAGGING {
        (((word << 16) as i64) >> 16) as u64
    } else {
        word
    }
}

/// True when the tag proves `hash` cannot be in the chain behind `word`.
pub fn tag_mismatch(word: u64, hash: u64) -> bool {
    if POINTER_TAGGING {
        let query = hash >> TAG_SHIFT;
        (word >> TAG_SHIFT) & query != query
    } else {
        false
    }
}

/// Fixed-size chained hash table. Never resizes; `alloc` replaces the
/// bucket array wholesale.
#[derive(Debug, Default)]
pub struct HashTable {
    buckets: Box<[AtomicU64]>,
    size: u64,
}

impl HashTable {
    /// Allocate with `estimate` rounded down to a power of two.
    pub fn with_estimate(estimate: u64) -> HashTable {
        let size = if estimate == 0 {
            1
        } else if estimate.is_power_of_two() {
            estimate
        } else {
            estimate.next_power_of_two() >> 1
        };
        let buckets = (0..size).map(|_| AtomicU64::new(0)).collect();
        HashTable { buckets, size }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Load-factor threshold of the local aggregation table.
    pub fn threshold(&self) -> u64 {
        self.size * 10 / 7
    }

    fn bucket(&self, hash: u64) -> &AtomicU64 {
        &self.buckets[(hash & (self.size - 1)) as usize]
    }

    /// Prepend `entry` to its chain. Single-writer.
    pub fn insert(&self, entry: *mut HashTableEntry, hash: u64) {
        let bucket = self.bucket(hash);
        let head = bucket.load(Ordering::SeqCst);
        unsafe {
            (*entry).word = head;
        }
        bucket.store(entry as u64, Ordering::SeqCst);
    }

    /// Prepend with tag accumulation. Single-writer.
    pub fn insert_tagged(&self, entry: *mut HashTableEntry, hash: u64) {
        if !POINTER_TAGGING {
            return self.insert(entry, hash);
        }
        let bucket = self.bucket(hash);
        let head = bucket.load(Ordering::SeqCst);
        unsafe {
            (*entry).word = head;
        }
        let tag = ((head | hash) >> TAG_SHIFT) << TAG_SHIFT;
        bucket.store(entry as u64 & LOW_48 | tag, Ordering::SeqCst);
    }

    /// Tagged prepend safe under concurrent insertion: compare-and-swap
    /// loop on the bucket head.
    pub fn insert_tagged_atomic(&self, entry: *mut HashTableEntry, hash: u64) {
        let bucket = self.bucket(hash);
        let mut head = bucket.load(Ordering::SeqCst);
        loop {
            unsafe {
                (*entry).word = head;
            }
            let desired = if POINTER_TAGGING {
                let tag = ((head | hash) >> TAG_SHIFT) << TAG_SHIFT;
                entry as u64 & LOW_48 | tag
            } else {
                entry as u64
            };
            match bucket.compare_exchange_weak(head, desired, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// The (possibly tagged) bucket head for `hash`. Chain iteration is the
    /// caller's job.
    pub fn lookup(&self, hash: u64) -> u64 {
        self.bucket(hash).load(Ordering::SeqCst)
    }

    /// Zero every bucket. Entries stay live in their tuple buffers.
    pub fn flush(&self) {
        for bucket in &self.buckets {
            bucket.store(0, Ordering::SeqCst);
        }
    }
}
