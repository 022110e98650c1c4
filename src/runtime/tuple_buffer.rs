//! Append-only tuple slabs backed by anonymous memory maps.
//!
//! A [`TupleBuffer`] is a sequence of exponentially growing regions; the
//! first allocation maps `2 * base` bytes, the next region doubles again,
//! and nothing shrinks until the buffer is dropped. Each region header is a
//! `(pos, cap, mem)` triple with fixed offsets so compiled pipelines can
//! walk the regions directly. A buffer belongs to exactly one worker
//! thread; `alloc` is not synchronized.

use memmap2::MmapMut;

use super::fatal;

/// One mapped region. The first three fields are the JIT-visible header;
/// their offsets are load-bearing.
#[repr(C)]
#[derive(Debug)]
pub struct Buffer {
    pub pos: u64,
    pub cap: u64,
    pub mem: *mut u8,
    map: Option<MmapMut>,
}

impl Buffer {
    pub const POS_OFFSET: i32 = 0;
    pub const CAP_OFFSET: i32 = 8;
    pub const MEM_OFFSET: i32 = 16;
    pub const STRIDE: i64 = std::mem::size_of::<Buffer>() as i64;

    /// An unmapped placeholder; `alloc` replaces it on first use.
    pub fn empty() -> Buffer {
        Buffer {
            pos: 0,
            cap: 0,
            mem: std::ptr::null_mut(),
            map: None,
        }
    }

    /// Map `cap` bytes of anonymous memory. Allocation failure is fatal:
    /// compiled code cannot unwind through it.
    pub fn with_capacity(cap: u64) -> Buffer {
        let mut map = MmapMut::map_anon(cap as usize)
            .unwrap_or_else(|e| fatal(&format!("anonymous mmap of {cap} bytes failed: {e}")));
        let mem = map.as_mut_ptr();
        Buffer {
            pos: 0,
            cap,
            mem,
            map: Some(map),
        }
    }

    /// Bump-allocate without a capacity check; the caller sized the region.
    pub fn insert_unchecked(&mut self, elem_size: u64) -> *mut u8 {
        let elem = unsafe { self.mem.add(self.pos as usize) };
        self.pos += elem_size;
        elem
    }

    pub fn remaining(&self) -> u64 {
        self.cap - self.pos
    }
}

// The mapping is owned and only handed out through raw pointers the engine
// serializes itself.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

fn page_size() -> u64 {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 }
}

/// Page-doubling slab of packed tuples.
#[derive(Debug)]
pub struct TupleBuffer {
    buffers: Vec<Buffer>,
    base: u64,
}

impl Default for TupleBuffer {
    fn default() -> Self {
        TupleBuffer::new(64)
    }
}

impl TupleBuffer {
    /// `pages` is the initial size in pages; the first mapped region is
    /// twice that.
    pub fn new(pages: u64) -> TupleBuffer {
        TupleBuffer {
            buffers: Vec::new(),
            base: pages * page_size(),
        }
    }

    /// Return a pointer to `elem_size` fresh bytes in the newest region,
    /// growing a doubled region when the current one is exhausted.
    pub fn alloc(&mut self, elem_size: u64) -> *mut u8 {
        let exhausted = self
            .buffers
            .last()
            .is_none_or(|buffer| buffer.remaining() < elem_size);
        if exhausted {
            self.base *= 2;
            self.buffers.push(Buffer::with_capacity(self.base));
        }
        self.buffers.last_mut().unwrap().insert_unchecked(elem_size)
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn buffers_ptr(&self) -> *const Buffer {
        self.buffers.as_ptr()
    }

    pub fn buffer_count(&self) -> u64 {
        self.buffers.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_offsets_are_the_jit_contract() {
        assert_eq!(std::mem::offset_of!(Buffer, pos), 0);
        assert_eq!(std::mem::offset_of!(Buffer, cap), 8);
        assert_eq!(std::mem::offset_of!(Buffer, mem), 16);
    }

    #[test]
    fn regions_double_and_iteration_preserves_order() {
        let elem_size = 24u64;
        let count = 8192u64;
        let mut buffer = TupleBuffer::new(16);

        for i in 0..count {
            let elem = buffer.alloc(elem_size).cast::<u64>();
            unsafe {
                elem.write(i);
                elem.add(1).write(i * 31);
                elem.add(2).write(i ^ 0xabcd);
            }
        }

        // 16 pages * 4096 = 64 KiB base; 8192 * 24 = 192 KiB fits in
        // 128 KiB + 256 KiB
        assert_eq!(buffer.buffer_count(), 2);

        let mut seen = 0u64;
        for region in buffer.buffers() {
            let mut offset = 0;
            while offset < region.pos {
                let elem = unsafe { region.mem.add(offset as usize) }.cast::<u64>();
                unsafe {
                    assert_eq!(elem.read(), seen);
                    assert_eq!(elem.add(1).read(), seen * 31);
                    assert_eq!(elem.add(2).read(), seen ^ 0xabcd);
                }
                seen += 1;
                offset += elem_size;
            }
        }
        assert_eq!(seen, count);
    }

    #[test]
    fn first_alloc_creates_first_region() {
        let mut buffer = TupleBuffer::new(1);
        assert_eq!(buffer.buffer_count(), 0);
        let p = buffer.alloc(8);
        assert!(!p.is_null());
        assert_eq!(buffer.buffer_count(), 1);
        assert_eq!(buffer.buffers()[0].pos, 8);
    }
}
