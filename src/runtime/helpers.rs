//! The C-ABI symbol surface for compiled pipelines.
//!
//! Every function here is callable from JITed code; the code generator
//! resolves names through [`runtime_symbol`] and registers the addresses
//! with the symbol registry, which the JIT consults when it finalizes the
//! module. Pointer arguments arrive as the raw addresses the pipelines
//! loaded from their argument vectors; validity is the planner's contract.

use std::sync::atomic::{AtomicU64, Ordering};

use super::contexts::{ThreadAggregationContext, ThreadJoinContext, ThreadSortContext};
use super::date;
use super::hash_table::{self, HashTable, HashTableEntry};
use super::hyperloglog::Sketch;
use super::murmur::{murmur_hash, MURMUR_SEED};
use super::strings::{self, view_bytes, StringView};
use super::thread_local::ThreadLocalStorage;
use super::tuple_buffer::{Buffer, TupleBuffer};
use crate::storage::column::ColumnDesc;

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub extern "C" fn rt_hash(data: *const u8, len: u64) -> u64 {
    let bytes = unsafe { std::slice::from_raw_parts(data, len as usize) };
    murmur_hash(bytes, MURMUR_SEED)
}

// ---------------------------------------------------------------------------
// Hash table
// ---------------------------------------------------------------------------

pub extern "C" fn hashtable_insert(
    table: *const HashTable,
    entry: *mut HashTableEntry,
    hash: u64,
) -> *mut u8 {
    unsafe {
        (*entry).hash = hash;
        (*table).insert(entry, hash);
        entry.cast::<u8>().add(hash_table::ENTRY_HEADER_SIZE as usize)
    }
}

pub extern "C" fn hashtable_insert_tagged(
    table: *const HashTable,
    entry: *mut HashTableEntry,
    hash: u64,
) -> *mut u8 {
    unsafe {
        (*entry).hash = hash;
        (*table).insert_tagged(entry, hash);
        entry.cast::<u8>().add(hash_table::ENTRY_HEADER_SIZE as usize)
    }
}

/// Returns the (possibly tagged) bucket head word.
pub extern "C" fn hashtable_lookup(table: *const HashTable, hash: u64) -> u64 {
    unsafe { (*table).lookup(hash) }
}

pub extern "C" fn hashtable_alloc(table: *mut HashTable, estimate: u64) {
    unsafe {
        *table = HashTable::with_estimate(estimate);
    }
}

/// Call fallback for the inline pointer strip.
pub extern "C" fn sign_extend(word: u64) -> u64 {
    hash_table::strip_tag(word)
}

/// Call fallback for the inline tag test.
pub extern "C" fn cmp_tag(word: u64, hash: u64) -> bool {
    hash_table::tag_mismatch(word, hash)
}

// ---------------------------------------------------------------------------
// HyperLogLog
// ---------------------------------------------------------------------------

pub extern "C" fn hll_add(sketch: *mut Sketch, hash: u64) {
    unsafe {
        (*sketch).add(hash);
    }
}

pub extern "C" fn hll_estimate(sketch: *const Sketch) -> u64 {
    unsafe { (*sketch).estimate() }
}

// ---------------------------------------------------------------------------
// Tuple buffer
// ---------------------------------------------------------------------------

pub extern "C" fn tb_insert(buffer: *mut TupleBuffer, elem_size: u64) -> *mut u8 {
    unsafe { (*buffer).alloc(elem_size) }
}

pub extern "C" fn tb_buffers(buffer: *const TupleBuffer) -> *const Buffer {
    unsafe { (*buffer).buffers_ptr() }
}

pub extern "C" fn tb_buffer_count(buffer: *const TupleBuffer) -> u64 {
    unsafe { (*buffer).buffer_count() }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

pub extern "C" fn string_eq(a: *const StringView, b: *const StringView) -> bool {
    unsafe { strings::eq(view_bytes(a), view_bytes(b)) }
}

pub extern "C" fn string_lt(a: *const StringView, b: *const StringView) -> bool {
    unsafe { strings::lt(view_bytes(a), view_bytes(b)) }
}

pub extern "C" fn string_gt(a: *const StringView, b: *const StringView) -> bool {
    unsafe { strings::gt(view_bytes(a), view_bytes(b)) }
}

fn pattern<'a>(data: *const u8, len: u64) -> &'a [u8] {
    unsafe { std::slice::from_raw_parts(data, len as usize) }
}

pub extern "C" fn like_prefix(value: *const StringView, pat: *const u8, len: u64) -> bool {
    unsafe { strings::like_prefix(view_bytes(value), pattern(pat, len)) }
}

pub extern "C" fn like_suffix(value: *const StringView, pat: *const u8, len: u64) -> bool {
    unsafe { strings::like_suffix(view_bytes(value), pattern(pat, len)) }
}

pub extern "C" fn like_contains(value: *const StringView, pat: *const u8, len: u64) -> bool {
    unsafe { strings::like_contains(view_bytes(value), pattern(pat, len)) }
}

/// Read row `idx` of a slotted string column into `out`.
pub extern "C" fn load_from_slotted_page(idx: u64, column: *const ColumnDesc, out: *mut StringView) {
    unsafe {
        let base = (*column).data;
        let slot = base.add(8 + 16 * idx as usize).cast::<u64>();
        let len = slot.read_unaligned();
        let offset = slot.add(1).read_unaligned();
        *out = StringView {
            data: base.add(offset as usize),
            len,
        };
    }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

pub extern "C" fn extract_year(julian: u32) -> u32 {
    date::extract_year(julian)
}

// ---------------------------------------------------------------------------
// Printing
// ---------------------------------------------------------------------------

pub extern "C" fn print_int32(x: i32) {
    print!("{x}  ");
}

pub extern "C" fn print_int64(x: i64) {
    print!("{x}  ");
}

pub extern "C" fn print_double(x: f64) {
    print!("{x:.4}  ");
}

pub extern "C" fn print_char(x: u8) {
    print!("{}  ", x as char);
}

pub extern "C" fn print_bool(x: bool) {
    print!("{}  ", u8::from(x));
}

pub extern "C" fn print_date(x: u32) {
    let d = date::from_julian(x);
    print!("{} - {} - {}  ", d.year, d.month, d.day);
}

pub extern "C" fn print_string(sv: *const StringView) {
    let bytes = unsafe { view_bytes(sv) };
    print!("{}  ", String::from_utf8_lossy(bytes));
}

pub extern "C" fn print_newline() {
    println!();
}

// ---------------------------------------------------------------------------
// Join contexts
// ---------------------------------------------------------------------------

pub extern "C" fn local_join_context(
    tls: *const ThreadLocalStorage<ThreadJoinContext>,
) -> *mut ThreadJoinContext {
    unsafe { (*tls).get_or_insert() }
}

pub extern "C" fn insert_join_entry(
    ctx: *mut ThreadJoinContext,
    hash: u64,
    elem_size: u64,
) -> *mut u8 {
    unsafe { (*ctx).insert_entry(hash, elem_size) }
}

/// Merge every worker sketch and return the combined estimate.
pub extern "C" fn join_sketch_estimate(tls: *const ThreadLocalStorage<ThreadJoinContext>) -> u64 {
    let mut combined = Sketch::default();
    unsafe {
        (*tls).for_each(|ctx| combined.merge(&ctx.sketch));
    }
    combined.estimate()
}

/// Claim the next unprocessed thread context for the insertion
/// continuation. Each worker claims one slot; unclaimed slots are empty
/// default contexts, so over-claiming is harmless.
pub extern "C" fn claim_join_context(
    tls: *const ThreadLocalStorage<ThreadJoinContext>,
    claim: *const AtomicU64,
) -> *mut ThreadJoinContext {
    unsafe {
        let idx = (*claim).fetch_add(1, Ordering::SeqCst);
        (*tls).at(idx as usize)
    }
}

pub extern "C" fn insert_join_multithreaded(
    ctx: *const ThreadJoinContext,
    table: *const HashTable,
    elem_size: u64,
) {
    unsafe {
        (*ctx).insert_into(&*table, elem_size);
    }
}

// ---------------------------------------------------------------------------
// Aggregation contexts
// ---------------------------------------------------------------------------

pub extern "C" fn local_agg_context(
    tls: *const ThreadLocalStorage<ThreadAggregationContext>,
) -> *mut ThreadAggregationContext {
    unsafe { (*tls).get_or_insert() }
}

pub extern "C" fn agg_local_table(ctx: *mut ThreadAggregationContext) -> *mut HashTable {
    unsafe { &mut (*ctx).table }
}

pub extern "C" fn agg_tuple_buffer(ctx: *mut ThreadAggregationContext) -> *mut TupleBuffer {
    unsafe { &mut (*ctx).buffer }
}

pub extern "C" fn insert_agg_entry(
    ctx: *mut ThreadAggregationContext,
    hash: u64,
    entry: *mut HashTableEntry,
    elem_size: u64,
) {
    unsafe {
        (*ctx).insert_entry(hash, entry, elem_size);
    }
}

pub extern "C" fn agg_sketch_estimate(
    tls: *const ThreadLocalStorage<ThreadAggregationContext>,
) -> u64 {
    let mut combined = Sketch::default();
    unsafe {
        (*tls).for_each(|ctx| combined.merge(&ctx.sketch));
    }
    combined.estimate()
}

pub extern "C" fn agg_context_count(
    tls: *const ThreadLocalStorage<ThreadAggregationContext>,
) -> u64 {
    unsafe { (*tls).allocated() as u64 }
}

pub extern "C" fn agg_context_at(
    tls: *const ThreadLocalStorage<ThreadAggregationContext>,
    idx: u64,
) -> *mut ThreadAggregationContext {
    unsafe { (*tls).at(idx as usize) }
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

pub extern "C" fn local_sort_context(
    tls: *const ThreadLocalStorage<ThreadSortContext>,
) -> *mut ThreadSortContext {
    unsafe { (*tls).get_or_insert() }
}

pub extern "C" fn insert_sort_entry(ctx: *mut ThreadSortContext, tuple_size: u64) -> *mut u8 {
    unsafe {
        (*ctx).rows += 1;
        (*ctx).buffer.alloc(tuple_size)
    }
}

/// Combined byte size of all buffered sort tuples.
pub extern "C" fn sort_combined_size(
    tls: *const ThreadLocalStorage<ThreadSortContext>,
    tuple_size: u64,
) -> u64 {
    let mut rows = 0;
    unsafe {
        (*tls).for_each(|ctx| rows += ctx.rows);
    }
    rows * tuple_size
}

pub extern "C" fn sort_buffer_alloc(buffer: *mut Buffer, size: u64) {
    unsafe {
        *buffer = Buffer::with_capacity(size.max(1));
    }
}

/// Copy every worker's tuples into the contiguous sort buffer.
pub extern "C" fn sort_buffer_fill(
    tls: *const ThreadLocalStorage<ThreadSortContext>,
    buffer: *mut Buffer,
    tuple_size: u64,
) {
    unsafe {
        (*tls).for_each(|ctx| {
            for region in ctx.buffer.buffers() {
                let mut offset = 0;
                while offset < region.pos {
                    let elem = (*buffer).insert_unchecked(tuple_size);
                    std::ptr::copy_nonoverlapping(
                        region.mem.add(offset as usize),
                        elem,
                        tuple_size as usize,
                    );
                    offset += tuple_size;
                }
            }
        });
    }
}

/// Sort the packed buffer with a JIT-compiled comparator.
pub extern "C" fn sort_buffer_sort(
    buffer: *mut Buffer,
    tuple_size: u64,
    cmp: unsafe extern "C" fn(*const libc::c_void, *const libc::c_void) -> i32,
) {
    unsafe {
        let count = (*buffer).pos / tuple_size;
        libc::qsort(
            (*buffer).mem.cast(),
            count as usize,
            tuple_size as usize,
            Some(cmp),
        );
    }
}

pub extern "C" fn sort_buffer_data(buffer: *const Buffer) -> *mut u8 {
    unsafe { (*buffer).mem }
}

// ---------------------------------------------------------------------------
// Symbol resolution
// ---------------------------------------------------------------------------

/// Address of a runtime symbol by name, or `None` for names outside the
/// surface. The code generator treats `None` as a compile-time reject.
pub fn runtime_symbol(name: &str) -> Option<*const u8> {
    Some(match name {
        "hash" => rt_hash as *const u8,
        "hashtable_insert" => hashtable_insert as *const u8,
        "hashtable_insert_tagged" => hashtable_insert_tagged as *const u8,
        "hashtable_lookup" => hashtable_lookup as *const u8,
        "hashtable_alloc" => hashtable_alloc as *const u8,
        "sign_extend" => sign_extend as *const u8,
        "cmp_tag" => cmp_tag as *const u8,
        "hll_add" => hll_add as *const u8,
        "hll_estimate" => hll_estimate as *const u8,
        "tb_insert" => tb_insert as *const u8,
        "tb_buffers" => tb_buffers as *const u8,
        "tb_buffer_count" => tb_buffer_count as *const u8,
        "string_eq" => string_eq as *const u8,
        "string_lt" => string_lt as *const u8,
        "string_gt" => string_gt as *const u8,
        "like_prefix" => like_prefix as *const u8,
        "like_suffix" => like_suffix as *const u8,
        "like" => like_contains as *const u8,
        "load_from_slotted_page" => load_from_slotted_page as *const u8,
        "extract_year" => extract_year as *const u8,
        "print_int32" => print_int32 as *const u8,
        "print_int64" => print_int64 as *const u8,
        "print_double" => print_double as *const u8,
        "print_char" => print_char as *const u8,
        "print_bool" => print_bool as *const u8,
        "print_date" => print_date as *const u8,
        "print_string" => print_string as *const u8,
        "print_newline" => print_newline as *const u8,
        "local_join_context" => local_join_context as *const u8,
        "insert_join_entry" => insert_join_entry as *const u8,
        "join_sketch_estimate" => join_sketch_estimate as *const u8,
        "claim_join_context" => claim_join_context as *const u8,
        "insert_join_multithreaded" => insert_join_multithreaded as *const u8,
        "local_agg_context" => local_agg_context as *const u8,
        "agg_local_table" => agg_local_table as *const u8,
        "agg_tuple_buffer" => agg_tuple_buffer as *const u8,
        "insert_agg_entry" => insert_agg_entry as *const u8,
        "agg_sketch_estimate" => agg_sketch_estimate as *const u8,
        "agg_context_count" => agg_context_count as *const u8,
        "agg_context_at" => agg_context_at as *const u8,
        "local_sort_context" => local_sort_context as *const u8,
        "insert_sort_entry" => insert_sort_entry as *const u8,
        "sort_combined_size" => sort_combined_size as *const u8,
        "sort_buffer_alloc" => sort_buffer_alloc as *const u8,
        "sort_buffer_fill" => sort_buffer_fill as *const u8,
        "sort_buffer_sort" => sort_buffer_sort as *const u8,
        "sort_buffer_data" => sort_buffer_data as *const u8,
        "collect_row" => crate::ops::sink::collect_row as *const u8,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slotted_page_reads() {
        // count, one slot {len, offset}, then bytes
        let mut page = Vec::new();
        page.extend_from_slice(&1u64.to_le_bytes());
        page.extend_from_slice(&4u64.to_le_bytes()); // len
        page.extend_from_slice(&24u64.to_le_bytes()); // offset
        page.extend_from_slice(b"ASIA");

        let desc = ColumnDesc {
            data: page.as_ptr(),
            len: 1,
        };
        let mut sv = StringView {
            data: std::ptr::null(),
            len: 0,
        };
        load_from_slotted_page(0, &desc, &mut sv);
        assert_eq!(unsafe { sv.as_bytes() }, b"ASIA");
    }

    #[test]
    fn symbol_surface_is_closed() {
        assert!(runtime_symbol("hash").is_some());
        assert!(runtime_symbol("sort_buffer_sort").is_some());
        assert!(runtime_symbol("definitely_not_a_symbol").is_none());
    }
}
