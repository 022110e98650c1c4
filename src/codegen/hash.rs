//! Murmur key hashing in emitted code.
//!
//! Each key value is hashed through the `hash` runtime symbol over its
//! in-memory bytes; multi-key hashes fold pairwise with a shift-add-xor
//! combine. An empty key list hashes to zero. Hashing a value requires its
//! address, so values that only exist in registers are spilled to a stack
//! slot first and the address is remembered in the scope.

use cranelift_codegen::ir::types;
use cranelift_codegen::ir::Value;

use crate::error::EngineError;
use crate::iu::Iu;
use crate::types::TypeKind;

use super::CodeGen;

const COMBINE_MAGIC: i64 = 0x517c_c1b7_2722_0a95u64 as i64;

/// Hash the scope's current values of `ius` into one 64-bit key hash.
pub fn hash_keys(cg: &mut CodeGen, ius: &[Iu]) -> Result<Value, EngineError> {
    let Some((first, rest)) = ius.split_first() else {
        return Ok(cg.i64const(0));
    };
    let mut acc = hash_single(cg, first)?;
    for iu in rest {
        let hashed = hash_single(cg, iu)?;
        acc = combine(cg, acc, hashed);
    }
    Ok(acc)
}

fn hash_single(cg: &mut CodeGen, iu: &Iu) -> Result<Value, EngineError> {
    let addr = match cg.scope.pointer(iu) {
        Some(addr) => addr,
        None => {
            let value = cg
                .scope
                .value(iu)
                .unwrap_or_else(|| panic!("{iu:?} not in scope"));
            let addr = cg.stack_store(value);
            cg.scope.set_pointer(iu, addr);
            addr
        }
    };
    match iu.ty() {
        TypeKind::String => {
            // hash the string bytes, not the view
            let data = cg.load_mem(cg.ptr_ty(), addr, 0);
            let len = cg.load_mem(types::I64, addr, 8);
            cg.call_rt1("hash", &[data, len], types::I64)
        }
        ty => {
            let len = cg.i64const(i64::from(ty.size()));
            cg.call_rt1("hash", &[addr, len], types::I64)
        }
    }
}

/// `h2 ^ ((h2 << 6) + (h2 >> 2) + magic + h1)`
fn combine(cg: &mut CodeGen, h1: Value, h2: Value) -> Value {
    let shifted_left = cg.ishl_imm(h2, 6);
    let shifted_right = cg.ushr_imm(h2, 2);
    let mut sum = cg.iadd(shifted_left, shifted_right);
    sum = cg.iadd_imm(sum, COMBINE_MAGIC);
    sum = cg.iadd(sum, h1);
    cg.bxor(h2, sum)
}
