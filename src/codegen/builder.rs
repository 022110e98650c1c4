//! The IR builder.
//!
//! One `CodeGen` lowers one query: operators call into it to open and
//! finish pipelines, bind pipeline arguments, pack and unpack tuples, spin
//! up loops and emit calls into the native runtime. The emitted IR is
//! cranelift IR; block parameters play the role of PHIs and loops carry
//! their induction value as a header parameter, pushed and popped through
//! an explicit loop-frame stack.
//!
//! Conventions the emitted code relies on:
//! - pointers are plain `i64` values (the target's pointer type),
//! - booleans are `i8` values holding 0 or 1,
//! - every pipeline argument access and stack slot lives in the entry
//!   block's frame, so all uses are dominated,
//! - a finished pipeline ends in exactly one `return`.

use std::collections::HashMap;
use std::sync::Arc;

use cranelift_codegen::cursor::{Cursor, FuncCursor};
use cranelift_codegen::ir::{
    self, condcodes::FloatCC, condcodes::IntCC, types, AbiParam, Block, InstBuilder, MemFlags,
    Signature, StackSlotData, StackSlotKind, UserFuncName, Value,
};
use cranelift_codegen::isa::CallConv;
use cranelift_codegen::Context;
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Linkage, Module};

use crate::error::EngineError;
use crate::iu::Iu;
use crate::runtime::hash_table::{self, ENTRY_HEADER_SIZE, POINTER_TAGGING};
use crate::runtime::helpers::runtime_symbol;
use crate::tuple::TupleLayout;
use crate::types::TypeKind;

use super::scope::{LoopFrame, Scope};
use super::{Pipeline, PipelineKind, Query, SymbolRegistry};

const TAG_BITS: i64 = 16;

/// Per-query code generator over a cranelift JIT module.
pub struct CodeGen {
    module: JITModule,
    symbols: Arc<SymbolRegistry>,
    pub query: Query,
    pub scope: Scope,
    nthreads: usize,
    ptr_ty: ir::Type,
    call_conv: CallConv,
    func: Option<ir::Function>,
    cur_func_id: Option<FuncId>,
    cur_block: Option<Block>,
    entry_params: Vec<Value>,
    helper_ids: HashMap<&'static str, FuncId>,
    func_refs: HashMap<FuncId, ir::FuncRef>,
    func_index: u32,
}

impl CodeGen {
    pub fn new(module: JITModule, symbols: Arc<SymbolRegistry>, nthreads: usize) -> CodeGen {
        let ptr_ty = module.isa().pointer_type();
        let call_conv = module.isa().default_call_conv();
        CodeGen {
            module,
            symbols,
            query: Query::default(),
            scope: Scope::default(),
            nthreads,
            ptr_ty,
            call_conv,
            func: None,
            cur_func_id: None,
            cur_block: None,
            entry_params: Vec::new(),
            helper_ids: HashMap::new(),
            func_refs: HashMap::new(),
            func_index: 0,
        }
    }

    /// Worker count the runtime contexts must be sized for.
    pub fn threads(&self) -> usize {
        self.nthreads
    }

    pub fn ptr_ty(&self) -> ir::Type {
        self.ptr_ty
    }

    /// Hand the finished module and query state to the compiler driver.
    pub fn into_parts(self) -> (JITModule, Query) {
        assert!(self.func.is_none(), "pipeline left open");
        (self.module, self.query)
    }

    pub fn add_context<T: 'static>(&mut self, context: T) -> *mut T {
        self.query.add_context(context)
    }

    // -----------------------------------------------------------------------
    // Pipeline lifecycle
    // -----------------------------------------------------------------------

    fn signature(&self, params: &[ir::Type], ret: Option<ir::Type>) -> Signature {
        let mut sig = Signature::new(self.call_conv);
        sig.params
            .extend(params.iter().map(|&ty| AbiParam::new(ty)));
        if let Some(ret) = ret {
            sig.returns.push(AbiParam::new(ret));
        }
        sig
    }

    fn open_function(
        &mut self,
        name: &str,
        sig: Signature,
        linkage: Linkage,
    ) -> Result<FuncId, EngineError> {
        assert!(self.func.is_none(), "previous function still open");
        let func_id = self.module.declare_function(name, linkage, &sig)?;
        let param_types: Vec<ir::Type> = sig.params.iter().map(|p| p.value_type).collect();

        let mut func = ir::Function::with_name_signature(UserFuncName::user(0, self.func_index), sig);
        self.func_index += 1;
        let entry = func.dfg.make_block();
        for ty in param_types {
            func.dfg.append_block_param(entry, ty);
        }
        func.layout.append_block(entry);

        self.entry_params = func.dfg.block_params(entry).to_vec();
        self.func = Some(func);
        self.cur_func_id = Some(func_id);
        self.cur_block = Some(entry);
        self.scope.clear();
        self.func_refs.clear();
        Ok(func_id)
    }

    fn open_pipeline(
        &mut self,
        kind: PipelineKind,
        table_index: Option<usize>,
    ) -> Result<(), EngineError> {
        let name = format!("pipeline_{}", self.query.pipelines.len());
        let sig = match kind {
            PipelineKind::Scan => self.signature(
                &[self.ptr_ty, types::I64, types::I64, types::I64, self.ptr_ty],
                None,
            ),
            _ => self.signature(&[self.ptr_ty], None),
        };
        let func_id = self.open_function(&name, sig, Linkage::Export)?;
        self.query.pipelines.push(Pipeline {
            kind,
            name,
            func_id,
            args: Vec::new(),
            table_index,
        });
        Ok(())
    }

    /// Open a scan pipeline `(table_ptr, begin, end, threads, args)`.
    pub fn create_scan_pipeline(&mut self, table_index: usize) -> Result<(), EngineError> {
        self.open_pipeline(PipelineKind::Scan, Some(table_index))
    }

    /// Open a default pipeline `(args)`, run once by the scheduler.
    pub fn create_pipeline(&mut self) -> Result<(), EngineError> {
        self.open_pipeline(PipelineKind::Default, None)
    }

    /// Open a continuation pipeline `(args)`, fanned out per worker.
    pub fn create_continuation_pipeline(&mut self) -> Result<(), EngineError> {
        self.open_pipeline(PipelineKind::Continuation, None)
    }

    /// Emit the return and compile the pipeline into the module.
    pub fn finish_pipeline(&mut self) -> Result<(), EngineError> {
        assert!(
            self.scope.loops.is_empty(),
            "pipeline finished inside a loop"
        );
        self.ret();
        let func_id = self.cur_func_id.take().expect("no pipeline open");
        self.define(func_id)?;
        tracing::debug!(
            pipeline = %self.query.pipelines.last().map(|p| p.name.as_str()).unwrap_or("?"),
            "pipeline compiled"
        );
        Ok(())
    }

    /// Open an internal (non-pipeline) function, e.g. a sort comparator.
    pub fn open_internal_function(
        &mut self,
        params: &[ir::Type],
        ret: ir::Type,
    ) -> Result<FuncId, EngineError> {
        let name = format!("internal_{}", self.func_index);
        let sig = self.signature(params, Some(ret));
        self.open_function(&name, sig, Linkage::Local)
    }

    /// Return `values` and compile the internal function.
    pub fn finish_internal_function(&mut self, values: &[Value]) -> Result<(), EngineError> {
        let mut cursor = self.cursor();
        cursor.ins().return_(values);
        self.cur_block = None;
        let func_id = self.cur_func_id.take().expect("no function open");
        self.define(func_id)
    }

    fn define(&mut self, func_id: FuncId) -> Result<(), EngineError> {
        let func = self.func.take().expect("no function open");
        self.cur_block = None;
        self.entry_params.clear();
        let mut ctx = Context::for_function(func);
        self.module.define_function(func_id, &mut ctx)?;
        Ok(())
    }

    /// Entry parameter `idx` of the open function. For scans: 0 table
    /// pointer, 1 begin, 2 end, 3 thread count, 4 argument vector.
    pub fn func_param(&self, idx: usize) -> Value {
        self.entry_params[idx]
    }

    /// The argument-vector parameter (last by convention).
    pub fn args_param(&self) -> Value {
        *self.entry_params.last().expect("no function open")
    }

    /// Install `ptr` in the pipeline's argument vector and load it from the
    /// vector in the emitted code.
    pub fn pipeline_arg<T>(&mut self, ptr: *mut T) -> Value {
        let idx = self.query.current_pipeline().add_arg(ptr.cast());
        let args = self.args_param();
        self.load_mem(self.ptr_ty, args, (idx as i32) * self.ptr_ty.bytes() as i32)
    }

    // -----------------------------------------------------------------------
    // Blocks and branches
    // -----------------------------------------------------------------------

    fn cursor(&mut self) -> FuncCursor<'_> {
        let block = self.cur_block.expect("no block open");
        FuncCursor::new(self.func.as_mut().expect("no function open")).at_bottom(block)
    }

    pub fn new_block(&mut self) -> Block {
        let func = self.func.as_mut().expect("no function open");
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        block
    }

    pub fn append_block_param(&mut self, block: Block, ty: ir::Type) -> Value {
        self.func
            .as_mut()
            .expect("no function open")
            .dfg
            .append_block_param(block, ty)
    }

    pub fn cur_block(&self) -> Block {
        self.cur_block.expect("no block open")
    }

    pub fn switch_to(&mut self, block: Block) {
        self.cur_block = Some(block);
    }

    pub fn jump(&mut self, to: Block, args: &[Value]) {
        let mut cursor = self.cursor();
        cursor.ins().jump(to, args);
    }

    pub fn brif(
        &mut self,
        cond: Value,
        then_block: Block,
        then_args: &[Value],
        else_block: Block,
        else_args: &[Value],
    ) {
        let mut cursor = self.cursor();
        cursor
            .ins()
            .brif(cond, then_block, then_args, else_block, else_args);
    }

    fn ret(&mut self) {
        let mut cursor = self.cursor();
        cursor.ins().return_(&[]);
        self.cur_block = None;
    }

    // -----------------------------------------------------------------------
    // Value emission
    // -----------------------------------------------------------------------

    pub fn iconst(&mut self, ty: ir::Type, value: i64) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().iconst(ty, value)
    }

    pub fn i64const(&mut self, value: i64) -> Value {
        self.iconst(types::I64, value)
    }

    pub fn f64const(&mut self, value: f64) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().f64const(value)
    }

    pub fn ptr_const(&mut self, ptr: *const u8) -> Value {
        self.iconst(self.ptr_ty, ptr as i64)
    }

    pub fn value_type(&self, value: Value) -> ir::Type {
        self.func
            .as_ref()
            .expect("no function open")
            .dfg
            .value_type(value)
    }

    pub fn load_mem(&mut self, ty: ir::Type, addr: Value, offset: i32) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().load(ty, MemFlags::trusted(), addr, offset)
    }

    pub fn store_mem(&mut self, value: Value, addr: Value, offset: i32) {
        let mut cursor = self.cursor();
        cursor.ins().store(MemFlags::trusted(), value, addr, offset);
    }

    /// Address of a fresh stack slot; slots live in the function frame, so
    /// the address dominates every block.
    pub fn stack_slot(&mut self, size: u32) -> Value {
        let ptr_ty = self.ptr_ty;
        let slot = self
            .func
            .as_mut()
            .expect("no function open")
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, size, 3));
        let mut cursor = self.cursor();
        cursor.ins().stack_addr(ptr_ty, slot, 0)
    }

    /// Spill `value` to a stack slot and return its address.
    pub fn stack_store(&mut self, value: Value) -> Value {
        let size = self.value_type(value).bytes().max(8);
        let slot = self.stack_slot(size);
        self.store_mem(value, slot, 0);
        slot
    }

    pub fn icmp(&mut self, cc: IntCC, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().icmp(cc, lhs, rhs)
    }

    pub fn icmp_imm(&mut self, cc: IntCC, lhs: Value, rhs: i64) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().icmp_imm(cc, lhs, rhs)
    }

    pub fn fcmp(&mut self, cc: FloatCC, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().fcmp(cc, lhs, rhs)
    }

    pub fn select(&mut self, cond: Value, then_val: Value, else_val: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().select(cond, then_val, else_val)
    }

    pub fn iadd_imm(&mut self, value: Value, imm: i64) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().iadd_imm(value, imm)
    }

    pub fn imul_imm(&mut self, value: Value, imm: i64) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().imul_imm(value, imm)
    }

    pub fn ishl_imm(&mut self, value: Value, imm: i64) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().ishl_imm(value, imm)
    }

    pub fn ushr_imm(&mut self, value: Value, imm: i64) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().ushr_imm(value, imm)
    }

    pub fn sshr_imm(&mut self, value: Value, imm: i64) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().sshr_imm(value, imm)
    }

    pub fn bxor_imm(&mut self, value: Value, imm: i64) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().bxor_imm(value, imm)
    }

    pub fn bnot(&mut self, value: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().bnot(value)
    }

    pub fn sextend(&mut self, ty: ir::Type, value: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().sextend(ty, value)
    }

    pub fn uextend(&mut self, ty: ir::Type, value: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().uextend(ty, value)
    }

    pub fn ireduce(&mut self, ty: ir::Type, value: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().ireduce(ty, value)
    }

    pub fn fcvt_from_sint(&mut self, ty: ir::Type, value: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().fcvt_from_sint(ty, value)
    }

    pub fn fcvt_to_sint(&mut self, ty: ir::Type, value: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().fcvt_to_sint(ty, value)
    }

    pub fn iadd(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().iadd(lhs, rhs)
    }

    pub fn isub(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().isub(lhs, rhs)
    }

    pub fn imul(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().imul(lhs, rhs)
    }

    pub fn sdiv(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().sdiv(lhs, rhs)
    }

    pub fn udiv(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().udiv(lhs, rhs)
    }

    pub fn band(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().band(lhs, rhs)
    }

    pub fn bor(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().bor(lhs, rhs)
    }

    pub fn bxor(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().bxor(lhs, rhs)
    }

    pub fn fadd(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().fadd(lhs, rhs)
    }

    pub fn fsub(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().fsub(lhs, rhs)
    }

    pub fn fmul(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().fmul(lhs, rhs)
    }

    pub fn fdiv(&mut self, lhs: Value, rhs: Value) -> Value {
        let mut cursor = self.cursor();
        cursor.ins().fdiv(lhs, rhs)
    }

    // -----------------------------------------------------------------------
    // Runtime calls
    // -----------------------------------------------------------------------

    /// Emit a call to a runtime helper, deriving the import signature from
    /// the argument values. Unknown names are a compile-time reject.
    pub fn call_rt(
        &mut self,
        name: &'static str,
        args: &[Value],
        ret: Option<ir::Type>,
    ) -> Result<Option<Value>, EngineError> {
        let addr = runtime_symbol(name).ok_or(EngineError::UnknownSymbol(name))?;
        self.symbols.register(name, addr);

        let func_id = match self.helper_ids.get(name).copied() {
            Some(id) => id,
            None => {
                let param_types: Vec<ir::Type> =
                    args.iter().map(|&arg| self.value_type(arg)).collect();
                let sig = self.signature(&param_types, ret);
                let id = self.module.declare_function(name, Linkage::Import, &sig)?;
                self.helper_ids.insert(name, id);
                id
            }
        };
        let inst = {
            let func_ref = self.func_ref(func_id);
            let mut cursor = self.cursor();
            cursor.ins().call(func_ref, args)
        };
        Ok(self
            .func
            .as_ref()
            .unwrap()
            .dfg
            .inst_results(inst)
            .first()
            .copied())
    }

    /// Runtime call with exactly one result.
    pub fn call_rt1(
        &mut self,
        name: &'static str,
        args: &[Value],
        ret: ir::Type,
    ) -> Result<Value, EngineError> {
        Ok(self
            .call_rt(name, args, Some(ret))?
            .expect("helper declared with a result"))
    }

    /// Runtime call with no result.
    pub fn call_rt0(&mut self, name: &'static str, args: &[Value]) -> Result<(), EngineError> {
        self.call_rt(name, args, None)?;
        Ok(())
    }

    fn func_ref(&mut self, func_id: FuncId) -> ir::FuncRef {
        if let Some(&func_ref) = self.func_refs.get(&func_id) {
            return func_ref;
        }
        let func_ref = self
            .module
            .declare_func_in_func(func_id, self.func.as_mut().expect("no function open"));
        self.func_refs.insert(func_id, func_ref);
        func_ref
    }

    /// Address of an already-defined internal function (sort comparator).
    pub fn func_addr(&mut self, func_id: FuncId) -> Value {
        let func_ref = self.func_ref(func_id);
        let ptr_ty = self.ptr_ty;
        let mut cursor = self.cursor();
        cursor.ins().func_addr(ptr_ty, func_ref)
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    /// Open a `[start, end)` range loop; returns the induction value. The
    /// cursor ends in the body block.
    pub fn begin_index_iter(&mut self, start: Value, end: Value) -> Value {
        let header = self.new_block();
        let body = self.new_block();
        let exit = self.new_block();
        let induction = self.append_block_param(header, types::I64);

        self.jump(header, &[start]);
        self.switch_to(header);
        let more = self.icmp(IntCC::UnsignedLessThan, induction, end);
        self.brif(more, body, &[], exit, &[]);
        self.switch_to(body);
        self.scope.loops.push(LoopFrame {
            header,
            exit,
            induction,
        });
        induction
    }

    /// Close the innermost range loop, stepping by `stride`.
    pub fn end_index_iter(&mut self, stride: i64) {
        let frame = self.scope.loops.pop().expect("no loop open");
        let next = self.iadd_imm(frame.induction, stride);
        self.jump(frame.header, &[next]);
        self.switch_to(frame.exit);
    }

    /// Open a chain-walk loop over a (possibly tagged) entry pointer;
    /// terminates when the pointer word is null. Returns the raw induction
    /// word; tagged callers strip it themselves.
    pub fn begin_forward_iter(&mut self, head: Value) -> Value {
        let header = self.new_block();
        let body = self.new_block();
        let exit = self.new_block();
        let induction = self.append_block_param(header, self.ptr_ty);

        self.jump(header, &[head]);
        self.switch_to(header);
        let live = self.icmp_imm(IntCC::NotEqual, induction, 0);
        self.brif(live, body, &[], exit, &[]);
        self.switch_to(body);
        self.scope.loops.push(LoopFrame {
            header,
            exit,
            induction,
        });
        induction
    }

    /// Close the innermost chain walk: follow the entry's next word, with
    /// an optional tag strip first.
    pub fn end_forward_iter(&mut self, strip_tag: bool) {
        let frame = self.scope.loops.pop().expect("no loop open");
        let entry = if strip_tag {
            self.strip_tag(frame.induction)
        } else {
            frame.induction
        };
        let next = self.load_mem(self.ptr_ty, entry, 0);
        self.jump(frame.header, &[next]);
        self.switch_to(frame.exit);
    }

    /// Exit block of the innermost loop, for early loop exits.
    pub fn current_loop_exit(&self) -> Block {
        self.scope.loops.last().expect("no loop open").exit
    }

    /// Open a nested loop over every element of a tuple buffer: outer loop
    /// over regions, inner loop over `elem_size` strides. Returns the
    /// element address.
    pub fn begin_tuple_buffer_iter(&mut self, buffer: Value) -> Result<Value, EngineError> {
        let regions = self.call_rt1("tb_buffers", &[buffer], self.ptr_ty)?;
        let count = self.call_rt1("tb_buffer_count", &[buffer], types::I64)?;

        let zero = self.i64const(0);
        let region_idx = self.begin_index_iter(zero, count);
        let offset = self.imul_imm(region_idx, crate::runtime::Buffer::STRIDE);
        let region = self.iadd(regions, offset);
        let used = self.load_mem(types::I64, region, crate::runtime::Buffer::POS_OFFSET);
        let mem = self.load_mem(self.ptr_ty, region, crate::runtime::Buffer::MEM_OFFSET);

        let zero = self.i64const(0);
        let elem_offset = self.begin_index_iter(zero, used);
        Ok(self.iadd(mem, elem_offset))
    }

    /// Close the nested tuple-buffer loop.
    pub fn end_tuple_buffer_iter(&mut self, elem_size: i64) {
        self.end_index_iter(elem_size);
        self.end_index_iter(1);
    }

    // -----------------------------------------------------------------------
    // Tagged pointers
    // -----------------------------------------------------------------------

    /// Recover the canonical pointer from a tagged word by sign-extending
    /// bit 47. Identity on targets without pointer tagging.
    pub fn strip_tag(&mut self, word: Value) -> Value {
        if !POINTER_TAGGING {
            return word;
        }
        let shifted = self.ishl_imm(word, TAG_BITS);
        self.sshr_imm(shifted, TAG_BITS)
    }

    /// `1` when the head tag proves `hash` is absent from the chain.
    pub fn tag_mismatch(&mut self, word: Value, hash: Value) -> Value {
        if !POINTER_TAGGING {
            return self.iconst(types::I8, 0);
        }
        let stored = self.ushr_imm(word, i64::from(hash_table::TAG_SHIFT));
        let query = self.ushr_imm(hash, i64::from(hash_table::TAG_SHIFT));
        let masked = self.band(stored, query);
        self.icmp(IntCC::NotEqual, query, masked)
    }

    // -----------------------------------------------------------------------
    // Tuples
    // -----------------------------------------------------------------------

    /// Payload address of a hash-table entry.
    pub fn entry_payload(&mut self, entry: Value) -> Value {
        self.iadd_imm(entry, i64::from(ENTRY_HEADER_SIZE))
    }

    /// Store `hash` into the entry's header word.
    pub fn store_entry_hash(&mut self, entry: Value, hash: Value) {
        self.store_mem(hash, entry, 0);
    }

    /// Copy the scope's current value of every IU into the packed tuple.
    pub fn pack_tuple(&mut self, layout: &TupleLayout, tuple: Value, ius: &[Iu]) {
        for iu in ius {
            let value = self
                .scope
                .value(iu)
                .unwrap_or_else(|| panic!("{iu:?} not in scope"));
            iu.ty().store(self, value, tuple, layout.offset(iu) as i32);
        }
    }

    /// Load every IU from the packed tuple into the scope (value and
    /// address).
    pub fn unpack_tuple(&mut self, layout: &TupleLayout, tuple: Value, ius: &[Iu]) {
        for iu in ius {
            let addr = self.iadd_imm(tuple, i64::from(layout.offset(iu)));
            let value = iu.ty().load(self, addr);
            self.scope.set_pointer(iu, addr);
            self.scope.set_value(iu, value);
        }
    }

    /// Load every IU from the packed tuple without touching the scope.
    pub fn unpack_values(
        &mut self,
        layout: &TupleLayout,
        tuple: Value,
        ius: &[Iu],
    ) -> Vec<Value> {
        ius.iter()
            .map(|iu| {
                let addr = self.iadd_imm(tuple, i64::from(layout.offset(iu)));
                iu.ty().load(self, addr)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Key comparison
    // -----------------------------------------------------------------------

    /// Emit a short-circuit equality chain over key pairs. Execution
    /// continues in a fresh block when all keys match; any mismatch jumps
    /// to the returned block.
    pub fn cmp_keys(
        &mut self,
        left: &[Value],
        right: &[Value],
        ius: &[Iu],
    ) -> Result<Block, EngineError> {
        let mismatch = self.new_block();
        for ((&l, &r), iu) in left.iter().zip(right).zip(ius) {
            let equal = iu.ty().binop(self, crate::types::BinOp::Eq, l, r)?;
            let next = self.new_block();
            self.brif(equal, next, &[], mismatch, &[]);
            self.switch_to(next);
        }
        Ok(mismatch)
    }

    // -----------------------------------------------------------------------
    // Columns and constants
    // -----------------------------------------------------------------------

    /// Bind row `index` of a column into the scope. For fixed-width
    /// columns `base` is the column's data pointer; for strings it is the
    /// column descriptor, and the value materializes through the
    /// slotted-page helper.
    pub fn column_access(
        &mut self,
        index: Value,
        base: Value,
        iu: &Iu,
    ) -> Result<(), EngineError> {
        match iu.ty() {
            TypeKind::String => {
                let view = self.stack_slot(TypeKind::String.size());
                self.call_rt0("load_from_slotted_page", &[index, base, view])?;
                self.scope.set_pointer(iu, view);
                self.scope.set_value(iu, view);
            }
            ty => {
                let offset = self.imul_imm(index, i64::from(ty.size()));
                let addr = self.iadd(base, offset);
                let value = ty.load(self, addr);
                self.scope.set_pointer(iu, addr);
                self.scope.set_value(iu, value);
            }
        }
        Ok(())
    }

    /// Intern constant bytes and emit their address.
    pub fn bytes_const(&mut self, bytes: &[u8]) -> Value {
        let ptr = self.query.intern_bytes(bytes);
        self.ptr_const(ptr)
    }

    /// Materialize a constant string view on the stack.
    pub fn string_view_const(&mut self, bytes: &[u8]) -> Value {
        let data = self.bytes_const(bytes);
        let len = self.i64const(bytes.len() as i64);
        let view = self.stack_slot(TypeKind::String.size());
        self.store_mem(data, view, 0);
        self.store_mem(len, view, 8);
        view
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Print the scope's current values of `ius` followed by a newline.
    pub fn emit_prints(&mut self, ius: &[Iu]) -> Result<(), EngineError> {
        for iu in ius {
            let value = self.scope.value(iu).expect("print of IU not in scope");
            let helper = match iu.ty() {
                TypeKind::Int32 => "print_int32",
                TypeKind::Int64 => "print_int64",
                TypeKind::Double => "print_double",
                TypeKind::Char => "print_char",
                TypeKind::Bool => "print_bool",
                TypeKind::Date => "print_date",
                TypeKind::String => "print_string",
            };
            self.call_rt0(helper, &[value])?;
        }
        self.call_rt0("print_newline", &[])
    }
}
