//! Sort.
//!
//! The comparator is compiled first as an internal function over two
//! packed tuples, first non-zero key comparison wins. The producer
//! pipeline materializes every parent tuple into the worker's buffer; the
//! continuation (a default pipeline, single-threaded) concatenates all
//! worker buffers into one contiguous region, hands it to `qsort` together
//! with the compiled comparator, and replays the sorted tuples downstream.

use std::cell::Cell;
use std::ptr::addr_of_mut;

use cranelift_codegen::ir::{types, Value};
use cranelift_module::FuncId;

use crate::codegen::CodeGen;
use crate::error::EngineError;
use crate::iu::{Iu, IuSet};
use crate::runtime::SortContext;
use crate::tuple::TupleLayout;
use crate::types::BinOp;

use super::{Consumer, Operator};

/// Sort on a key list with per-key direction; `descending[i]` flips key
/// `i`.
pub struct Sort {
    child: Box<dyn Operator>,
    keys: Vec<Iu>,
    descending: Vec<bool>,
}

impl Sort {
    pub fn new(child: Box<dyn Operator>, keys: Vec<Iu>, descending: Vec<bool>) -> Sort {
        assert_eq!(keys.len(), descending.len());
        assert!(!keys.is_empty());
        Sort {
            child,
            keys,
            descending,
        }
    }

    /// Compile the `(left_tuple, right_tuple) -> ordering` comparator.
    fn build_comparator(
        &self,
        cg: &mut CodeGen,
        layout: &TupleLayout,
    ) -> Result<FuncId, EngineError> {
        let ptr_ty = cg.ptr_ty();
        let func_id = cg.open_internal_function(&[ptr_ty, ptr_ty], types::I32)?;
        let left_tuple = cg.func_param(0);
        let right_tuple = cg.func_param(1);

        let merge = cg.new_block();
        let result = cg.append_block_param(merge, types::I32);

        let last = self.keys.len() - 1;
        for (i, (key, &descending)) in self.keys.iter().zip(&self.descending).enumerate() {
            let offset = i64::from(layout.offset(key));
            let left_addr = cg.iadd_imm(left_tuple, offset);
            let right_addr = cg.iadd_imm(right_tuple, offset);
            let left = key.ty().load(cg, left_addr);
            let right = key.ty().load(cg, right_addr);

            let greater = key.ty().binop(cg, BinOp::Gt, left, right)?;
            let less = key.ty().binop(cg, BinOp::Lt, left, right)?;
            let greater = cg.uextend(types::I32, greater);
            let less = cg.uextend(types::I32, less);
            let ordering = if descending {
                cg.isub(less, greater)
            } else {
                cg.isub(greater, less)
            };

            if i == last {
                cg.jump(merge, &[ordering]);
            } else {
                let next = cg.new_block();
                cg.brif(ordering, merge, &[ordering], next, &[]);
                cg.switch_to(next);
            }
        }
        cg.switch_to(merge);
        cg.finish_internal_function(&[result])?;
        Ok(func_id)
    }
}

impl Operator for Sort {
    fn produce(
        &mut self,
        required: &IuSet,
        cg: &mut CodeGen,
        consumer: Consumer<'_>,
        init: Consumer<'_>,
    ) -> Result<(), EngineError> {
        let materialized = required | &IuSet::from_slice(&self.keys);
        let layout = TupleLayout::pack(&materialized);
        let tuple_size = i64::from(layout.size());
        let comparator = self.build_comparator(cg, &layout)?;
        let threads = cg.threads();

        let context: Cell<*mut SortContext> = Cell::new(std::ptr::null_mut());
        let local_ctx: Cell<Option<Value>> = Cell::new(None);

        // -- producer: materialize into per-worker buffers --------------------
        {
            let layout = &layout;
            let materialized = &materialized;
            let mut materialize = |cg: &mut CodeGen| -> Result<(), EngineError> {
                let ltls = local_ctx.get().expect("sort init not run");
                let size = cg.i64const(tuple_size);
                let tuple = cg.call_rt1("insert_sort_entry", &[ltls, size], types::I64)?;
                cg.pack_tuple(layout, tuple, materialized.as_slice());
                Ok(())
            };
            let mut materialize_init = |cg: &mut CodeGen| -> Result<(), EngineError> {
                let ctx = cg.add_context(SortContext::new(threads));
                context.set(ctx);
                let tls = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).tls) });
                let ltls = cg.call_rt1("local_sort_context", &[tls], types::I64)?;
                local_ctx.set(Some(ltls));
                Ok(())
            };
            self.child
                .produce(&materialized, cg, &mut materialize, &mut materialize_init)?;
        }
        cg.finish_pipeline()?;
        let ctx = context.get();

        // -- continuation: gather, sort, replay -------------------------------
        cg.create_pipeline()?;
        init(cg)?;
        let tls = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).tls) });
        let buffer = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).buffer) });

        let size = cg.i64const(tuple_size);
        let total = cg.call_rt1("sort_combined_size", &[tls, size], types::I64)?;
        cg.call_rt0("sort_buffer_alloc", &[buffer, total])?;
        cg.call_rt0("sort_buffer_fill", &[tls, buffer, size])?;
        let cmp = cg.func_addr(comparator);
        cg.call_rt0("sort_buffer_sort", &[buffer, size, cmp])?;
        let base = cg.call_rt1("sort_buffer_data", &[buffer], types::I64)?;

        let zero = cg.i64const(0);
        let offset = cg.begin_index_iter(zero, total);
        let tuple = cg.iadd(base, offset);
        cg.unpack_tuple(&layout, tuple, materialized.as_slice());
        consumer(cg)?;
        cg.end_index_iter(tuple_size);
        Ok(())
    }

    fn available_ius(&self) -> IuSet {
        &self.child.available_ius() | &IuSet::from_slice(&self.keys)
    }
}
