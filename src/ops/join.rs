//! Hash inner join.
//!
//! Four pipeline fragments:
//! 1. build (from the left child's pipeline): hash keys, materialize the
//!    packed tuple into the worker's buffer, feed the sketch;
//! 2. sizing: merge worker sketches, allocate the shared table;
//! 3. insertion continuation (one call per worker): move each claimed
//!    worker's tuples into the shared table with the lock-free tagged
//!    insert;
//! 4. probe (emitted into the right child's pipeline): hash, walk the
//!    tagged chain, compare keys, apply the residual condition, push.

use std::cell::Cell;
use std::ptr::addr_of_mut;

use cranelift_codegen::ir::{types, Value};

use crate::codegen::hash::hash_keys;
use crate::codegen::CodeGen;
use crate::error::EngineError;
use crate::expr::Exp;
use crate::iu::{Iu, IuSet};
use crate::runtime::hash_table::entry_alloc_size;
use crate::runtime::JoinContext;
use crate::tuple::TupleLayout;

use super::{Consumer, Operator};

/// Equi-join with an optional residual condition over both sides.
pub struct InnerJoin {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    left_keys: Vec<Iu>,
    right_keys: Vec<Iu>,
    condition: Option<Exp>,
}

impl InnerJoin {
    pub fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        left_keys: Vec<Iu>,
        right_keys: Vec<Iu>,
        condition: Option<Exp>,
    ) -> InnerJoin {
        assert_eq!(left_keys.len(), right_keys.len());
        InnerJoin {
            left,
            right,
            left_keys,
            right_keys,
            condition,
        }
    }
}

impl Operator for InnerJoin {
    fn produce(
        &mut self,
        required: &IuSet,
        cg: &mut CodeGen,
        consumer: Consumer<'_>,
        init: Consumer<'_>,
    ) -> Result<(), EngineError> {
        let InnerJoin {
            left,
            right,
            left_keys,
            right_keys,
            condition,
        } = self;

        let left_avail = left.available_ius();
        let right_avail = right.available_ius();
        let cond_ius = condition.as_ref().map(Exp::ius).unwrap_or_default();

        let left_key_set = IuSet::from_slice(left_keys);
        let right_key_set = IuSet::from_slice(right_keys);
        let left_required =
            &(&(required & &left_avail) | &left_key_set) | &(&left_avail & &cond_ius);
        let right_required =
            &(&(required & &right_avail) | &right_key_set) | &(&right_avail & &cond_ius);
        let left_payload = &left_required - &left_key_set;

        let layout = TupleLayout::pack(&left_required);
        let entry_size = i64::from(entry_alloc_size(layout.size()));
        let threads = cg.threads();

        let context: Cell<*mut JoinContext> = Cell::new(std::ptr::null_mut());
        let local_ctx: Cell<Option<Value>> = Cell::new(None);

        // -- 1. build pipeline ------------------------------------------------
        {
            let layout = &layout;
            let left_required = &left_required;
            let mut build = |cg: &mut CodeGen| -> Result<(), EngineError> {
                let hash = hash_keys(cg, left_keys)?;
                let size = cg.i64const(entry_size);
                let ltls = local_ctx.get().expect("join init not run");
                let entry =
                    cg.call_rt1("insert_join_entry", &[ltls, hash, size], types::I64)?;
                cg.store_entry_hash(entry, hash);
                let tuple = cg.entry_payload(entry);
                cg.pack_tuple(layout, tuple, left_required.as_slice());
                Ok(())
            };
            let mut build_init = |cg: &mut CodeGen| -> Result<(), EngineError> {
                let ctx = cg.add_context(JoinContext::new(threads));
                context.set(ctx);
                let tls = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).tls) });
                let ltls = cg.call_rt1("local_join_context", &[tls], types::I64)?;
                local_ctx.set(Some(ltls));
                Ok(())
            };
            left.produce(&left_required, cg, &mut build, &mut build_init)?;
        }
        cg.finish_pipeline()?;
        let ctx = context.get();

        // -- 2. sizing pipeline -----------------------------------------------
        cg.create_pipeline()?;
        let table = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).table) });
        let tls = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).tls) });
        let estimate = cg.call_rt1("join_sketch_estimate", &[tls], types::I64)?;
        cg.call_rt0("hashtable_alloc", &[table, estimate])?;
        cg.finish_pipeline()?;

        // -- 3. insertion continuation ----------------------------------------
        cg.create_continuation_pipeline()?;
        let table = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).table) });
        let tls = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).tls) });
        let claim = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).claim) });
        let mine = cg.call_rt1("claim_join_context", &[tls, claim], types::I64)?;
        let size = cg.i64const(entry_size);
        cg.call_rt0("insert_join_multithreaded", &[mine, table, size])?;
        cg.finish_pipeline()?;

        // -- 4. probe fragment ------------------------------------------------
        let probe_table: Cell<Option<Value>> = Cell::new(None);
        {
            let layout = &layout;
            let left_payload = &left_payload;
            let mut probe_init = |cg: &mut CodeGen| -> Result<(), EngineError> {
                init(cg)?;
                probe_table.set(Some(cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).table) })));
                Ok(())
            };
            let mut probe = |cg: &mut CodeGen| -> Result<(), EngineError> {
                let hash = hash_keys(cg, right_keys)?;
                let table = probe_table.get().expect("probe init not run");
                let bucket = cg.call_rt1("hashtable_lookup", &[table, hash], types::I64)?;

                let tagged = cg.begin_forward_iter(bucket);
                let chain_exit = cg.current_loop_exit();

                // an incompatible tag proves the key is absent from the
                // rest of the chain
                let bad_tag = cg.tag_mismatch(tagged, hash);
                let live = cg.new_block();
                cg.brif(bad_tag, chain_exit, &[], live, &[]);
                cg.switch_to(live);

                let entry = cg.strip_tag(tagged);
                let tuple = cg.entry_payload(entry);
                cg.unpack_tuple(layout, tuple, left_keys);
                let left_vals: Vec<Value> = left_keys
                    .iter()
                    .map(|iu| cg.scope.value(iu).expect("left key unpacked"))
                    .collect();
                let right_vals: Vec<Value> = right_keys
                    .iter()
                    .map(|iu| cg.scope.value(iu).expect("right key in scope"))
                    .collect();
                let mismatch = cg.cmp_keys(&left_vals, &right_vals, left_keys)?;

                cg.unpack_tuple(layout, tuple, left_payload.as_slice());
                if let Some(cond) = condition.as_mut() {
                    let keep = cond.compile(cg)?;
                    let body = cg.new_block();
                    let cont = cg.new_block();
                    cg.brif(keep, body, &[], cont, &[]);
                    cg.switch_to(body);
                    consumer(cg)?;
                    cg.jump(cont, &[]);
                    cg.switch_to(cont);
                } else {
                    consumer(cg)?;
                }

                cg.jump(mismatch, &[]);
                cg.switch_to(mismatch);
                cg.end_forward_iter(true);
                Ok(())
            };
            right.produce(&right_required, cg, &mut probe, &mut probe_init)?;
        }
        Ok(())
    }

    fn available_ius(&self) -> IuSet {
        &self.left.available_ius() | &self.right.available_ius()
    }
}
