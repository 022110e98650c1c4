//! Grouped aggregation.
//!
//! Two phases. The per-thread phase runs inside the child's pipeline: each
//! worker groups into its private chained table, materializing one entry
//! per group in its tuple buffer and feeding its sketch. The reduce phase
//! is a fresh pipeline: it sizes the global table from the merged
//! sketches, folds every worker's entries into it (pairwise reduce on key
//! collisions, pointer publication otherwise), then iterates the published
//! groups and pushes them downstream.

use std::cell::Cell;
use std::ptr::addr_of_mut;

use cranelift_codegen::ir::{types, Value};

use crate::codegen::hash::hash_keys;
use crate::codegen::CodeGen;
use crate::error::EngineError;
use crate::iu::{Iu, IuSet};
use crate::runtime::hash_table::entry_alloc_size;
use crate::runtime::AggregationContext;
use crate::tuple::TupleLayout;
use crate::types::{BinOp, TypeKind};

use super::{Consumer, Operator};

/// The aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    /// Any value of the group; used to carry functionally dependent
    /// columns through a grouping.
    Any,
}

/// One aggregate: kind, optional input column, result column.
pub struct Aggregate {
    kind: AggregateKind,
    input: Option<Iu>,
    result: Iu,
}

impl Aggregate {
    pub fn count(name: &str) -> Aggregate {
        Aggregate {
            kind: AggregateKind::Count,
            input: None,
            result: Iu::new(name, TypeKind::Int64),
        }
    }

    pub fn sum(name: &str, input: &Iu) -> Aggregate {
        Aggregate::with_input(AggregateKind::Sum, name, input)
    }

    pub fn min(name: &str, input: &Iu) -> Aggregate {
        Aggregate::with_input(AggregateKind::Min, name, input)
    }

    pub fn max(name: &str, input: &Iu) -> Aggregate {
        Aggregate::with_input(AggregateKind::Max, name, input)
    }

    pub fn any(name: &str, input: &Iu) -> Aggregate {
        Aggregate::with_input(AggregateKind::Any, name, input)
    }

    fn with_input(kind: AggregateKind, name: &str, input: &Iu) -> Aggregate {
        Aggregate {
            kind,
            input: Some(input.clone()),
            result: Iu::new(name, input.ty()),
        }
    }

    pub fn result(&self) -> Iu {
        self.result.clone()
    }

    /// Seed the result value from the first tuple of a group.
    fn init(&self, cg: &mut CodeGen) {
        let seed = match self.kind {
            AggregateKind::Count => cg.iconst(types::I64, 1),
            _ => {
                let input = self.input.as_ref().expect("aggregate without input");
                cg.scope.value(input).expect("aggregate input in scope")
            }
        };
        cg.scope.set_value(&self.result, seed);
    }

    /// Fold the current input tuple into the unpacked group entry.
    fn update(&self, cg: &mut CodeGen) -> Result<(), EngineError> {
        if self.kind == AggregateKind::Any {
            return Ok(());
        }
        let ty = self.result.ty();
        let current = cg.scope.value(&self.result).expect("result unpacked");
        let target = cg.scope.pointer(&self.result).expect("result address");
        let folded = match self.kind {
            AggregateKind::Count => {
                let one = cg.iconst(types::I64, 1);
                ty.binop(cg, BinOp::Add, current, one)?
            }
            AggregateKind::Sum => {
                let input = self.input.as_ref().unwrap();
                let mut value = cg.scope.value(input).expect("input in scope");
                if input.ty() != ty {
                    value = input.ty().cast(cg, value, ty);
                }
                ty.binop(cg, BinOp::Add, current, value)?
            }
            AggregateKind::Min | AggregateKind::Max => {
                let input = self.input.as_ref().unwrap();
                let value = cg.scope.value(input).expect("input in scope");
                let keep = self.extremum(cg, current, value)?;
                cg.select(keep, current, value)
            }
            AggregateKind::Any => unreachable!(),
        };
        cg.scope.set_value(&self.result, folded);
        ty.store(cg, folded, target, 0);
        Ok(())
    }

    /// Combine another worker's partial result into the unpacked entry.
    fn reduce(&self, cg: &mut CodeGen, other: Value) -> Result<(), EngineError> {
        if self.kind == AggregateKind::Any {
            return Ok(());
        }
        let ty = self.result.ty();
        let current = cg.scope.value(&self.result).expect("result unpacked");
        let target = cg.scope.pointer(&self.result).expect("result address");
        let folded = match self.kind {
            AggregateKind::Count | AggregateKind::Sum => {
                ty.binop(cg, BinOp::Add, current, other)?
            }
            AggregateKind::Min | AggregateKind::Max => {
                let keep = self.extremum(cg, current, other)?;
                cg.select(keep, current, other)
            }
            AggregateKind::Any => unreachable!(),
        };
        cg.scope.set_value(&self.result, folded);
        ty.store(cg, folded, target, 0);
        Ok(())
    }

    fn extremum(
        &self,
        cg: &mut CodeGen,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, EngineError> {
        let op = if self.kind == AggregateKind::Min {
            BinOp::Lt
        } else {
            BinOp::Gt
        };
        self.result.ty().binop(cg, op, lhs, rhs)
    }
}

/// Hash aggregation over a group-by key set.
pub struct Aggregation {
    child: Box<dyn Operator>,
    group_by: IuSet,
    aggs: Vec<Aggregate>,
}

impl Aggregation {
    pub fn new(child: Box<dyn Operator>, group_by: IuSet) -> Aggregation {
        Aggregation {
            child,
            group_by,
            aggs: Vec::new(),
        }
    }

    pub fn add_aggregate(&mut self, agg: Aggregate) -> Iu {
        let result = agg.result();
        self.aggs.push(agg);
        result
    }

    /// Result or group-by column by name.
    pub fn iu(&self, name: &str) -> Option<Iu> {
        self.aggs
            .iter()
            .map(Aggregate::result)
            .find(|iu| iu.name() == name)
            .or_else(|| self.group_by.iter().find(|iu| iu.name() == name).cloned())
    }
}

impl Operator for Aggregation {
    fn produce(
        &mut self,
        required: &IuSet,
        cg: &mut CodeGen,
        consumer: Consumer<'_>,
        init: Consumer<'_>,
    ) -> Result<(), EngineError> {
        let Aggregation {
            child,
            group_by,
            aggs,
        } = self;

        // declaration order maps aggregate slots across pipelines
        let agg_results: Vec<Iu> = aggs.iter().map(Aggregate::result).collect();
        let result_set = &*group_by | &IuSet::from_slice(&agg_results);
        let layout = TupleLayout::pack(&result_set);
        let entry_size = i64::from(entry_alloc_size(layout.size()));
        let pointer_slot = std::mem::size_of::<*const u8>() as i64;

        let mut input_set = IuSet::new();
        for agg in aggs.iter() {
            if let Some(input) = &agg.input {
                input_set.add(input.clone());
            }
        }
        let produce_set = &*group_by | &input_set;
        let threads = cg.threads();

        let context: Cell<*mut AggregationContext> = Cell::new(std::ptr::null_mut());
        let local_ctx: Cell<Option<Value>> = Cell::new(None);
        let local_buffer: Cell<Option<Value>> = Cell::new(None);
        let local_table: Cell<Option<Value>> = Cell::new(None);

        // -- per-thread phase -------------------------------------------------
        {
            let layout = &layout;
            let group_by = &*group_by;
            let aggs = &*aggs;
            let agg_results = &agg_results;
            let result_set = &result_set;
            let mut local = |cg: &mut CodeGen| -> Result<(), EngineError> {
                let group_vals: Vec<Value> = group_by
                    .iter()
                    .map(|iu| cg.scope.value(iu).expect("group key in scope"))
                    .collect();
                let hash = hash_keys(cg, group_by.as_slice())?;
                let table = local_table.get().expect("aggregation init not run");
                let bucket = cg.call_rt1("hashtable_lookup", &[table, hash], types::I64)?;

                let entry = cg.begin_forward_iter(bucket);
                let tuple = cg.entry_payload(entry);
                let entry_keys = cg.unpack_values(layout, tuple, group_by.as_slice());
                let mismatch = cg.cmp_keys(&entry_keys, &group_vals, group_by.as_slice())?;

                // matched: fold the input tuple into the live entry
                cg.unpack_tuple(layout, tuple, agg_results);
                for agg in aggs {
                    agg.update(cg)?;
                }
                let done = cg.new_block();
                cg.jump(done, &[]);

                cg.switch_to(mismatch);
                cg.end_forward_iter(false);

                // chain exhausted: open a fresh group
                let buffer = local_buffer.get().expect("aggregation init not run");
                let size = cg.i64const(entry_size);
                let entry = cg.call_rt1("tb_insert", &[buffer, size], types::I64)?;
                let tuple = cg.entry_payload(entry);
                for agg in aggs {
                    agg.init(cg);
                }
                cg.pack_tuple(layout, tuple, result_set.as_slice());
                let ltls = local_ctx.get().expect("aggregation init not run");
                cg.call_rt0("insert_agg_entry", &[ltls, hash, entry, size])?;
                cg.jump(done, &[]);
                cg.switch_to(done);
                Ok(())
            };
            let mut local_init = |cg: &mut CodeGen| -> Result<(), EngineError> {
                let ctx = cg.add_context(AggregationContext::new(threads));
                context.set(ctx);
                let tls = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).tls) });
                let ltls = cg.call_rt1("local_agg_context", &[tls], types::I64)?;
                local_ctx.set(Some(ltls));
                let buffer = cg.call_rt1("agg_tuple_buffer", &[ltls], types::I64)?;
                local_buffer.set(Some(buffer));
                let table = cg.call_rt1("agg_local_table", &[ltls], types::I64)?;
                local_table.set(Some(table));
                Ok(())
            };
            child.produce(&produce_set, cg, &mut local, &mut local_init)?;
        }
        cg.finish_pipeline()?;
        let ctx = context.get();

        // -- global reduce pipeline -------------------------------------------
        cg.create_pipeline()?;
        init(cg)?;
        let tls = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).tls) });
        let table = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).table) });
        let pointers = cg.pipeline_arg(unsafe { addr_of_mut!((*ctx).pointers) });

        let estimate = cg.call_rt1("agg_sketch_estimate", &[tls], types::I64)?;
        cg.call_rt0("hashtable_alloc", &[table, estimate])?;

        let contexts = cg.call_rt1("agg_context_count", &[tls], types::I64)?;
        let zero = cg.i64const(0);
        let ctx_idx = cg.begin_index_iter(zero, contexts);
        let worker = cg.call_rt1("agg_context_at", &[tls, ctx_idx], types::I64)?;
        let worker_buffer = cg.call_rt1("agg_tuple_buffer", &[worker], types::I64)?;

        let entry = cg.begin_tuple_buffer_iter(worker_buffer)?;
        let tuple = cg.entry_payload(entry);
        cg.unpack_tuple(&layout, tuple, group_by.as_slice());
        let group_vals: Vec<Value> = group_by
            .iter()
            .map(|iu| cg.scope.value(iu).expect("group key unpacked"))
            .collect();
        let hash = hash_keys(cg, group_by.as_slice())?;
        let bucket = cg.call_rt1("hashtable_lookup", &[table, hash], types::I64)?;

        let node = cg.begin_forward_iter(bucket);
        let node_tuple = cg.entry_payload(node);
        let node_keys = cg.unpack_values(&layout, node_tuple, group_by.as_slice());
        let mismatch = cg.cmp_keys(&node_keys, &group_vals, group_by.as_slice())?;

        // same group seen before: pairwise combine into the published entry
        let partials = cg.unpack_values(&layout, tuple, &agg_results);
        cg.unpack_tuple(&layout, node_tuple, &agg_results);
        for (agg, partial) in aggs.iter().zip(partials) {
            agg.reduce(cg, partial)?;
        }
        let done = cg.new_block();
        cg.jump(done, &[]);

        cg.switch_to(mismatch);
        cg.end_forward_iter(false);

        // first sighting: publish this worker's entry
        let slot_size = cg.i64const(pointer_slot);
        let slot = cg.call_rt1("tb_insert", &[pointers, slot_size], types::I64)?;
        cg.store_mem(entry, slot, 0);
        cg.call_rt0("hashtable_insert", &[table, entry, hash])?;
        cg.jump(done, &[]);
        cg.switch_to(done);

        cg.end_tuple_buffer_iter(entry_size);
        cg.end_index_iter(1);

        // -- downstream: iterate the published groups -------------------------
        let slot = cg.begin_tuple_buffer_iter(pointers)?;
        let published = cg.load_mem(types::I64, slot, 0);
        let tuple = cg.entry_payload(published);
        cg.unpack_tuple(&layout, tuple, result_set.as_slice());
        consumer(cg)?;
        cg.end_tuple_buffer_iter(pointer_slot);
        Ok(())
    }

    fn available_ius(&self) -> IuSet {
        let mut available = self.group_by.clone();
        for agg in &self.aggs {
            available.add(agg.result());
        }
        available
    }
}
