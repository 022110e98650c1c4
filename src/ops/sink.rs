//! Query sinks: where the root pipeline delivers its tuples.

use std::cell::Cell;
use std::sync::Arc;

use cranelift_codegen::ir::Value;
use parking_lot::Mutex;

use crate::codegen::CodeGen;
use crate::error::EngineError;
use crate::iu::{Iu, IuSet};
use crate::runtime::strings::StringView;
use crate::tuple::TupleLayout;
use crate::types::TypeKind;

use super::Operator;

/// A sink consumes the root operator's output tuples.
pub trait Sink {
    fn produce(
        &mut self,
        root: &mut dyn Operator,
        outputs: &[Iu],
        names: &[String],
        cg: &mut CodeGen,
    ) -> Result<(), EngineError>;
}

/// Prints every output tuple to stdout, one helper call per field. Field
/// prints may interleave across workers on unsorted plans.
pub struct PrintSink;

impl Sink for PrintSink {
    fn produce(
        &mut self,
        root: &mut dyn Operator,
        outputs: &[Iu],
        names: &[String],
        cg: &mut CodeGen,
    ) -> Result<(), EngineError> {
        tracing::debug!(columns = ?names, "print sink");
        let required = IuSet::from_slice(outputs);
        let outputs = outputs.to_vec();
        root.produce(
            &required,
            cg,
            &mut |cg| cg.emit_prints(&outputs),
            &mut |_| Ok(()),
        )?;
        cg.finish_pipeline()
    }
}

/// One decoded output value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Int32(i32),
    Int64(i64),
    Double(f64),
    Char(u8),
    Bool(bool),
    Date(u32),
    Str(String),
}

impl Datum {
    pub fn as_i64(&self) -> i64 {
        match *self {
            Datum::Int32(v) => i64::from(v),
            Datum::Int64(v) => v,
            Datum::Char(v) => i64::from(v),
            Datum::Bool(v) => i64::from(v),
            Datum::Date(v) => i64::from(v),
            _ => panic!("not an integer datum: {self:?}"),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Datum::Double(v) => v,
            _ => panic!("not a double datum: {self:?}"),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Datum::Str(s) => s,
            _ => panic!("not a string datum: {self:?}"),
        }
    }
}

/// Decode schema and shared row store of a collecting sink.
pub struct CollectContext {
    fields: Vec<(TypeKind, u32)>,
    rows: Arc<Mutex<Vec<Vec<Datum>>>>,
}

/// Decode one packed output tuple and append it to the shared row store.
/// String bytes are copied out immediately; the views point into column
/// maps that outlive the call.
pub extern "C" fn collect_row(ctx: *const CollectContext, tuple: *const u8) {
    let ctx = unsafe { &*ctx };
    let mut row = Vec::with_capacity(ctx.fields.len());
    for &(ty, offset) in &ctx.fields {
        let field = unsafe { tuple.add(offset as usize) };
        let datum = unsafe {
            match ty {
                TypeKind::Int32 => Datum::Int32(field.cast::<i32>().read_unaligned()),
                TypeKind::Int64 => Datum::Int64(field.cast::<i64>().read_unaligned()),
                TypeKind::Double => Datum::Double(field.cast::<f64>().read_unaligned()),
                TypeKind::Char => Datum::Char(field.read()),
                TypeKind::Bool => Datum::Bool(field.read() != 0),
                TypeKind::Date => Datum::Date(field.cast::<u32>().read_unaligned()),
                TypeKind::String => {
                    let view = field.cast::<StringView>().read_unaligned();
                    Datum::Str(String::from_utf8_lossy(view.as_bytes()).into_owned())
                }
            }
        };
        row.push(datum);
    }
    ctx.rows.lock().push(row);
}

/// Materializes output rows for inspection; the row order of unsorted
/// plans is undefined.
#[derive(Default)]
pub struct CollectSink {
    rows: Arc<Mutex<Vec<Vec<Datum>>>>,
}

impl CollectSink {
    pub fn new() -> CollectSink {
        CollectSink::default()
    }

    /// Drain everything collected so far.
    pub fn take_rows(&self) -> Vec<Vec<Datum>> {
        std::mem::take(&mut self.rows.lock())
    }
}

impl Sink for CollectSink {
    fn produce(
        &mut self,
        root: &mut dyn Operator,
        outputs: &[Iu],
        _names: &[String],
        cg: &mut CodeGen,
    ) -> Result<(), EngineError> {
        let required = IuSet::from_slice(outputs);
        let layout = TupleLayout::pack(&required);
        let fields = outputs
            .iter()
            .map(|iu| (iu.ty(), layout.offset(iu)))
            .collect();
        let ctx = cg.add_context(CollectContext {
            fields,
            rows: Arc::clone(&self.rows),
        });

        let ctx_val: Cell<Option<Value>> = Cell::new(None);
        let required_ref = &required;
        let layout_ref = &layout;
        let mut deliver = |cg: &mut CodeGen| -> Result<(), EngineError> {
            let slot = cg.stack_slot(layout_ref.size().max(8));
            cg.pack_tuple(layout_ref, slot, required_ref.as_slice());
            let ctx_val = ctx_val.get().expect("collect init not run");
            cg.call_rt0("collect_row", &[ctx_val, slot])
        };
        let mut install = |cg: &mut CodeGen| -> Result<(), EngineError> {
            ctx_val.set(Some(cg.pipeline_arg(ctx)));
            Ok(())
        };
        root.produce(&required, cg, &mut deliver, &mut install)?;
        cg.finish_pipeline()
    }
}
