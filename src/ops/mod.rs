//! The push-based operator protocol.
//!
//! Lowering is a single recursive walk: the sink calls `produce` on the
//! plan root, each operator calls `produce` on its child with the IU set it
//! needs, and the leaf scan drives the loop, invoking the consumer closure
//! its parent passed down once per tuple position. Materializing operators
//! (join, aggregation, sort) finish the current pipeline and open new
//! ones, so one logical operator may span several compiled functions.
//!
//! The `init` closure runs once at the top of the pipeline the consumer
//! will live in; operators use it to install their pipeline arguments and
//! per-query contexts.

pub mod aggregation;
pub mod join;
pub mod map;
pub mod scan;
pub mod selection;
pub mod sink;
pub mod sort;

pub use aggregation::{Aggregate, AggregateKind, Aggregation};
pub use join::InnerJoin;
pub use map::Map;
pub use scan::Scan;
pub use selection::Selection;
pub use sink::{CollectSink, Datum, PrintSink, Sink};
pub use sort::Sort;

use crate::codegen::CodeGen;
use crate::error::EngineError;
use crate::iu::IuSet;

/// Continuation invoked at every tuple position (or pipeline top, for
/// `init`).
pub type Consumer<'a> = &'a mut dyn FnMut(&mut CodeGen) -> Result<(), EngineError>;

/// A relational operator that can lower itself into pipelines.
pub trait Operator {
    /// Emit this operator's fragment. `required` is what downstream needs;
    /// `consumer` emits the downstream continuation; `init` runs in the
    /// entry block of the pipeline the consumer ends up in.
    fn produce(
        &mut self,
        required: &IuSet,
        cg: &mut CodeGen,
        consumer: Consumer<'_>,
        init: Consumer<'_>,
    ) -> Result<(), EngineError>;

    /// Every IU this subtree can provide.
    fn available_ius(&self) -> IuSet;
}
