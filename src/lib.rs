//! # morsel
//!
//! A push-based, code-generating query execution engine over a columnar,
//! memory-mapped TPC-H dataset. A query plan (a tree of relational
//! operators) is lowered at run time into cranelift IR, JIT-compiled, and
//! executed over partitioned table scans by a pool of worker threads.
//!
//! ## Pipeline architecture
//!
//! ```text
//! Operator tree (scan / selection / map / join / aggregation / sort)
//!     |
//! [Sink.produce]        -> recursive push-based lowering
//!     |
//! [CodeGen]             -> one IR module, split into pipelines at
//!     |                    materializing operators
//! [compile::finalize]   -> JIT (cranelift), runtime symbols bound
//!     |
//! [Scheduler]           -> scans chunked over workers, continuations
//!     |                    fanned out, pipelines joined in order
//! Results
//! ```
//!
//! ## Module map
//!
//! | module | purpose |
//! |--------|---------|
//! | `types` | per-primitive codegen hooks (load/store/cast/binop) |
//! | `iu` | identity-keyed column handles and ordered sets |
//! | `tuple` | packed tuple layouts |
//! | `expr` | expression trees with implicit-cast inference |
//! | `codegen` | pipelines, scopes, the IR builder, key hashing |
//! | `ops` | the produce/consume operator protocol |
//! | `runtime` | tuple buffers, hash tables, HLL, thread contexts |
//! | `storage` | mmap column loader and the TPC-H catalog |
//! | `compile` | JIT module setup and finalization |
//! | `exec` | scan-partition schedulers |
//! | `driver` | the `produce` entrypoint |
//!
//! ## Example
//!
//! ```rust,no_run
//! use morsel::ops::{PrintSink, Scan, Selection};
//! use morsel::expr::Exp;
//!
//! let region = Scan::new("region").unwrap();
//! let key = region.iu("r_regionkey").unwrap();
//! let name = region.iu("r_name").unwrap();
//! let mut plan = Selection::new(
//!     Box::new(region),
//!     Exp::call("eq", Exp::iu(&name), Exp::string("ASIA")).unwrap(),
//! );
//! morsel::driver::produce(
//!     &mut plan,
//!     &[key, name],
//!     &["r_regionkey".into(), "r_name".into()],
//!     &mut PrintSink,
//! )
//! .unwrap();
//! ```

pub mod codegen;
pub mod compile;
pub mod config;
pub mod driver;
pub mod error;
pub mod exec;
pub mod expr;
pub mod iu;
pub mod ops;
pub mod runtime;
pub mod storage;
pub mod tuple;
pub mod types;

pub use config::{Config, SchedulerKind};
pub use driver::{produce, produce_with};
pub use error::EngineError;
pub use expr::Exp;
pub use iu::{Iu, IuSet};
pub use types::{BinOp, TypeKind, UnOp};
