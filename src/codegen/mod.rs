//! Query-level IR state.
//!
//! A [`Query`] owns everything a plan accretes while it is lowered: the
//! ordered pipeline descriptors, the operator contexts the compiled code
//! will receive through its argument vectors, and the constant-string pool
//! referenced by emitted code. The [`SymbolRegistry`] records the address
//! of every runtime helper the emitted IR calls; the JIT resolves imports
//! against it when the module is finalized.

pub mod builder;
pub mod hash;
pub mod scope;

use std::any::Any;
use std::collections::HashMap;

use cranelift_module::FuncId;
use parking_lot::RwLock;

pub use builder::CodeGen;
pub use scope::{LoopFrame, Scope};

/// The three pipeline shapes the scheduler knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// Takes `(table_ptr, begin, end, threads, args)`; parallelized over
    /// table chunks.
    Scan,
    /// Takes `(args)`; runs once on the scheduler thread.
    Default,
    /// Takes `(args)`; fanned out once per worker.
    Continuation,
}

/// A compiled function in the making: name, kind, argument-vector schema
/// and (for scans) the table to iterate.
pub struct Pipeline {
    pub kind: PipelineKind,
    pub name: String,
    pub func_id: FuncId,
    pub args: Vec<*mut u8>,
    pub table_index: Option<usize>,
}

impl Pipeline {
    /// Install `ptr` in the next argument-vector slot; returns its index.
    pub fn add_arg(&mut self, ptr: *mut u8) -> usize {
        self.args.push(ptr);
        self.args.len() - 1
    }
}

/// Everything a query owns across planning, compilation and execution.
#[derive(Default)]
pub struct Query {
    pub pipelines: Vec<Pipeline>,
    contexts: Vec<Box<dyn Any>>,
    strings: Vec<Box<[u8]>>,
}

impl Query {
    /// Register an operator context; its address stays stable for the
    /// lifetime of the query.
    pub fn add_context<T: 'static>(&mut self, context: T) -> *mut T {
        let mut boxed = Box::new(context);
        let ptr: *mut T = boxed.as_mut();
        self.contexts.push(boxed);
        ptr
    }

    /// Intern constant bytes; emitted code embeds the returned address.
    pub fn intern_bytes(&mut self, bytes: &[u8]) -> *const u8 {
        self.strings.push(bytes.to_vec().into_boxed_slice());
        self.strings.last().unwrap().as_ptr()
    }

    pub fn current_pipeline(&mut self) -> &mut Pipeline {
        self.pipelines.last_mut().expect("no pipeline open")
    }
}

/// Name → address map of the runtime helpers referenced by emitted code.
/// Shared with the JIT's symbol-lookup hook.
#[derive(Default)]
pub struct SymbolRegistry {
    symbols: RwLock<HashMap<&'static str, usize>>,
}

impl SymbolRegistry {
    pub fn register(&self, name: &'static str, addr: *const u8) {
        self.symbols.write().insert(name, addr as usize);
    }

    pub fn address_of(&self, name: &str) -> Option<*const u8> {
        self.symbols.read().get(name).map(|&a| a as *const u8)
    }
}
