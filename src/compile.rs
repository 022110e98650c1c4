//! The compiler driver.
//!
//! Creates the JIT module a query compiles into, with the native ISA at
//! `opt_level=speed` (cranelift's per-function optimizing pipeline runs
//! when each pipeline is defined), and finalizes the module into raw
//! function pointers after lowering. Runtime symbols resolve lazily
//! through the shared registry: codegen registers addresses while
//! emitting, the JIT looks them up when it links.

use std::sync::Arc;

use cranelift_codegen::settings::{self, Configurable, Flags};
use cranelift_jit::{JITBuilder, JITModule};

use crate::codegen::{CodeGen, PipelineKind, Query, SymbolRegistry};
use crate::error::EngineError;

/// A pipeline resolved to executable code.
pub struct CompiledPipeline {
    pub kind: PipelineKind,
    pub name: String,
    pub addr: *const u8,
    pub args: Vec<*mut u8>,
    pub table_index: Option<usize>,
}

/// A fully compiled query: executable pipelines plus the state they point
/// into (operator contexts, interned strings).
pub struct CompiledQuery {
    pub pipelines: Vec<CompiledPipeline>,
    module: JITModule,
    _query: Query,
}

impl CompiledQuery {
    /// Release the JIT's executable memory. Callers must ensure no
    /// pipeline pointer is used afterwards.
    pub fn free(self) {
        unsafe {
            self.module.free_memory();
        }
    }
}

/// Build the JIT module a query will compile into.
pub fn create_module(symbols: &Arc<SymbolRegistry>) -> Result<JITModule, EngineError> {
    let mut flags = settings::builder();
    flags.set("use_colocated_libcalls", "false")?;
    flags.set("is_pic", "false")?;
    flags.set("opt_level", "speed")?;

    let isa = cranelift_native::builder()
        .map_err(|msg| EngineError::Jit(msg.to_string()))?
        .finish(Flags::new(flags))?;

    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    let registry = Arc::clone(symbols);
    builder.symbol_lookup_fn(Box::new(move |name| registry.address_of(name)));
    Ok(JITModule::new(builder))
}

/// Finalize a lowered query into callable pipelines.
pub fn finalize(cg: CodeGen) -> Result<CompiledQuery, EngineError> {
    let (mut module, query) = cg.into_parts();
    module.finalize_definitions()?;

    let pipelines = query
        .pipelines
        .iter()
        .map(|pipeline| CompiledPipeline {
            kind: pipeline.kind,
            name: pipeline.name.clone(),
            addr: module.get_finalized_function(pipeline.func_id),
            args: pipeline.args.clone(),
            table_index: pipeline.table_index,
        })
        .collect();

    Ok(CompiledQuery {
        pipelines,
        module,
        _query: query,
    })
}
