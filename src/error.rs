//! Engine error types.
//!
//! Everything that can go wrong before a pipeline runs surfaces here as a
//! typed error: column files that fail to open or map, plans that reference
//! unknown tables or apply unsupported operations to a type, and JIT
//! failures. Faults inside compiled code (arithmetic, allocation) are not
//! represented; they abort the process, matching the runtime contract.

use std::io;
use thiserror::Error;

use crate::types::TypeKind;

/// Errors raised while planning, compiling or loading data for a query.
#[derive(Error, Debug)]
pub enum EngineError {
    /// I/O error while opening or mapping a column file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Column file missing or malformed
    #[error("failed to load column '{column}' from {path}: {reason}")]
    ColumnLoad {
        path: String,
        column: String,
        reason: String,
    },

    /// Plan references a table the catalog does not know
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Plan references a column the table does not have
    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Expression factory got an operator name it does not recognize
    #[error("unknown operator name: {0}")]
    UnknownOperator(String),

    /// An operation was applied to a type that does not support it
    #[error("unsupported operation {op} for type {ty:?}")]
    UnsupportedOperation { op: &'static str, ty: TypeKind },

    /// A LIKE pattern without any `%` wildcard cannot be lowered
    #[error("unsupported LIKE pattern: {0}")]
    UnsupportedLikePattern(String),

    /// JITed code referenced a runtime symbol the registry does not export
    #[error("unknown runtime symbol: {0}")]
    UnknownSymbol(&'static str),

    /// Configuration loading failed
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Cranelift module-level failure (declaration, definition, finalization)
    #[error("JIT module error: {0}")]
    Module(#[from] cranelift_module::ModuleError),

    /// ISA or flag setup failure
    #[error("JIT backend error: {0}")]
    Jit(String),
}

impl From<figment::Error> for EngineError {
    fn from(e: figment::Error) -> Self {
        EngineError::Config(Box::new(e))
    }
}

impl From<cranelift_codegen::settings::SetError> for EngineError {
    fn from(e: cranelift_codegen::settings::SetError) -> Self {
        EngineError::Jit(e.to_string())
    }
}

impl From<cranelift_codegen::CodegenError> for EngineError {
    fn from(e: cranelift_codegen::CodegenError) -> Self {
        EngineError::Jit(e.to_string())
    }
}
