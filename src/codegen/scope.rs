//! Per-pipeline compile-time environment.

use std::collections::HashMap;

use cranelift_codegen::ir::{Block, Value};

use crate::iu::Iu;

/// An in-progress loop: header and exit blocks plus the induction value
/// (loop-carried block parameter of the header).
#[derive(Debug, Clone, Copy)]
pub struct LoopFrame {
    pub header: Block,
    pub exit: Block,
    pub induction: Value,
}

/// Maps every IU to its current SSA value and, if it has been spilled for
/// hashing or unpacked from a tuple, its current memory address. Cleared at
/// pipeline boundaries.
#[derive(Debug, Default)]
pub struct Scope {
    values: HashMap<Iu, Value>,
    pointers: HashMap<Iu, Value>,
    pub loops: Vec<LoopFrame>,
}

impl Scope {
    pub fn clear(&mut self) {
        self.values.clear();
        self.pointers.clear();
        self.loops.clear();
    }

    pub fn set_value(&mut self, iu: &Iu, value: Value) {
        self.values.insert(iu.clone(), value);
    }

    pub fn set_pointer(&mut self, iu: &Iu, pointer: Value) {
        self.pointers.insert(iu.clone(), pointer);
    }

    pub fn value(&self, iu: &Iu) -> Option<Value> {
        self.values.get(iu).copied()
    }

    pub fn pointer(&self, iu: &Iu) -> Option<Value> {
        self.pointers.get(iu).copied()
    }
}
