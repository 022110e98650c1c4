//! Map: binds a derived column.

use crate::codegen::CodeGen;
use crate::error::EngineError;
use crate::expr::Exp;
use crate::iu::{Iu, IuSet};
use crate::types::TypeKind;

use super::{Consumer, Operator};

/// Evaluates an expression per tuple and exposes the result as a fresh IU,
/// cast to the declared output type when needed.
pub struct Map {
    child: Box<dyn Operator>,
    exp: Exp,
    out: Iu,
}

impl Map {
    pub fn new(child: Box<dyn Operator>, exp: Exp, name: &str, ty: TypeKind) -> Map {
        Map {
            child,
            exp,
            out: Iu::new(name, ty),
        }
    }

    /// The derived column handle.
    pub fn iu(&self) -> Iu {
        self.out.clone()
    }
}

impl Operator for Map {
    fn produce(
        &mut self,
        required: &IuSet,
        cg: &mut CodeGen,
        consumer: Consumer<'_>,
        init: Consumer<'_>,
    ) -> Result<(), EngineError> {
        let need = &(required | &self.exp.ius()) - &IuSet::from_slice(&[self.out.clone()]);
        let exp = &mut self.exp;
        let out = &self.out;
        self.child.produce(
            &need,
            cg,
            &mut |cg| {
                let mut value = exp.compile(cg)?;
                let from = exp.result_type();
                if from != out.ty() {
                    value = from.cast(cg, value, out.ty());
                }
                cg.scope.set_value(out, value);
                if out.ty() == TypeKind::String {
                    cg.scope.set_pointer(out, value);
                }
                consumer(cg)
            },
            init,
        )
    }

    fn available_ius(&self) -> IuSet {
        let mut available = self.child.available_ius();
        available.add(self.out.clone());
        available
    }
}
