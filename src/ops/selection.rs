//! Filter: splits the tuple position on a predicate.

use crate::codegen::CodeGen;
use crate::error::EngineError;
use crate::expr::Exp;
use crate::iu::IuSet;

use super::{Consumer, Operator};

/// Keeps only tuples for which the predicate evaluates to true.
pub struct Selection {
    child: Box<dyn Operator>,
    predicate: Exp,
}

impl Selection {
    pub fn new(child: Box<dyn Operator>, predicate: Exp) -> Selection {
        Selection { child, predicate }
    }
}

impl Operator for Selection {
    fn produce(
        &mut self,
        required: &IuSet,
        cg: &mut CodeGen,
        consumer: Consumer<'_>,
        init: Consumer<'_>,
    ) -> Result<(), EngineError> {
        let need = required | &self.predicate.ius();
        let predicate = &mut self.predicate;
        self.child.produce(
            &need,
            cg,
            &mut |cg| {
                let keep = predicate.compile(cg)?;
                let body = cg.new_block();
                let cont = cg.new_block();
                cg.brif(keep, body, &[], cont, &[]);
                cg.switch_to(body);
                consumer(cg)?;
                cg.jump(cont, &[]);
                cg.switch_to(cont);
                Ok(())
            },
            init,
        )
    }

    fn available_ius(&self) -> IuSet {
        self.child.available_ius()
    }
}
