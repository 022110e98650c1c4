//! Table scan: the pipeline driver.

use crate::codegen::CodeGen;
use crate::error::EngineError;
use crate::iu::{Iu, IuSet};
use crate::storage::tpch::table_def;
use crate::types::TypeKind;

use super::{Consumer, Operator};

/// Scans one catalog table over a `[begin, end)` row range. Owns one IU
/// per column; the scan pipeline loads only the columns downstream asked
/// for.
pub struct Scan {
    table_index: usize,
    attributes: Vec<Iu>,
}

impl Scan {
    pub fn new(table: &str) -> Result<Scan, EngineError> {
        let (table_index, def) = table_def(table)?;
        let attributes = def
            .columns
            .iter()
            .map(|col| Iu::new(col.name, col.ty))
            .collect();
        Ok(Scan {
            table_index,
            attributes,
        })
    }

    /// Column handle by name; the handle identifies the column everywhere
    /// downstream.
    pub fn iu(&self, name: &str) -> Option<Iu> {
        self.attributes.iter().find(|iu| iu.name() == name).cloned()
    }

    fn ordinal(&self, iu: &Iu) -> usize {
        self.attributes
            .iter()
            .position(|attr| attr == iu)
            .expect("required IU does not belong to this scan")
    }
}

impl Operator for Scan {
    fn produce(
        &mut self,
        required: &IuSet,
        cg: &mut CodeGen,
        consumer: Consumer<'_>,
        init: Consumer<'_>,
    ) -> Result<(), EngineError> {
        cg.create_scan_pipeline(self.table_index)?;
        let table_ptr = cg.func_param(0);
        let begin = cg.func_param(1);
        let end = cg.func_param(2);

        init(cg)?;

        // resolve the required column bases once, in the entry block
        let desc_size = std::mem::size_of::<crate::storage::ColumnDesc>() as i64;
        let mut bases = Vec::with_capacity(required.len());
        for iu in required {
            let offset = (self.ordinal(iu) as i64) * desc_size;
            let desc = cg.iadd_imm(table_ptr, offset);
            let base = match iu.ty() {
                // string accesses go through the descriptor itself
                TypeKind::String => desc,
                _ => cg.load_mem(cg.ptr_ty(), desc, 0),
            };
            bases.push(base);
        }

        let row = cg.begin_index_iter(begin, end);
        for (iu, &base) in required.iter().zip(&bases) {
            cg.column_access(row, base, iu)?;
        }
        consumer(cg)?;
        cg.end_index_iter(1);
        Ok(())
    }

    fn available_ius(&self) -> IuSet {
        IuSet::from_slice(&self.attributes)
    }
}
