//! The built-in TPC-H catalog and the loaded database.
//!
//! Table and column ordinals are fixed: scan pipelines compile column
//! accesses as constant offsets into a per-table array of
//! [`ColumnDesc`] descriptors, and the scheduler resolves a pipeline's
//! table index against the same ordering.

use std::path::Path;

use crate::error::EngineError;
use crate::types::TypeKind;

use super::column::{Column, ColumnDesc};

/// One column of a catalog table.
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: TypeKind,
}

/// One catalog table.
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
}

macro_rules! columns {
    ($(($name:literal, $ty:ident)),* $(,)?) => {
        &[$(ColumnDef { name: $name, ty: TypeKind::$ty }),*]
    };
}

/// The eight TPC-H tables in their fixed index order.
pub static TABLES: &[TableDef] = &[
    TableDef {
        name: "part",
        columns: columns![
            ("p_partkey", Int32),
            ("p_name", String),
            ("p_mfgr", String),
            ("p_brand", String),
            ("p_type", String),
            ("p_size", Int32),
            ("p_container", String),
            ("p_retailprice", Double),
            ("p_comment", String),
        ],
    },
    TableDef {
        name: "supplier",
        columns: columns![
            ("s_suppkey", Int32),
            ("s_name", String),
            ("s_address", String),
            ("s_nationkey", Int32),
            ("s_phone", String),
            ("s_acctbal", Double),
            ("s_comment", String),
        ],
    },
    TableDef {
        name: "partsupp",
        columns: columns![
            ("ps_partkey", Int32),
            ("ps_suppkey", Int32),
            ("ps_availqty", Int32),
            ("ps_supplycost", Double),
            ("ps_comment", String),
        ],
    },
    TableDef {
        name: "customer",
        columns: columns![
            ("c_custkey", Int32),
            ("c_name", String),
            ("c_address", String),
            ("c_nationkey", Int32),
            ("c_phone", String),
            ("c_acctbal", Double),
            ("c_mktsegment", String),
            ("c_comment", String),
        ],
    },
    TableDef {
        name: "orders",
        columns: columns![
            ("o_orderkey", Int64),
            ("o_custkey", Int32),
            ("o_orderstatus", Char),
            ("o_totalprice", Double),
            ("o_orderdate", Date),
            ("o_orderpriority", String),
            ("o_clerk", String),
            ("o_shippriority", Int32),
            ("o_comment", String),
        ],
    },
    TableDef {
        name: "lineitem",
        columns: columns![
            ("l_orderkey", Int64),
            ("l_partkey", Int32),
            ("l_suppkey", Int32),
            ("l_linenumber", Int32),
            ("l_quantity", Double),
            ("l_extendedprice", Double),
            ("l_discount", Double),
            ("l_tax", Double),
            ("l_returnflag", Char),
            ("l_linestatus", Char),
            ("l_shipdate", Date),
            ("l_commitdate", Date),
            ("l_receiptdate", Date),
            ("l_shipinstruct", String),
            ("l_shipmode", String),
            ("l_comment", String),
        ],
    },
    TableDef {
        name: "nation",
        columns: columns![
            ("n_nationkey", Int32),
            ("n_name", String),
            ("n_regionkey", Int32),
            ("n_comment", String),
        ],
    },
    TableDef {
        name: "region",
        columns: columns![
            ("r_regionkey", Int32),
            ("r_name", String),
            ("r_comment", String),
        ],
    },
];

/// Catalog lookup: table name → (index, definition).
pub fn table_def(name: &str) -> Result<(usize, &'static TableDef), EngineError> {
    TABLES
        .iter()
        .enumerate()
        .find(|(_, def)| def.name == name)
        .ok_or_else(|| EngineError::UnknownTable(name.to_string()))
}

/// One loaded table: columns and their JIT-visible descriptor array.
pub struct Table {
    descs: Vec<ColumnDesc>,
    columns: Vec<Column>,
    rows: u64,
}

// Descriptors point into the read-only maps owned by `columns`.
unsafe impl Send for Table {}
unsafe impl Sync for Table {}

impl Table {
    fn open(dir: &Path, def: &TableDef) -> Result<Table, EngineError> {
        let columns = def
            .columns
            .iter()
            .map(|col| Column::open(dir, col.name, col.ty))
            .collect::<Result<Vec<_>, _>>()?;
        let rows = columns.first().map_or(0, Column::rows);
        let descs = columns.iter().map(Column::desc).collect();
        Ok(Table {
            descs,
            columns,
            rows,
        })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Base address of the descriptor array, the `table_ptr` argument of
    /// scan pipelines.
    pub fn base(&self) -> *const u8 {
        self.descs.as_ptr().cast()
    }

    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }
}

/// All eight tables, loaded from one root directory.
pub struct Database {
    tables: Vec<Table>,
}

impl Database {
    pub fn open(root: &Path) -> Result<Database, EngineError> {
        let tables = TABLES
            .iter()
            .map(|def| Table::open(&root.join(def.name), def))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Database { tables })
    }

    pub fn table(&self, idx: usize) -> &Table {
        &self.tables[idx]
    }
}
