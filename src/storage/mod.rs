//! Columnar storage: mmap column loader and the TPC-H catalog.

pub mod column;
pub mod tpch;

pub use column::{Column, ColumnDesc};
pub use tpch::{table_def, Database, Table, TableDef, TABLES};
