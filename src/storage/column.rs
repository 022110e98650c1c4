//! Memory-mapped column files.
//!
//! One binary file per column. Fixed-width columns are flat arrays of the
//! C-ABI value; string columns use the slotted-page layout (`count`, then
//! `{len, offset}` slots, then raw bytes, offsets relative to the file
//! base). Files stay mapped read-only for the lifetime of the database;
//! large files get a transparent-huge-page advice.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::EngineError;
use crate::types::TypeKind;

const HUGE_PAGE_THRESHOLD: u64 = 1024 * 1024;

/// The JIT-visible descriptor of one column: base pointer plus row count.
/// Scan pipelines index a per-table array of these by column ordinal, so
/// the field offsets are part of the compiled-code contract.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ColumnDesc {
    pub data: *const u8,
    pub len: u64,
}

/// A loaded column: the mapping plus its decoded row count.
pub struct Column {
    map: Mmap,
    rows: u64,
    ty: TypeKind,
}

impl Column {
    /// Map `<dir>/<name>.bin` and decode the row count.
    pub fn open(dir: &Path, name: &str, ty: TypeKind) -> Result<Column, EngineError> {
        let path = dir.join(format!("{name}.bin"));
        let fail = |reason: String| EngineError::ColumnLoad {
            path: path.display().to_string(),
            column: name.to_string(),
            reason,
        };

        let file = File::open(&path).map_err(|e| fail(e.to_string()))?;
        let map = unsafe { Mmap::map(&file) }.map_err(|e| fail(e.to_string()))?;

        #[cfg(target_os = "linux")]
        if map.len() as u64 > HUGE_PAGE_THRESHOLD {
            // advisory only; a kernel without THP support just ignores it
            let _ = map.advise(memmap2::Advice::HugePage);
        }

        let rows = match ty {
            TypeKind::String => {
                if map.len() < 8 {
                    return Err(fail("slotted page shorter than its count".into()));
                }
                u64::from_le_bytes(map[..8].try_into().unwrap())
            }
            fixed => {
                let width = u64::from(fixed.size());
                if map.len() as u64 % width != 0 {
                    return Err(fail(format!(
                        "file size {} is not a multiple of the value width {width}",
                        map.len()
                    )));
                }
                map.len() as u64 / width
            }
        };

        Ok(Column { map, rows, ty })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn ty(&self) -> TypeKind {
        self.ty
    }

    pub fn desc(&self) -> ColumnDesc {
        ColumnDesc {
            data: self.map.as_ptr(),
            len: self.rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn fixed_width_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = File::create(dir.path().join("k.bin")).unwrap();
        for v in 0i32..10 {
            f.write_all(&v.to_le_bytes()).unwrap();
        }
        drop(f);

        let col = Column::open(dir.path(), "k", TypeKind::Int32).unwrap();
        assert_eq!(col.rows(), 10);
        let desc = col.desc();
        let third = unsafe { desc.data.cast::<i32>().add(3).read_unaligned() };
        assert_eq!(third, 3);
    }

    #[test]
    fn misaligned_fixed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("k.bin"), [0u8; 7]).unwrap();
        assert!(Column::open(dir.path(), "k", TypeKind::Int64).is_err());
    }

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Column::open(dir.path(), "absent", TypeKind::Int32).is_err());
    }
}
