//! Local staging of extracted tables.
//!
//! Every fetched block of a table becomes one numbered slice file
//! (`{table}.slice_{n}{ext}`, see [`slice`]); once the table is exhausted the slices
//! are joined byte-for-byte into `{table}{ext}` ([`concat`]) and removed.

pub mod concat;
pub mod slice;

use std::path::{Path, PathBuf};

/// Separates the table name from the slice number. Table names never contain
/// a dot, so no table's output can match another table's slices.
const SLICE_INFIX: &str = ".slice_";

pub use concat::{concatenate, list_slices, remove_slices};
pub use slice::{coerce_row, write_slice};

/// File naming for one table's slices and final output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicePattern {
    work_dir: PathBuf,
    table: String,
    ext: String,
}

impl SlicePattern {
    pub fn new(work_dir: impl Into<PathBuf>, table: &str, ext: &str) -> Self {
        Self {
            work_dir: work_dir.into(),
            table: table.to_string(),
            ext: ext.to_string(),
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// `{work_dir}/{table}.slice_{n}{ext}`
    #[must_use]
    pub fn slice_path(&self, n: usize) -> PathBuf {
        self.work_dir
            .join(format!("{}{SLICE_INFIX}{n}{}", self.table, self.ext))
    }

    /// `{work_dir}/{table}{ext}`
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}{}", self.table, self.ext))
    }

    /// Glob matching every candidate slice; use [`SlicePattern::slice_number`]
    /// to reject look-alikes such as another table's slices.
    #[must_use]
    pub fn glob(&self) -> String {
        let prefix = self.work_dir.join(format!("{}{SLICE_INFIX}", self.table));
        format!(
            "{}*{}",
            glob::Pattern::escape(&prefix.to_string_lossy()),
            glob::Pattern::escape(&self.ext)
        )
    }

    /// The slice number encoded in `path`, if it is one of this table's slices.
    #[must_use]
    pub fn slice_number(&self, path: &Path) -> Option<usize> {
        let name = path.file_name()?.to_str()?;
        let digits = name
            .strip_prefix(&self.table)?
            .strip_prefix(SLICE_INFIX)?
            .strip_suffix(&self.ext)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_convention() {
        let p = SlicePattern::new("/w", "orders", ".csv.gz");
        assert_eq!(p.slice_path(3), PathBuf::from("/w/orders.slice_3.csv.gz"));
        assert_eq!(p.output_path(), PathBuf::from("/w/orders.csv.gz"));
        assert_eq!(p.glob(), "/w/orders.slice_*.csv.gz");
    }

    #[test]
    fn slice_number_rejects_lookalikes() {
        let p = SlicePattern::new("/w", "a", ".csv");
        assert_eq!(p.slice_number(Path::new("/w/a.slice_12.csv")), Some(12));
        assert_eq!(p.slice_number(Path::new("/w/a_b.slice_1.csv")), None);
        assert_eq!(p.slice_number(Path::new("/w/a.csv")), None);
        assert_eq!(p.slice_number(Path::new("/w/a.slice_.csv")), None);
        assert_eq!(p.slice_number(Path::new("/w/a.slice_1.csv.gz")), None);
    }

    #[test]
    fn outputs_of_suffixed_tables_are_not_slices() {
        let a = SlicePattern::new("/w", "a", ".csv");
        let a_1 = SlicePattern::new("/w", "a_1", ".csv");
        assert_eq!(a.slice_number(&a_1.output_path()), None);
        let glob = glob::Pattern::new(&a.glob()).unwrap();
        assert!(!glob.matches_path(&a_1.output_path()));
    }
}
