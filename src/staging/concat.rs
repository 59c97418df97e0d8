//! Joining slices into the final table file.
//!
//! Concatenation is a plain byte copy in slice-number order. For uncompressed
//! slices this is equivalent to a single-pass write; for gzip slices it yields
//! a multi-member stream that decompresses to the same bytes.

use crate::error::{PipelineError, Result};
use crate::pool::WorkerPool;
use crate::staging::SlicePattern;
use anyhow::Context;
use glob::glob;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Expand a glob pattern into a sorted list of regular files.
///
/// # Errors
///
/// Returns an error if the pattern is invalid or a directory entry cannot be
/// read.
pub fn expand_glob(pattern: &str) -> anyhow::Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

/// This table's slices, ordered by slice number (so `_10` follows `_9`).
///
/// # Errors
///
/// Returns an `Io` error if the work directory cannot be listed.
pub fn list_slices(pattern: &SlicePattern) -> Result<Vec<PathBuf>> {
    let candidates = expand_glob(&pattern.glob()).map_err(|e| PipelineError::Io(format!("{e:#}")))?;
    let mut numbered: Vec<(usize, PathBuf)> = candidates
        .into_iter()
        .filter_map(|path| pattern.slice_number(&path).map(|n| (n, path)))
        .collect();
    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

fn append_all(slices: &[PathBuf], output: &Path) -> anyhow::Result<u64> {
    let mut out = BufWriter::new(
        File::create(output).with_context(|| format!("create {}", output.display()))?,
    );
    let mut total = 0u64;
    for slice in slices {
        let mut input = File::open(slice).with_context(|| format!("open {}", slice.display()))?;
        total += io::copy(&mut input, &mut out)
            .with_context(|| format!("append {}", slice.display()))?;
    }
    out.flush()
        .with_context(|| format!("flush {}", output.display()))?;
    Ok(total)
}

/// Append every slice of the table, in numeric order, into `{table}{ext}`.
///
/// An existing output file is replaced. With no slices the output is created
/// empty.
///
/// # Errors
///
/// Returns a `Concatenation` error if any slice cannot be read or the output
/// cannot be written. The partial output is removed; slices are left in place.
pub fn concatenate(pattern: &SlicePattern) -> Result<PathBuf> {
    let output = pattern.output_path();
    let fail = |message: String| PipelineError::Concatenation {
        output: output.display().to_string(),
        message,
    };

    let slices = list_slices(pattern).map_err(|e| fail(e.to_string()))?;
    debug!(table = pattern.table(), slices = slices.len(), "concatenating");

    match append_all(&slices, &output) {
        Ok(bytes) => {
            info!(table = pattern.table(), bytes, output = %output.display(), "concatenated");
            Ok(output)
        }
        Err(e) => {
            if output.exists()
                && let Err(rm) = fs::remove_file(&output)
            {
                warn!(output = %output.display(), "removing partial output: {rm}");
            }
            Err(fail(format!("{e:#}")))
        }
    }
}

/// Delete every slice of the table on `pool`. Failures are logged and skipped.
///
/// Returns the number of slices removed.
pub fn remove_slices(pattern: &SlicePattern, pool: &WorkerPool) -> usize {
    let slices = match list_slices(pattern) {
        Ok(slices) => slices,
        Err(e) => {
            warn!(table = pattern.table(), "listing slices for cleanup: {e}");
            return 0;
        }
    };

    pool.map(slices, |path| match fs::remove_file(&path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), "removing slice: {e}");
            false
        }
    })
    .into_iter()
    .filter(|removed| *removed)
    .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_slices(pattern: &SlicePattern, contents: &[&str]) -> anyhow::Result<()> {
        for (i, body) in contents.iter().enumerate() {
            fs::write(pattern.slice_path(i + 1), body)?;
        }
        Ok(())
    }

    #[test]
    fn slices_are_ordered_numerically() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let pattern = SlicePattern::new(dir.path(), "t", ".csv");
        let bodies: Vec<String> = (1..=11).map(|i| format!("{i}\n")).collect();
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
        write_slices(&pattern, &refs)?;

        let out = concatenate(&pattern)?;
        assert_eq!(fs::read_to_string(out)?, bodies.concat());
        Ok(())
    }

    #[test]
    fn other_tables_are_not_picked_up() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = SlicePattern::new(dir.path(), "a", ".csv");
        let a_b = SlicePattern::new(dir.path(), "a_b", ".csv");
        write_slices(&a, &["a1\n"])?;
        write_slices(&a_b, &["ab1\n"])?;

        assert_eq!(list_slices(&a)?, vec![a.slice_path(1)]);
        assert_eq!(fs::read_to_string(concatenate(&a)?)?, "a1\n");
        Ok(())
    }

    #[test]
    fn no_slices_gives_empty_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let pattern = SlicePattern::new(dir.path(), "empty", ".csv");
        let out = concatenate(&pattern)?;
        assert!(fs::read(out)?.is_empty());
        Ok(())
    }

    #[test]
    fn unwritable_output_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let pattern = SlicePattern::new(dir.path(), "t", ".csv");
        write_slices(&pattern, &["x\n"])?;
        fs::create_dir(pattern.output_path())?;

        let err = concatenate(&pattern).unwrap_err();
        assert!(matches!(err, PipelineError::Concatenation { .. }));
        assert!(pattern.slice_path(1).exists());
        Ok(())
    }

    #[test]
    fn cleanup_removes_only_slices() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let pattern = SlicePattern::new(dir.path(), "t", ".csv");
        write_slices(&pattern, &["1\n", "2\n", "3\n"])?;
        let out = concatenate(&pattern)?;

        let pool = WorkerPool::new("cleanup", Some(2))?;
        assert_eq!(remove_slices(&pattern, &pool), 3);
        assert!(list_slices(&pattern)?.is_empty());
        assert!(out.exists());
        Ok(())
    }
}
