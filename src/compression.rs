//! Extension-driven compression for staged files.
//!
//! A slice named `orders.slice_1.csv.gz` is written through a gzip encoder; a slice
//! named `orders.slice_1.csv` is written as-is. Each compressed slice is a complete
//! gzip member, so byte-wise concatenation of slices yields a valid
//! multi-member gzip stream that warehouses and `MultiGzDecoder` read in full.
//!
//! ## Codecs
//!
//! - **Gzip** (`.gz`, `.gzip`) - via `flate2` (feature: `compression-gzip`)
//!
//! Extensions are matched case-insensitively against the end of the path.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A writer that must be explicitly finished so trailer and flush errors
/// surface instead of being swallowed on drop.
pub trait FinishWrite: Write + Send {
    /// Flush buffered data and write any codec trailer.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn finish(self: Box<Self>) -> std::io::Result<()>;
}

impl<W: Write + Send> FinishWrite for BufWriter<W> {
    fn finish(mut self: Box<Self>) -> std::io::Result<()> {
        self.flush()
    }
}

/// Pluggable compression codec.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g. "gzip").
    fn name(&self) -> &str;

    /// Lowercase extensions with the leading dot (e.g. `&[".gz"]`).
    fn extensions(&self) -> &[&str];

    /// Wrap a buffered file writer with compression.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder cannot be initialised.
    fn wrap_writer(&self, writer: BufWriter<File>) -> std::io::Result<Box<dyn FinishWrite>>;
}

fn codecs() -> Vec<Box<dyn CompressionCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Box::new(GzipCodec),
    ]
}

/// The codec whose extension ends `path`, if any.
#[must_use]
pub fn codec_for(path: impl AsRef<Path>) -> Option<Box<dyn CompressionCodec>> {
    let path_str = path.as_ref().to_string_lossy().to_lowercase();
    codecs()
        .into_iter()
        .find(|codec| codec.extensions().iter().any(|ext| path_str.ends_with(ext)))
}

/// Whether `path` names gzip content.
#[must_use]
pub fn is_gzip_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.ends_with(".gz") || lower.ends_with(".gzip")
}

/// Create `path` and wrap it according to its extension.
///
/// # Errors
///
/// Returns an error if the file cannot be created or the codec fails to start.
pub fn create_writer(path: impl AsRef<Path>) -> Result<Box<dyn FinishWrite>> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let buffered = BufWriter::new(file);

    match codec_for(path) {
        Some(codec) => codec
            .wrap_writer(buffered)
            .with_context(|| format!("wrap writer with {} codec", codec.name())),
        None => Ok(Box::new(buffered)),
    }
}

// ============================================================================
// Built-in Codec Implementations
// ============================================================================

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl<W: Write + Send> FinishWrite for flate2::write::GzEncoder<W> {
    fn finish(self: Box<Self>) -> std::io::Result<()> {
        let mut inner = (*self).finish()?;
        inner.flush()
    }
}

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn wrap_writer(&self, writer: BufWriter<File>) -> std::io::Result<Box<dyn FinishWrite>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn plain_extension_writes_raw_bytes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.slice_1.csv");
        let mut w = create_writer(&path)?;
        w.write_all(b"1,a\n")?;
        w.finish()?;
        assert_eq!(fs::read(&path)?, b"1,a\n");
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn gzip_extension_compresses() -> Result<()> {
        use std::io::Read;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.slice_1.CSV.GZ");
        let mut w = create_writer(&path)?;
        w.write_all(b"1,a\n2,b\n")?;
        w.finish()?;

        let raw = fs::read(&path)?;
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);

        let mut text = String::new();
        flate2::read::MultiGzDecoder::new(&raw[..]).read_to_string(&mut text)?;
        assert_eq!(text, "1,a\n2,b\n");
        Ok(())
    }

    #[test]
    fn gzip_path_detection() {
        assert!(is_gzip_path("gs://b/db/t.csv.gz"));
        assert!(!is_gzip_path("gs://b/db/t.csv"));
    }
}
