//! Per-type coercion of fetched blocks and slice serialization.
//!
//! | Type       | Coercion                                                     |
//! |------------|--------------------------------------------------------------|
//! | `DATETIME` | permissive parse, rendered `YYYY-MM-DD HH:MM:SS[.f]`; invalid -> null |
//! | `FLOAT`    | numeric parse; invalid or non-finite -> null                 |
//! | `INTEGER`  | null -> `0`; decimals truncate; non-numeric fails the slice  |
//! | `STRING`   | carriage returns and `"` removed                             |
//! | `BOOLEAN`  | unchanged                                                    |
//!
//! Nulls are written as empty fields. Slices carry no header row. A failed
//! slice leaves its table incomplete, so the extractor never concatenates it.

use crate::compression::create_writer;
use crate::engine::{Row, RowBlock};
use crate::error::{PipelineError, Result};
use crate::schema::{CanonicalType, SchemaField};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::path::Path;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d", "%d %b %Y", "%b %d %Y"];

const OUTPUT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn coerce_datetime(value: Option<&str>) -> Option<String> {
    value
        .and_then(parse_datetime)
        .map(|dt| dt.format(OUTPUT_DATETIME_FORMAT).to_string())
}

fn coerce_float(value: Option<&str>) -> Option<String> {
    value
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .map(|f| f.to_string())
}

fn coerce_integer(value: Option<&str>) -> std::result::Result<i64, String> {
    let Some(s) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(0);
    };
    if let Ok(i) = s.parse::<i64>() {
        return Ok(i);
    }
    match s.parse::<f64>() {
        #[allow(clippy::cast_possible_truncation)]
        Ok(f) if f.is_finite() => Ok(f.trunc() as i64),
        Ok(f) if f.is_nan() => Ok(0),
        _ => Err(format!("`{s}` is not an integer")),
    }
}

fn clean_string(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, '\r' | '"')).collect()
}

/// Coerce one value according to its column type. `None` is the null marker.
///
/// # Errors
///
/// Returns a message when an `INTEGER` value is present but not numeric.
pub fn coerce_value(
    value: Option<&str>,
    field_type: CanonicalType,
) -> std::result::Result<Option<String>, String> {
    Ok(match field_type {
        CanonicalType::Datetime => coerce_datetime(value),
        CanonicalType::Float => coerce_float(value),
        CanonicalType::Integer => Some(coerce_integer(value)?.to_string()),
        CanonicalType::String => value.map(clean_string),
        CanonicalType::Boolean => value.map(ToString::to_string),
    })
}

/// Coerce a row; columns beyond the schema are treated as `STRING`.
///
/// # Errors
///
/// Returns a message naming the offending column.
pub fn coerce_row(row: &Row, schema: &[SchemaField]) -> std::result::Result<Vec<String>, String> {
    row.iter()
        .enumerate()
        .map(|(i, value)| {
            let field = schema.get(i);
            let field_type = field.map_or(CanonicalType::String, |f| f.field_type);
            coerce_value(value.as_deref(), field_type)
                .map(Option::unwrap_or_default)
                .map_err(|e| match field {
                    Some(f) => format!("column `{}`: {e}", f.name),
                    None => format!("column #{}: {e}", i + 1),
                })
        })
        .collect()
}

/// Coerce `block` and write it as a header-less, comma-delimited slice.
///
/// The file is compressed when `path` ends in a codec extension. Returns the
/// number of rows written.
///
/// # Errors
///
/// Returns a `Transform` error if a value cannot be coerced or the slice
/// cannot be written; a partially written slice is removed.
pub fn write_slice(path: &Path, block: &RowBlock, schema: &[SchemaField]) -> Result<usize> {
    let fail = |message: String| PipelineError::Transform {
        slice: path.display().to_string(),
        message,
    };

    let coerced = block
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| coerce_row(row, schema).map_err(|e| format!("row #{}: {e}", i + 1)))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(fail)?;

    let written = serialize(path, &coerced).map_err(|e| {
        // best effort; the error being reported is the write failure
        let _ = std::fs::remove_file(path);
        fail(format!("{e:#}"))
    })?;
    Ok(written)
}

fn serialize(path: &Path, rows: &[Vec<String>]) -> anyhow::Result<usize> {
    use anyhow::Context;

    let writer = create_writer(path)?;
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(writer);
    for (i, row) in rows.iter().enumerate() {
        wtr.write_record(row)
            .with_context(|| format!("serialize CSV row #{}", i + 1))?;
    }
    wtr.flush()?;
    let inner = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush {}: {}", path.display(), e.error()))?;
    inner.finish()?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn integer_nulls_become_zero() {
        let out: Vec<String> = ["3", "", "7"]
            .iter()
            .map(|v| {
                let v = Some(*v).filter(|s| !s.is_empty());
                coerce_value(v, CanonicalType::Integer).unwrap().unwrap()
            })
            .collect();
        assert_eq!(out, vec!["3", "0", "7"]);
        assert_eq!(coerce_value(None, CanonicalType::Integer).unwrap(), some("0"));
        assert_eq!(coerce_value(Some("4.9"), CanonicalType::Integer).unwrap(), some("4"));
        assert!(coerce_value(Some("four"), CanonicalType::Integer).is_err());
    }

    #[test]
    fn strings_lose_quotes_and_carriage_returns() {
        let out = coerce_value(Some("He said \"hi\"\r"), CanonicalType::String).unwrap();
        assert_eq!(out, some("He said hi"));
        assert_eq!(coerce_value(None, CanonicalType::String).unwrap(), None);
    }

    #[test]
    fn floats_are_permissive() {
        assert_eq!(coerce_value(Some(" 1.5 "), CanonicalType::Float).unwrap(), some("1.5"));
        assert_eq!(coerce_value(Some("abc"), CanonicalType::Float).unwrap(), None);
        assert_eq!(coerce_value(Some("NaN"), CanonicalType::Float).unwrap(), None);
    }

    #[test]
    fn datetimes_are_permissive() {
        let parse = |v| coerce_value(Some(v), CanonicalType::Datetime).unwrap();
        assert_eq!(parse("2024-03-01 12:30:00"), some("2024-03-01 12:30:00"));
        assert_eq!(parse("2024-03-01T12:30:00.250"), some("2024-03-01 12:30:00.250"));
        assert_eq!(parse("2024-03-01T12:30:00+02:00"), some("2024-03-01 10:30:00"));
        assert_eq!(parse("2024-03-01"), some("2024-03-01 00:00:00"));
        assert_eq!(parse("03/01/2024"), some("2024-03-01 00:00:00"));
        assert_eq!(parse("not a date"), None);
        assert_eq!(parse("2024-02-30"), None);
    }

    #[test]
    fn booleans_pass_through() {
        assert_eq!(coerce_value(Some("true"), CanonicalType::Boolean).unwrap(), some("true"));
    }

    #[test]
    fn extra_columns_are_strings() {
        let schema = vec![SchemaField::new("n", CanonicalType::Integer)];
        let row = vec![None, some("x\"y")];
        assert_eq!(coerce_row(&row, &schema).unwrap(), vec!["0", "xy"]);
    }

    #[test]
    fn write_slice_is_headerless_csv() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.slice_1.csv");
        let schema = vec![
            SchemaField::new("id", CanonicalType::Integer),
            SchemaField::new("note", CanonicalType::String),
            SchemaField::new("score", CanonicalType::Float),
        ];
        let block = RowBlock {
            number: 1,
            rows: vec![
                vec![some("1"), some("a,b"), some("2.5")],
                vec![None, some("line\r\nbreak"), some("oops")],
            ],
        };

        assert_eq!(write_slice(&path, &block, &schema)?, 2);
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text, "1,\"a,b\",2.5\n0,\"line\nbreak\",\n");
        Ok(())
    }

    #[test]
    fn bad_integer_fails_the_slice_without_a_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.slice_1.csv");
        let schema = vec![SchemaField::new("id", CanonicalType::Integer)];
        let block = RowBlock {
            number: 1,
            rows: vec![vec![some("x")]],
        };

        let err = write_slice(&path, &block, &schema).unwrap_err();
        assert!(matches!(err, PipelineError::Transform { .. }));
        assert!(err.to_string().contains("column `id`"));
        assert!(!path.exists());
        Ok(())
    }
}
