//! Canonical column types and the schema manifest.
//!
//! Engine-native type tags are folded into a closed vocabulary of five
//! [`CanonicalType`]s. The resulting field list is written next to the staged
//! data as `{table}_schema.csv`, a single line of comma-separated `name:TYPE`
//! tokens, and read back when the table is loaded into the warehouse. A missing
//! or empty manifest is not an error: the loader falls back to autodetect.

use crate::cloud::WarehouseField;
use crate::engine::Cursor;
use crate::error::{PipelineError, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Longest identifier the warehouse accepts.
pub const MAX_NAME_LEN: usize = 120;

const MANIFEST_SUFFIX: &str = "schema.csv";

static LEADING_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)").expect("valid leading-digit regex"));
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid non-word regex"));

/// Closed set of column types carried from inference through coercion and load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CanonicalType {
    Integer,
    Float,
    String,
    Boolean,
    Datetime,
}

impl CanonicalType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::String => "STRING",
            Self::Boolean => "BOOLEAN",
            Self::Datetime => "DATETIME",
        }
    }

    /// Map an engine-native type tag; unknown tags become `STRING`.
    #[must_use]
    pub fn from_native(tag: &str) -> Self {
        match tag {
            "BIGINT_TYPE" | "INTEGER_TYPE" | "INT_TYPE" | "SMALLINT_TYPE" | "TINYINT_TYPE" => {
                Self::Integer
            }
            "BINARY_TYPE" | "BOOLEAN_TYPE" => Self::Boolean,
            "DOUBLE_TYPE" | "REAL_TYPE" | "FLOAT_TYPE" | "NUMERIC_TYPE" | "DECIMAL_TYPE" => {
                Self::Float
            }
            "TIMESTAMP_TYPE" | "DATE_TYPE" | "TIME" | "DATE" => Self::Datetime,
            _ => Self::String,
        }
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INTEGER" => Ok(Self::Integer),
            "FLOAT" => Ok(Self::Float),
            "STRING" => Ok(Self::String),
            "BOOLEAN" => Ok(Self::Boolean),
            "DATETIME" => Ok(Self::Datetime),
            other => Err(format!("unknown canonical type `{other}`")),
        }
    }
}

/// One column of a table's canonical schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: CanonicalType,
}

impl SchemaField {
    /// Build a field, normalizing `name` into a warehouse-safe identifier.
    pub fn new(name: &str, field_type: CanonicalType) -> Self {
        Self {
            name: normalize_name(name),
            field_type,
        }
    }

    fn manifest_token(&self) -> String {
        format!("{}:{}", self.name, self.field_type)
    }
}

/// Turn an arbitrary column name into a warehouse identifier.
///
/// Quote characters are removed, a leading run of digits gets a `_` prefix,
/// every remaining non-word character becomes `_`, and the result is cut to
/// [`MAX_NAME_LEN`]. Applying it twice changes nothing.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let unquoted: String = name.chars().filter(|c| !matches!(c, '"' | '\'' | '`')).collect();
    let prefixed = LEADING_DIGITS.replace(&unquoted, "_$1");
    let mut out = NON_WORD.replace_all(&prefixed, "_").into_owned();
    // only ASCII left, byte truncation is char-safe
    out.truncate(MAX_NAME_LEN);
    out
}

/// Drop a `table.` qualifier from an engine column name.
#[must_use]
pub fn strip_qualifier(name: &str) -> &str {
    name.split_once('.').map_or(name, |(_, column)| column)
}

/// Make names unique by appending `_2`, `_3`, ... to later duplicates.
pub fn dedupe_names(fields: &mut [SchemaField]) {
    let mut taken: HashSet<String> = HashSet::with_capacity(fields.len());
    for field in fields.iter_mut() {
        if taken.insert(field.name.clone()) {
            continue;
        }
        let mut n = 2usize;
        let candidate = loop {
            let suffix = format!("_{n}");
            let mut base = field.name.clone();
            base.truncate(MAX_NAME_LEN - suffix.len());
            let candidate = base + &suffix;
            if !taken.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        warn!(column = %field.name, renamed = %candidate, "duplicate column name after normalization");
        taken.insert(candidate.clone());
        field.name = candidate;
    }
}

/// `{work_dir}/{table}_schema.csv`
#[must_use]
pub fn manifest_path(work_dir: &Path, table: &str) -> PathBuf {
    work_dir.join(format!("{table}_{MANIFEST_SUFFIX}"))
}

/// Render fields as a manifest line: `a:INTEGER,b:STRING`.
#[must_use]
pub fn format_manifest(fields: &[SchemaField]) -> String {
    fields
        .iter()
        .map(SchemaField::manifest_token)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse manifest text. Tokens split on the last `:`; unknown types fall back
/// to `STRING` and bare names (no `:`) are skipped.
#[must_use]
pub fn parse_manifest(text: &str) -> Vec<SchemaField> {
    let mut fields: Vec<SchemaField> = text
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| {
            let Some((name, tag)) = token.rsplit_once(':') else {
                warn!(token, "manifest token without a type");
                return None;
            };
            let field_type = tag.parse().unwrap_or_else(|e: String| {
                warn!(token, "{e}, using STRING");
                CanonicalType::String
            });
            Some(SchemaField::new(name, field_type))
        })
        .collect();
    dedupe_names(&mut fields);
    fields
}

/// Persist a manifest, replacing any previous one.
///
/// # Errors
///
/// Returns a `Schema` error if the file cannot be written.
pub fn write_schema(path: &Path, fields: &[SchemaField]) -> Result<()> {
    fs::write(path, format_manifest(fields)).map_err(|e| PipelineError::Schema {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Read a manifest; a missing or unreadable file yields an empty list so the
/// caller switches to autodetect.
#[must_use]
pub fn read_schema(path: &Path) -> Vec<SchemaField> {
    match fs::read_to_string(path) {
        Ok(text) => parse_manifest(&text),
        Err(e) => {
            debug!(path = %path.display(), "no usable schema manifest: {e}");
            Vec::new()
        }
    }
}

/// Derive the canonical schema from the cursor's current result set and
/// persist it as `{work_dir}/{table}_schema.csv`.
///
/// A manifest write failure is logged and does not fail inference; the
/// returned fields still drive coercion for this run.
///
/// # Errors
///
/// Returns a `Fetch` error if the cursor cannot report its columns.
pub fn infer_schema(table: &str, cursor: &dyn Cursor, work_dir: &Path) -> Result<Vec<SchemaField>> {
    let columns = cursor.columns().map_err(|source| PipelineError::Fetch {
        table: table.to_string(),
        source,
    })?;

    let mut fields: Vec<SchemaField> = columns
        .iter()
        .map(|col| {
            SchemaField::new(
                strip_qualifier(&col.name),
                CanonicalType::from_native(&col.type_tag),
            )
        })
        .collect();
    dedupe_names(&mut fields);

    let path = manifest_path(work_dir, table);
    if let Err(e) = write_schema(&path, &fields) {
        warn!(table, "{e}");
    }

    Ok(fields)
}

/// Fields in the shape the warehouse load configuration expects.
#[must_use]
pub fn to_warehouse_fields(fields: &[SchemaField]) -> Vec<WarehouseField> {
    fields
        .iter()
        .map(|f| (f.name.clone(), f.field_type.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_tags_map_to_canonical_types() {
        assert_eq!(CanonicalType::from_native("BIGINT_TYPE"), CanonicalType::Integer);
        assert_eq!(CanonicalType::from_native("SMALLINT_TYPE"), CanonicalType::Integer);
        assert_eq!(CanonicalType::from_native("BINARY_TYPE"), CanonicalType::Boolean);
        assert_eq!(CanonicalType::from_native("DECIMAL_TYPE"), CanonicalType::Float);
        assert_eq!(CanonicalType::from_native("CHAR_TYPE"), CanonicalType::String);
        assert_eq!(CanonicalType::from_native("TIMESTAMP_TYPE"), CanonicalType::Datetime);
        assert_eq!(CanonicalType::from_native("DATE"), CanonicalType::Datetime);
        assert_eq!(CanonicalType::from_native("MAP_TYPE"), CanonicalType::String);
        assert_eq!(CanonicalType::from_native(""), CanonicalType::String);
    }

    #[test]
    fn normalize_examples() {
        assert_eq!(normalize_name(r#""order id""#), "order_id");
        assert_eq!(normalize_name("2019_sales"), "_2019_sales");
        assert_eq!(normalize_name("price-€"), "price__");
        assert_eq!(normalize_name("plain"), "plain");
        assert_eq!(normalize_name(&"x".repeat(300)).len(), MAX_NAME_LEN);
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["\"a b\"", "123", "9lives.x", "ok_name", "ünïcode", "'q'", ""] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once, "raw {raw:?}");
            assert!(once.len() <= MAX_NAME_LEN);
            assert!(!once.starts_with(|c: char| c.is_ascii_digit()));
            assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }

    #[test]
    fn strip_qualifier_keeps_first_remainder() {
        assert_eq!(strip_qualifier("orders.id"), "id");
        assert_eq!(strip_qualifier("id"), "id");
        assert_eq!(strip_qualifier("db.orders.id"), "orders.id");
    }

    #[test]
    fn duplicates_get_numeric_suffixes() {
        let mut fields = vec![
            SchemaField::new("a b", CanonicalType::String),
            SchemaField::new("a-b", CanonicalType::Integer),
            SchemaField::new("a_b", CanonicalType::Float),
            SchemaField::new("a_b_2", CanonicalType::Float),
        ];
        dedupe_names(&mut fields);
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a_b", "a_b_2", "a_b_3", "a_b_2_2"]);
    }

    #[test]
    fn long_duplicates_stay_within_limit() {
        let long = "c".repeat(150);
        let mut fields = vec![
            SchemaField::new(&long, CanonicalType::String),
            SchemaField::new(&long, CanonicalType::String),
        ];
        dedupe_names(&mut fields);
        assert_eq!(fields[1].name.len(), MAX_NAME_LEN);
        assert!(fields[1].name.ends_with("_2"));
        assert_ne!(fields[0].name, fields[1].name);
    }

    #[test]
    fn manifest_roundtrip() {
        let fields = vec![
            SchemaField::new("id", CanonicalType::Integer),
            SchemaField::new("created at", CanonicalType::Datetime),
            SchemaField::new("ratio", CanonicalType::Float),
        ];
        let text = format_manifest(&fields);
        assert_eq!(text, "id:INTEGER,created_at:DATETIME,ratio:FLOAT");
        assert_eq!(parse_manifest(&text), fields);
    }

    #[test]
    fn parse_manifest_tolerates_noise() {
        let fields = parse_manifest(" a:integer , ,weird:JSON,bare,x:y:STRING\n");
        assert_eq!(
            fields,
            vec![
                SchemaField::new("a", CanonicalType::Integer),
                SchemaField::new("weird", CanonicalType::String),
                SchemaField::new("x_y", CanonicalType::String),
            ]
        );
    }

    #[test]
    fn read_schema_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_schema(&dir.path().join("nope_schema.csv")).is_empty());
    }

    #[test]
    fn manifest_path_convention() {
        let p = manifest_path(Path::new("/data"), "orders");
        assert_eq!(p, PathBuf::from("/data/orders_schema.csv"));
    }
}
