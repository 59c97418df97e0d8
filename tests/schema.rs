// tests/schema.rs

use hivebridge::schema::{
    CanonicalType, MAX_NAME_LEN, SchemaField, dedupe_names, format_manifest, normalize_name,
    parse_manifest,
};
use std::collections::HashSet;

fn awkward_names() -> Vec<String> {
    vec![
        "plain".into(),
        "2024 revenue".into(),
        "\"quoted\"".into(),
        "a-b.c/d".into(),
        "ünïcode".into(),
        "x".repeat(300),
        "9".repeat(200),
        String::new(),
        "___".into(),
    ]
}

#[test]
fn normalized_names_are_stable_and_bounded() {
    for name in awkward_names() {
        let once = normalize_name(&name);
        assert_eq!(normalize_name(&once), once, "not idempotent for {name:?}");
        assert!(once.chars().count() <= MAX_NAME_LEN);
        assert!(
            once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "bad character in {once:?}"
        );
        assert!(!once.starts_with(|c: char| c.is_ascii_digit()));
    }
}

#[test]
fn deduped_names_are_unique_and_bounded() {
    let long = "y".repeat(MAX_NAME_LEN);
    let mut fields: Vec<SchemaField> = ["id", "id", "id", "id_2", &long, &long]
        .iter()
        .map(|n| SchemaField::new(n, CanonicalType::String))
        .collect();
    dedupe_names(&mut fields);

    let names: HashSet<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names.len(), fields.len());
    assert!(fields.iter().all(|f| f.name.len() <= MAX_NAME_LEN));
    assert_eq!(fields[0].name, "id");
}

#[test]
fn manifest_text_survives_a_reparse() {
    let fields = vec![
        SchemaField::new("id", CanonicalType::Integer),
        SchemaField::new("price", CanonicalType::Float),
        SchemaField::new("active", CanonicalType::Boolean),
        SchemaField::new("created", CanonicalType::Datetime),
        SchemaField::new("note", CanonicalType::String),
    ];
    let text = format_manifest(&fields);
    assert_eq!(
        text,
        "id:INTEGER,price:FLOAT,active:BOOLEAN,created:DATETIME,note:STRING"
    );
    assert_eq!(parse_manifest(&text), fields);
}

#[test]
fn native_tags_fold_into_five_types() {
    let cases = [
        ("BIGINT_TYPE", CanonicalType::Integer),
        ("TINYINT_TYPE", CanonicalType::Integer),
        ("DECIMAL_TYPE", CanonicalType::Float),
        ("BOOLEAN_TYPE", CanonicalType::Boolean),
        ("TIMESTAMP_TYPE", CanonicalType::Datetime),
        ("DATE", CanonicalType::Datetime),
        ("VARCHAR_TYPE", CanonicalType::String),
        ("MAP_TYPE", CanonicalType::String),
    ];
    for (tag, expected) in cases {
        assert_eq!(CanonicalType::from_native(tag), expected, "{tag}");
    }
}
