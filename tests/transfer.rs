// tests/transfer.rs

use anyhow::Result;
use hivebridge::cloud::{
    FakeCredentials, FakeObjectStore, FakeWarehouse, JobState, SourceFormat, WriteDisposition,
};
use hivebridge::schema::{SchemaField, manifest_path, write_schema};
use hivebridge::*;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct Harness {
    store: FakeObjectStore,
    warehouse: FakeWarehouse,
    orchestrator: TransferOrchestrator,
}

fn harness() -> Result<Harness> {
    let store = FakeObjectStore::new();
    store.add_bucket("test");
    let warehouse = FakeWarehouse::new();

    let uploader = ChunkedUploader::new(Arc::new(store.clone())).with_chunk_size(16);
    let jobs = WarehouseJobRunner::new(
        Arc::new(warehouse.clone()),
        Arc::new(FakeCredentials::new("proj")),
    )
    .with_poll_interval(Duration::from_millis(1));
    let orchestrator = TransferOrchestrator::new(
        uploader,
        jobs,
        WorkerPool::new("upload", Some(3))?,
        WorkerPool::new("load", Some(2))?,
    );
    Ok(Harness {
        store,
        warehouse,
        orchestrator,
    })
}

fn stage(dir: &std::path::Path, tables: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for table in tables {
        let path = dir.join(format!("{table}.csv"));
        fs::write(&path, format!("1,{table}\n2,{table}\n"))?;
        write_schema(
            &manifest_path(dir, table),
            &[
                SchemaField::new("id", CanonicalType::Integer),
                SchemaField::new("label", CanonicalType::String),
            ],
        )?;
        files.push(path);
    }
    Ok(files)
}

#[test]
fn one_failed_upload_does_not_stop_the_others() -> Result<()> {
    let dir = tempdir()?;
    let tables = ["t1", "t2", "t3", "t4", "t5"];
    let files = stage(dir.path(), &tables)?;
    let h = harness()?;
    h.store.fail_uploads("sales/t3.csv", u32::MAX);

    let report = h.orchestrator.transfer(files, "test", "sales", "sales", ".csv");

    assert_eq!(report.loaded_paths().len(), 4);
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].table, "t3");
    assert!(failures[0].remote_path.is_empty());
    assert_eq!(h.store.upload_attempts("sales/t3.csv"), 3);
    assert_eq!(h.warehouse.load_submissions("t3"), 0);

    let requested: Vec<String> = tables.iter().map(ToString::to_string).collect();
    assert!(!report.is_complete(&requested));

    let loaded = h.warehouse.loaded("proj.sales.t1").expect("t1 loaded");
    assert_eq!(loaded.source_uri, "gs://test/sales/t1.csv");
    assert_eq!(loaded.config.source_format, SourceFormat::Csv);
    assert_eq!(loaded.config.write_disposition, WriteDisposition::Truncate);
    assert!(!loaded.config.autodetect);
    assert_eq!(
        loaded.config.schema,
        vec![
            ("id".to_string(), "INTEGER".to_string()),
            ("label".to_string(), "STRING".to_string()),
        ]
    );
    assert!(h.warehouse.has_dataset("proj.sales"));
    Ok(())
}

#[test]
fn report_preserves_input_order() -> Result<()> {
    let dir = tempdir()?;
    let tables = ["z", "a", "m"];
    let files = stage(dir.path(), &tables)?;
    let h = harness()?;

    let report = h.orchestrator.transfer(files, "test", "db", "db", ".csv");
    let names: Vec<&str> = report.files.iter().map(|f| f.table.as_str()).collect();
    assert_eq!(names, tables);
    assert!(report.files.iter().all(|f| f.message.ends_with("OK")));
    Ok(())
}

#[test]
fn missing_manifest_falls_back_to_autodetect() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("raw.csv");
    fs::write(&file, "x,y\n")?;
    let h = harness()?;

    let report = h.orchestrator.transfer(vec![file], "test", "db", "db", ".csv");
    assert_eq!(report.loaded_paths(), vec!["gs://test/db/raw.csv"]);

    let loaded = h.warehouse.loaded("proj.db.raw").expect("raw loaded");
    assert!(loaded.config.autodetect);
    assert!(loaded.config.schema.is_empty());
    Ok(())
}

#[test]
fn failed_load_jobs_are_retried_then_reported() -> Result<()> {
    let dir = tempdir()?;
    let files = stage(dir.path(), &["flaky", "broken"])?;
    let h = harness()?;
    h.warehouse.fail_loads("flaky", 2);
    h.warehouse.fail_loads("broken", u32::MAX);

    let report = h.orchestrator.transfer(files, "test", "db", "db", ".csv");

    assert_eq!(report.loaded_tables().into_iter().collect::<Vec<_>>(), vec!["flaky"]);
    assert_eq!(h.warehouse.load_submissions("flaky"), 3);
    assert_eq!(h.warehouse.load_submissions("broken"), 3);

    let broken = &report.failures()[0];
    assert_eq!(broken.table, "broken");
    assert!(broken.message.starts_with("exporting to warehouse `broken`"));
    assert!(broken.message.contains("Error while reading data"));

    // the destination table is created before the first submission
    assert!(h.warehouse.loaded("proj.db.broken").is_none());
    assert!(h.warehouse.has_table("proj.db.broken"));
    Ok(())
}

#[test]
fn load_jobs_poll_until_terminal() -> Result<()> {
    let dir = tempdir()?;
    let files = stage(dir.path(), &["slow"])?;
    let h = harness()?;
    h.warehouse.script_jobs(vec![
        JobState::Pending,
        JobState::Pending,
        JobState::Running,
        JobState::Running,
        JobState::Done,
    ]);

    let report = h.orchestrator.transfer(files, "test", "db", "db", ".csv");
    assert_eq!(report.loaded_paths().len(), 1);
    assert!(h.warehouse.has_table("proj.db.slow"));
    Ok(())
}
