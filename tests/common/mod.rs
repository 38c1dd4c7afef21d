#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use arrow::array::{ArrayRef, BooleanArray, Float64Array, ListArray, StringArray};
use arrow::datatypes::Int32Type;
use arrow::record_batch::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::ArrowWriter;
use tempfile::TempDir;

use resultdb_cache::error::CacheError;
use resultdb_cache::fetch::PartitionSource;
use resultdb_cache::store::Cache;

pub struct Row {
    pub peptide: &'static str,
    pub q_value: f64,
    pub global_q_value: f64,
    pub is_decoy: bool,
}

pub fn row(peptide: &'static str, q_value: f64, global_q_value: f64, is_decoy: bool) -> Row {
    Row {
        peptide,
        q_value,
        global_q_value,
        is_decoy,
    }
}

pub fn peptide_batch(rows: &[Row]) -> RecordBatch {
    let peptides: ArrayRef = Arc::new(StringArray::from_iter_values(
        rows.iter().map(|row| row.peptide),
    ));
    let q_values: ArrayRef = Arc::new(Float64Array::from_iter_values(
        rows.iter().map(|row| row.q_value),
    ));
    let global_q_values: ArrayRef = Arc::new(Float64Array::from_iter_values(
        rows.iter().map(|row| row.global_q_value),
    ));
    let decoys: ArrayRef = Arc::new(BooleanArray::from(
        rows.iter().map(|row| row.is_decoy).collect::<Vec<_>>(),
    ));
    let charges: ArrayRef = Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(
        rows.iter().map(|_| Some(vec![Some(2), Some(3)])),
    ));
    RecordBatch::try_from_iter(vec![
        ("peptide", peptides),
        ("q_value", q_values),
        ("global_q_value", global_q_values),
        ("is_decoy", decoys),
        ("charges", charges),
    ])
    .unwrap()
}

pub fn parquet_bytes(batch: &RecordBatch) -> Vec<u8> {
    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), None).unwrap();
    writer.write(batch).unwrap();
    writer.into_inner().unwrap()
}

pub fn write_partition(path: &Utf8Path, batch: &RecordBatch) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, parquet_bytes(batch)).unwrap();
}

pub fn temp_cache() -> (TempDir, Cache) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("cache")).unwrap();
    (dir, Cache::new_with_root(root))
}

pub fn relative(level: &str, experiment: &str, file: &str) -> String {
    format!("result-db/v1/{level}.parquet/experiment_uuid={experiment}/{file}")
}

/// Serves fixed bytes for every URL and counts requests.
#[derive(Default)]
pub struct MockSource {
    pub body: Vec<u8>,
    pub calls: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn with_body(body: Vec<u8>) -> Self {
        Self {
            body,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl PartitionSource for MockSource {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, CacheError> {
        self.calls.lock().unwrap().push(url.to_string());
        fs::write(destination, &self.body).unwrap();
        Ok(self.body.len() as u64)
    }
}

/// Writes part of a body and then fails like a dropped connection.
pub struct TruncatingSource;

impl PartitionSource for TruncatingSource {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, CacheError> {
        fs::write(destination, b"PAR1 partial").unwrap();
        Err(CacheError::DownloadHttp {
            url: url.to_string(),
            message: "connection reset".to_string(),
        })
    }
}
