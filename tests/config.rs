use std::fs;

use assert_matches::assert_matches;

use resultdb_cache::config::{ColumnOverrides, Config, ConfigLoader, DEFAULT_CACHE_DIR};
use resultdb_cache::domain::AggregationLevel;
use resultdb_cache::error::CacheError;

#[test]
fn defaults_without_config() {
    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert!(resolved.cache_root.ends_with(DEFAULT_CACHE_DIR));
    assert!(!resolved.debug);
    assert_eq!(resolved.columns.experiment, "experiment_uuid");
    assert_eq!(resolved.columns.decoy, "is_decoy");
    assert_eq!(resolved.columns.rollup_global_q_value, None);
}

#[test]
fn column_overrides() {
    let config = Config {
        cache_root: Some("/data/cache".to_string()),
        debug: Some(true),
        columns: Some(ColumnOverrides {
            decoy: Some("decoy".to_string()),
            rollup_global_q_value: Some("sample_q_value".to_string()),
            ..ColumnOverrides::default()
        }),
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.cache_root, "/data/cache");
    assert!(resolved.debug);
    assert_eq!(resolved.columns.decoy, "decoy");
    assert_eq!(resolved.columns.q_value, "q_value");
    assert_eq!(
        resolved
            .columns
            .global_q_value_for(AggregationLevel::SampleRollupPeptides),
        "sample_q_value"
    );
}

#[test]
fn reads_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rdbc.json");
    fs::write(
        &path,
        r#"{"cache_root": "/tmp/rdbc-cache", "columns": {"experiment": "experiment_id"}}"#,
    )
    .unwrap();
    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.cache_root, "/tmp/rdbc-cache");
    assert_eq!(resolved.columns.experiment, "experiment_id");
}

#[test]
fn explicit_missing_file_fails() {
    let err = ConfigLoader::resolve(Some("/nonexistent/rdbc.json")).unwrap_err();
    assert_matches!(err, CacheError::ConfigRead(_));
}

#[test]
fn malformed_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rdbc.json");
    fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, CacheError::ConfigParse(_));
}
