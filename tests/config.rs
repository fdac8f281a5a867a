mod common;

use std::collections::HashMap;
use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use expdb::codec::Codecs;
use expdb::config::{BackendConfig, Config, ConfigLoader, Environment, normalize_bucket};
use expdb::error::ExpdbError;

use common::scratch;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn parse_config_file() {
    let config: Config = serde_json::from_str(
        r#"{
            "environment": "production",
            "database": "/var/lib/expdb/catalog.sqlite",
            "bucket": "expdb_prod",
            "cache_dir": "/var/cache/expdb",
            "copy_command": ["gsutil", "cp"]
        }"#,
    )
    .unwrap();
    let resolved = ConfigLoader::resolve_config(config, env(&[])).unwrap();
    assert_eq!(resolved.environment, Environment::Production);
    assert!(!resolved.debug);
    assert_eq!(resolved.database, "/var/lib/expdb/catalog.sqlite");
    assert_eq!(
        resolved.backend,
        BackendConfig::ObjectStore {
            bucket: "gs://expdb_prod".to_string(),
            cache_dir: Some(Utf8PathBuf::from("/var/cache/expdb")),
            copy_command: Some(vec!["gsutil".to_string(), "cp".to_string()]),
        }
    );
}

#[test]
fn environment_overrides_file() {
    let config = Config {
        environment: Some(Environment::Production),
        storage_root: Some("from-file".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(
        config,
        env(&[
            ("EXPDB_ENV", "dev"),
            ("EXPDB_DATABASE", "override.sqlite"),
            ("EXPDB_STORAGE_ROOT", "from-env"),
        ]),
    )
    .unwrap();
    assert_eq!(resolved.environment, Environment::Development);
    assert!(resolved.debug);
    assert_eq!(resolved.database, "override.sqlite");
    assert_eq!(
        resolved.backend,
        BackendConfig::Local {
            root: Utf8PathBuf::from("from-env")
        }
    );
}

#[test]
fn bucket_from_environment_switches_backend() {
    let resolved = ConfigLoader::resolve_config(
        Config::default(),
        env(&[("EXPDB_BUCKET", "s3://lab-data"), ("EXPDB_CACHE_DIR", "cache")]),
    )
    .unwrap();
    assert_eq!(
        resolved.backend,
        BackendConfig::ObjectStore {
            bucket: "s3://lab-data".to_string(),
            cache_dir: Some(Utf8PathBuf::from("cache")),
            copy_command: None,
        }
    );
}

#[test]
fn unknown_environment_is_rejected() {
    assert_matches!(
        ConfigLoader::resolve_config(Config::default(), env(&[("EXPDB_ENV", "staging")])),
        Err(ExpdbError::ConfigParse(_))
    );
}

#[test]
fn bucket_normalization() {
    assert_eq!(normalize_bucket("expdb_dev"), "gs://expdb_dev");
    assert_eq!(normalize_bucket("gs://expdb_dev"), "gs://expdb_dev");
}

#[test]
fn explicit_config_file_errors() {
    let (_dir, root) = scratch();
    let missing = root.join("missing.json");
    assert_matches!(
        ConfigLoader::resolve(Some(missing.as_str())),
        Err(ExpdbError::ConfigRead(_))
    );

    let broken = root.join("broken.json");
    fs::write(&broken, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(broken.as_str())),
        Err(ExpdbError::ConfigParse(_))
    );
}

#[test]
fn local_backend_builds_storage() {
    let (_dir, root) = scratch();
    let backend = BackendConfig::Local { root: root.clone() };
    let storage = backend.build(Codecs::system()).unwrap();
    assert_eq!(storage.cache_dir(), Some(root.as_path()));

    let invalid = BackendConfig::ObjectStore {
        bucket: "gs://bad/bucket/path".to_string(),
        cache_dir: None,
        copy_command: None,
    };
    assert_matches!(
        invalid.build(Codecs::system()).err(),
        Some(ExpdbError::InvalidBucketFormat(_))
    );
}
