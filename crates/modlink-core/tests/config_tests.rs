mod common;

use common::EvalLog;
use indoc::indoc;
use modlink_core::{ConfigError, ExternalPolicy, Initializer, LoadError, Loader, LoaderConfig};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_yaml_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("modlink.yaml");
    fs::write(
        &path,
        indoc! {"
            loaderOptions:
              externalPolicy: lazy
              maxDepth: 8
        "},
    )
    .unwrap();

    let config = LoaderConfig::from_file(&path).unwrap();

    assert_eq!(config.loader_options.external_policy, ExternalPolicy::Lazy);
    assert_eq!(config.loader_options.max_depth, 8);
    assert!(config.loader_options.wrap_empty_exports);
    assert!(config.loader_options.strict_names);
}

#[test]
fn test_load_json_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("modlink.json");
    fs::write(
        &path,
        r#"{ "loaderOptions": { "wrapEmptyExports": false, "strictNames": false } }"#,
    )
    .unwrap();

    let config = LoaderConfig::from_file(&path).unwrap();

    assert!(!config.loader_options.wrap_empty_exports);
    assert!(!config.loader_options.strict_names);
    assert_eq!(config.loader_options.external_policy, ExternalPolicy::Eager);
}

#[test]
fn test_init_file_round_trips_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("modlink.yml");

    LoaderConfig::init_file(&path).unwrap();
    let written = fs::read_to_string(&path).unwrap();
    let config = LoaderConfig::from_file(&path).unwrap();

    assert!(written.contains("externalPolicy: eager"));
    assert_eq!(config, LoaderConfig::default());
}

#[test]
fn test_missing_and_malformed_files() {
    let dir = TempDir::new().unwrap();

    let missing = LoaderConfig::from_file(&dir.path().join("absent.yaml"));
    assert!(matches!(missing, Err(ConfigError::Io(_))));

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ not json").unwrap();
    assert!(matches!(LoaderConfig::from_file(&broken), Err(ConfigError::Json(_))));
}

#[test]
fn test_max_depth_from_config_limits_nested_factories() {
    let config = LoaderConfig::from_yaml_str("loaderOptions:\n  maxDepth: 2\n").unwrap();
    let mut loader = Loader::new(config);
    let log = EvalLog::new();

    for (name, dep) in [("m0", "m1"), ("m1", "m2")] {
        let log = log.clone();
        let init = Initializer::executing_factory(move |require, _, _| {
            log.push(name);
            require.require(dep)?;
            Ok(None)
        });
        loader.register(name, [dep], init).unwrap();
    }
    loader.register("m2", Vec::<String>::new(), common::factory(&log, "m2", 1)).unwrap();

    let err = loader.load("m0").unwrap_err();

    assert!(matches!(err, LoadError::DepthExceeded { ref module, limit: 2 } if module == "m2"));
    assert_eq!(log.entries(), vec!["m0", "m1"]);
}

#[test]
fn test_max_depth_does_not_limit_linking() {
    let config = LoaderConfig::from_yaml_str("loaderOptions:\n  maxDepth: 2\n").unwrap();
    let mut loader = Loader::new(config);
    let log = EvalLog::new();

    for (name, dep) in [("m0", "m1"), ("m1", "m2"), ("m2", "m3"), ("m3", "m4")] {
        loader.register(name, [dep], common::declarative(&log, name, 1, &[])).unwrap();
    }
    loader.register("m4", Vec::<String>::new(), common::factory(&log, "m4", 4)).unwrap();

    loader.load("m0").unwrap();

    assert_eq!(log.entries(), vec!["m4", "m3", "m2", "m1", "m0"]);
}
