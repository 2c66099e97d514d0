use std::env;
use std::fs::write;
use std::path::Path;

use repo_wiki::config::{WikiConfig, DEFAULT_GEMINI_MODEL, DEFAULT_GROQ_MODEL};
use repo_wiki::load_config::{load_config, load_provider_settings};
use serial_test::serial;
use tempfile::NamedTempFile;

const PROVIDER_VARS: [&str; 5] = [
    "GROQ_API_KEYS",
    "GROQ_API_KEY",
    "GOOGLE_API_KEY",
    "GROQ_MODEL",
    "GEMINI_MODEL",
];

fn clear_provider_env() {
    for var in PROVIDER_VARS {
        env::remove_var(var);
    }
}

#[test]
fn no_path_means_defaults() {
    let config = load_config(None).expect("defaults load");
    assert_eq!(config, WikiConfig::default());
    assert_eq!(config.materialize.max_files, 40);
    assert_eq!(config.orchestrate.max_attempts, 3);
}

#[test]
fn empty_file_means_defaults() {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), "\n  \n").unwrap();
    assert_eq!(load_config(Some(file.path())).unwrap(), WikiConfig::default());
}

#[test]
fn partial_yaml_overrides_only_given_fields() {
    let yaml = r#"
materialize:
  max_files: 10
  extensions: [rs, py]
orchestrate:
  rate_limit_backoff_secs: 1.5
cache:
  capacity: 2
"#;
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();

    let config = load_config(Some(file.path())).expect("config should load");
    assert_eq!(config.materialize.max_files, 10);
    assert_eq!(config.materialize.extensions, vec!["rs", "py"]);
    assert_eq!(config.materialize.max_file_bytes, 50_000);
    assert_eq!(config.orchestrate.backoff().as_millis(), 1500);
    assert_eq!(config.extract.signature_threshold, 10);
    assert_eq!(config.cache.capacity, 2);
}

#[test]
fn invalid_yaml_and_missing_file_are_errors() {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), "materialize: [not, a, map]\n").unwrap();
    let err = load_config(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));

    let err = load_config(Some(Path::new("/no/such/repo-wiki.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn unusable_backoff_is_rejected_at_load() {
    for value in [".inf", ".nan", "-5", "1e300"] {
        let file = NamedTempFile::new().expect("temp file");
        write(
            file.path(),
            format!("orchestrate:\n  rate_limit_backoff_secs: {value}\n"),
        )
        .unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(
            err.to_string().contains("Invalid configuration"),
            "{value}: {err}"
        );
    }
}

#[test]
#[serial]
fn keys_and_models_come_from_env() {
    clear_provider_env();
    env::set_var("GROQ_API_KEYS", "gsk_a, gsk_b,,");
    env::set_var("GROQ_API_KEY", "gsk_ignored");
    env::set_var("GOOGLE_API_KEY", "AIza_one");
    env::set_var("GROQ_MODEL", "llama-test");

    let settings = load_provider_settings().expect("settings load");
    assert_eq!(settings.groq_keys, vec!["gsk_a", "gsk_b"]);
    assert_eq!(settings.gemini_keys, vec!["AIza_one"]);
    assert_eq!(settings.all_keys(), vec!["gsk_a", "gsk_b", "AIza_one"]);
    assert_eq!(settings.groq_model, "llama-test");
    assert_eq!(settings.gemini_model, DEFAULT_GEMINI_MODEL);

    let debug = format!("{settings:?}");
    assert!(!debug.contains("gsk_a"), "secrets must not be logged");
    clear_provider_env();
}

#[test]
#[serial]
fn single_groq_key_fallback() {
    clear_provider_env();
    env::set_var("GROQ_API_KEY", "gsk_single");

    let settings = load_provider_settings().unwrap();
    assert_eq!(settings.groq_keys, vec!["gsk_single"]);
    assert!(settings.gemini_keys.is_empty());
    assert_eq!(settings.groq_model, DEFAULT_GROQ_MODEL);
    clear_provider_env();
}

#[test]
#[serial]
fn missing_keys_fail_fast() {
    clear_provider_env();
    let err = load_provider_settings().unwrap_err();
    assert!(err.to_string().contains("No API keys found"));
}
