use pipemin::config::EffectiveConfig;
use pipemin::transforms::TransformCatalog;
use pipemin::validation::validate_config;
use serde_json::{Value, json};

fn validate(user: Value) -> pipemin::validation::ValidationReport {
    let config = EffectiveConfig::resolve(user).unwrap();
    validate_config(&config, &TransformCatalog::default())
}

#[test]
fn defaults_validate_cleanly() {
    let report = validate(Value::Null);
    assert!(report.is_ok(), "unexpected errors: {:?}", report.errors);
    assert!(report.warnings.is_empty());
}

#[test]
fn validation_catches_missing_params() {
    let report = validate(json!({
        "pipes": [ { "stage": "postMerge", "use": "concat" } ]
    }));
    assert!(!report.is_ok());
    assert!(
        report.errors[0].contains("target"),
        "unexpected errors: {:?}",
        report.errors
    );
}

#[test]
fn validation_catches_unknown_stage_and_transform() {
    let report = validate(json!({
        "pipes": [ { "stage": "postMerj", "use": "sort" }, { "stage": "postMerge", "use": "uglify" } ]
    }));
    assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
    assert!(report.errors[0].contains("unknown stage"));
    assert!(report.errors[1].contains("uglify"));
}

#[test]
fn invalid_source_glob_is_an_error() {
    let report = validate(json!({ "sources": { "assets": ["src/[*.js"] } }));
    assert!(!report.is_ok());
    assert!(report.errors[0].contains("sources.assets"));
}

#[test]
fn questionable_settings_only_warn() {
    let report = validate(json!({
        "paths": { "package": "bundle.tar" },
        "revReplaceExtensions": ["html"],
        "tasks": { "build": "", "cleanDist": false, "package": "" }
    }));
    assert!(report.is_ok(), "unexpected errors: {:?}", report.errors);
    assert_eq!(report.warnings.len(), 3, "{:?}", report.warnings);
}
