//! Three-layer configuration: hard defaults, generic-name fallbacks, user file.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::PipeminError;
use crate::registry::Order;
use crate::tasks::TaskName;
use crate::transforms::TransformParameters;

pub const DEFAULT_CONFIG_FILE: &str = "pipemin.yaml";

pub const DEFAULT_BUILD_TASK: &str = "build";
pub const DEFAULT_CLEAN_DIST_TASK: &str = "clean:dist";
pub const DEFAULT_PACKAGE_TASK: &str = "package";

/// The hard-default layer.
pub fn defaults() -> Value {
    json!({
        "sources": {
            "index": ["src/*.html"],
            "assets": ["src/**/*.js", "src/**/*.css"],
            "build": [],
            "rawAssets": []
        },
        "order": {
            "pipeminMinify": 100,
            "pipeminConcatJs": 50,
            "assetSort": 0
        },
        "tasks": {
            "pipeminBuild": DEFAULT_BUILD_TASK,
            "pipeminCleanDist": DEFAULT_CLEAN_DIST_TASK,
            "pipeminPackage": DEFAULT_PACKAGE_TASK
        },
        "paths": {
            "pipeminDist": "dist/",
            "pipeminPackage": "package.zip"
        },
        "revReplaceExtensions": [".js", ".css", ".html", ".json"],
        "pipeminBuild": {
            "uglify": {},
            "csso": {},
            "htmlMinify": {}
        },
        "pipes": []
    })
}

/// Copies generic keys of `user` onto this recipe's specific keys.
///
/// Generic keys the user left unset stay `null` and fall through.
pub fn fallback_layer(user: &Value) -> Value {
    let generic = |pointer: &str| user.pointer(pointer).cloned().unwrap_or(Value::Null);
    json!({
        "order": {
            "pipeminMinify": generic("/order/minify")
        },
        "tasks": {
            "pipeminBuild": generic("/tasks/build"),
            "pipeminCleanDist": generic("/tasks/cleanDist"),
            "pipeminPackage": generic("/tasks/package")
        },
        "paths": {
            "pipeminDist": generic("/paths/dist"),
            "pipeminPackage": generic("/paths/package")
        },
        "revReplaceExtensions": generic("/revReplaceExtensions")
    })
}

/// Merges the three layers left to right with increasing precedence.
pub fn resolve(defaults: Value, fallback: Value, user: Value) -> Result<Value, PipeminError> {
    let merged = deep_merge(defaults, fallback, "")?;
    deep_merge(merged, user, "")
}

/// Objects merge per key; arrays and scalars are replaced; `null` never
/// overwrites.
pub fn deep_merge(base: Value, overlay: Value, path: &str) -> Result<Value, PipeminError> {
    match (base, overlay) {
        (base, Value::Null) => Ok(base),
        (Value::Null, overlay @ Value::Object(_)) => {
            deep_merge(Value::Object(Map::new()), overlay, path)
        }
        (Value::Null, overlay) => Ok(overlay),
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                let current = base.remove(&key).unwrap_or(Value::Null);
                let merged = deep_merge(current, value, &child_path)?;
                if !merged.is_null() {
                    base.insert(key, merged);
                }
            }
            Ok(Value::Object(base))
        }
        (Value::Object(_), other) => Err(PipeminError::ConfigurationMerge {
            path: display_path(path),
            expected: "object",
            found: kind_of(&other),
        }),
        (other, Value::Object(_)) => Err(PipeminError::ConfigurationMerge {
            path: display_path(path),
            expected: kind_of(&other),
            found: "object",
        }),
        (_, overlay) => Ok(overlay),
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The resolved, read-only configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    pub sources: SourcesConfig,
    pub order: OrderConfig,
    pub tasks: TasksConfig,
    pub paths: PathsConfig,
    pub rev_replace_extensions: Vec<String>,
    pub pipemin_build: MinifyConfig,
    #[serde(default)]
    pub pipes: Vec<PipeSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesConfig {
    #[serde(default, deserialize_with = "one_or_many")]
    pub index: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub assets: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub build: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub raw_assets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfig {
    pub pipemin_minify: Order,
    pub pipemin_concat_js: Order,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipemin_concat_css: Option<Order>,
    pub asset_sort: Order,
}

impl OrderConfig {
    pub fn concat_css(&self) -> Order {
        self.pipemin_concat_css.unwrap_or(self.pipemin_concat_js)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksConfig {
    pub pipemin_build: TaskName,
    pub pipemin_clean_dist: TaskName,
    pub pipemin_package: TaskName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    pub pipemin_dist: PathBuf,
    pub pipemin_package: PathBuf,
}

/// Options handed to the built-in minifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinifyConfig {
    #[serde(default)]
    pub uglify: TransformParameters,
    #[serde(default)]
    pub csso: TransformParameters,
    #[serde(default)]
    pub html_minify: TransformParameters,
}

/// A catalog transform registered against a stage from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeSpec {
    pub stage: String,
    #[serde(default)]
    pub order: Order,
    #[serde(rename = "use")]
    pub transform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<TransformParameters>,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(pattern) => vec![pattern],
        OneOrMany::Many(patterns) => patterns,
    })
}

impl EffectiveConfig {
    /// Resolves the configuration from a user tree (`null` for none).
    pub fn resolve(user: Value) -> Result<Self> {
        let fallback = fallback_layer(&user);
        let merged = resolve(defaults(), fallback, user)?;
        debug!(config = %merged, "Configuration resolved");
        let config: Self = serde_json::from_value(merged)
            .map_err(|err| PipeminError::configuration(err.to_string()))?;
        config.check_paths()?;
        Ok(config)
    }

    /// An empty dist path would resolve to the working directory itself.
    fn check_paths(&self) -> Result<(), PipeminError> {
        let dist = &self.paths.pipemin_dist;
        if dist.components().all(|c| c == Component::CurDir) {
            return Err(PipeminError::configuration(format!(
                "paths.pipeminDist '{}' must name a directory below the working directory",
                dist.display()
            )));
        }
        Ok(())
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Self::resolve(parse_user_config(content)?)
    }

    /// Loads `explicit` when given (it must exist), otherwise `pipemin.yaml`
    /// under `root` when present, otherwise defaults only.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let user = match explicit {
            Some(path) => read_user_config(&root.join(path))?,
            None => {
                let path = root.join(DEFAULT_CONFIG_FILE);
                if path.is_file() {
                    read_user_config(&path)?
                } else {
                    debug!(path = %path.display(), "No configuration file; using defaults");
                    Value::Null
                }
            }
        };
        Self::resolve(user)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn read_user_config(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
    parse_user_config(&content)
        .with_context(|| format!("Failed to parse configuration YAML: {}", path.display()))
}

fn parse_user_config(content: &str) -> Result<Value> {
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_yaml::from_str(content)?;
    Ok(value)
}

/// Wraps a value at a dotted path, e.g. `("order.minify", 50)`.
pub fn at_path(path: &str, value: Value) -> Value {
    path.rsplit('.').fold(value, |inner, key| {
        let mut map = Map::new();
        map.insert(key.to_string(), inner);
        Value::Object(map)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_path_nests_objects() {
        assert_eq!(
            at_path("order.minify", json!(50)),
            json!({ "order": { "minify": 50 } })
        );
    }

    #[test]
    fn null_keys_absent_from_base_are_not_inserted() {
        let merged = deep_merge(json!({ "a": 1 }), json!({ "b": null }), "").unwrap();
        assert_eq!(merged, json!({ "a": 1 }));
    }

    #[test]
    fn nested_nulls_under_new_keys_are_dropped() {
        let merged = deep_merge(
            json!({ "a": 1 }),
            json!({ "extra": { "keep": 2, "drop": null, "deep": { "gone": null } } }),
            "",
        )
        .unwrap();
        assert_eq!(
            merged,
            json!({ "a": 1, "extra": { "keep": 2, "deep": {} } })
        );
    }
}
