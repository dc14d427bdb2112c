use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::EffectiveConfig;
use crate::pipeline::{Artifact, FileKind, Pipeline, Transform};

pub mod rev;

pub type TransformParameters = Map<String, Value>;

type TransformConstructor =
    Arc<dyn Fn(TransformParameters, &EffectiveConfig) -> Result<Box<dyn Transform>> + Send + Sync>;

/// Named constructors for the transforms a configuration can refer to.
#[derive(Clone)]
pub struct TransformCatalog {
    constructors: HashMap<String, TransformConstructor>,
}

impl Default for TransformCatalog {
    fn default() -> Self {
        let mut catalog = Self::new();
        register_defaults(&mut catalog);
        catalog
    }
}

impl TransformCatalog {
    /// An empty catalog; `default()` carries the built-ins.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(TransformParameters, &EffectiveConfig) -> Result<Box<dyn Transform>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn create(
        &self,
        name: &str,
        params: TransformParameters,
        config: &EffectiveConfig,
    ) -> Result<Box<dyn Transform>> {
        let constructor = self.constructor(name)?;
        constructor(params, config)
    }

    /// A single-step pipeline that constructs `name` only when it runs,
    /// from an owned snapshot of `params` and `config`.
    pub fn pipeline(
        &self,
        name: &str,
        params: TransformParameters,
        config: Arc<EffectiveConfig>,
    ) -> Result<Pipeline> {
        let constructor = self.constructor(name)?;
        Ok(Pipeline::step(name, move || {
            constructor(params.clone(), &*config)
        }))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn known_transforms(&self) -> Vec<String> {
        let mut names: Vec<_> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    fn constructor(&self, name: &str) -> Result<TransformConstructor> {
        self.constructors.get(name).cloned().ok_or_else(|| {
            anyhow!(
                "Unknown transform '{}'. Available transforms: {}",
                name,
                self.known_transforms().join(", ")
            )
        })
    }
}

pub fn register_defaults(catalog: &mut TransformCatalog) {
    catalog.register("minify-js", |params, _config| {
        Ok(Box::new(MinifyJs::from_params(params)?))
    });
    catalog.register("minify-css", |params, _config| {
        Ok(Box::new(MinifyCss::from_params(params)?))
    });
    catalog.register("minify-html", |params, _config| {
        Ok(Box::new(MinifyHtml::from_params(params)?))
    });
    catalog.register("concat", |params, _config| {
        Ok(Box::new(Concat::from_params(params)?))
    });
    catalog.register("sort", |params, _config| {
        Ok(Box::new(SortFiles::from_params(params)?))
    });
    catalog.register("banner", |params, _config| {
        Ok(Box::new(Banner::from_params(params)?))
    });
    catalog.register("rev", |params, config| {
        Ok(Box::new(rev::Rev::from_params(
            params,
            &config.rev_replace_extensions,
        )?))
    });
}

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*[^!].*?\*/").expect("valid regex"));
static CSS_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static CSS_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*([{};:,>])\s*").expect("valid regex"));
static HTML_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--[^\[].*?-->").expect("valid regex"));
static HTML_GAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">\s+<").expect("valid regex"));

/// Applies `f` to the text of every artifact of `kind`, passing the rest through.
fn rewrite_kind(
    input: Vec<Artifact>,
    kind: FileKind,
    tag: &str,
    f: impl Fn(&str) -> String,
) -> Result<Vec<Artifact>> {
    input
        .into_iter()
        .map(|mut artifact| {
            if artifact.kind() == kind {
                let rewritten = f(artifact.text()?);
                artifact.replace_contents(rewritten);
                artifact.metadata.insert(tag.to_string(), Value::Bool(true));
            }
            Ok(artifact)
        })
        .collect()
}

struct MinifyJs {
    comments: bool,
}

impl MinifyJs {
    fn from_params(mut params: TransformParameters) -> Result<Self> {
        let comments = take_bool(&mut params, "comments")?.unwrap_or(false);
        log_ignored("minify-js", &params);
        Ok(Self { comments })
    }
}

impl Transform for MinifyJs {
    fn name(&self) -> &str {
        "minify-js"
    }

    fn apply(&self, input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        rewrite_kind(input, FileKind::Script, "minified", |text| {
            let text = if self.comments {
                text.to_string()
            } else {
                BLOCK_COMMENT.replace_all(text, "").into_owned()
            };
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .filter(|line| self.comments || !line.starts_with("//"))
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

struct MinifyCss {
    comments: bool,
}

impl MinifyCss {
    fn from_params(mut params: TransformParameters) -> Result<Self> {
        let comments = take_bool(&mut params, "comments")?.unwrap_or(false);
        log_ignored("minify-css", &params);
        Ok(Self { comments })
    }
}

impl Transform for MinifyCss {
    fn name(&self) -> &str {
        "minify-css"
    }

    fn apply(&self, input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        rewrite_kind(input, FileKind::Style, "minified", |text| {
            let text = if self.comments {
                text.to_string()
            } else {
                BLOCK_COMMENT.replace_all(text, "").into_owned()
            };
            let collapsed = CSS_WHITESPACE.replace_all(&text, " ");
            CSS_PUNCTUATION
                .replace_all(&collapsed, "$1")
                .replace(";}", "}")
                .trim()
                .to_string()
        })
    }
}

struct MinifyHtml {
    comments: bool,
}

impl MinifyHtml {
    fn from_params(mut params: TransformParameters) -> Result<Self> {
        let comments = take_bool(&mut params, "comments")?.unwrap_or(false);
        log_ignored("minify-html", &params);
        Ok(Self { comments })
    }
}

impl Transform for MinifyHtml {
    fn name(&self) -> &str {
        "minify-html"
    }

    fn apply(&self, input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        rewrite_kind(input, FileKind::Markup, "minified", |text| {
            let text = if self.comments {
                text.to_string()
            } else {
                HTML_COMMENT.replace_all(text, "").into_owned()
            };
            HTML_GAP.replace_all(&text, "><").trim().to_string()
        })
    }
}

/// Joins every file of the stream into `target`.
pub struct Concat {
    target: PathBuf,
    separator: String,
}

impl Concat {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            separator: "\n".to_string(),
        }
    }

    fn from_params(mut params: TransformParameters) -> Result<Self> {
        let target = take_string(&mut params, "target")
            .ok_or_else(|| anyhow!("concat transform requires 'target' parameter"))?;
        let separator = take_string(&mut params, "separator").unwrap_or_else(|| "\n".into());
        reject_unknown("concat", &params)?;
        Ok(Self {
            target: PathBuf::from(target),
            separator,
        })
    }
}

impl Transform for Concat {
    fn name(&self) -> &str {
        "concat"
    }

    fn apply(&self, input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        let Some(first) = input.first() else {
            return Ok(Vec::new());
        };
        let base = first.base.clone();
        let sources: Vec<Value> = input
            .iter()
            .map(|artifact| Value::String(artifact.relative_str()))
            .collect();

        let mut contents = Vec::new();
        for (idx, artifact) in input.iter().enumerate() {
            if idx > 0 {
                contents.extend_from_slice(self.separator.as_bytes());
            }
            contents.extend_from_slice(&artifact.contents);
        }

        let mut joined = Artifact::new(self.target.clone(), contents);
        joined.base = base;
        joined
            .metadata
            .insert("concat.sources".to_string(), Value::Array(sources));
        Ok(vec![joined])
    }
}

/// Orders the stream by relative path.
pub struct SortFiles {
    descending: bool,
}

impl SortFiles {
    pub fn new() -> Self {
        Self { descending: false }
    }

    fn from_params(mut params: TransformParameters) -> Result<Self> {
        let descending = take_bool(&mut params, "descending")?.unwrap_or(false);
        reject_unknown("sort", &params)?;
        Ok(Self { descending })
    }
}

impl Default for SortFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for SortFiles {
    fn name(&self) -> &str {
        "sort"
    }

    fn apply(&self, mut input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        input.sort_by_key(Artifact::relative_str);
        if self.descending {
            input.reverse();
        }
        Ok(input)
    }
}

struct Banner {
    text: String,
    extensions: Option<Vec<String>>,
}

impl Banner {
    fn from_params(mut params: TransformParameters) -> Result<Self> {
        let text = take_string(&mut params, "text")
            .ok_or_else(|| anyhow!("banner transform requires 'text' parameter"))?;
        let extensions = take_string_list(&mut params, "extensions")?;
        reject_unknown("banner", &params)?;
        Ok(Self { text, extensions })
    }
}

impl Transform for Banner {
    fn name(&self) -> &str {
        "banner"
    }

    fn apply(&self, input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        Ok(input
            .into_iter()
            .map(|mut artifact| {
                let selected = match (&self.extensions, artifact.extension()) {
                    (None, _) => true,
                    (Some(list), Some(ext)) => list.iter().any(|e| e.eq_ignore_ascii_case(&ext)),
                    (Some(_), None) => false,
                };
                if selected {
                    let banner = self.text.replace("{file}", &artifact.relative_str());
                    let mut contents = banner.into_bytes();
                    contents.push(b'\n');
                    contents.extend_from_slice(&artifact.contents);
                    artifact.replace_contents(contents);
                    artifact
                        .metadata
                        .insert("banner".to_string(), json!(true));
                }
                artifact
            })
            .collect())
    }
}

fn log_ignored(transform: &str, params: &TransformParameters) {
    if !params.is_empty() {
        debug!(
            transform,
            ignored = ?params.keys().collect::<Vec<_>>(),
            "Ignoring unsupported minifier options"
        );
    }
}

fn reject_unknown(transform: &str, params: &TransformParameters) -> Result<()> {
    if let Some(key) = params.keys().next() {
        bail!("{transform} transform does not accept parameter '{key}'");
    }
    Ok(())
}

fn take_string(params: &mut TransformParameters, key: &str) -> Option<String> {
    params.remove(key).and_then(|value| match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn take_bool(params: &mut TransformParameters, key: &str) -> Result<Option<bool>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(other) => bail!("parameter '{key}' must be a boolean, got {other}"),
    }
}

fn take_string_list(params: &mut TransformParameters, key: &str) -> Result<Option<Vec<String>>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(vec![s])),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(anyhow!("parameter '{key}' must list strings, got {other}")),
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(other) => bail!("parameter '{key}' must be a string list, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> TransformParameters {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn string_list_accepts_single_string() {
        let mut p = params(&[("extensions", json!(".js"))]);
        assert_eq!(
            take_string_list(&mut p, "extensions").unwrap(),
            Some(vec![".js".to_string()])
        );
        assert!(p.is_empty());
    }

    #[test]
    fn bool_rejects_strings() {
        let mut p = params(&[("comments", json!("yes"))]);
        assert!(take_bool(&mut p, "comments").is_err());
    }

    #[test]
    fn unknown_parameters_are_rejected_for_strict_transforms() {
        let err = Concat::from_params(params(&[
            ("target", json!("app.js")),
            ("sepratr", json!(";")),
        ]))
        .err()
        .expect("typo should be rejected");
        assert!(err.to_string().contains("sepratr"));
    }
}
