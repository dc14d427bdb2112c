//! Content-hash file names and rewrite references to them.

use std::collections::BTreeMap;

use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{TransformParameters, reject_unknown, take_string_list};
use crate::pipeline::{Artifact, Transform};

const HASH_LEN: usize = 8;

pub struct Rev {
    include: Vec<String>,
    replace_in: Vec<String>,
}

impl Rev {
    pub fn new(include: Vec<String>, replace_in: Vec<String>) -> Self {
        Self {
            include: normalize(include),
            replace_in: normalize(replace_in),
        }
    }

    pub(super) fn from_params(
        mut params: TransformParameters,
        rev_replace_extensions: &[String],
    ) -> Result<Self> {
        let include = take_string_list(&mut params, "include")?
            .unwrap_or_else(|| vec![".js".to_string(), ".css".to_string()]);
        let replace_in = take_string_list(&mut params, "replaceIn")?
            .unwrap_or_else(|| rev_replace_extensions.to_vec());
        reject_unknown("rev", &params)?;
        Ok(Self::new(include, replace_in))
    }

    fn matches(list: &[String], artifact: &Artifact) -> bool {
        artifact
            .extension()
            .map(|ext| list.iter().any(|e| *e == ext))
            .unwrap_or(false)
    }
}

fn normalize(extensions: Vec<String>) -> Vec<String> {
    extensions
        .into_iter()
        .map(|ext| {
            let ext = ext.to_lowercase();
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .collect()
}

pub fn content_hash(contents: &[u8]) -> String {
    let digest = Sha256::digest(contents);
    let hex = format!("{:x}", digest);
    hex[..HASH_LEN].to_string()
}

fn revved_name(artifact: &Artifact, hash: &str) -> std::path::PathBuf {
    let stem = artifact
        .relative
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_name = match artifact.relative.extension() {
        Some(ext) => format!("{stem}-{hash}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{hash}"),
    };
    artifact.relative.with_file_name(file_name)
}

/// Alternation of the original paths, longest first so `vendor/app.js`
/// wins over `app.js` at the same position.
fn reference_pattern(renames: &BTreeMap<String, String>) -> Result<Regex> {
    let mut originals: Vec<&str> = renames.keys().map(String::as_str).collect();
    originals.sort_by(|a, b| b.len().cmp(&a.len()));
    let alternation = originals
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    Ok(Regex::new(&alternation)?)
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Replaces whole references only: a match glued to another path character
/// (`myapp.js`, `app.js.map`) is left alone.
fn rewrite_references(
    text: &str,
    references: &Regex,
    renames: &BTreeMap<String, String>,
) -> String {
    let mut rewritten = String::with_capacity(text.len());
    let mut last = 0;
    let mut pos = 0;
    while let Some(found) = references.find_at(text, pos) {
        let before = text[..found.start()].chars().next_back();
        let after = text[found.end()..].chars().next();
        if before.is_some_and(is_path_char) || after.is_some_and(is_path_char) {
            pos = found.start()
                + text[found.start()..]
                    .chars()
                    .next()
                    .map_or(1, char::len_utf8);
            continue;
        }
        let Some(target) = renames.get(found.as_str()) else {
            pos = found.end();
            continue;
        };
        rewritten.push_str(&text[last..found.start()]);
        rewritten.push_str(target);
        last = found.end();
        pos = found.end();
    }
    rewritten.push_str(&text[last..]);
    rewritten
}

impl Transform for Rev {
    fn name(&self) -> &str {
        "rev"
    }

    fn apply(&self, mut input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        let mut renames = BTreeMap::new();
        for artifact in input.iter_mut() {
            if !Self::matches(&self.include, artifact) {
                continue;
            }
            let original = artifact.relative_str();
            let hash = content_hash(&artifact.contents);
            artifact.relative = revved_name(artifact, &hash);
            artifact
                .metadata
                .insert("rev.original".to_string(), Value::String(original.clone()));
            artifact
                .metadata
                .insert("rev.hash".to_string(), Value::String(hash));
            renames.insert(original, artifact.relative_str());
        }

        if renames.is_empty() {
            return Ok(input);
        }
        let references = reference_pattern(&renames)?;

        for artifact in input.iter_mut() {
            if !Self::matches(&self.replace_in, artifact) {
                continue;
            }
            let Ok(text) = std::str::from_utf8(&artifact.contents) else {
                debug!(file = %artifact.relative_str(), "Skipping reference rewrite of binary file");
                continue;
            };
            let rewritten = rewrite_references(text, &references, &renames);
            artifact.replace_contents(rewritten);
        }

        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_truncated_sha256() {
        assert_eq!(content_hash(b"var a = 1;"), "f9d67ab9");
    }

    #[test]
    fn only_whole_references_are_rewritten() {
        let page = Artifact::new(
            "index.html",
            concat!(
                r#"<script src="app.js"></script>"#,
                r#"<script src="https://cdn.example/myapp.js"></script>"#,
                r#"<link href="app.js.map">"#,
            ),
        );
        let rev = Rev::new(vec![".js".into()], vec![".html".into()]);
        let output = rev
            .apply(vec![Artifact::new("app.js", "var a = 1;"), page])
            .unwrap();

        let revved = format!("app-{}.js", content_hash(b"var a = 1;"));
        assert_eq!(output[0].relative_str(), revved);
        assert_eq!(
            output[1].text().unwrap(),
            format!(
                r#"<script src="{revved}"></script><script src="https://cdn.example/myapp.js"></script><link href="app.js.map">"#
            )
        );
    }

    #[test]
    fn longer_paths_win_over_their_suffixes() {
        let page = Artifact::new("index.html", r#"<script src="vendor/app.js"></script><script src="app.js"></script>"#);
        let rev = Rev::new(vec![".js".into()], vec![".html".into()]);
        let output = rev
            .apply(vec![
                Artifact::new("app.js", "a"),
                Artifact::new("vendor/app.js", "b"),
                page,
            ])
            .unwrap();

        let expected = format!(
            r#"<script src="vendor/app-{}.js"></script><script src="app-{}.js"></script>"#,
            content_hash(b"b"),
            content_hash(b"a")
        );
        assert_eq!(output[2].text().unwrap(), expected);
    }

    #[test]
    fn extensions_gain_leading_dot() {
        assert_eq!(
            normalize(vec!["JS".into(), ".css".into()]),
            vec![".js".to_string(), ".css".to_string()]
        );
    }
}
