use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::{Pattern, glob};
use tracing::{debug, warn};

use crate::pipeline::{Artifact, Pipeline, Transform};

const GLOB_CHARS: [char; 4] = ['*', '?', '[', '{'];

/// Glob patterns, relative to a working directory, that read files into a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSet {
    root: PathBuf,
    patterns: Vec<String>,
}

impl SourceSet {
    pub fn new(root: impl Into<PathBuf>, patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            root: root.into(),
            patterns: patterns.into_iter().collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Reads every file matching the patterns; a file matched twice is read once.
    pub fn read(&self) -> Result<Vec<Artifact>> {
        let mut artifacts: Vec<Artifact> = Vec::new();
        for pattern in &self.patterns {
            let base = self.root.join(glob_base(pattern));
            let full = rooted_pattern(&self.root, pattern);
            let matches =
                glob(&full).with_context(|| format!("Invalid glob pattern: {pattern}"))?;

            let mut found = false;
            for entry in matches {
                let path = entry.with_context(|| format!("Failed to read match of {pattern}"))?;
                if !path.is_file() {
                    continue;
                }
                found = true;
                if artifacts.iter().any(|a| a.path() == path) {
                    continue;
                }
                artifacts.push(Artifact::load(&base, &path)?);
            }
            if !found {
                warn!(pattern = pattern.as_str(), "Source pattern matched no files");
            }
        }
        debug!(files = artifacts.len(), patterns = ?self.patterns, "Sources read");
        Ok(artifacts)
    }

    /// A passthrough step that appends the source files to whatever flows in.
    pub fn pipeline(&self, name: impl Into<String>) -> Pipeline {
        if self.is_empty() {
            return Pipeline::Identity;
        }
        let set = self.clone();
        Pipeline::step(name, move || {
            Ok(Box::new(SourceStep { set: set.clone() }) as Box<dyn Transform>)
        })
    }
}

struct SourceStep {
    set: SourceSet,
}

impl Transform for SourceStep {
    fn name(&self) -> &str {
        "source"
    }

    fn apply(&self, mut input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        input.extend(self.set.read()?);
        Ok(input)
    }
}

/// Joins `pattern` below `root`, escaping glob metacharacters in `root`.
pub fn rooted_pattern(root: &Path, pattern: &str) -> String {
    let escaped = Pattern::escape(&root.to_string_lossy());
    Path::new(&escaped).join(pattern).to_string_lossy().into_owned()
}

/// Literal directory prefix of a glob pattern; files keep their path below it.
pub fn glob_base(pattern: &str) -> PathBuf {
    let parts: Vec<&str> = pattern.split('/').collect();
    let literal = parts
        .iter()
        .take_while(|part| !part.contains(GLOB_CHARS))
        .count();

    let dirs = if literal == parts.len() {
        // a plain file path: its parent directory
        &parts[..parts.len().saturating_sub(1)]
    } else {
        &parts[..literal]
    };
    dirs.iter()
        .filter(|part| !part.is_empty() && **part != ".")
        .collect::<PathBuf>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_stops_at_first_wildcard() {
        assert_eq!(glob_base("src/**/*.js"), PathBuf::from("src"));
        assert_eq!(glob_base("src/js/*.js"), PathBuf::from("src/js"));
        assert_eq!(glob_base("*.html"), PathBuf::new());
    }

    #[test]
    fn root_metacharacters_are_escaped() {
        let pattern = rooted_pattern(Path::new("site[1]"), "src/*.html");
        assert_eq!(pattern, Path::new("site[[]1[]]").join("src/*.html").to_string_lossy());
        assert!(Pattern::new(&pattern).unwrap().matches("site[1]/src/index.html"));
    }

    #[test]
    fn base_of_plain_file_is_its_directory() {
        assert_eq!(glob_base("src/index.html"), PathBuf::from("src"));
        assert_eq!(glob_base("./index.html"), PathBuf::new());
    }
}
