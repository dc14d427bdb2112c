//! The primary build transform: resolves `<!-- build:js|css TARGET -->`
//! blocks in markup against the asset stream and runs each referenced group
//! through the pipeline of its kind.

use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;
use tracing::{debug, warn};

use crate::compose;
use crate::config::OrderConfig;
use crate::observability::MetricsCollector;
use crate::pipeline::{Artifact, FileKind, Pipeline, Transform};
use crate::registry::{Fragment, Order, PipeRegistry, stage};
use crate::transforms::Concat;

static BUILD_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*build:(js|css)\s+(\S+?)\s*-->(.*?)<!--\s*endbuild\s*-->")
        .expect("valid regex")
});
static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});
static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});

/// The ordered fragments for one file kind, resolved once per build.
#[derive(Debug, Clone)]
pub enum KindPipeline {
    Script {
        fragments: Vec<Fragment>,
        concat_order: Order,
    },
    Style {
        fragments: Vec<Fragment>,
        concat_order: Order,
    },
    Markup {
        fragments: Vec<Fragment>,
    },
}

impl KindPipeline {
    pub fn script(registry: &PipeRegistry, order: &OrderConfig) -> Self {
        KindPipeline::Script {
            fragments: registry.get(stage::PROCESS_JS),
            concat_order: order.pipemin_concat_js,
        }
    }

    pub fn style(registry: &PipeRegistry, order: &OrderConfig) -> Self {
        KindPipeline::Style {
            fragments: registry.get(stage::PROCESS_CSS),
            concat_order: order.concat_css(),
        }
    }

    pub fn markup(registry: &PipeRegistry) -> Self {
        KindPipeline::Markup {
            fragments: registry.get(stage::PROCESS_HTML),
        }
    }

    pub fn kind(&self) -> FileKind {
        match self {
            KindPipeline::Script { .. } => FileKind::Script,
            KindPipeline::Style { .. } => FileKind::Style,
            KindPipeline::Markup { .. } => FileKind::Markup,
        }
    }

    /// Sequential pipeline of the registered fragments. With a target, a
    /// concat fragment writing it is inserted at the configured order.
    pub fn compose(&self, concat_target: Option<&str>) -> Pipeline {
        match self {
            KindPipeline::Script {
                fragments,
                concat_order,
            }
            | KindPipeline::Style {
                fragments,
                concat_order,
            } => match concat_target {
                Some(target) => {
                    let mut fragments = fragments.clone();
                    fragments.push(Fragment::new(*concat_order, concat_step(target)));
                    compose::sequential(&fragments)
                }
                None => compose::sequential(fragments),
            },
            KindPipeline::Markup { fragments } => compose::sequential(fragments),
        }
    }
}

fn concat_step(target: &str) -> Pipeline {
    let target = target.to_string();
    Pipeline::step("concat", move || {
        Ok(Box::new(Concat::new(target.clone())) as Box<dyn Transform>)
    })
}

pub struct PageAssembler {
    assets: Pipeline,
    script: KindPipeline,
    style: KindPipeline,
    markup: KindPipeline,
    metrics: MetricsCollector,
}

impl PageAssembler {
    pub fn new(
        assets: Pipeline,
        script: KindPipeline,
        style: KindPipeline,
        markup: KindPipeline,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            assets,
            script,
            style,
            markup,
            metrics,
        }
    }

    fn assemble_page(
        &self,
        mut page: Artifact,
        assets: &[Artifact],
        bundles: &mut Vec<Artifact>,
    ) -> Result<Artifact> {
        let text = page.text()?.to_string();
        let page_dir = page
            .relative
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        let mut rewritten = String::with_capacity(text.len());
        let mut last = 0;
        let mut blocks = 0usize;

        for caps in BUILD_BLOCK.captures_iter(&text) {
            let Some(whole) = caps.get(0) else { continue };
            let target = &caps[2];
            let body = &caps[3];
            let (pipeline, references, tag) = match &caps[1] {
                "js" => (
                    &self.script,
                    &*SCRIPT_SRC,
                    format!(r#"<script src="{target}"></script>"#),
                ),
                _ => (
                    &self.style,
                    &*LINK_HREF,
                    format!(r#"<link rel="stylesheet" href="{target}">"#),
                ),
            };

            let mut selected = Vec::new();
            for reference in references.captures_iter(body) {
                let wanted = resolve_reference(&page_dir, &reference[1]);
                match assets.iter().find(|asset| asset.relative_str() == wanted) {
                    Some(asset) => selected.push(asset.clone()),
                    None => bail!(
                        "Page '{}' references '{}', which is not among the assets",
                        page.relative_str(),
                        wanted
                    ),
                }
            }

            let bundle_path = resolve_reference(&page_dir, target);
            if selected.is_empty() {
                warn!(
                    page = %page.relative_str(),
                    target = bundle_path.as_str(),
                    "Build block references no files; leaving it in place"
                );
                continue;
            }
            debug!(
                page = %page.relative_str(),
                kind = ?pipeline.kind(),
                target = bundle_path.as_str(),
                files = selected.len(),
                "Assembling block"
            );
            let produced = pipeline
                .compose(Some(&bundle_path))
                .run_with(selected, &self.metrics)?;
            for artifact in produced {
                upsert(bundles, artifact);
            }

            rewritten.push_str(&text[last..whole.start()]);
            rewritten.push_str(&tag);
            last = whole.end();
            blocks += 1;
        }
        rewritten.push_str(&text[last..]);

        if blocks > 0 {
            page.replace_contents(rewritten);
            page.metadata
                .insert("pipemin.blocks".to_string(), blocks.into());
        }
        Ok(page)
    }
}

fn upsert(bundles: &mut Vec<Artifact>, artifact: Artifact) {
    let path = artifact.relative_str();
    match bundles.iter().position(|b| b.relative_str() == path) {
        Some(idx) => {
            if bundles[idx].contents != artifact.contents {
                warn!(
                    file = path.as_str(),
                    "Pages produce different contents for the same bundle; keeping the first"
                );
            }
        }
        None => bundles.push(artifact),
    }
}

impl Transform for PageAssembler {
    fn name(&self) -> &str {
        "pipemin"
    }

    fn apply(&self, input: Vec<Artifact>) -> Result<Vec<Artifact>> {
        let assets = self.assets.run_with(Vec::new(), &self.metrics)?;
        debug!(assets = assets.len(), "Asset stream resolved");

        let (pages, passthrough): (Vec<_>, Vec<_>) = input
            .into_iter()
            .partition(|artifact| artifact.kind() == FileKind::Markup);

        let mut bundles = Vec::new();
        let mut assembled = Vec::with_capacity(pages.len());
        for page in pages {
            assembled.push(self.assemble_page(page, &assets, &mut bundles)?);
        }

        let mut output = self
            .markup
            .compose(None)
            .run_with(assembled, &self.metrics)?;
        output.extend(bundles);
        output.extend(passthrough);
        Ok(output)
    }
}

/// Resolves a markup reference against the page directory into a
/// `/`-separated path relative to the asset base.
pub fn resolve_reference(page_dir: &str, reference: &str) -> String {
    let reference = reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference);
    let joined = match reference.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None if page_dir.is_empty() => reference.to_string(),
        None => format!("{page_dir}/{reference}"),
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::resolve_reference;

    #[test]
    fn references_resolve_against_page_directory() {
        assert_eq!(resolve_reference("", "js/app.js"), "js/app.js");
        assert_eq!(resolve_reference("admin", "../js/app.js"), "js/app.js");
        assert_eq!(resolve_reference("admin", "/css/site.css?v=2"), "css/site.css");
        assert_eq!(resolve_reference("admin", "./local.js"), "admin/local.js");
    }
}
