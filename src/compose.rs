//! Turns registry entry sets into runnable pipelines.

use crate::pipeline::Pipeline;
use crate::registry::Fragment;

/// Chains fragments ascending by order; equal orders keep registration order.
pub fn sequential(fragments: &[Fragment]) -> Pipeline {
    let mut sorted: Vec<&Fragment> = fragments.iter().collect();
    // `sort_by` is stable
    sorted.sort_by(|a, b| a.order.total_cmp(&b.order));
    sorted
        .into_iter()
        .fold(Pipeline::Identity, |acc, fragment| {
            acc.then(fragment.pipeline.clone())
        })
}

/// Unions the outputs of all fragments, each fed the same input.
///
/// Order values play no part here. An empty set emits nothing.
pub fn merged(fragments: &[Fragment]) -> Pipeline {
    merge_of(fragments.iter().map(|fragment| fragment.pipeline.clone()))
}

/// Unions the outputs of already composed pipelines.
pub fn merge_of(pipelines: impl IntoIterator<Item = Pipeline>) -> Pipeline {
    Pipeline::Merged(pipelines.into_iter().collect())
}
