//! Context optimizer
//!
//! Turns a natural-language query and a built [`DependencyGraph`] into an
//! ordered list of relevant paths: path-token candidates, 1-hop neighbor
//! expansion, PageRank ranking, top N.

use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

use super::dep_graph::{workspace_fingerprint, DependencyGraph, GraphSnapshot};

pub const DEFAULT_LIMIT: usize = 5;

/// Query-time selection over a built graph.
pub struct ContextOptimizer {
    graph: DependencyGraph,
}

impl ContextOptimizer {
    pub fn new(graph: DependencyGraph) -> Self {
        Self { graph }
    }

    /// Build the graph for a workspace, preferring a cached snapshot
    /// keyed by the workspace fingerprint. Build failures are non-fatal
    /// for callers: they should treat an Err as "no pre-filtered context".
    pub fn for_workspace(root: &Path, cache_dir: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(cache_dir) = cache_dir {
            let fingerprint = workspace_fingerprint(root);
            let cache_path = cache_dir.join(format!("{}.json", fingerprint));
            if let Ok(json) = std::fs::read_to_string(&cache_path) {
                if let Ok(snapshot) = serde_json::from_str::<GraphSnapshot>(&json) {
                    debug!("dependency graph loaded from cache");
                    return Ok(Self::new(DependencyGraph::from_snapshot(snapshot)));
                }
            }
            let graph = DependencyGraph::build(root)?;
            if let Ok(json) = serde_json::to_string(&graph.to_snapshot()) {
                let _ = std::fs::create_dir_all(cache_dir);
                let _ = std::fs::write(&cache_path, json);
            }
            return Ok(Self::new(graph));
        }
        Ok(Self::new(DependencyGraph::build(root)?))
    }

    /// Paths relevant to the query, most relevant first. `limit` clamps
    /// to [1, 20].
    pub fn select(&self, query: &str, limit: usize) -> Vec<String> {
        let limit = limit.clamp(1, 20);
        let tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() || self.graph.is_empty() {
            return Vec::new();
        }

        // Candidates: any path containing a query token, case-insensitive.
        let mut candidates: BTreeSet<usize> = self
            .graph
            .nodes()
            .iter()
            .filter(|node| {
                let path = node.path.to_lowercase();
                tokens.iter().any(|t| path.contains(t))
            })
            .map(|node| node.id)
            .collect();

        // Expand by one hop: imports and importers.
        for id in candidates.clone() {
            candidates.extend(self.graph.neighbors(id));
        }

        let mut ranked: Vec<&super::dep_graph::Node> = candidates
            .into_iter()
            .map(|id| &self.graph.nodes()[id])
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });

        ranked
            .into_iter()
            .take(limit)
            .map(|node| node.path.clone())
            .collect()
    }
}
