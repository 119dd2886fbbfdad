//! Dependency graph
//!
//! Walks a workspace, extracts imports with per-language rules (Go,
//! Python, JS/TS, Ruby, Rust; other languages skip silently), and scores
//! files with PageRank. Edges use node ids, never pointers, so the
//! adjacency maps stay cycle-free in ownership even when the import graph
//! itself has cycles.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::tools::is_denied_dir;

const DAMPING: f64 = 0.85;
const MAX_ITERATIONS: usize = 20;
const CONVERGENCE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    Python,
    JavaScript,
    TypeScript,
    Ruby,
    Rust,
}

impl Language {
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = Path::new(path).extension()?.to_str()?;
        match ext {
            "go" => Some(Language::Go),
            "py" => Some(Language::Python),
            "js" | "jsx" | "mjs" => Some(Language::JavaScript),
            "ts" | "tsx" => Some(Language::TypeScript),
            "rb" => Some(Language::Ruby),
            "rs" => Some(Language::Rust),
            _ => None,
        }
    }
}

/// A source file in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: usize,
    /// Workspace-relative path with forward slashes.
    pub path: String,
    pub lang: Language,
    pub score: f64,
}

/// Import graph over workspace files with PageRank scores.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    paths: HashMap<String, usize>,
    out_edges: HashMap<usize, Vec<usize>>,
    in_edges: HashMap<usize, Vec<usize>>,
}

/// Serialized form; round-trips node count, edges, and scores.
#[derive(Debug, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<(usize, usize)>,
}

impl DependencyGraph {
    /// Build the graph for a workspace and compute PageRank.
    pub fn build(root: &Path) -> anyhow::Result<Self> {
        let mut graph = Self::default();

        let go_module = read_go_module(root);

        let mut sources: Vec<(String, Language, String)> = Vec::new();
        let walker = walkdir::WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && (is_denied_dir(&name) || name.starts_with('.')))
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let Some(lang) = Language::from_path(&rel) else {
                continue;
            };
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let id = graph.nodes.len();
            graph.nodes.push(Node {
                id,
                path: rel.clone(),
                lang,
                score: 0.0,
            });
            graph.paths.insert(rel.clone(), id);
            sources.push((rel, lang, content));
        }

        for (path, lang, content) in &sources {
            let from = graph.paths[path];
            for target in import_targets(path, *lang, content, go_module.as_deref(), &graph.paths)
            {
                graph.add_edge(from, target);
            }
        }

        graph.pagerank();
        debug!(
            nodes = graph.nodes.len(),
            edges = graph.edge_count(),
            "dependency graph built"
        );
        Ok(graph)
    }

    /// Edges are only added between ids that already exist in `nodes`.
    fn add_edge(&mut self, from: usize, to: usize) {
        if from == to || from >= self.nodes.len() || to >= self.nodes.len() {
            return;
        }
        let out = self.out_edges.entry(from).or_default();
        if out.contains(&to) {
            return;
        }
        out.push(to);
        self.in_edges.entry(to).or_default().push(from);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.out_edges.values().map(Vec::len).sum()
    }

    pub fn node_by_path(&self, path: &str) -> Option<&Node> {
        self.paths.get(path).map(|&id| &self.nodes[id])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Imports and importers of a node.
    pub fn neighbors(&self, id: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .out_edges
            .get(&id)
            .into_iter()
            .flatten()
            .chain(self.in_edges.get(&id).into_iter().flatten())
            .copied()
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Standard PageRank: damping 0.85, up to 20 iterations, early stop
    /// when the L1 delta drops below 1e-6. Dangling mass is spread
    /// uniformly so scores always sum to ~1.
    pub fn pagerank(&mut self) {
        let n = self.nodes.len();
        if n == 0 {
            return;
        }
        let n_f = n as f64;
        let mut scores = vec![1.0 / n_f; n];

        for iteration in 0..MAX_ITERATIONS {
            let dangling_mass: f64 = (0..n)
                .filter(|id| self.out_edges.get(id).map_or(true, Vec::is_empty))
                .map(|id| scores[id])
                .sum();

            let mut next = vec![(1.0 - DAMPING) / n_f + DAMPING * dangling_mass / n_f; n];
            for (from, targets) in &self.out_edges {
                if targets.is_empty() {
                    continue;
                }
                let share = DAMPING * scores[*from] / targets.len() as f64;
                for to in targets {
                    next[*to] += share;
                }
            }

            let delta: f64 = scores
                .iter()
                .zip(next.iter())
                .map(|(a, b)| (a - b).abs())
                .sum();
            scores = next;
            if delta < CONVERGENCE_EPSILON {
                debug!(iteration, "pagerank converged");
                break;
            }
        }

        for (id, score) in scores.into_iter().enumerate() {
            self.nodes[id].score = score;
        }
    }

    pub fn to_snapshot(&self) -> GraphSnapshot {
        let mut edges: Vec<(usize, usize)> = self
            .out_edges
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |to| (*from, *to)))
            .collect();
        edges.sort_unstable();
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges,
        }
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = Self {
            paths: snapshot
                .nodes
                .iter()
                .map(|n| (n.path.clone(), n.id))
                .collect(),
            nodes: snapshot.nodes,
            out_edges: HashMap::new(),
            in_edges: HashMap::new(),
        };
        for (from, to) in snapshot.edges {
            if from < graph.nodes.len() && to < graph.nodes.len() {
                graph.out_edges.entry(from).or_default().push(to);
                graph.in_edges.entry(to).or_default().push(from);
            }
        }
        graph
    }
}

/// `module` line of a go.mod, when present.
fn read_go_module(root: &Path) -> Option<String> {
    let content = fs::read_to_string(root.join("go.mod")).ok()?;
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix("module "))
        .map(|m| m.trim().to_string())
}

static GO_IMPORT_SINGLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*import\s+(?:\w+\s+)?"([^"]+)""#).expect("go import"));
static GO_IMPORT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)import\s*\((.*?)\)").expect("go import block"));
static GO_QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("go quoted"));
static PY_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:from\s+([\w.]+)\s+import|import\s+([\w.]+))").expect("py import")
});
static JS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)(?:import\s[^'"]*?|import\s*\(|require\s*\(|from\s+)['"]([^'"]+)['"]"#)
        .expect("js import")
});
static RB_REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*require_relative\s+['"]([^'"]+)['"]"#).expect("rb require")
});
static RS_USE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:pub\s+)?use\s+crate::([A-Za-z0-9_:]+)").expect("rs use")
});

/// Resolve a file's imports to node ids, by the language's rules.
fn import_targets(
    path: &str,
    lang: Language,
    content: &str,
    go_module: Option<&str>,
    paths: &HashMap<String, usize>,
) -> Vec<usize> {
    let mut targets = Vec::new();
    fn push(paths: &HashMap<String, usize>, targets: &mut Vec<usize>, candidate: &str) {
        if let Some(&id) = paths.get(candidate) {
            targets.push(id);
        }
    }

    match lang {
        Language::Go => {
            let mut imports: Vec<String> = GO_IMPORT_SINGLE
                .captures_iter(content)
                .map(|c| c[1].to_string())
                .collect();
            for block in GO_IMPORT_BLOCK.captures_iter(content) {
                imports.extend(GO_QUOTED.captures_iter(&block[1]).map(|c| c[1].to_string()));
            }
            if let Some(module) = go_module {
                let prefix = format!("{}/", module);
                for import in imports {
                    if let Some(subpath) = import.strip_prefix(&prefix) {
                        // A Go import names a package directory: link to
                        // every file under it.
                        let dir = format!("{}/", subpath);
                        for (candidate, &id) in paths {
                            if candidate.starts_with(&dir) {
                                targets.push(id);
                            }
                        }
                    }
                }
            }
        }
        Language::Python => {
            for captures in PY_IMPORT.captures_iter(content) {
                let module = captures
                    .get(1)
                    .or_else(|| captures.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or("");
                let base = module.replace('.', "/");
                push(paths, &mut targets, &format!("{}.py", base));
                push(paths, &mut targets, &format!("{}/__init__.py", base));
            }
        }
        Language::JavaScript | Language::TypeScript => {
            let dir = parent_dir(path);
            for captures in JS_IMPORT.captures_iter(content) {
                let spec = &captures[1];
                if !spec.starts_with('.') {
                    continue; // bare specifiers are ignored
                }
                let base = normalize_relative(&dir, spec);
                for candidate in [
                    base.clone(),
                    format!("{}.js", base),
                    format!("{}.ts", base),
                    format!("{}/index.js", base),
                    format!("{}/index.ts", base),
                ] {
                    push(paths, &mut targets, &candidate);
                }
            }
        }
        Language::Ruby => {
            let dir = parent_dir(path);
            for captures in RB_REQUIRE.captures_iter(content) {
                let base = normalize_relative(&dir, &captures[1]);
                push(paths, &mut targets, &format!("{}.rb", base));
            }
        }
        Language::Rust => {
            for captures in RS_USE.captures_iter(content) {
                let segments: Vec<&str> = captures[1]
                    .split("::")
                    .take_while(|s| !s.is_empty() && !s.contains('{') && !s.contains('*'))
                    .collect();
                for take in (1..=segments.len().min(3)).rev() {
                    let base = segments[..take].join("/");
                    push(paths, &mut targets, &format!("src/{}.rs", base));
                    push(paths, &mut targets, &format!("src/{}/mod.rs", base));
                }
            }
        }
    }

    targets.sort_unstable();
    targets.dedup();
    targets
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Join a relative specifier onto a directory and collapse `.`/`..`.
fn normalize_relative(dir: &str, spec: &str) -> String {
    let mut parts: Vec<&str> = if dir.is_empty() {
        Vec::new()
    } else {
        dir.split('/').collect()
    };
    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Cache key for a workspace: sha256 over sorted (path, mtime, length)
/// of every source file the walk would visit.
pub fn workspace_fingerprint(root: &Path) -> String {
    let mut entries: Vec<(String, u64, u64)> = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !(e.file_type().is_dir() && (is_denied_dir(&name) || name.starts_with('.')))
        });
    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if Language::from_path(&rel).is_none() {
            continue;
        }
        let (mtime, len) = entry
            .metadata()
            .map(|m| {
                let mtime = m
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                (mtime, m.len())
            })
            .unwrap_or((0, 0));
        entries.push((rel, mtime, len));
    }
    entries.sort();

    let mut hasher = Sha256::new();
    for (path, mtime, len) in entries {
        hasher.update(path.as_bytes());
        hasher.update(mtime.to_le_bytes());
        hasher.update(len.to_le_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
