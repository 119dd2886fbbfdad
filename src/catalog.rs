//! Model catalog and selection
//!
//! Enumerates candidate (backend, model) pairs with capability metadata,
//! keeps an append-only execution history, and scores candidates per agent
//! role: tool-call support is a hard gate for tool-using roles, then a
//! weighted blend of historical success rate, speed, and cost.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::agents::AgentRole;
use crate::errors::{MaestroError, Result};

/// One candidate model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    pub backend: String,
    pub name: String,
    pub supports_tool_calls: bool,
    pub cost_per_million: f64,
    pub avg_tokens_per_sec: f64,
    #[serde(default)]
    pub allowed_agent_roles: Vec<AgentRole>,
}

impl ModelCatalogEntry {
    pub fn allows_role(&self, role: AgentRole) -> bool {
        self.allowed_agent_roles.is_empty() || self.allowed_agent_roles.contains(&role)
    }
}

/// One completed execution, for the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task: String,
    pub backend: String,
    pub model: String,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only JSONL history consulted for success rates.
pub struct ExecutionHistory {
    path: PathBuf,
    records: Vec<ExecutionRecord>,
}

impl ExecutionHistory {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut records = Vec::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| MaestroError::Config(format!("cannot read history: {}", e)))?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(line) {
                    Ok(record) => records.push(record),
                    Err(e) => debug!("skipping corrupt history line: {}", e),
                }
            }
        }
        Ok(Self { path, records })
    }

    /// In-memory history for tests and ephemeral runs.
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            records: Vec::new(),
        }
    }

    pub fn append(&mut self, record: ExecutionRecord) -> Result<()> {
        if !self.path.as_os_str().is_empty() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MaestroError::Config(e.to_string()))?;
            }
            let line = serde_json::to_string(&record)
                .map_err(|e| MaestroError::Config(e.to_string()))?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| MaestroError::Config(format!("cannot append history: {}", e)))?;
            writeln!(file, "{}", line).map_err(|e| MaestroError::Config(e.to_string()))?;
        }
        self.records.push(record);
        Ok(())
    }

    /// Success rate for a (backend, model) pair; `None` with no history.
    pub fn success_rate(&self, backend: &str, model: &str) -> Option<f64> {
        let relevant: Vec<&ExecutionRecord> = self
            .records
            .iter()
            .filter(|r| r.backend == backend && r.model == model)
            .collect();
        if relevant.is_empty() {
            return None;
        }
        let successes = relevant.iter().filter(|r| r.success).count();
        Some(successes as f64 / relevant.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Cached recommendation lists expire after this long, bounding
/// thrashing inside a single Conductor attempt loop.
const RECOMMENDATION_TTL: Duration = Duration::from_secs(300);

/// Scores catalog entries per role and recommends retry alternatives.
pub struct ModelSelector {
    catalog: Vec<ModelCatalogEntry>,
    history: ExecutionHistory,
    cache: HashMap<(AgentRole, String), (Instant, Vec<ModelCatalogEntry>)>,
    ttl: Duration,
}

impl ModelSelector {
    pub fn new(catalog: Vec<ModelCatalogEntry>, history: ExecutionHistory) -> Self {
        Self {
            catalog,
            history,
            cache: HashMap::new(),
            ttl: RECOMMENDATION_TTL,
        }
    }

    #[cfg(test)]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn record(&mut self, record: ExecutionRecord) -> Result<()> {
        self.history.append(record)
    }

    /// Composite score for an entry in a role. Tool support is a hard
    /// gate for roles that require tools.
    fn score(&self, entry: &ModelCatalogEntry, role: AgentRole) -> Option<f64> {
        if role.requires_tools() && !entry.supports_tool_calls {
            return None;
        }
        if !entry.allows_role(role) {
            return None;
        }
        let success = self
            .history
            .success_rate(&entry.backend, &entry.name)
            .unwrap_or(0.5);
        let speed = (entry.avg_tokens_per_sec / 200.0).min(1.0);
        let cheapness = 1.0 / (1.0 + entry.cost_per_million / 10.0);
        Some(0.6 * success + 0.25 * speed + 0.15 * cheapness)
    }

    /// The best candidate for a role.
    pub fn select(&self, role: AgentRole) -> Option<&ModelCatalogEntry> {
        self.catalog
            .iter()
            .filter_map(|entry| self.score(entry, role).map(|s| (entry, s)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(entry, _)| entry)
    }

    /// Ordered alternatives for a retry, excluding the pair that just
    /// failed. Cached by (role, task fingerprint) for a short TTL.
    pub fn recommend_for_retry(
        &mut self,
        role: AgentRole,
        failed_backend: &str,
        failed_model: &str,
        task: &str,
    ) -> Vec<ModelCatalogEntry> {
        let key = (role, task_fingerprint(task));
        if let Some((at, cached)) = self.cache.get(&key) {
            if at.elapsed() < self.ttl {
                return cached.clone();
            }
        }

        let mut scored: Vec<(ModelCatalogEntry, f64)> = self
            .catalog
            .iter()
            .filter(|entry| !(entry.backend == failed_backend && entry.name == failed_model))
            .filter_map(|entry| self.score(entry, role).map(|s| (entry.clone(), s)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let recommendations: Vec<ModelCatalogEntry> =
            scored.into_iter().map(|(entry, _)| entry).collect();

        self.cache
            .insert(key, (Instant::now(), recommendations.clone()));
        recommendations
    }
}

fn task_fingerprint(task: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], take: usize) -> String {
    bytes
        .iter()
        .take(take)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(backend: &str, name: &str, tools: bool, cost: f64, speed: f64) -> ModelCatalogEntry {
        ModelCatalogEntry {
            backend: backend.into(),
            name: name.into(),
            supports_tool_calls: tools,
            cost_per_million: cost,
            avg_tokens_per_sec: speed,
            allowed_agent_roles: Vec::new(),
        }
    }

    #[test]
    fn test_tool_support_is_hard_gate() {
        let selector = ModelSelector::new(
            vec![entry("b", "no-tools", false, 0.1, 500.0)],
            ExecutionHistory::ephemeral(),
        );
        assert!(selector.select(AgentRole::Editor).is_none());
        // The classifier does not need tools.
        assert!(selector.select(AgentRole::Classifier).is_some());
    }

    #[test]
    fn test_history_drives_selection() {
        let mut history = ExecutionHistory::ephemeral();
        for success in [true, true, true, true] {
            history
                .append(ExecutionRecord {
                    task: "t".into(),
                    backend: "b".into(),
                    model: "reliable".into(),
                    success,
                    latency_ms: 100,
                    error: None,
                })
                .unwrap();
        }
        for success in [false, false, false, true] {
            history
                .append(ExecutionRecord {
                    task: "t".into(),
                    backend: "b".into(),
                    model: "flaky".into(),
                    success,
                    latency_ms: 100,
                    error: None,
                })
                .unwrap();
        }
        let selector = ModelSelector::new(
            vec![
                entry("b", "flaky", true, 1.0, 100.0),
                entry("b", "reliable", true, 1.0, 100.0),
            ],
            history,
        );
        assert_eq!(selector.select(AgentRole::Editor).unwrap().name, "reliable");
    }

    #[test]
    fn test_recommend_excludes_failed_model() {
        let mut selector = ModelSelector::new(
            vec![
                entry("b", "m1", true, 1.0, 100.0),
                entry("b", "m2", true, 1.0, 100.0),
            ],
            ExecutionHistory::ephemeral(),
        );
        let recs = selector.recommend_for_retry(AgentRole::Editor, "b", "m1", "task");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].name, "m2");
    }

    #[test]
    fn test_recommendations_cached_within_ttl() {
        let mut selector = ModelSelector::new(
            vec![
                entry("b", "m1", true, 1.0, 100.0),
                entry("b", "m2", true, 1.0, 100.0),
            ],
            ExecutionHistory::ephemeral(),
        );
        let first = selector.recommend_for_retry(AgentRole::Editor, "b", "m1", "task");
        // Excluding m2 now would change the answer, but the cache holds.
        let second = selector.recommend_for_retry(AgentRole::Editor, "b", "m2", "task");
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_expires() {
        let mut selector = ModelSelector::new(
            vec![
                entry("b", "m1", true, 1.0, 100.0),
                entry("b", "m2", true, 1.0, 100.0),
            ],
            ExecutionHistory::ephemeral(),
        )
        .with_ttl(Duration::from_millis(0));
        let _ = selector.recommend_for_retry(AgentRole::Editor, "b", "m1", "task");
        let second = selector.recommend_for_retry(AgentRole::Editor, "b", "m2", "task");
        assert_eq!(second[0].name, "m1");
    }

    #[test]
    fn test_role_restriction() {
        let mut restricted = entry("b", "planner-only", true, 1.0, 100.0);
        restricted.allowed_agent_roles = vec![AgentRole::Planner];
        let selector = ModelSelector::new(vec![restricted], ExecutionHistory::ephemeral());
        assert!(selector.select(AgentRole::Planner).is_some());
        assert!(selector.select(AgentRole::Editor).is_none());
    }

    #[test]
    fn test_history_jsonl_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        {
            let mut history = ExecutionHistory::open(&path).unwrap();
            history
                .append(ExecutionRecord {
                    task: "rename".into(),
                    backend: "b".into(),
                    model: "m".into(),
                    success: true,
                    latency_ms: 1200,
                    error: None,
                })
                .unwrap();
        }
        let reloaded = ExecutionHistory::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.success_rate("b", "m"), Some(1.0));
        assert_eq!(reloaded.success_rate("b", "other"), None);
    }
}
