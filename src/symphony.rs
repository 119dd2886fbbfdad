//! Symphony execution
//!
//! A complex task decomposes into Movements, ordered by a dependency DAG.
//! The Symphony owns movement state across Conductor passes, persists it
//! as JSON under the state directory, and supports resume after a failure:
//! the user fixes the world, then execution re-enters at the first
//! non-completed movement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::cancel::CancelFlag;
use crate::errors::{MaestroError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// One phase of a decomposed task, with its own goal and success criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movement {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub goal: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_files: Vec<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    pub status: MovementStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymphonyStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// An ordered, resumable execution of Movements for one task.
///
/// `current_movement` always points at the first non-completed movement,
/// or `movements.len()` once everything succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symphony {
    pub id: String,
    pub task: String,
    pub movements: Vec<Movement>,
    pub current_movement: usize,
    pub status: SymphonyStatus,
    pub start_time: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Symphony {
    pub fn new(task: impl Into<String>, movements: Vec<Movement>) -> Self {
        Self {
            id: new_symphony_id(),
            task: task.into(),
            movements,
            current_movement: 0,
            status: SymphonyStatus::Pending,
            start_time: Utc::now(),
            completed_at: None,
        }
    }

    /// Index of the first non-completed movement, or `len` on success.
    pub fn frontier(&self) -> usize {
        self.movements
            .iter()
            .position(|m| m.status != MovementStatus::Completed)
            .unwrap_or(self.movements.len())
    }

    fn sync_current(&mut self) {
        self.current_movement = self.frontier();
    }
}

/// A random 16-hex identifier.
pub fn new_symphony_id() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| {
            let digit: u8 = rng.gen_range(0..16);
            char::from_digit(digit as u32, 16).unwrap_or('0')
        })
        .collect()
}

/// Dependency-respecting order over movements: topological, with ties
/// broken by authored order. Fails on unknown ids and cycles.
pub fn topological_order(movements: &[Movement]) -> Result<Vec<usize>> {
    let index_of = |id: &str| movements.iter().position(|m| m.id == id);

    for movement in movements {
        for dep in &movement.dependencies {
            if index_of(dep).is_none() {
                return Err(MaestroError::Config(format!(
                    "movement '{}' depends on unknown movement '{}'",
                    movement.id, dep
                )));
            }
        }
    }

    let mut emitted = vec![false; movements.len()];
    let mut order = Vec::with_capacity(movements.len());

    while order.len() < movements.len() {
        let mut progressed = false;
        for (idx, movement) in movements.iter().enumerate() {
            if emitted[idx] {
                continue;
            }
            let ready = movement
                .dependencies
                .iter()
                .all(|dep| index_of(dep).map(|i| emitted[i]).unwrap_or(false));
            if ready {
                emitted[idx] = true;
                order.push(idx);
                progressed = true;
                break;
            }
        }
        if !progressed {
            return Err(MaestroError::Config(
                "movement dependencies form a cycle".to_string(),
            ));
        }
    }
    Ok(order)
}

/// Runs one movement to completion. The Conductor is the production
/// implementation; tests script their own. `index` is the movement's
/// authored position, used as the checkpoint phase.
#[async_trait]
pub trait MovementRunner: Send + Sync {
    async fn run_movement(
        &self,
        index: usize,
        movement: &Movement,
        cancel: &CancelFlag,
    ) -> Result<()>;
}

/// JSON persistence for symphonies under `<state_dir>/symphonies/`.
pub struct SymphonyStore {
    dir: PathBuf,
}

impl SymphonyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| MaestroError::Config(format!("cannot create symphony dir: {}", e)))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn save(&self, symphony: &Symphony) -> Result<()> {
        let json = serde_json::to_string_pretty(symphony)
            .map_err(|e| MaestroError::Config(format!("serialize symphony: {}", e)))?;
        fs::write(self.path_for(&symphony.id), json)
            .map_err(|e| MaestroError::Config(format!("write symphony: {}", e)))?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Symphony> {
        let json = fs::read_to_string(self.path_for(id))
            .map_err(|e| MaestroError::Config(format!("read symphony {}: {}", id, e)))?;
        serde_json::from_str(&json)
            .map_err(|e| MaestroError::Config(format!("parse symphony {}: {}", id, e)))
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .map_err(|e| MaestroError::Config(format!("list symphonies: {}", e)))?
        {
            let entry = entry.map_err(|e| MaestroError::Config(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Drives movements through a [`MovementRunner`] in dependency order,
/// checkpointing after every status change.
pub struct SymphonyExecutor<'a> {
    store: &'a SymphonyStore,
    runner: &'a dyn MovementRunner,
}

impl<'a> SymphonyExecutor<'a> {
    pub fn new(store: &'a SymphonyStore, runner: &'a dyn MovementRunner) -> Self {
        Self { store, runner }
    }

    pub async fn run(&self, symphony: &mut Symphony, cancel: &CancelFlag) -> Result<()> {
        symphony.status = SymphonyStatus::Executing;
        symphony.sync_current();
        self.store.save(symphony)?;

        let order = topological_order(&symphony.movements)?;

        for idx in order {
            if symphony.movements[idx].status == MovementStatus::Completed {
                continue;
            }

            if cancel.is_cancelled() {
                // Leave the movement pending so resume is well-defined.
                symphony.movements[idx].status = MovementStatus::Pending;
                symphony.sync_current();
                self.store.save(symphony)?;
                return Err(MaestroError::Cancelled);
            }

            let unmet: Vec<&str> = symphony.movements[idx]
                .dependencies
                .iter()
                .filter(|dep| {
                    symphony
                        .movements
                        .iter()
                        .find(|m| &m.id == *dep)
                        .map(|m| m.status != MovementStatus::Completed)
                        .unwrap_or(true)
                })
                .map(|s| s.as_str())
                .collect();
            if !unmet.is_empty() {
                return Err(MaestroError::Config(format!(
                    "movement '{}' has unmet dependencies: {}",
                    symphony.movements[idx].id,
                    unmet.join(", ")
                )));
            }

            info!(
                movement = %symphony.movements[idx].id,
                name = %symphony.movements[idx].name,
                "starting movement"
            );
            symphony.movements[idx].status = MovementStatus::Executing;
            symphony.current_movement = idx;
            self.store.save(symphony)?;

            let movement = symphony.movements[idx].clone();
            match self.runner.run_movement(idx, &movement, cancel).await {
                Ok(()) => {
                    symphony.movements[idx].status = MovementStatus::Completed;
                    symphony.sync_current();
                    self.store.save(symphony)?;
                }
                Err(MaestroError::Cancelled) => {
                    symphony.movements[idx].status = MovementStatus::Pending;
                    symphony.sync_current();
                    self.store.save(symphony)?;
                    return Err(MaestroError::Cancelled);
                }
                Err(e) => {
                    // Failures are localized: no cross-movement recovery.
                    // The user edits the world and resumes.
                    symphony.movements[idx].status = MovementStatus::Failed;
                    symphony.status = SymphonyStatus::Failed;
                    self.store.save(symphony)?;
                    return Err(e);
                }
            }
        }

        symphony.status = SymphonyStatus::Completed;
        symphony.completed_at = Some(Utc::now());
        symphony.current_movement = symphony.movements.len();
        self.store.save(symphony)?;
        Ok(())
    }

    /// Reload a prior symphony and re-enter at the first non-completed
    /// movement. Previously `executing` or `failed` movements reset to
    /// `pending`; completed work is never redone.
    pub async fn resume(&self, id: &str, cancel: &CancelFlag) -> Result<Symphony> {
        let mut symphony = self.store.load(id)?;
        for movement in &mut symphony.movements {
            if matches!(
                movement.status,
                MovementStatus::Executing | MovementStatus::Failed
            ) {
                movement.status = MovementStatus::Pending;
            }
        }
        symphony.sync_current();
        self.run(&mut symphony, cancel).await?;
        Ok(symphony)
    }
}
