//! Symphony execution and resume scenarios.

use async_trait::async_trait;
use std::sync::Mutex;

use maestro::cancel::CancelFlag;
use maestro::errors::{ErrorClass, MaestroError, Result};
use maestro::symphony::{
    Movement, MovementRunner, MovementStatus, Symphony, SymphonyExecutor, SymphonyStatus,
    SymphonyStore,
};

fn movement(id: &str, deps: &[&str]) -> Movement {
    Movement {
        id: id.to_string(),
        name: format!("movement {}", id),
        description: String::new(),
        goal: format!("accomplish {}", id),
        dependencies: deps.iter().map(|s| s.to_string()).collect(),
        required_files: Vec::new(),
        output_files: Vec::new(),
        success_criteria: vec!["done".to_string()],
        status: MovementStatus::Pending,
    }
}

/// Runner that fails the named movements once each, succeeds otherwise,
/// and records every invocation.
struct FlakyRunner {
    fail_once: Mutex<Vec<String>>,
    log: Mutex<Vec<String>>,
}

impl FlakyRunner {
    fn new(fail_once: &[&str]) -> Self {
        Self {
            fail_once: Mutex::new(fail_once.iter().map(|s| s.to_string()).collect()),
            log: Mutex::new(Vec::new()),
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl MovementRunner for FlakyRunner {
    async fn run_movement(
        &self,
        _index: usize,
        movement: &Movement,
        _cancel: &CancelFlag,
    ) -> Result<()> {
        self.log.lock().unwrap().push(movement.id.clone());
        let mut fail = self.fail_once.lock().unwrap();
        if let Some(pos) = fail.iter().position(|id| *id == movement.id) {
            fail.remove(pos);
            return Err(MaestroError::Review {
                class: ErrorClass::Test,
                detail: format!("{} blew up", movement.id),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn movements_run_in_dependency_order() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = SymphonyStore::new(dir.path()).unwrap();
    let runner = FlakyRunner::new(&[]);
    let executor = SymphonyExecutor::new(&store, &runner);

    // Authored out of order on purpose: m2 depends on m3.
    let mut symphony = Symphony::new(
        "layered task",
        vec![movement("m1", &[]), movement("m2", &["m3"]), movement("m3", &["m1"])],
    );
    executor.run(&mut symphony, &CancelFlag::new()).await.unwrap();

    assert_eq!(runner.log(), vec!["m1", "m3", "m2"]);
    assert_eq!(symphony.status, SymphonyStatus::Completed);
    assert!(symphony.completed_at.is_some());
    assert_eq!(symphony.current_movement, 3);
}

// Seed scenario: symphony resume. M1 succeeds, M2 fails; on resume M1
// stays completed, M2 resets to pending and re-runs, and M3 only starts
// after M2 succeeds.
#[tokio::test]
async fn failed_movement_resumes_without_redoing_completed_work() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = SymphonyStore::new(dir.path()).unwrap();
    let runner = FlakyRunner::new(&["m2"]);
    let executor = SymphonyExecutor::new(&store, &runner);

    let mut symphony = Symphony::new(
        "three movements",
        vec![movement("m1", &[]), movement("m2", &["m1"]), movement("m3", &["m2"])],
    );
    let id = symphony.id.clone();

    let result = executor.run(&mut symphony, &CancelFlag::new()).await;
    assert!(result.is_err());
    assert_eq!(symphony.movements[0].status, MovementStatus::Completed);
    assert_eq!(symphony.movements[1].status, MovementStatus::Failed);
    assert_eq!(symphony.movements[2].status, MovementStatus::Pending);
    assert_eq!(symphony.status, SymphonyStatus::Failed);

    // The failure is persisted for a later resume.
    let persisted = store.load(&id).unwrap();
    assert_eq!(persisted.movements[1].status, MovementStatus::Failed);

    let resumed = executor.resume(&id, &CancelFlag::new()).await.unwrap();
    assert_eq!(resumed.status, SymphonyStatus::Completed);
    // m1 ran exactly once across both runs; m2 twice; m3 once, after m2.
    assert_eq!(runner.log(), vec!["m1", "m2", "m2", "m3"]);
}

#[tokio::test]
async fn cancelled_symphony_leaves_current_movement_pending() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = SymphonyStore::new(dir.path()).unwrap();
    let runner = FlakyRunner::new(&[]);
    let executor = SymphonyExecutor::new(&store, &runner);

    let mut symphony = Symphony::new("cancelled", vec![movement("m1", &[])]);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let result = executor.run(&mut symphony, &cancel).await;
    assert!(matches!(result, Err(MaestroError::Cancelled)));
    assert_eq!(symphony.movements[0].status, MovementStatus::Pending);
    assert!(runner.log().is_empty());
}

#[tokio::test]
async fn executing_status_persisted_while_running() {
    // After a crash mid-movement the store holds `executing`; resume
    // resets it to pending and re-enters.
    let dir = tempfile::TempDir::new().unwrap();
    let store = SymphonyStore::new(dir.path()).unwrap();

    let mut symphony = Symphony::new("crashed", vec![movement("m1", &[])]);
    symphony.movements[0].status = MovementStatus::Executing;
    symphony.status = SymphonyStatus::Executing;
    store.save(&symphony).unwrap();

    let runner = FlakyRunner::new(&[]);
    let executor = SymphonyExecutor::new(&store, &runner);
    let resumed = executor.resume(&symphony.id, &CancelFlag::new()).await.unwrap();

    assert_eq!(resumed.movements[0].status, MovementStatus::Completed);
    assert_eq!(runner.log(), vec!["m1"]);
}
