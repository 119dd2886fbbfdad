//! Conductor
//!
//! The single-task pipeline: Analyze -> Plan -> Snapshot -> Edit ->
//! Review, with bounded retry. Reviewer failures are classified; failures
//! that look like tool-calling trouble switch models through the
//! Selector, everything else gets a corrective prompt and another Edit
//! pass. Catastrophic failures roll the workspace back to the snapshot.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

use crate::agents::{planner, profile_for, reviewer, AgentRole};
use crate::analyzer::{Intent, Task, TaskAnalyzer};
use crate::api::types::Message;
use crate::api::Provider;
use crate::cancel::CancelFlag;
use crate::catalog::{ExecutionRecord, ModelSelector};
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::errors::{
    classify_error, looks_like_tool_error, ErrorClass, MaestroError, Result,
};
use crate::orchestrator::{Orchestrator, OrchestratorOutcome, OrchestratorRequest};
use crate::output;
use crate::spinner::Spinner;
use crate::symphony::{
    Movement, MovementRunner, Symphony, SymphonyExecutor, SymphonyStore,
};
use crate::tools::{ToolContext, ToolRegistry};

/// Resolves backends to provider drivers. The Conductor never owns a
/// provider past a call.
pub trait ProviderPool: Send + Sync {
    fn get(&self, backend: &str) -> Option<Arc<dyn Provider>>;
}

/// Fixed map of backends, enough for production and for scripted tests.
pub struct StaticProviderPool {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl StaticProviderPool {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn with(mut self, backend: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(backend.into(), provider);
        self
    }
}

impl Default for StaticProviderPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderPool for StaticProviderPool {
    fn get(&self, backend: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(backend).cloned()
    }
}

/// The (backend, model) pair a pipeline run is currently driving.
#[derive(Debug, Clone)]
struct ModelRef {
    backend: String,
    model: String,
}

/// Inputs for one pipeline pass.
pub struct PipelineInput {
    pub goal: String,
    pub intent: Intent,
    pub cwd: PathBuf,
    pub required_files: Vec<String>,
    /// Checkpoint scope: the owning symphony (or a synthetic id for
    /// standalone tasks) and the movement's phase index.
    pub scope_id: String,
    pub phase: usize,
    /// Edit/Review attempts before giving up.
    pub attempt_budget: usize,
}

/// What a completed pass produced.
#[derive(Debug)]
pub struct PipelineReport {
    pub text: String,
    pub modified_files: Vec<PathBuf>,
    pub attempts: usize,
}

pub struct Conductor {
    pool: Arc<dyn ProviderPool>,
    selector: Mutex<ModelSelector>,
    config: Config,
    cancel: CancelFlag,
}

impl Conductor {
    pub fn new(pool: Arc<dyn ProviderPool>, selector: ModelSelector, config: Config) -> Self {
        Self {
            pool,
            selector: Mutex::new(selector),
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn default_model(&self) -> ModelRef {
        ModelRef {
            backend: self.config.backend.clone(),
            model: self.config.model.clone(),
        }
    }

    fn provider_for(&self, model: &ModelRef) -> Result<Arc<dyn Provider>> {
        self.pool.get(&model.backend).ok_or_else(|| {
            MaestroError::Config(format!("no provider for backend '{}'", model.backend))
        })
    }

    /// Top-level entry: analyze the task, then run it as a single pass or
    /// as a Symphony of movements.
    pub async fn execute(&self, task: &Task) -> Result<String> {
        let model = self.default_model();
        let provider = self.provider_for(&model)?;
        let analyzer = TaskAnalyzer::new(provider, model.model.as_str());

        let spinner = Spinner::start("analyzing task");
        let analysis = analyzer.analyze(task).await;
        spinner.stop().await;
        let analysis = analysis?;

        info!(
            intent = %analysis.intent,
            complexity = analysis.complexity,
            movements = analysis.movements.len(),
            "task analyzed"
        );

        if analysis.movements.is_empty() {
            let report = self
                .run_pipeline(PipelineInput {
                    goal: task.text.clone(),
                    intent: analysis.intent,
                    cwd: task.cwd.clone(),
                    required_files: analysis.required_files,
                    scope_id: crate::symphony::new_symphony_id(),
                    phase: 0,
                    attempt_budget: task.attempt_budget,
                })
                .await?;
            return Ok(report.text);
        }

        let store = SymphonyStore::new(self.config.symphonies_dir())?;
        let mut symphony = Symphony::new(&task.text, analysis.movements);
        info!(id = %symphony.id, "starting symphony");
        let runner = ConductorRunner {
            conductor: self,
            cwd: task.cwd.clone(),
            symphony_id: symphony.id.clone(),
        };
        let executor = SymphonyExecutor::new(&store, &runner);
        executor.run(&mut symphony, &self.cancel).await?;
        Ok(format!(
            "symphony {} completed: {} movements",
            symphony.id,
            symphony.movements.len()
        ))
    }

    /// Resume a previously failed or interrupted symphony.
    pub async fn resume(&self, symphony_id: &str, cwd: &Path) -> Result<String> {
        let store = SymphonyStore::new(self.config.symphonies_dir())?;
        let runner = ConductorRunner {
            conductor: self,
            cwd: cwd.to_path_buf(),
            symphony_id: symphony_id.to_string(),
        };
        let executor = SymphonyExecutor::new(&store, &runner);
        let symphony = executor.resume(symphony_id, &self.cancel).await?;
        Ok(format!(
            "symphony {} completed: {} movements",
            symphony.id,
            symphony.movements.len()
        ))
    }

    /// Run the Planner alone and persist its plan under the state dir.
    pub async fn plan_only(&self, task: &Task) -> Result<(planner::Plan, PathBuf)> {
        let model = self.default_model();
        let context = self.gather_context(&task.text, &[], &task.cwd).await;
        let plan_text = self
            .run_agent(
                AgentRole::Planner,
                &model,
                plan_request(&task.text, &context, None),
                Intent::Plan,
                Vec::new(),
                &task.cwd,
            )
            .await?
            .text;
        let plan = planner::derive_plan(&plan_text)?;

        let dir = self.config.plans_dir();
        std::fs::create_dir_all(&dir).map_err(|e| MaestroError::Config(e.to_string()))?;
        let path = dir.join(format!(
            "{}-{}.md",
            chrono::Utc::now().format("%Y-%m-%d"),
            slugify(&task.text)
        ));
        std::fs::write(&path, &plan.text).map_err(|e| MaestroError::Config(e.to_string()))?;
        Ok((plan, path))
    }

    /// Run the pipeline with a pre-written plan instead of the Planner.
    pub async fn implement(&self, plan_path: &Path, task: &Task) -> Result<String> {
        let plan_text = std::fs::read_to_string(plan_path)
            .map_err(|e| MaestroError::Config(format!("cannot read plan: {}", e)))?;
        let plan = planner::derive_plan(&plan_text)?;
        let report = self
            .edit_review_loop(
                &task.text,
                &plan,
                String::new(),
                &task.cwd,
                &crate::symphony::new_symphony_id(),
                0,
                task.attempt_budget,
            )
            .await?;
        Ok(report.text)
    }

    /// One full pipeline pass.
    pub async fn run_pipeline(&self, input: PipelineInput) -> Result<PipelineReport> {
        let model = self.default_model();

        // Pre-filtered context via the dependency graph; failures here
        // are non-fatal and just mean no pre-filter.
        let context = self
            .gather_context(&input.goal, &input.required_files, &input.cwd)
            .await;

        // Analyze.
        output::phase("analyze");
        let summary = self
            .run_agent(
                AgentRole::Analyzer,
                &model,
                analyze_request(&input.goal, &context),
                Intent::Query,
                Vec::new(),
                &input.cwd,
            )
            .await?;

        // A query wants the analysis itself, not an edit.
        if input.intent == Intent::Query {
            return Ok(PipelineReport {
                text: summary.text,
                modified_files: Vec::new(),
                attempts: 1,
            });
        }

        // Plan.
        output::phase("plan");
        let plan_text = self
            .run_agent(
                AgentRole::Planner,
                &model,
                plan_request(&input.goal, &context, Some(&summary.text)),
                Intent::Plan,
                Vec::new(),
                &input.cwd,
            )
            .await?
            .text;
        let plan = planner::derive_plan(&plan_text)?;
        info!(files = plan.allowed_files.len(), criteria = plan.success_criteria.len(), "plan derived");

        self.edit_review_loop(
            &input.goal,
            &plan,
            summary.text,
            &input.cwd,
            &input.scope_id,
            input.phase,
            input.attempt_budget,
        )
        .await
    }

    /// The Edit -> Review attempt loop shared by `run_pipeline` and
    /// `implement`.
    #[allow(clippy::too_many_arguments)]
    async fn edit_review_loop(
        &self,
        goal: &str,
        plan: &planner::Plan,
        analysis_summary: String,
        cwd: &Path,
        scope_id: &str,
        phase: usize,
        attempt_budget: usize,
    ) -> Result<PipelineReport> {
        let mut model = self.default_model();
        let max_attempts = attempt_budget.max(1);

        // Snapshot the allowed files before the Editor touches anything.
        let checkpoints = CheckpointStore::new(self.config.checkpoints_dir())?;
        let snapshot = checkpoints.save(scope_id, phase, &plan.allowed_files, cwd)?;

        let mut corrective: Option<String> = None;
        let mut last_error: Option<MaestroError> = None;

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(MaestroError::Cancelled);
            }

            output::phase("edit");
            let started = Instant::now();
            let edit = self
                .run_agent(
                    AgentRole::Editor,
                    &model,
                    edit_request(goal, plan, &analysis_summary, corrective.as_deref()),
                    Intent::Edit,
                    plan.allowed_files.clone(),
                    cwd,
                )
                .await;

            let edit = match edit {
                Ok(outcome) => outcome,
                Err(e @ MaestroError::Cancelled) => return Err(e),
                Err(e) => {
                    // Provider-level failure: roll back, count the
                    // attempt, and try again.
                    warn!(error = %e, "edit attempt failed before review");
                    self.record(&model, goal, false, started.elapsed().as_millis() as u64);
                    checkpoints.restore(&snapshot, cwd)?;
                    last_error = Some(e);
                    output::retrying(attempt, max_attempts, "provider failure");
                    continue;
                }
            };

            if let Some(reason) = &edit.loop_reason {
                warn!(%reason, "editor stopped by loop detector");
            }

            // A cancelled attempt returns without calling the Reviewer.
            if self.cancel.is_cancelled() {
                return Err(MaestroError::Cancelled);
            }

            output::phase("review");
            let review = self
                .run_reviewer(goal, plan, &edit, &model, cwd)
                .await?;

            if reviewer::is_success(&review.text) {
                self.record(&model, goal, true, started.elapsed().as_millis() as u64);
                output::task_completed();
                return Ok(PipelineReport {
                    text: review.text,
                    modified_files: edit.modified_files,
                    attempts: attempt,
                });
            }

            // Classify over the Reviewer's output combined with the last
            // run_command output: the Reviewer's prose rarely restates the
            // raw compiler or test text that carries the signatures.
            let mut detail = review.text.clone();
            if let Some(command_output) = &review.last_command_output {
                detail.push('\n');
                detail.push_str(command_output);
            }
            let class = classify_error(&detail);
            self.record(&model, goal, false, started.elapsed().as_millis() as u64);
            output::debug_output("review failure", &detail);

            if looks_like_tool_error(&detail) {
                let recommendations = {
                    let mut selector = self.selector.lock().expect("selector lock");
                    selector.recommend_for_retry(
                        AgentRole::Editor,
                        &model.backend,
                        &model.model,
                        goal,
                    )
                };
                if let Some(next) = recommendations
                    .into_iter()
                    .find(|e| self.pool.get(&e.backend).is_some())
                {
                    info!(from = %model.model, to = %next.name, "switching model after tool error");
                    model = ModelRef {
                        backend: next.backend,
                        model: next.name,
                    };
                }
                corrective = None;
            } else {
                corrective = Some(corrective_prompt(
                    class,
                    &detail,
                    &edit.modified_files,
                    phase,
                    attempt,
                ));
            }

            last_error = Some(MaestroError::Review { class, detail });
            output::retrying(attempt, max_attempts, &class.to_string());
        }

        // Exhausted: restore the latest checkpoint, fail with the last
        // classified kind.
        checkpoints.restore(&snapshot, cwd)?;
        Err(last_error.unwrap_or_else(|| MaestroError::Review {
            class: ErrorClass::Unknown,
            detail: "attempts exhausted".to_string(),
        }))
    }

    async fn run_reviewer(
        &self,
        goal: &str,
        plan: &planner::Plan,
        edit: &OrchestratorOutcome,
        model: &ModelRef,
        cwd: &Path,
    ) -> Result<OrchestratorOutcome> {
        let profile = profile_for(AgentRole::Reviewer);
        // Build/test commands are skipped when nothing mutated: the
        // Reviewer simply does not get run_command.
        let tool_names: Vec<&str> = if reviewer::should_run_checks(&edit.modified_files) {
            profile.tool_names.to_vec()
        } else {
            profile
                .tool_names
                .iter()
                .copied()
                .filter(|n| *n != "run_command")
                .collect()
        };
        let registry = ToolRegistry::with_tools(&tool_names);
        let provider = self.provider_for(model)?;
        let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

        let spinner = Spinner::start("reviewing changes");
        let outcome = orchestrator
            .run(
                OrchestratorRequest {
                    system_prompt: profile.system_prompt.to_string(),
                    messages: vec![Message::user(review_request(goal, plan, edit))],
                    model_id: model.model.clone(),
                    intent: Intent::Review,
                    allowed_files: Vec::new(),
                    cwd: cwd.to_path_buf(),
                },
                &self.cancel,
            )
            .await;
        spinner.stop().await;
        outcome
    }

    /// Run one agent role through the orchestrator.
    async fn run_agent(
        &self,
        role: AgentRole,
        model: &ModelRef,
        user_message: String,
        intent: Intent,
        allowed_files: Vec<String>,
        cwd: &Path,
    ) -> Result<OrchestratorOutcome> {
        let profile = profile_for(role);
        let registry = ToolRegistry::with_tools(profile.tool_names);
        let provider = self.provider_for(model)?;
        let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

        let spinner = Spinner::start(&format!("{} working", role));
        let outcome = orchestrator
            .run(
                OrchestratorRequest {
                    system_prompt: profile.system_prompt.to_string(),
                    messages: vec![Message::user(user_message)],
                    model_id: model.model.clone(),
                    intent,
                    allowed_files,
                    cwd: cwd.to_path_buf(),
                },
                &self.cancel,
            )
            .await;
        spinner.stop().await;
        outcome
    }

    /// Load the contents of the task's files plus graph-selected context.
    /// Reads go through the tool registry; anything unreadable is skipped.
    async fn gather_context(&self, goal: &str, required: &[String], cwd: &Path) -> String {
        let mut files: Vec<String> = required.to_vec();

        if self.config.graph_enabled() {
            let cache_dir = self.config.graph_cache_dir();
            match crate::analysis::context::ContextOptimizer::for_workspace(
                cwd,
                Some(cache_dir.as_path()),
            ) {
                Ok(optimizer) => {
                    for path in optimizer.select(goal, self.config.agent.context_files) {
                        if !files.contains(&path) {
                            files.push(path);
                        }
                    }
                }
                Err(e) => {
                    // Non-fatal: proceed without pre-filtered context.
                    warn!(error = %e, "dependency graph unavailable");
                }
            }
        }

        let registry = ToolRegistry::with_tools(&["read_file"]);
        let ctx = ToolContext::new(cwd);
        let mut blocks = Vec::new();
        for file in files {
            match registry
                .execute("read_file", serde_json::json!({ "path": file }), &ctx)
                .await
            {
                Ok(result) if !result.is_error() => {
                    blocks.push(format!("--- {} ---\n{}", file, result.text));
                }
                _ => {}
            }
        }
        blocks.join("\n\n")
    }

    fn record(&self, model: &ModelRef, task: &str, success: bool, latency_ms: u64) {
        let record = ExecutionRecord {
            task: task.chars().take(200).collect(),
            backend: model.backend.clone(),
            model: model.model.clone(),
            success,
            latency_ms,
            error: None,
        };
        if let Ok(mut selector) = self.selector.lock() {
            if let Err(e) = selector.record(record) {
                warn!(error = %e, "could not append execution record");
            }
        }
    }
}

/// Adapter: the Conductor drives each Movement as one pipeline pass.
struct ConductorRunner<'a> {
    conductor: &'a Conductor,
    cwd: PathBuf,
    symphony_id: String,
}

#[async_trait]
impl MovementRunner for ConductorRunner<'_> {
    async fn run_movement(
        &self,
        index: usize,
        movement: &Movement,
        _cancel: &CancelFlag,
    ) -> Result<()> {
        self.conductor
            .run_pipeline(PipelineInput {
                goal: movement_goal(movement),
                intent: Intent::Edit,
                cwd: self.cwd.clone(),
                required_files: movement.required_files.clone(),
                scope_id: self.symphony_id.clone(),
                phase: index,
                attempt_budget: self.conductor.config.agent.max_attempts,
            })
            .await?;
        Ok(())
    }
}

fn movement_goal(movement: &Movement) -> String {
    let mut goal = movement.goal.clone();
    if !movement.success_criteria.is_empty() {
        goal.push_str("\n\nSuccess criteria:\n");
        for criterion in &movement.success_criteria {
            goal.push_str(&format!("- {}\n", criterion));
        }
    }
    goal
}

fn analyze_request(goal: &str, context: &str) -> String {
    if context.is_empty() {
        format!("Task: {}\n\nSummarize the relevant parts of this codebase for the task.", goal)
    } else {
        format!(
            "Task: {}\n\nRelevant files:\n\n{}\n\nSummarize what matters for the task.",
            goal, context
        )
    }
}

fn plan_request(goal: &str, context: &str, summary: Option<&str>) -> String {
    let mut request = format!("Task: {}\n", goal);
    if let Some(summary) = summary {
        request.push_str(&format!("\nCodebase analysis:\n{}\n", summary));
    }
    if !context.is_empty() {
        request.push_str(&format!("\nRelevant files:\n\n{}\n", context));
    }
    request.push_str("\nProduce the implementation plan.");
    request
}

fn edit_request(
    goal: &str,
    plan: &planner::Plan,
    summary: &str,
    corrective: Option<&str>,
) -> String {
    let mut request = format!("Task: {}\n\nPlan:\n{}\n", goal, plan.text);
    if !summary.is_empty() {
        request.push_str(&format!("\nCodebase analysis:\n{}\n", summary));
    }
    if let Some(corrective) = corrective {
        request.push_str(&format!("\n{}\n", corrective));
    }
    request.push_str("\nImplement the plan now.");
    request
}

fn review_request(goal: &str, plan: &planner::Plan, edit: &OrchestratorOutcome) -> String {
    let modified: Vec<String> = edit
        .modified_files
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    format!(
        "Task: {}\n\nSuccess criteria:\n{}\n\nModified files:\n{}\n\nEditor summary:\n{}\n\nVerify each criterion.",
        goal,
        plan.success_criteria
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n"),
        if modified.is_empty() {
            "(none)".to_string()
        } else {
            modified.join("\n")
        },
        edit.text
    )
}

/// Tailored corrective prompt for the next Edit pass. Pattern-matched
/// sub-cases name the remedy directly; otherwise the class picks the
/// framing.
fn corrective_prompt(
    class: ErrorClass,
    detail: &str,
    modified_files: &[PathBuf],
    step: usize,
    attempt: usize,
) -> String {
    let lower = detail.to_lowercase();
    let remedy = if lower.contains("cannot find package") {
        "An import does not resolve. Fix the import path or add the missing dependency declaration.".to_string()
    } else if lower.contains("redeclared in this block") {
        "A symbol is declared twice. Remove the duplicate declaration and keep a single definition.".to_string()
    } else if lower.contains("ineffassign") {
        "A value is assigned but never used. Remove the ineffectual assignment or use the value.".to_string()
    } else {
        match class {
            ErrorClass::Syntax => "The previous edit introduced a syntax error. Re-read the affected file and fix the malformed code.".to_string(),
            ErrorClass::Build => "The project no longer builds. Read the build output, fix the reported errors, and rebuild.".to_string(),
            ErrorClass::Test => "Tests are failing. Read the failing assertions and make the implementation satisfy them.".to_string(),
            ErrorClass::Lint => "The linter reports problems. Address each reported finding.".to_string(),
            ErrorClass::Logic => "The implementation does not meet the success criteria. Re-read the criteria and correct the behavior.".to_string(),
            ErrorClass::Unknown => "The review found problems. Address each reported issue.".to_string(),
        }
    };

    let files: Vec<String> = modified_files
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    format!(
        "The previous attempt failed (step {}, attempt {}).\n{}\n\nReview output:\n{}\n\nFiles modified so far:\n{}",
        step,
        attempt,
        remedy,
        detail.chars().take(2000).collect::<String>(),
        if files.is_empty() {
            "(none)".to_string()
        } else {
            files.join("\n")
        }
    )
}

fn slugify(text: &str) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let mut collapsed = String::new();
    for ch in slug.chars() {
        if ch == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(ch);
    }
    collapsed.trim_matches('-').chars().take(48).collect()
}
