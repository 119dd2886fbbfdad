//! Command surface
//!
//! The CLI maps the external command contract onto the Conductor:
//! `execute`, `query`, `plan`, `implement`, `resume`, `models`. Exit
//! codes come from the error taxonomy: 0 success, 1 failure, 2 config
//! error, 3 cancellation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::analyzer::Task;
use crate::api::HttpProvider;
use crate::catalog::{ExecutionHistory, ModelSelector};
use crate::conductor::{Conductor, StaticProviderPool};
use crate::config::Config;
use crate::errors::MaestroError;
use crate::output;

#[derive(Parser)]
#[command(name = "maestro")]
#[command(about = "Agentic orchestration engine: tasks in, verified code changes out")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Working directory
    #[arg(short = 'C', long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Compact output mode (less visual chrome)
    #[arg(long)]
    pub compact: bool,

    /// Verbose mode (detailed tool output and debug info)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a task end to end
    #[command(alias = "x")]
    Execute {
        /// What to do
        task: String,

        /// Analyze and plan, but change nothing
        #[arg(long)]
        dry_run: bool,

        /// Maximum pipeline attempts per movement
        #[arg(long)]
        max_attempts: Option<usize>,

        /// Pause for confirmation at phase boundaries
        #[arg(long)]
        supervised: bool,
    },

    /// Answer a question about the codebase (no edits)
    #[command(alias = "q")]
    Query {
        /// The question
        task: String,
    },

    /// Produce and persist a plan without executing it
    Plan {
        /// What to plan for
        task: String,
    },

    /// Execute a previously saved plan
    Implement {
        /// Path to the saved plan
        plan_path: PathBuf,

        /// Maximum pipeline attempts
        #[arg(long)]
        max_attempts: Option<usize>,
    },

    /// Resume a failed or interrupted symphony
    Resume {
        /// Symphony id
        symphony_id: String,
    },

    /// List the model catalog
    Models,
}

/// Build the Conductor from config and wire Ctrl+C to its cancel flag.
fn build_conductor(config: Config) -> Result<Conductor, MaestroError> {
    let provider = HttpProvider::new(
        config.backend.clone(),
        config.endpoint.clone(),
        Duration::from_secs(config.agent.provider_timeout_secs),
    )?
    .with_temperature(config.temperature);

    let mut pool = StaticProviderPool::new().with(config.backend.clone(), Arc::new(provider));
    // Additional catalog backends get their own drivers against the same
    // endpoint family only when credentials exist for them.
    for entry in config.effective_catalog() {
        if entry.backend != config.backend && crate::api::api_key_for(&entry.backend).is_some() {
            if let Ok(provider) = HttpProvider::new(
                entry.backend.clone(),
                config.endpoint.clone(),
                Duration::from_secs(config.agent.provider_timeout_secs),
            ) {
                pool = pool.with(entry.backend.clone(), Arc::new(provider));
            }
        }
    }

    let history = ExecutionHistory::open(config.history_path())
        .unwrap_or_else(|_| ExecutionHistory::ephemeral());
    let selector = ModelSelector::new(config.effective_catalog(), history);

    let conductor = Conductor::new(Arc::new(pool), selector, config);

    let cancel = conductor.cancel_flag();
    let _ = ctrlc::set_handler(move || {
        cancel.cancel();
    });

    Ok(conductor)
}

/// Run the parsed CLI. Returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    output::init(cli.compact, cli.verbose);

    let mut config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            output::task_failed(&format!("configuration error: {}", e));
            return 2;
        }
    };

    let cwd = cli
        .workdir
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let result: std::result::Result<String, MaestroError> = match cli.command {
        Commands::Execute {
            ref task,
            dry_run,
            max_attempts,
            supervised,
        } => {
            if let Some(max) = max_attempts {
                config.agent.max_attempts = max;
            }
            let attempts = config.agent.max_attempts;
            match build_conductor(config) {
                Ok(conductor) => {
                    let mut t = Task::new(task.as_str(), &cwd);
                    t.attempt_budget = attempts;
                    t.supervised = supervised;
                    if dry_run {
                        conductor
                            .plan_only(&t)
                            .await
                            .map(|(plan, path)| {
                                format!(
                                    "dry run: plan saved to {} ({} files, {} criteria)",
                                    path.display(),
                                    plan.allowed_files.len(),
                                    plan.success_criteria.len()
                                )
                            })
                    } else {
                        conductor.execute(&t).await
                    }
                }
                Err(e) => Err(e),
            }
        }
        Commands::Query { ref task } => match build_conductor(config) {
            Ok(conductor) => conductor.execute(&Task::new(task.as_str(), &cwd)).await,
            Err(e) => Err(e),
        },
        Commands::Plan { ref task } => match build_conductor(config) {
            Ok(conductor) => conductor
                .plan_only(&Task::new(task.as_str(), &cwd))
                .await
                .map(|(_, path)| format!("plan saved to {}", path.display())),
            Err(e) => Err(e),
        },
        Commands::Implement {
            ref plan_path,
            max_attempts,
        } => {
            if let Some(max) = max_attempts {
                config.agent.max_attempts = max;
            }
            let attempts = config.agent.max_attempts;
            match build_conductor(config) {
                Ok(conductor) => {
                    let mut t = Task::new("implement saved plan", &cwd);
                    t.attempt_budget = attempts;
                    conductor.implement(plan_path, &t).await
                }
                Err(e) => Err(e),
            }
        }
        Commands::Resume { ref symphony_id } => match build_conductor(config) {
            Ok(conductor) => conductor.resume(symphony_id, &cwd).await,
            Err(e) => Err(e),
        },
        Commands::Models => {
            for entry in config.effective_catalog() {
                println!(
                    "{}/{}  tools={}  ${:.2}/Mtok  {:.0} tok/s",
                    entry.backend,
                    entry.name,
                    entry.supports_tool_calls,
                    entry.cost_per_million,
                    entry.avg_tokens_per_sec
                );
            }
            Ok(String::new())
        }
    };

    match result {
        Ok(message) => {
            if !message.is_empty() {
                output::final_answer(&message);
            }
            info!("done");
            0
        }
        Err(e) => {
            output::task_failed(&e.to_string());
            e.exit_code()
        }
    }
}
