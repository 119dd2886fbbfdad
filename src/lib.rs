//! Maestro: agentic orchestration engine
//!
//! Turns a natural-language task into verified code changes: a Task
//! Analyzer classifies intent and complexity, a Symphony sequences
//! complex work into dependency-ordered Movements, and a Conductor drives
//! each pass through Analyze -> Plan -> Edit -> Review with retry,
//! rollback, and model switching. The inner orchestrator loop mediates
//! between a Provider and the tool registry under a loop detector.
//!
//! # Quick start
//!
//! ```ignore
//! use maestro::analyzer::Task;
//! use maestro::conductor::Conductor;
//!
//! let conductor = Conductor::new(pool, selector, config);
//! let answer = conductor.execute(&Task::new("Rename old to new in code.go", ".")).await?;
//! ```

pub mod agents;
pub mod analysis;
pub mod analyzer;
pub mod api;
pub mod cancel;
pub mod catalog;
pub mod checkpoint;
pub mod cli;
pub mod conductor;
pub mod config;
pub mod errors;
pub mod loop_detector;
pub mod orchestrator;
pub mod output;
pub mod spinner;
pub mod symphony;
pub mod tool_parser;
pub mod tools;
