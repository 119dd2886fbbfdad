//! Unit and scenario tests for the maestro engine.
//!
//! These cover individual components and the seed end-to-end scenarios
//! without network I/O: providers are scripted.

mod support;
mod test_analyzer;
mod test_cli;
mod test_orchestrator;
mod test_parser_props;
mod test_pipeline;
mod test_symphony;
