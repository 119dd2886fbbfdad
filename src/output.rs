//! Output rendering
//!
//! Centralized user-facing output based on CLI flags: compact mode drops
//! decorative chrome, verbose mode shows extra detail. Debug dumps are
//! gated on verbose mode or `CORE_DEBUG`.

use colored::*;
use std::sync::atomic::{AtomicBool, Ordering};

static COMPACT_MODE: AtomicBool = AtomicBool::new(false);
static VERBOSE_MODE: AtomicBool = AtomicBool::new(false);

/// Initialize output modes from CLI flags, once at startup.
pub fn init(compact: bool, verbose: bool) {
    COMPACT_MODE.store(compact, Ordering::SeqCst);
    VERBOSE_MODE.store(verbose, Ordering::SeqCst);
}

pub fn is_compact() -> bool {
    COMPACT_MODE.load(Ordering::SeqCst)
}

pub fn is_verbose() -> bool {
    VERBOSE_MODE.load(Ordering::SeqCst)
}

/// Announce a tool call.
pub fn tool_call(name: &str) {
    if !is_compact() {
        println!("{} {}", "→".bright_blue(), name.bright_cyan());
    }
}

pub fn tool_success(name: &str) {
    if is_verbose() {
        println!("{} {}", "✓".green(), name);
    }
}

/// Tool failures are always shown.
pub fn tool_failure(name: &str, error: &str) {
    println!("{} {}: {}", "✗".bright_red(), name, error);
}

/// Announce a pipeline phase.
pub fn phase(name: &str) {
    if !is_compact() {
        println!("{} {}", "◆".bright_magenta(), name.bold());
    }
}

pub fn final_answer(content: &str) {
    if is_compact() {
        println!("{}", content);
    } else {
        println!("\n{}", content);
    }
}

pub fn task_completed() {
    if !is_compact() {
        println!("{}", "✓ Task completed".bright_green());
    }
}

pub fn task_failed(reason: &str) {
    println!("{} {}", "✗".bright_red(), reason);
}

pub fn retrying(attempt: usize, max: usize, reason: &str) {
    if !is_compact() {
        println!(
            "{} attempt {}/{}: {}",
            "↻".bright_yellow(),
            attempt,
            max,
            reason.dimmed()
        );
    }
}

/// Debug dump, gated on verbose mode or `CORE_DEBUG`. Goes to stderr.
pub fn debug_output(label: &str, content: &str) {
    if is_verbose() || crate::config::debug_enabled() {
        eprintln!("{}", format!("=== {} ===", label).bright_magenta());
        eprintln!("{}", content);
    }
}
