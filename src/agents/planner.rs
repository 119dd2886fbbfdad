//! Planner post-processing
//!
//! The Planner's output is free-form text; the Editor and Reviewer need a
//! structured derivative. Allowed files are extracted by string match
//! against paths with recognized extensions; success criteria come from
//! the plan's designated section. Both extractions are idempotent over
//! their own output.

use crate::analyzer::extract_paths;
use crate::errors::{PlanError, Result};

/// A plan plus its structured derivative.
#[derive(Debug, Clone)]
pub struct Plan {
    pub text: String,
    pub allowed_files: Vec<String>,
    pub success_criteria: Vec<String>,
}

/// Derive the structured plan from the Planner's text. Fails when the
/// plan names no files or defines no success criteria.
pub fn derive_plan(text: &str) -> Result<Plan> {
    let allowed_files = extract_allowed_files(text);
    if allowed_files.is_empty() {
        return Err(PlanError::NoFiles.into());
    }
    let success_criteria = extract_success_criteria(text);
    if success_criteria.is_empty() {
        return Err(PlanError::NoCriteria.into());
    }
    Ok(Plan {
        text: text.to_string(),
        allowed_files,
        success_criteria,
    })
}

/// Every path with a recognized extension mentioned anywhere in the plan,
/// deduplicated in first-appearance order.
pub fn extract_allowed_files(plan: &str) -> Vec<String> {
    extract_paths(plan)
}

/// Lines of the "Success Criteria" section: bullet or numbered lines up
/// to the next section heading.
pub fn extract_success_criteria(plan: &str) -> Vec<String> {
    let mut criteria = Vec::new();
    let mut in_section = false;

    for line in plan.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();

        if lower.contains("success criteria") {
            in_section = true;
            continue;
        }
        if in_section {
            if trimmed.starts_with('#') || lower.ends_with(':') && !is_bullet(trimmed) {
                // Next section begins.
                break;
            }
            if let Some(item) = bullet_text(trimmed) {
                criteria.push(item.to_string());
            } else if !trimmed.is_empty() && !criteria.is_empty() {
                break;
            }
        }
    }
    criteria
}

fn is_bullet(line: &str) -> bool {
    bullet_text(line).is_some()
}

fn bullet_text(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| {
            line.split_once(". ")
                .filter(|(n, _)| n.chars().all(|c| c.is_ascii_digit()) && !n.is_empty())
                .map(|(_, rest)| rest)
        })?;
    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}
