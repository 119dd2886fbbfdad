//! Reviewer verdict
//!
//! The Reviewer's success signal is a lexical contract: a pure function of
//! the final assistant text. Success requires an explicit success phrase
//! and no failure keyword, where a failure keyword preceded by a negation
//! ("no errors", "zero failures") does not count.

use once_cell::sync::Lazy;
use regex::Regex;

const SUCCESS_PHRASES: &[&str] = &["success", "all criteria met", "all checks passed"];

const FAILURE_KEYWORDS: &[&str] = &[
    "fail",
    "error",
    "issue",
    "broken",
    "missing",
    "incorrect",
    "not met",
    "does not",
];

const NEGATION_QUALIFIERS: &[&str] = &["no", "zero", "without", "none"];

/// Whether the Reviewer's final text reports success.
pub fn is_success(text: &str) -> bool {
    let lower = text.to_lowercase();
    let has_success = SUCCESS_PHRASES.iter().any(|p| lower.contains(p));
    if !has_success {
        return false;
    }
    !has_unqualified_failure(&lower)
}

/// A failure keyword counts unless the word before it is a negation
/// qualifier.
fn has_unqualified_failure(lower: &str) -> bool {
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '(' | ')'))
        .filter(|w| !w.is_empty())
        .collect();

    for (idx, word) in words.iter().enumerate() {
        let hit = FAILURE_KEYWORDS.iter().any(|k| {
            if k.contains(' ') {
                // Multi-word keywords match against the joined tail.
                words[idx..].join(" ").starts_with(k)
            } else {
                word.starts_with(k)
            }
        });
        if !hit {
            continue;
        }
        let qualified = idx > 0 && NEGATION_QUALIFIERS.contains(&words[idx - 1]);
        if !qualified {
            return true;
        }
    }
    false
}

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)+").expect("version regex"));

/// Version-expression equivalence: a criterion naming `1.15.4` is
/// satisfied by `~> 1.15.4`, `^1.15.4`, `>= 1.15.4`, or `v1.15.4`: any
/// expression whose numeric core matches.
pub fn version_satisfies(required: &str, observed: &str) -> bool {
    let (Some(required), Some(observed)) = (
        VERSION_RE.find(required).map(|m| m.as_str()),
        VERSION_RE.find(observed).map(|m| m.as_str()),
    ) else {
        return false;
    };
    required == observed
}

/// Build/test commands are pointless when nothing mutated.
pub fn should_run_checks(modified_files: &[std::path::PathBuf]) -> bool {
    !modified_files.is_empty()
}
