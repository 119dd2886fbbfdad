use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The central error type for the Maestro engine.
///
/// Every failure a caller can observe is one of these kinds. The CLI layer
/// maps kinds to exit codes via [`MaestroError::exit_code`].
#[derive(Error, Debug)]
pub enum MaestroError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Loop detected: {reason}")]
    Loop { reason: String },

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Review failed ({class}): {detail}")]
    Review { class: ErrorClass, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MaestroError {
    /// Exit code contract for the CLI layer: 0 success, 1 generic failure,
    /// 2 configuration error, 3 cancellation.
    pub fn exit_code(&self) -> i32 {
        match self {
            MaestroError::Config(_) => 2,
            MaestroError::Cancelled => 3,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to parse provider response: {0}")]
    Parse(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool '{name}' not found")]
    NotFound { name: String },

    #[error("invalid arguments for tool '{name}': {message}")]
    InvalidArguments { name: String, message: String },

    #[error("path '{path}' is not in the plan's allowed files")]
    PathNotAllowed { path: String },

    #[error("apply_patch requires a non-empty search block")]
    MissingSearch,

    #[error("tool '{name}' failed: {message}")]
    Execution { name: String, message: String },

    #[error("tool execution timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command exited with status {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("command timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("plan does not name any files to modify")]
    NoFiles,

    #[error("plan does not define success criteria")]
    NoCriteria,

    #[error("decomposition returned no movements")]
    EmptyDecomposition,

    #[error("decomposition output was not valid JSON: {0}")]
    InvalidDecomposition(String),
}

/// Reviewer-classified failure categories.
///
/// String encodings are the persisted/reported form; the enum is the
/// in-process form with exhaustive matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Syntax,
    Build,
    Test,
    Lint,
    Logic,
    Unknown,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Syntax => "syntax",
            ErrorClass::Build => "build",
            ErrorClass::Test => "test",
            ErrorClass::Lint => "lint",
            ErrorClass::Logic => "logic",
            ErrorClass::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Keyword signatures per class, checked in priority order
/// syntax -> build -> test -> lint -> logic -> unknown.
const SYNTAX_KEYWORDS: &[&str] = &[
    "syntax error",
    "unexpected token",
    "expected ';'",
    "expected '}'",
    "unexpected eof",
    "parse error",
    "unterminated",
];
const BUILD_KEYWORDS: &[&str] = &[
    "cannot find package",
    "undefined:",
    "undeclared",
    "compilation failed",
    "build failed",
    "cannot find module",
    "unresolved import",
    "redeclared in this block",
    "does not compile",
    "link error",
];
const TEST_KEYWORDS: &[&str] = &[
    "test failed",
    "tests failed",
    "assertion failed",
    "assert_eq",
    "expected but got",
    "--- fail",
    "panicked at",
];
const LINT_KEYWORDS: &[&str] = &[
    "lint",
    "ineffassign",
    "golangci",
    "clippy",
    "unused variable",
    "unused import",
    "deprecated",
];
const LOGIC_KEYWORDS: &[&str] = &[
    "wrong result",
    "incorrect behavior",
    "does not match expected",
    "criteria not met",
    "criterion not satisfied",
    "off by one",
];

/// Classify a failure report into an [`ErrorClass`] by keyword signature.
///
/// Matching is on the lowercased text; the first class whose signature
/// appears wins, so syntax errors outrank build errors even when a build
/// log contains both.
pub fn classify_error(text: &str) -> ErrorClass {
    let lower = text.to_lowercase();
    let table: &[(&[&str], ErrorClass)] = &[
        (SYNTAX_KEYWORDS, ErrorClass::Syntax),
        (BUILD_KEYWORDS, ErrorClass::Build),
        (TEST_KEYWORDS, ErrorClass::Test),
        (LINT_KEYWORDS, ErrorClass::Lint),
        (LOGIC_KEYWORDS, ErrorClass::Logic),
    ];
    for (keywords, class) in table {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *class;
        }
    }
    ErrorClass::Unknown
}

/// True when a failure report reads like the model mishandled tool calling
/// itself (rather than producing bad code). These failures are candidates
/// for a model switch instead of another edit attempt.
pub fn looks_like_tool_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["tool", "function", "not available", "not supported"]
        .iter()
        .any(|k| lower.contains(k))
}

pub type Result<T> = std::result::Result<T, MaestroError>;
