use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Only `Syntax`, the three compile-time variants and `Internal` ever abort a
/// run. Transport failures and assertion mismatches are not errors at this
/// level — they are recorded per step and folded into the snapshot so the run
/// still completes and reports.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed script text. Carries the 1-based position of the offending
    /// token.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// A template references a name that is neither an environment binding
    /// nor a capture produced by an earlier step of the same scenario.
    #[error("unresolved variable `${{{name}}}` in scenario `{scenario}`")]
    UnresolvedVariable { scenario: String, name: String },

    /// An assertion (or capture-dependent step) appears before any request
    /// that could produce the response it targets.
    #[error("invalid reference in scenario `{scenario}`: {message}")]
    InvalidReference { scenario: String, message: String },

    /// Structurally invalid script: empty scenario, malformed repeat count,
    /// duplicate scenario name, unsupported operator/target combination.
    #[error("structural error: {0}")]
    Structural(String),

    /// Invariant violation inside the engine itself. Always fatal.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::Syntax {
            line,
            column,
            message: message.into(),
        }
    }
}
