use thiserror::Error;

/// Canonical result for the optimizer crates.
pub type Result<T> = std::result::Result<T, CompilerError>;

/// Fatal compilation failures.
///
/// Missing statistics are not represented here: they degrade plan quality and
/// travel through the optimizer as unknown (`None`) estimates.
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("conflicting configuration on '{node}': {detail}")]
    ConfigurationConflict { node: String, detail: String },

    #[error("unsupported topology: {0}")]
    UnsupportedTopology(String),

    #[error("no feasible plan for node '{node}'")]
    NoFeasiblePlan { node: String },

    #[error("invalid optimizer configuration: {0}")]
    InvalidConfig(String),

    #[error("DAG document error: {0}")]
    Dsl(String),

    #[error("fingerprint error: {0}")]
    Hash(String),
}

impl CompilerError {
    pub fn conflict(node: impl Into<String>, detail: impl Into<String>) -> Self {
        CompilerError::ConfigurationConflict {
            node: node.into(),
            detail: detail.into(),
        }
    }

    pub fn topology(detail: impl Into<String>) -> Self {
        CompilerError::UnsupportedTopology(detail.into())
    }
}

impl From<serde_json::Error> for CompilerError {
    fn from(e: serde_json::Error) -> Self {
        CompilerError::Hash(e.to_string())
    }
}
