use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("{0}")]
    Usage(String),

    #[error("Invalid excluded path '{path}': {reason}")]
    InvalidExclusion { path: String, reason: String },

    #[error("{tool} rejected its arguments:\n{stdout}\n{stderr}")]
    ToolUsage {
        tool: String,
        stdout: String,
        stderr: String,
    },

    #[error("{tool} not found or not executable: {source}")]
    ToolMissing {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed with exit code {code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("FATAL error during {tool} execution:\n{diagnostics}")]
    ToolFatal { tool: String, diagnostics: String },

    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl AuditError {
    /// Usage errors exit with 2, tool and runtime failures with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::InvalidExclusion { .. } | Self::ToolUsage { .. } => 2,
            _ => 1,
        }
    }

    pub fn is_usage(&self) -> bool {
        self.exit_code() == 2
    }
}
