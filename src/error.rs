use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("missing parameter: {0}")]
    MissingParam(String),

    #[error("no metrics: {0}")]
    NoMetrics(String),

    #[error("no instances")]
    NoInstances,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("ONTAP API error {errno}: {reason}")]
    Api { errno: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// True when the controller rejected a data request because too many
    /// instances were asked for in one batch.
    pub fn is_resource_limit(&self) -> bool {
        match self {
            AgentError::Api { reason, .. } => reason.contains("resource limit exceeded"),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
