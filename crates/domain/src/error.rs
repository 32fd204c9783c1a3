/// Shared error type used across all QuestCodex crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("agent {endpoint}: HTTP {status} - {message}")]
    AgentStatus {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("agent: {0}")]
    Agent(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),

    #[error("interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry has any chance of succeeding.
    ///
    /// Connection failures, timeouts, and 5xx responses from the agent
    /// server are transient; everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout(_) => true,
            Error::AgentStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
