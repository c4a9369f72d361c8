use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize TOML: {0}")]
    TomlWrite(#[from] toml::ser::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gateway rejected the agent credentials")]
    Unauthorized,
    #[error("Gateway has no record of {0}")]
    NotFound(String),
    #[error("Gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl AgentError {
    /// Worth retrying later: the gateway was unreachable or failed on its side.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Http(_) => true,
            AgentError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// The gateway does not know this agent; continuing is pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Unauthorized | AgentError::NotFound(_))
    }
}
