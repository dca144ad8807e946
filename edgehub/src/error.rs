use crate::topic::TopicError;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The manager reached its terminal state, all mutations are rejected.
    #[error("rule manager already closed")]
    ManagerClosed,
    #[error("rule ({0}) not found")]
    RuleNotFound(String),
    #[error("rule ({0}) exists")]
    RuleExists(String),
    /// Malformed topic name or pattern
    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),
    #[error("{0}")]
    Msg(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<String> for HubError {
    fn from(e: String) -> Self {
        HubError::Msg(e)
    }
}

impl From<&str> for HubError {
    fn from(e: &str) -> Self {
        HubError::Msg(e.to_string())
    }
}
