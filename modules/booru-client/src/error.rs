use thiserror::Error;

pub type Result<T> = std::result::Result<T, BooruError>;

#[derive(Debug, Error)]
pub enum BooruError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl BooruError {
    /// HTTP status of the upstream response, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            BooruError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the upstream confirmed the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<reqwest::Error> for BooruError {
    fn from(err: reqwest::Error) -> Self {
        BooruError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for BooruError {
    fn from(err: serde_json::Error) -> Self {
        BooruError::Parse(err.to_string())
    }
}
