use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request url: {0}")]
    Url(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response decode failed: {0}")]
    Decode(String),
}

impl ApiError {
    /// Text shown inline next to the failed control.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { status, body } if body.trim().is_empty() => {
                format!("request failed with status {status}")
            }
            ApiError::Status { body, .. } => extract_detail(body).unwrap_or_else(|| body.clone()),
            ApiError::Transport(_) => "backend unreachable".to_string(),
            other => other.to_string(),
        }
    }
}

// Backends built on FastAPI report errors as {"detail": "..."}.
fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("detail")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid push endpoint: {0}")]
    Endpoint(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid backend url {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("unsupported backend scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid number for {key}: {value:?}")]
    InvalidNumber { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("operation already queued: {0}")]
    AlreadyQueued(String),
}

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("entity already exists: {0}")]
    Duplicate(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("the last session cannot be removed")]
    LastSession,
    #[error(transparent)]
    Busy(#[from] TrackerError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_prefers_detail_field() {
        let err = ApiError::Status {
            status: 404,
            body: r#"{"detail":"Instance not found"}"#.to_string(),
        };
        assert_eq!(err.user_message(), "Instance not found");
    }

    #[test]
    fn status_error_tolerates_empty_and_malformed_bodies() {
        let empty = ApiError::Status {
            status: 502,
            body: String::new(),
        };
        assert_eq!(empty.user_message(), "request failed with status 502");

        let garbled = ApiError::Status {
            status: 500,
            body: "<html>oops".to_string(),
        };
        assert_eq!(garbled.user_message(), "<html>oops");
    }
}
