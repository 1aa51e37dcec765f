use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error during {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context} failed with status {status}: {body}")]
    Status {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode {context} response: {message}")]
    Decode {
        context: &'static str,
        message: String,
    },
    #[error("instance '{0}' not found")]
    InstanceNotFound(String),
    #[error("timed out after {waited_secs}s waiting for instance to reach {target}")]
    WaitTimeout { target: String, waited_secs: u64 },
    #[error("failed to render report: {0}")]
    Render(String),
}

impl ControlError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn http(context: &'static str, source: reqwest::Error) -> Self {
        Self::Http { context, source }
    }

    pub fn decode<E: std::fmt::Display>(context: &'static str, e: E) -> Self {
        Self::Decode {
            context,
            message: e.to_string(),
        }
    }

    /// Errors worth retrying on an idempotent request.
    pub fn is_transient(&self) -> bool {
        match self {
            ControlError::Http { source, .. } => {
                source.is_connect() || source.is_timeout() || classify_message(&source.to_string())
            }
            ControlError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            ControlError::Config(_) => 2,
            _ => 1,
        }
    }
}

fn classify_message(s: &str) -> bool {
    s.contains("connection") || s.contains("timeout") || s.contains("broken pipe")
}
