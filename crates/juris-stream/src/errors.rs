/// Generic user-facing message for failures that carry no backend text.
pub const GENERIC_ERROR_MESSAGE: &str = "Une erreur est survenue. Veuillez réessayer.";

/// Errors raised by an SSE transport before or while reading the body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (connection refused, DNS, TLS, ...).
    #[error("request failed: {message}")]
    Request { message: String },
    /// Backend answered with a non-success HTTP status.
    #[error("backend responded with status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the body stream failed mid-response.
    #[error("stream read failed: {message}")]
    Read { message: String },
}

impl TransportError {
    /// Creates a request-level error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates a read-level error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Terminal failure recorded on a session that resolved to an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionFailure {
    /// Network failure or non-OK status.
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },
    /// The backend emitted an `error` event.
    #[error("backend failure: {}", .message.as_deref().unwrap_or(GENERIC_ERROR_MESSAGE))]
    Backend { message: Option<String> },
}

impl SessionFailure {
    /// Message suitable for display to the end user.
    ///
    /// Backend messages are surfaced verbatim; transport details stay in logs.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Backend {
                message: Some(message),
            } if !message.trim().is_empty() => message,
            _ => GENERIC_ERROR_MESSAGE,
        }
    }
}

impl From<&TransportError> for SessionFailure {
    fn from(err: &TransportError) -> Self {
        SessionFailure::Transport {
            message: err.to_string(),
            status: err.status(),
        }
    }
}

/// Top-level error type for the public API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JurisError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// Transport error surfaced outside a session.
    #[error(transparent)]
    Transport(TransportError),
    /// Internal invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl JurisError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<TransportError> for JurisError {
    fn from(value: TransportError) -> Self {
        JurisError::Transport(value)
    }
}

/// Errors from the PDF-generation proxy client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PdfError {
    /// Missing or invalid PDF service configuration.
    #[error("pdf config error: {0}")]
    Config(String),
    /// Caller supplied unusable input.
    #[error("pdf validation error: {0}")]
    Validation(String),
    /// Upstream rejected the generation request.
    #[error("pdf submit failed with status {status}: {message}")]
    Submit { status: u16, message: String },
    /// Upstream reported the job as failed.
    #[error("pdf generation failed: {0}")]
    JobFailed(String),
    /// The job did not complete within the polling budget.
    #[error("pdf generation timed out")]
    TimedOut,
    /// Network error while talking to the upstream.
    #[error("pdf transport error: {0}")]
    Transport(String),
}

impl PdfError {
    /// HTTP status the proxy reports for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Submit { status, .. } => *status,
            Self::TimedOut => 504,
            Self::Config(_) | Self::JobFailed(_) | Self::Transport(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_message_is_surfaced_verbatim() {
        let failure = SessionFailure::Backend {
            message: Some("Quota dépassé".into()),
        };
        assert_eq!(failure.user_message(), "Quota dépassé");
    }

    #[test]
    fn transport_and_empty_backend_failures_use_generic_message() {
        let transport = SessionFailure::from(&TransportError::Status {
            status: 502,
            body: "bad gateway".into(),
        });
        assert_eq!(transport.user_message(), GENERIC_ERROR_MESSAGE);
        assert!(matches!(
            transport,
            SessionFailure::Transport {
                status: Some(502),
                ..
            }
        ));

        let blank = SessionFailure::Backend {
            message: Some("  ".into()),
        };
        assert_eq!(blank.user_message(), GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn pdf_timeout_maps_to_gateway_timeout() {
        assert_eq!(PdfError::TimedOut.http_status(), 504);
        assert_eq!(
            PdfError::Submit {
                status: 401,
                message: "unauthorized".into()
            }
            .http_status(),
            401
        );
    }
}
