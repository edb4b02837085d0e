use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum Error {
    /// The OS random source could not produce bytes for PKCE or state values.
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(#[source] rand::Error),

    /// Conflicting or missing credential sources, detected before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Rejected credentials, passcode or captcha. The reason is the server's.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("client_error")]
    StreamClientError,

    #[error("vehicle_disconnected")]
    StreamVehicleDisconnected,

    #[error("disconnect")]
    StreamDisconnected,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("middleware error: {0}")]
    Middleware(anyhow::Error),

    /// Non-200 response. The body is kept so JSON error payloads stay inspectable.
    #[error("{status}")]
    Status { status: StatusCode, body: Bytes },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

/// How a top-level caller is expected to react to an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Ask the user again (bad password, passcode or captcha).
    Reprompt,
    /// Network or stream trouble; reconnecting may help.
    Reconnect,
    /// Misconfiguration that no retry will fix.
    Fatal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::AuthFailed(_) => ErrorCategory::Reprompt,
            Error::Transport(_)
            | Error::StreamClientError
            | Error::StreamVehicleDisconnected
            | Error::StreamDisconnected => ErrorCategory::Reconnect,
            Error::EntropyUnavailable(_) | Error::Configuration(_) => ErrorCategory::Fatal,
        }
    }

    /// Body of a non-200 response, if this error carries one.
    pub fn response_body(&self) -> Option<&Bytes> {
        match self {
            Error::Transport(TransportError::Status { body, .. }) => Some(body),
            _ => None,
        }
    }

    pub(crate) fn auth(reason: impl Into<String>) -> Self {
        Error::AuthFailed(reason.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(TransportError::Http(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Transport(TransportError::Json(err))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Transport(TransportError::Url(err))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Error::Transport(TransportError::WebSocket(err))
    }
}

impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Error::Transport(TransportError::Header(err))
    }
}

// Errors raised inside the bearer middleware are boxed into anyhow by
// reqwest-middleware; unwrap them so callers still see the original variant.
impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => match e.downcast::<Error>() {
                Ok(inner) => inner,
                Err(other) => Error::Transport(TransportError::Middleware(other)),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_displays_status_line() {
        let err = Error::Transport(TransportError::Status {
            status: StatusCode::UNAUTHORIZED,
            body: Bytes::from_static(b"{\"error\":\"invalid_token\"}"),
        });
        assert_eq!(err.to_string(), "401 Unauthorized");
        assert_eq!(
            err.response_body().map(|b| b.as_ref()),
            Some(&b"{\"error\":\"invalid_token\"}"[..])
        );
    }

    #[test]
    fn categories_follow_recovery_policy() {
        assert_eq!(Error::auth("bad passcode").category(), ErrorCategory::Reprompt);
        assert_eq!(Error::StreamDisconnected.category(), ErrorCategory::Reconnect);
        assert_eq!(
            Error::StreamVehicleDisconnected.category(),
            ErrorCategory::Reconnect
        );
        assert_eq!(
            Error::Configuration("conflict".into()).category(),
            ErrorCategory::Fatal
        );
    }

    #[test]
    fn middleware_errors_keep_library_variant() {
        let wrapped = reqwest_middleware::Error::Middleware(anyhow::Error::new(Error::auth(
            "token expired and refresh token is not set",
        )));
        let err: Error = wrapped.into();
        assert!(matches!(err, Error::AuthFailed(reason) if reason.contains("refresh token")));
    }
}
