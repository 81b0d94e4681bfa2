use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

use crate::rest::request::RestRequestSyntaxError;

/// Result alias for REST handling.
pub type RestResult<T> = Result<T, RestError>;

/// Reason phrase sent for failures that must not leak internal detail.
pub const INTERNAL_ERROR_REASON: &str = "Internal server error";

/// Failures produced while routing, assembling and handling REST requests.
#[derive(Debug, Error)]
pub enum RestError {
    #[error(transparent)]
    Syntax(#[from] RestRequestSyntaxError),

    #[error("no binding matches {request}")]
    BindingNotFound { request: String },

    #[error("binding {binding} is registered more than once")]
    DuplicateBinding { binding: String },

    #[error("handler for {binding} is already associated with a dispatcher")]
    AlreadyAssociated { binding: String },

    #[error("handler for {binding} isn't associated with a dispatcher")]
    Unassociated { binding: String },

    #[error("{0} isn't active")]
    Inactive(String),

    #[error("unable to decode request content: {0}")]
    Decode(String),

    #[error("bad request: {external}")]
    BadRequest { external: String },

    #[error("{internal} (timed out after {timeout:?})")]
    Timeout {
        internal: String,
        external: String,
        timeout: Duration,
    },

    #[error("{internal}")]
    ExternallyVisible {
        status: StatusCode,
        internal: String,
        external: String,
    },

    #[error("request handling failed: {0}")]
    Handling(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl RestError {
    pub fn bad_request(external: impl Into<String>) -> Self {
        RestError::BadRequest {
            external: external.into(),
        }
    }

    pub fn timeout(internal: impl Into<String>, external: impl Into<String>, timeout: Duration) -> Self {
        RestError::Timeout {
            internal: internal.into(),
            external: external.into(),
            timeout,
        }
    }

    /// Failure whose `external` message is safe to show to the REST client.
    pub fn externally_visible(
        status: StatusCode,
        internal: impl Into<String>,
        external: impl Into<String>,
    ) -> Self {
        RestError::ExternallyVisible {
            status,
            internal: internal.into(),
            external: external.into(),
        }
    }

    /// HTTP status sent back for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            RestError::Syntax(_)
            | RestError::BindingNotFound { .. }
            | RestError::Decode(_)
            | RestError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            RestError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            RestError::ExternallyVisible { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Reason phrase for the REST client, `None` for internal failures.
    pub fn external_message(&self) -> Option<&str> {
        match self {
            RestError::Syntax(_) => Some("Incorrect REST request syntax"),
            RestError::BindingNotFound { .. } => Some("Unknown REST request"),
            RestError::Decode(_) => Some("Unable to decode request content"),
            RestError::BadRequest { external }
            | RestError::Timeout { external, .. }
            | RestError::ExternallyVisible { external, .. } => Some(external),
            _ => None,
        }
    }

    /// Whether the connection must be closed after answering.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RestError::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::request::RestRequest;

    #[test]
    fn client_errors_map_to_400() {
        let syntax: RestError = "nope".parse::<RestRequest>().unwrap_err().into();
        assert_eq!(syntax.status(), StatusCode::BAD_REQUEST);
        assert_eq!(syntax.external_message(), Some("Incorrect REST request syntax"));

        let missing = RestError::BindingNotFound { request: "GET /x/".into() };
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(missing.external_message(), Some("Unknown REST request"));

        let bad = RestError::bad_request("Exactly one argument is expected");
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bad.external_message(), Some("Exactly one argument is expected"));
    }

    #[test]
    fn timeout_maps_to_408_with_external_message() {
        let err = RestError::timeout("echo took too long", "Response timeout", Duration::from_millis(5));
        assert_eq!(err.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(err.external_message(), Some("Response timeout"));
    }

    #[test]
    fn internal_failures_hide_detail() {
        for err in [
            RestError::Handling("boom".into()),
            RestError::Protocol("overlap".into()),
            RestError::Inactive("dispatcher".into()),
        ] {
            assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(err.external_message(), None);
        }
    }

    #[test]
    fn externally_visible_keeps_its_status() {
        let err = RestError::externally_visible(StatusCode::BAD_GATEWAY, "mismatch", "Echo response is invalid");
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.external_message(), Some("Echo response is invalid"));
        assert_eq!(err.to_string(), "mismatch");
    }

    #[test]
    fn only_protocol_violations_are_fatal() {
        assert!(RestError::Protocol("x".into()).is_fatal());
        assert!(!RestError::Handling("x".into()).is_fatal());
    }
}
