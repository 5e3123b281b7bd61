//! Error types for the gateway

use std::error::Error as StdError;
use std::io;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use registry::{InvalidIdentifier, RegistryError, RegistryErrorKind};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Why a multipart field was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldProblem {
    /// The field name is not one the upload form knows.
    Unknown,

    /// A field which may appear once appeared again.
    Duplicate,

    /// The field arrived after the `file` part.
    AfterPayload,
}

impl std::fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldProblem::Unknown => f.write_str("unknown field"),
            FieldProblem::Duplicate => f.write_str("field sent more than once"),
            FieldProblem::AfterPayload => f.write_str("field sent after the file part"),
        }
    }
}

/// Error types for gateway requests
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// An artifact name or reference is malformed or incomplete.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] InvalidIdentifier),

    /// A scalar field, or the cumulative tag payload, reached its byte ceiling.
    #[error("field {field:?} reached its {limit} byte limit")]
    FieldTooLarge {
        /// Name of the offending field
        field: String,
        /// The ceiling it ran into
        limit: usize,
    },

    /// A multipart field was unknown, repeated, or out of place.
    #[error("{problem}: {field:?}")]
    UnexpectedField {
        /// Name of the offending field
        field: String,
        /// What was wrong with it
        problem: FieldProblem,
    },

    /// The upload form ended without a `file` part.
    #[error("file part is required")]
    MissingPayload,

    /// The request body could not be parsed at all.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The request body ran past the configured body size limit.
    #[error("request body exceeds the size limit")]
    BodyTooLarge,

    /// The registry refused the request as invalid.
    #[error("{context}: {error}")]
    InvalidRequest {
        /// What the gateway was doing
        context: &'static str,
        /// The registry's refusal
        error: RegistryError,
    },

    /// The registry does not know the artifact.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// Any I/O, registry or queue failure not classified above.
    #[error("{context}")]
    TransportFailure {
        /// What the gateway was doing
        context: &'static str,
        /// The underlying failure
        #[source]
        source: BoxError,
    },
}

impl GatewayError {
    /// A closure for `.map_err()` which wraps a failure as [`GatewayError::TransportFailure`].
    pub fn transport<E>(context: &'static str) -> impl FnOnce(E) -> GatewayError
    where
        E: Into<BoxError>,
    {
        move |error| GatewayError::TransportFailure {
            context,
            source: error.into(),
        }
    }

    /// A closure for `.map_err()` which sorts registry errors into not-found,
    /// invalid-request and transport failures.
    pub fn registry(context: &'static str) -> impl FnOnce(RegistryError) -> GatewayError {
        move |error| match error.kind() {
            RegistryErrorKind::NotFound => GatewayError::NotFound(
                error.identifier().unwrap_or("unknown artifact").to_owned(),
            ),
            kind if kind.is_client_fault() => GatewayError::InvalidRequest { context, error },
            _ => GatewayError::TransportFailure {
                context,
                source: error.into(),
            },
        }
    }

    /// A closure for `.map_err()` on reads from a multipart part.
    ///
    /// Failures raised by the multipart stream itself, such as the body size
    /// limit, keep their meaning; other I/O failures are transport failures.
    pub fn part_read(context: &'static str) -> impl FnOnce(io::Error) -> GatewayError {
        move |error| match error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            Some(multipart) => GatewayError::rejected(multipart.status(), multipart.body_text()),
            None => GatewayError::transport(context)(error),
        }
    }

    /// Sort an axum extractor failure by the status axum assigned it.
    fn rejected(status: StatusCode, text: String) -> GatewayError {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            GatewayError::BodyTooLarge
        } else {
            GatewayError::MalformedRequest(text)
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidIdentifier(_)
            | GatewayError::UnexpectedField { .. }
            | GatewayError::MissingPayload
            | GatewayError::MalformedRequest(_)
            | GatewayError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            GatewayError::FieldTooLarge { .. } | GatewayError::BodyTooLarge => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::TransportFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the machine readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            GatewayError::FieldTooLarge { .. } => "FIELD_TOO_LARGE",
            GatewayError::UnexpectedField { .. } => "UNEXPECTED_FIELD",
            GatewayError::MissingPayload => "MISSING_PAYLOAD",
            GatewayError::MalformedRequest(_) => "MALFORMED_REQUEST",
            GatewayError::BodyTooLarge => "BODY_TOO_LARGE",
            GatewayError::InvalidRequest { .. } => "INVALID_REQUEST",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::TransportFailure { .. } => "INTERNAL",
        }
    }
}

impl From<MultipartError> for GatewayError {
    fn from(error: MultipartError) -> Self {
        GatewayError::rejected(error.status(), error.body_text())
    }
}

impl From<MultipartRejection> for GatewayError {
    fn from(rejection: MultipartRejection) -> Self {
        GatewayError::rejected(rejection.status(), rejection.body_text())
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for GatewayError {
    fn from(rejection: QueryRejection) -> Self {
        GatewayError::MalformedRequest(rejection.body_text())
    }
}

#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        let message = match &self {
            GatewayError::TransportFailure { context, source } => {
                tracing::error!(%context, error = %source, span_trace = %tracing_error::SpanTrace::capture(), "Request failed");
                "internal server error".to_owned()
            }
            other => {
                tracing::debug!(%code, error = %other, "Request rejected");
                other.to_string()
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail { code, message },
        };

        (status, axum::Json(body)).into_response()
    }
}
