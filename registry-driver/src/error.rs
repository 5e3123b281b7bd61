use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Categorizes registry errors by what the caller should do about them,
/// independent of the transport a driver uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryErrorKind {
    /// The artifact, version or tag does not exist.
    ///
    /// **Retryable:** No.
    NotFound,

    /// The registry rejected the request itself: a malformed frame, a frame
    /// above the message ceiling, content before metadata.
    ///
    /// **Retryable:** No - the same request will fail again.
    InvalidRequest,

    /// The registry could not be reached, or is shedding load.
    ///
    /// **Retryable:** Yes, by the caller, with the full payload.
    Unavailable,

    /// The call was cancelled before it completed.
    ///
    /// **Retryable:** Not automatically.
    Cancelled,

    /// Reading or writing the transport failed.
    ///
    /// **Retryable:** Maybe.
    Io,

    /// Anything else.
    Other,
}

impl RegistryErrorKind {
    /// Whether this kind usually indicates a transient condition.
    ///
    /// Advisory only: nothing in the gateway retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryErrorKind::Unavailable | RegistryErrorKind::Io)
    }

    /// Whether the request, rather than the registry, is at fault.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            RegistryErrorKind::NotFound | RegistryErrorKind::InvalidRequest
        )
    }
}

impl fmt::Display for RegistryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryErrorKind::NotFound => write!(f, "not found"),
            RegistryErrorKind::InvalidRequest => write!(f, "invalid request"),
            RegistryErrorKind::Unavailable => write!(f, "unavailable"),
            RegistryErrorKind::Cancelled => write!(f, "cancelled"),
            RegistryErrorKind::Io => write!(f, "I/O error"),
            RegistryErrorKind::Other => write!(f, "other error"),
        }
    }
}

/// An error returned by a registry driver.
///
/// Carries the semantic [`RegistryErrorKind`], the name of the driver which
/// produced it, optional identifier and context strings, the underlying error,
/// and the tracing span context at the point of failure.
#[derive(Debug)]
pub struct RegistryError {
    kind: RegistryErrorKind,
    driver: &'static str,
    identifier: Option<String>,
    context: Option<String>,
    source: BoxError,
    span_trace: Box<SpanTrace>,
}

impl StdError for RegistryError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl RegistryError {
    /// Create an error with no identifier or context.
    pub fn new<E>(driver: &'static str, kind: RegistryErrorKind, error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::builder(driver, kind, error).build()
    }

    /// Start building an error with optional context.
    ///
    /// ```rust
    /// use registry_driver::{RegistryError, RegistryErrorKind};
    ///
    /// let error = RegistryError::builder("memory", RegistryErrorKind::NotFound, "no such tag")
    ///     .identifier("git/alice/tool:v1")
    ///     .context("pull")
    ///     .build();
    /// assert_eq!(error.kind(), RegistryErrorKind::NotFound);
    /// ```
    pub fn builder<E>(driver: &'static str, kind: RegistryErrorKind, error: E) -> RegistryErrorBuilder
    where
        E: Into<BoxError>,
    {
        RegistryErrorBuilder {
            kind,
            driver,
            identifier: None,
            context: None,
            source: error.into(),
        }
    }

    /// A closure for `.map_err()` which wraps a downstream error.
    ///
    /// ```rust
    /// use registry_driver::{RegistryError, RegistryErrorKind};
    ///
    /// fn read() -> Result<Vec<u8>, RegistryError> {
    ///     std::fs::read("/nonexistent")
    ///         .map_err(RegistryError::with("local", RegistryErrorKind::Io))
    /// }
    /// assert!(read().is_err());
    /// ```
    pub fn with<E>(
        driver: &'static str,
        kind: RegistryErrorKind,
    ) -> impl FnOnce(E) -> RegistryError + Send + Sync
    where
        E: Into<BoxError>,
    {
        move |error: E| RegistryError::new(driver, kind, error)
    }

    /// The error's category.
    pub fn kind(&self) -> RegistryErrorKind {
        self.kind
    }

    /// Name of the driver which produced the error.
    pub fn driver(&self) -> &'static str {
        self.driver
    }

    /// The artifact identifier involved, if known.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Additional context, if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Shorthand for `self.kind() == RegistryErrorKind::NotFound`.
    pub fn is_not_found(&self) -> bool {
        self.kind == RegistryErrorKind::NotFound
    }

    /// Span context captured when the error was built.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Registry error [{}] from {}", self.kind, self.driver)?;

        if let Some(identifier) = &self.identifier {
            write!(f, " (artifact: {identifier})")?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for [`RegistryError`], created by [`RegistryError::builder`].
#[derive(Debug)]
pub struct RegistryErrorBuilder {
    kind: RegistryErrorKind,
    driver: &'static str,
    identifier: Option<String>,
    context: Option<String>,
    source: BoxError,
}

impl RegistryErrorBuilder {
    /// Attach the artifact identifier the call was about.
    pub fn identifier(mut self, identifier: impl fmt::Display) -> Self {
        self.identifier = Some(identifier.to_string());
        self
    }

    /// Attach free-form context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the error, capturing the current span trace.
    pub fn build(self) -> RegistryError {
        RegistryError {
            kind: self.kind,
            driver: self.driver,
            identifier: self.identifier,
            context: self.context,
            source: self.source,
            span_trace: Box::new(SpanTrace::capture()),
        }
    }
}
