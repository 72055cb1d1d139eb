use std::borrow::Cow;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown thing, property, action or event.
    NotFound,
    /// The operation is valid but no handler is registered.
    NoHandler,
    /// The property can only be read.
    ReadOnly,
    /// The property can only be written.
    WriteOnly,
    /// The property cannot be observed.
    NotObservable,
    /// Interaction options do not match the declared `URI` variables.
    InvalidOptions,
    /// No form serves the requested operation.
    NoMatchingForm,
    /// No codec is registered for a content type.
    UnsupportedContentType,
    /// A user handler failed.
    HandlerFailure,
    /// Errors encountered while encoding or decoding a value.
    Serialization,
    /// Errors encountered on the transport socket.
    Transport,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::NotFound => "Not Found",
            Self::NoHandler => "No Handler",
            Self::ReadOnly => "Read Only",
            Self::WriteOnly => "Write Only",
            Self::NotObservable => "Not Observable",
            Self::InvalidOptions => "Invalid Options",
            Self::NoMatchingForm => "No Matching Form",
            Self::UnsupportedContentType => "Unsupported Content Type",
            Self::HandlerFailure => "Handler Failure",
            Self::Serialization => "Serialization",
            Self::Transport => "Transport",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A runtime error.
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`].
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Creates a [`ErrorKind::HandlerFailure`] error.
    ///
    /// User handlers return it to report their own failures.
    pub fn handler(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::HandlerFailure, description)
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    fn format(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl From<wotkit::error::Error> for Error {
    fn from(e: wotkit::error::Error) -> Self {
        let kind = match e.kind() {
            wotkit::error::ErrorKind::UnsupportedContentType => ErrorKind::UnsupportedContentType,
            wotkit::error::ErrorKind::Serialization => ErrorKind::Serialization,
            wotkit::error::ErrorKind::InvalidOptions => ErrorKind::InvalidOptions,
        };
        Self::new(kind, e.description().to_owned())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serialization, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
