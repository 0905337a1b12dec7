use std::fmt;

/// Boxed error used for failures raised by application view code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while dispatching a request.
///
/// The first three variants are client-intent errors: the request pipeline
/// maps them to 404, 403 and 400 responses. `ImproperlyConfigured` and
/// `NoReverseMatch` signal programming mistakes. `Exit` is never caught.
#[derive(Debug)]
pub enum Error {
    /// The requested resource does not exist.
    NotFound(String),
    /// The current user may not access the resource.
    PermissionDenied(String),
    /// The request looks tampered with.
    SuspiciousOperation {
        /// Exception type name, used to pick the `security.<kind>` log channel
        kind: &'static str,
        /// Human-readable detail
        message: String,
    },
    /// A view or behavior was configured incorrectly.
    ImproperlyConfigured(String),
    /// URL reversal found no route for a name.
    NoReverseMatch(String),
    /// A process-exit signal carrying the exit code.
    Exit(i32),
    /// Any other failure raised by view code.
    Other(BoxError),
}

impl Error {
    /// Wraps an arbitrary error as [`Error::Other`].
    pub fn other(err: impl Into<BoxError>) -> Self {
        Error::Other(err.into())
    }

    /// Builds a suspicious-operation error with the generic kind.
    pub fn suspicious(message: impl Into<String>) -> Self {
        Error::SuspiciousOperation {
            kind: "SuspiciousOperation",
            message: message.into(),
        }
    }

    /// Returns the client-intent kind of this error, if it has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::NotFound(_) => Some(ErrorKind::NotFound),
            Error::PermissionDenied(_) => Some(ErrorKind::PermissionDenied),
            Error::SuspiciousOperation { .. } => Some(ErrorKind::SuspiciousOperation),
            _ => None,
        }
    }

    /// True for the process-exit signal.
    pub fn is_exit(&self) -> bool {
        matches!(self, Error::Exit(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::PermissionDenied(msg) if msg.is_empty() => write!(f, "Permission denied"),
            Error::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            Error::SuspiciousOperation { kind, message } => write!(f, "{}: {}", kind, message),
            Error::ImproperlyConfigured(msg) => write!(f, "Improperly configured: {}", msg),
            Error::NoReverseMatch(msg) => write!(f, "No reverse match: {}", msg),
            Error::Exit(code) => write!(f, "Exit requested with code {}", code),
            Error::Other(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<BoxError> for Error {
    fn from(err: BoxError) -> Self {
        Error::Other(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Other(Box::new(err))
    }
}

/// The error a denial raises when it is configured to raise.
///
/// Denials default to [`ErrorKind::PermissionDenied`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// Raise [`Error::NotFound`]
    NotFound,
    /// Raise [`Error::PermissionDenied`]
    #[default]
    PermissionDenied,
    /// Raise [`Error::SuspiciousOperation`]
    SuspiciousOperation,
}

impl ErrorKind {
    /// Builds the matching [`Error`] with the given detail.
    pub fn into_error(self, detail: impl Into<String>) -> Error {
        match self {
            ErrorKind::NotFound => Error::NotFound(detail.into()),
            ErrorKind::PermissionDenied => Error::PermissionDenied(detail.into()),
            ErrorKind::SuspiciousOperation => Error::suspicious(detail),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "NotFound"),
            ErrorKind::PermissionDenied => write!(f, "PermissionDenied"),
            ErrorKind::SuspiciousOperation => write!(f, "SuspiciousOperation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_into_error() {
        for kind in [
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::SuspiciousOperation,
        ] {
            assert_eq!(kind.into_error("x").kind(), Some(kind));
        }
    }

    #[test]
    fn default_kind_is_permission_denied() {
        assert_eq!(ErrorKind::default(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn config_errors_have_no_client_kind() {
        assert!(Error::ImproperlyConfigured("x".into()).kind().is_none());
        assert!(Error::Exit(0).kind().is_none());
        assert!(Error::Exit(3).is_exit());
    }

    #[test]
    fn display_includes_detail() {
        let err = Error::SuspiciousOperation {
            kind: "DisallowedHost",
            message: "bad host".into(),
        };
        assert_eq!(err.to_string(), "DisallowedHost: bad host");
        assert_eq!(Error::PermissionDenied(String::new()).to_string(), "Permission denied");
    }

    #[test]
    fn other_exposes_source() {
        let io = std::io::Error::other("disk");
        let err: Error = io.into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
