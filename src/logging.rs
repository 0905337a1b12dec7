use std::fmt;

use crate::request::Request;

/// Target for request-level events.
pub const REQUEST_TARGET: &str = "view_policy::request";
/// Target for suspicious-operation events.
pub const SECURITY_TARGET: &str = "view_policy::security";

/// A logger bound to one request.
///
/// Every event carries the request method and path. Obtain one with
/// [`Request::log`].
///
/// ```no_run
/// # use view_policy::Request;
/// # fn example(request: &Request) {
/// request.log().warn(404, format_args!("Not Found: {}", request.path()));
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RequestLog<'a> {
    method: &'a str,
    path: &'a str,
}

impl<'a> RequestLog<'a> {
    pub(crate) fn new(request: &'a Request) -> Self {
        Self {
            method: request.method().as_str(),
            path: request.path(),
        }
    }

    /// Returns the path this logger reports.
    pub fn path(&self) -> &str {
        self.path
    }

    /// Logs a debug-level message.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: REQUEST_TARGET, method = %self.method, path = %self.path, "{}", args);
    }

    /// Logs an info-level message with the response status.
    pub fn info(&self, status_code: u16, args: fmt::Arguments<'_>) {
        tracing::info!(target: REQUEST_TARGET, method = %self.method, path = %self.path, status_code, "{}", args);
    }

    /// Logs a warning-level message with the response status.
    pub fn warn(&self, status_code: u16, args: fmt::Arguments<'_>) {
        tracing::warn!(target: REQUEST_TARGET, method = %self.method, path = %self.path, status_code, "{}", args);
    }

    /// Logs an error-level message with the response status.
    pub fn error(&self, status_code: u16, args: fmt::Arguments<'_>) {
        tracing::error!(target: REQUEST_TARGET, method = %self.method, path = %self.path, status_code, "{}", args);
    }

    /// Logs a suspicious operation on the `security.<kind>` channel.
    pub fn security(&self, kind: &str, args: fmt::Arguments<'_>) {
        tracing::error!(
            target: SECURITY_TARGET,
            channel = %format_args!("security.{}", kind),
            method = %self.method,
            path = %self.path,
            status_code = 400u16,
            "{}",
            args
        );
    }
}
