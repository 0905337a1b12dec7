//! Response helpers for view handlers.

use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use http::StatusCode;

use crate::error::{Error, Result};
use crate::http::Response;
use crate::request::Request;

/// Reverses a route name through the request's resolver.
///
/// With `qualified`, the result carries the scheme (the request's unless
/// `scheme` is given) and the request host.
///
/// # Errors
///
/// Returns [`Error::NoReverseMatch`] when the name does not resolve or the
/// request has no resolver.
pub fn reverse(
    request: &Request,
    name: &str,
    kwargs: &[(&str, &str)],
    qualified: bool,
    scheme: Option<&str>,
) -> Result<String> {
    let resolver = request
        .urlconf()
        .ok_or_else(|| Error::NoReverseMatch(format!("No resolver to reverse '{}'", name)))?;
    let path = resolver.reverse(name, kwargs)?;
    if !qualified {
        return Ok(path);
    }
    let scheme = scheme.unwrap_or(request.scheme());
    Ok(format!("{}://{}{}", scheme, request.host(), path))
}

/// Serves `data` as a download named `filename`.
pub fn attachment(data: impl Into<Vec<u8>>, content_type: &str, filename: &str) -> Response {
    let filename = filename.replace('\\', "\\\\").replace('"', "\\\"");
    Response::new(StatusCode::OK)
        .with_body(data)
        .with_header(CONTENT_TYPE, content_type)
        .with_header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
}

/// Redirects to a named route, `301` when `permanent`, else `302`.
///
/// # Errors
///
/// Returns [`Error::NoReverseMatch`] when the route cannot be reversed.
pub fn redirect(
    request: &Request,
    name: &str,
    kwargs: &[(&str, &str)],
    permanent: bool,
) -> Result<Response> {
    let url = reverse(request, name, kwargs, false, None)?;
    Ok(if permanent {
        Response::permanent_redirect(&url)
    } else {
        Response::redirect(&url)
    })
}

/// Logs and answers `410 Gone`.
pub fn gone(request: &Request) -> Response {
    request.log().info(
        410,
        format_args!("Gone ({}): {}", request.method(), request.path()),
    );
    Response::gone()
}

/// Fails with [`Error::NotFound`].
pub fn not_found<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::NotFound(message.into()))
}

/// Fails with [`Error::PermissionDenied`].
pub fn permission_denied<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::PermissionDenied(message.into()))
}

/// Fails with [`Error::SuspiciousOperation`] of the given kind.
pub fn suspicious_operation<T>(kind: &'static str, message: impl Into<String>) -> Result<T> {
    Err(Error::SuspiciousOperation {
        kind,
        message: message.into(),
    })
}
