//! Method requirements and conditional requests.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::header::{ETAG, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE, LAST_MODIFIED};
use http::Method;

use crate::error::Result;
use crate::http::Response;
use crate::request::Request;
use crate::view::{AllowPolicy, ClassView, DenyPolicy, HttpMethodDeny, ViewArgs, ViewHandler};

macro_rules! method_requirement {
    ($(#[$doc:meta])* $name:ident, $label:literal, [$($method:expr),+]) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            gate: HttpMethodDeny,
        }

        impl $name {
            /// The requirement.
            pub fn new() -> Self {
                Self {
                    gate: HttpMethodDeny::only($label, [$($method),+]),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl DenyPolicy for $name {
            fn name(&self) -> &str {
                self.gate.name()
            }

            fn deny_handler<'a>(
                &'a self,
                view: &'a ClassView,
                request: &Request,
                args: &ViewArgs,
            ) -> Result<Option<ViewHandler<'a>>> {
                self.gate.deny_handler(view, request, args)
            }
        }
    };
}

method_requirement!(
    /// Only `GET` gets through; anything else is `405`.
    RequireGet,
    "require_get",
    [Method::GET]
);

method_requirement!(
    /// Only `POST` gets through; anything else is `405`.
    RequirePost,
    "require_post",
    [Method::POST]
);

method_requirement!(
    /// Only `GET` and `HEAD` get through; anything else is `405`.
    RequireSafe,
    "require_safe",
    [Method::GET, Method::HEAD]
);

/// Computes the entity tag of the requested resource.
pub type ETagFn = Arc<dyn Fn(&Request, &ViewArgs) -> Option<String> + Send + Sync>;

/// Computes the last modification time of the requested resource.
pub type LastModifiedFn = Arc<dyn Fn(&Request, &ViewArgs) -> Option<SystemTime> + Send + Sync>;

/// Conditional retrieval and change detection.
///
/// Evaluates `If-Match`, `If-Unmodified-Since`, `If-None-Match` and
/// `If-Modified-Since` against the computed entity tag and modification
/// time before the handler runs. Safe requests whose validators match get
/// `304 Not Modified`; failed preconditions get `412 Precondition Failed`.
/// Successful `GET`/`HEAD` responses carry `ETag` and `Last-Modified`.
///
/// Without either function the policy does nothing.
///
/// ```
/// use std::sync::Arc;
/// use view_policy::{ClassView, Condition, Request, Response, View, ViewArgs};
/// use http::{Method, StatusCode};
///
/// let view = ClassView::builder("Doc")
///     .get(|_, _| Ok(Response::ok("body")))
///     .allow(Arc::new(Condition::new().etag(|_, _| Some("v1".to_string()))))
///     .build();
///
/// let mut request = Request::builder(Method::GET, "/doc/")
///     .header("If-None-Match", "\"v1\"")
///     .build();
/// let response = view.call(&mut request, &ViewArgs::new()).unwrap().unwrap();
/// assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
/// ```
#[derive(Clone, Default)]
pub struct Condition {
    etag: Option<ETagFn>,
    last_modified: Option<LastModifiedFn>,
}

impl Condition {
    /// A condition with no validators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entity tag function. Unquoted tags are quoted.
    pub fn etag<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request, &ViewArgs) -> Option<String> + Send + Sync + 'static,
    {
        self.etag = Some(Arc::new(f));
        self
    }

    /// Sets the modification time function.
    pub fn last_modified<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request, &ViewArgs) -> Option<SystemTime> + Send + Sync + 'static,
    {
        self.last_modified = Some(Arc::new(f));
        self
    }

    fn enabled(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("etag", &self.etag.is_some())
            .field("last_modified", &self.last_modified.is_some())
            .finish()
    }
}

fn quote_etag(tag: &str) -> String {
    if tag.starts_with('"') || tag.starts_with("W/\"") {
        tag.to_string()
    } else {
        format!("\"{}\"", tag)
    }
}

fn opaque(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

/// Entity tags listed in a header, or `["*"]`.
fn parse_etags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| if t == "*" { t.to_string() } else { quote_etag(t) })
        .collect()
}

fn strong_match(tags: &[String], etag: Option<&str>) -> bool {
    let Some(etag) = etag else {
        return false;
    };
    tags.iter()
        .any(|t| t == "*" || (!t.starts_with("W/") && !etag.starts_with("W/") && t == etag))
}

fn weak_match(tags: &[String], etag: Option<&str>) -> bool {
    let Some(etag) = etag else {
        return false;
    };
    tags.iter().any(|t| t == "*" || opaque(t) == opaque(etag))
}

fn http_date(request: &Request, name: &http::HeaderName) -> Option<SystemTime> {
    request
        .header(name.as_str())
        .and_then(|v| httpdate::parse_http_date(v).ok())
}

/// Truncates to whole seconds, the resolution of HTTP dates.
fn to_seconds(time: SystemTime) -> SystemTime {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn is_safe(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// Returns the short-circuit response for failed or satisfied
/// preconditions, if any.
fn precondition_response(
    request: &Request,
    etag: Option<&str>,
    last_modified: Option<SystemTime>,
) -> Option<Response> {
    let safe = is_safe(request.method());

    if let Some(if_match) = request.header(IF_MATCH.as_str()) {
        if !strong_match(&parse_etags(if_match), etag) {
            return Some(precondition_failed(request));
        }
    } else if let (Some(since), Some(modified)) =
        (http_date(request, &IF_UNMODIFIED_SINCE), last_modified)
    {
        if modified > since {
            return Some(precondition_failed(request));
        }
    }

    if let Some(if_none_match) = request.header(IF_NONE_MATCH.as_str()) {
        if weak_match(&parse_etags(if_none_match), etag) {
            return Some(if safe {
                not_modified(etag, last_modified)
            } else {
                precondition_failed(request)
            });
        }
    } else if let (true, Some(since), Some(modified)) =
        (safe, http_date(request, &IF_MODIFIED_SINCE), last_modified)
    {
        if modified <= since {
            return Some(not_modified(etag, last_modified));
        }
    }

    None
}

fn precondition_failed(request: &Request) -> Response {
    request
        .log()
        .warn(412, format_args!("Precondition Failed: {}", request.path()));
    Response::precondition_failed()
}

fn not_modified(etag: Option<&str>, last_modified: Option<SystemTime>) -> Response {
    let mut response = Response::not_modified();
    set_validators(&mut response, etag, last_modified);
    response
}

fn set_validators(response: &mut Response, etag: Option<&str>, last_modified: Option<SystemTime>) {
    if let Some(etag) = etag {
        if !response.has_header(ETAG.as_str()) {
            response.set_header(ETAG, etag);
        }
    }
    if let Some(modified) = last_modified {
        if !response.has_header(LAST_MODIFIED.as_str()) {
            response.set_header(LAST_MODIFIED, httpdate::fmt_http_date(modified));
        }
    }
}

impl AllowPolicy for Condition {
    fn name(&self) -> &str {
        "condition"
    }

    fn allow_handler<'a>(
        &'a self,
        _view: &'a ClassView,
        _request: &Request,
        _args: &ViewArgs,
        inner: Option<ViewHandler<'a>>,
    ) -> Result<Option<ViewHandler<'a>>> {
        let Some(inner) = inner else {
            return Ok(None);
        };
        if !self.enabled() {
            return Ok(Some(inner));
        }
        Ok(Some(Box::new(move |request: &mut Request, args: &ViewArgs| {
            let etag = self
                .etag
                .as_ref()
                .and_then(|f| f(&*request, args))
                .map(|t| quote_etag(&t));
            let last_modified = self
                .last_modified
                .as_ref()
                .and_then(|f| f(&*request, args))
                .map(to_seconds);

            if let Some(response) = precondition_response(request, etag.as_deref(), last_modified) {
                return Ok(response);
            }
            let mut response = inner(request, args)?;
            if is_safe(request.method()) && response.status().is_success() {
                set_validators(&mut response, etag.as_deref(), last_modified);
            }
            Ok(response)
        })))
    }
}
