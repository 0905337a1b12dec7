use std::borrow::Cow;
use std::fmt;

use http::header::{HeaderName, HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, Method, StatusCode};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::request::Request;
use crate::urls::iri_to_uri;

/// An outbound response.
///
/// A response built from a [`Template`] is *deferred*: its body is produced
/// by the pipeline's template-response stage through a [`Renderer`].
///
/// # Examples
///
/// ```
/// use view_policy::Response;
/// use http::StatusCode;
///
/// let response = Response::redirect("/accounts/login/?next=%2Fresource%2F");
/// assert_eq!(response.status(), StatusCode::FOUND);
/// assert_eq!(response.header("location"), Some("/accounts/login/?next=%2Fresource%2F"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    cookies: Vec<Cookie>,
    template: Option<Template>,
    xframe_options_exempt: bool,
    pub(crate) csrf_processing_done: bool,
}

impl Response {
    /// Empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
            cookies: Vec::new(),
            template: None,
            xframe_options_exempt: false,
            csrf_processing_done: false,
        }
    }

    /// `200 OK` with an HTML body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(StatusCode::OK)
            .with_body(body)
            .with_header(CONTENT_TYPE, "text/html; charset=utf-8")
    }

    /// `302 Found` to `url`.
    pub fn redirect(url: &str) -> Self {
        Self::new(StatusCode::FOUND).with_location(url)
    }

    /// `301 Moved Permanently` to `url`.
    pub fn permanent_redirect(url: &str) -> Self {
        Self::new(StatusCode::MOVED_PERMANENTLY).with_location(url)
    }

    /// `304 Not Modified`.
    pub fn not_modified() -> Self {
        Self::new(StatusCode::NOT_MODIFIED)
    }

    /// `405 Method Not Allowed` listing the permitted methods in `Allow`.
    pub fn method_not_allowed<'a>(allowed: impl IntoIterator<Item = &'a Method>) -> Self {
        let allow = allowed
            .into_iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(StatusCode::METHOD_NOT_ALLOWED).with_header(ALLOW, allow)
    }

    /// `410 Gone`.
    pub fn gone() -> Self {
        Self::new(StatusCode::GONE)
    }

    /// `400 Bad Request` with an HTML body.
    pub fn bad_request(body: impl Into<Vec<u8>>) -> Self {
        Self::ok(body).with_status(StatusCode::BAD_REQUEST)
    }

    /// `403 Forbidden` with an HTML body.
    pub fn forbidden(body: impl Into<Vec<u8>>) -> Self {
        Self::ok(body).with_status(StatusCode::FORBIDDEN)
    }

    /// `404 Not Found` with an HTML body.
    pub fn not_found(body: impl Into<Vec<u8>>) -> Self {
        Self::ok(body).with_status(StatusCode::NOT_FOUND)
    }

    /// `412 Precondition Failed`.
    pub fn precondition_failed() -> Self {
        Self::new(StatusCode::PRECONDITION_FAILED)
    }

    /// `500 Internal Server Error` with an HTML body.
    pub fn server_error(body: impl Into<Vec<u8>>) -> Self {
        Self::ok(body).with_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Deferred `200 OK` rendered from a template.
    pub fn template(name: impl Into<String>, context: Map<String, Value>) -> Self {
        let mut response = Self::new(StatusCode::OK);
        response.template = Some(Template {
            name: name.into(),
            context,
        });
        response
    }

    /// Replaces the status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Replaces the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a header, see [`Response::set_header`].
    pub fn with_header(mut self, name: HeaderName, value: impl AsRef<str>) -> Self {
        self.set_header(name, value);
        self
    }

    fn with_location(self, url: &str) -> Self {
        self.with_header(LOCATION, iri_to_uri(url))
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Mutable status code.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// A header as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the header is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Sets (replaces) a header. Values that are not valid HTTP are skipped.
    pub fn set_header(&mut self, name: HeaderName, value: impl AsRef<str>) {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => tracing::debug!(header = %name, "skipping invalid response header"),
        }
    }

    /// Response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Replaces the body and drops any stale `Content-Length`.
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
        self.headers.remove(CONTENT_LENGTH);
    }

    /// Cookies set by this response.
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// A cookie set by this response.
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// Sets a cookie, replacing one with the same name.
    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.cookies.retain(|c| c.name != cookie.name);
        self.cookies.push(cookie);
    }

    /// The deferred template, if the response is not rendered yet.
    pub fn pending_template(&self) -> Option<&Template> {
        self.template.as_ref()
    }

    /// Whether the body is final.
    pub fn is_rendered(&self) -> bool {
        self.template.is_none()
    }

    /// Renders a deferred template into the body. No-op once rendered.
    ///
    /// # Errors
    ///
    /// Returns whatever the renderer fails with.
    pub fn render(&mut self, renderer: &dyn Renderer, request: &Request) -> Result<()> {
        let Some(template) = self.template.take() else {
            return Ok(());
        };
        let body = renderer.render(&template, request)?;
        self.set_body(body);
        if !self.has_header(CONTENT_TYPE.as_str()) {
            self.set_header(CONTENT_TYPE, renderer.content_type());
        }
        Ok(())
    }

    /// Whether the clickjacking middleware should leave this response alone.
    pub fn xframe_options_exempt(&self) -> bool {
        self.xframe_options_exempt
    }

    /// Marks the response exempt from the clickjacking middleware.
    pub fn set_xframe_options_exempt(&mut self, exempt: bool) {
        self.xframe_options_exempt = exempt;
    }
}

/// A cookie set on a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Lifetime in seconds; `None` for a session cookie
    pub max_age: Option<u64>,
    /// Cookie path
    pub path: String,
    /// Only sent over HTTPS
    pub secure: bool,
    /// Hidden from scripts
    pub http_only: bool,
}

impl Cookie {
    /// Session cookie on `/`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            path: "/".to_string(),
            secure: false,
            http_only: false,
        }
    }

    /// Sets the lifetime.
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path={}", self.name, self.value, self.path)?;
        if let Some(age) = self.max_age {
            write!(f, "; Max-Age={}", age)?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        Ok(())
    }
}

/// A template name plus its context, rendered late in the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// Template name
    pub name: String,
    /// Values exposed to the template
    pub context: Map<String, Value>,
}

/// Turns a [`Template`] into body bytes.
pub trait Renderer: Send + Sync {
    /// Renders the template for `request`.
    ///
    /// # Errors
    ///
    /// Returns an error when the template cannot be rendered.
    fn render(&self, template: &Template, request: &Request) -> Result<Vec<u8>>;

    /// Content type of rendered output.
    fn content_type(&self) -> &str {
        "text/html; charset=utf-8"
    }
}

/// Renders templates as a JSON document of name, context and queued messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, template: &Template, request: &Request) -> Result<Vec<u8>> {
        let document = serde_json::json!({
            "template": template.name,
            "context": template.context,
            "messages": request.messages(),
        });
        serde_json::to_vec(&document).map_err(Error::other)
    }

    fn content_type(&self) -> &str {
        "application/json"
    }
}
