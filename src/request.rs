use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, HOST};
use http::{Extensions, HeaderMap, Method};
use url::Url;

use crate::config::Settings;
use crate::logging::RequestLog;
use crate::messages::Message;
use crate::urls::{Resolver, ResolverMatch};
use crate::user::User;

const DEFAULT_HOST: &str = "localhost";

/// An inbound request as seen by views, behaviors and middleware.
///
/// Besides the HTTP parts, a request carries the annotations the pipeline
/// writes during dispatch: the cached resolver match, the request-scoped
/// resolver and settings, queued messages and typed extensions.
///
/// # Examples
///
/// ```
/// use view_policy::Request;
/// use http::Method;
///
/// let request = Request::builder(Method::GET, "/resource/?page=2")
///     .host("example.com")
///     .build();
///
/// assert_eq!(request.path(), "/resource/");
/// assert_eq!(request.get_full_path(), "/resource/?page=2");
/// assert_eq!(request.build_absolute_uri(None), "http://example.com/resource/?page=2");
/// ```
#[derive(Clone)]
pub struct Request {
    method: Method,
    scheme: String,
    path: String,
    query: String,
    headers: HeaderMap,
    cookies: BTreeMap<String, String>,
    form: Vec<(String, String)>,
    user: User,
    messages: Vec<Message>,
    resolver_match: Option<Arc<ResolverMatch>>,
    urlconf: Option<Arc<dyn Resolver>>,
    settings: Arc<Settings>,
    extensions: Extensions,
    dont_enforce_csrf_checks: bool,
}

impl Request {
    /// Starts building a request. A `?query` suffix on `path` is split off.
    pub fn builder(method: Method, path: impl AsRef<str>) -> RequestBuilder {
        RequestBuilder::new(method, path.as_ref())
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// `http` or `https`.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Whether the request arrived over HTTPS.
    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }

    /// URL path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path used for URL resolution.
    pub fn path_info(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the leading `?`.
    pub fn query_string(&self) -> &str {
        &self.query
    }

    /// Decoded value of the first query parameter named `name`.
    pub fn query_value(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Path plus query string.
    pub fn get_full_path(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }

    /// Host from the `Host` header, or `localhost`.
    pub fn host(&self) -> &str {
        self.header(HOST.as_str()).unwrap_or(DEFAULT_HOST)
    }

    /// Resolves `location` against the request's own absolute URL.
    ///
    /// `None` returns the absolute URL of the request itself. Absolute
    /// locations are returned unchanged.
    pub fn build_absolute_uri(&self, location: Option<&str>) -> String {
        let current = format!("{}://{}{}", self.scheme, self.host(), self.get_full_path());
        let Some(location) = location else {
            return current;
        };
        if Url::parse(location).is_ok() {
            return location.to_string();
        }
        match Url::parse(&current).and_then(|base| base.join(location)) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}://{}{}", self.scheme, self.host(), location),
        }
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// A request cookie.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// All request cookies.
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// First submitted form value named `name`.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Submitted form pairs in order.
    pub fn form(&self) -> &[(String, String)] {
        &self.form
    }

    /// The requesting user.
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Replaces the requesting user.
    pub fn set_user(&mut self, user: User) {
        self.user = user;
    }

    /// Messages queued during this request.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn messages_mut(&mut self) -> &mut Vec<Message> {
        &mut self.messages
    }

    /// The cached resolver match, if resolution already ran.
    pub fn resolver_match(&self) -> Option<&Arc<ResolverMatch>> {
        self.resolver_match.as_ref()
    }

    /// Caches the resolver match for the rest of the dispatch.
    pub fn set_resolver_match(&mut self, resolver_match: Arc<ResolverMatch>) {
        self.resolver_match = Some(resolver_match);
    }

    /// The resolver active for this request.
    pub fn urlconf(&self) -> Option<&Arc<dyn Resolver>> {
        self.urlconf.as_ref()
    }

    /// Sets the resolver active for this request.
    pub fn set_urlconf(&mut self, urlconf: Arc<dyn Resolver>) {
        self.urlconf = Some(urlconf);
    }

    /// Settings in effect for this request.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replaces the settings in effect for this request.
    pub fn set_settings(&mut self, settings: Arc<Settings>) {
        self.settings = settings;
    }

    /// Typed annotations.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable typed annotations.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Whether CSRF checks are skipped for this request (test clients).
    pub fn dont_enforce_csrf_checks(&self) -> bool {
        self.dont_enforce_csrf_checks
    }

    /// Returns a logger bound to this request.
    pub fn log(&self) -> RequestLog<'_> {
        RequestLog::new(self)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("user", &self.user.username())
            .field("messages", &self.messages.len())
            .field("resolved", &self.resolver_match.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Request`].
#[derive(Debug)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        let path = if path.is_empty() { "/" } else { path };
        Self {
            request: Request {
                method,
                scheme: "http".to_string(),
                path: path.to_string(),
                query: query.to_string(),
                headers: HeaderMap::new(),
                cookies: BTreeMap::new(),
                form: Vec::new(),
                user: User::anonymous(),
                messages: Vec::new(),
                resolver_match: None,
                urlconf: None,
                settings: Arc::new(Settings::default()),
                extensions: Extensions::new(),
                dont_enforce_csrf_checks: false,
            },
        }
    }

    /// Sets the scheme (`http` by default).
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.request.scheme = scheme.into();
        self
    }

    /// Sets the `Host` header.
    pub fn host(self, host: impl AsRef<str>) -> Self {
        self.header(HOST.as_str(), host)
    }

    /// Replaces the query string.
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.request.query = query.into();
        self
    }

    /// Appends a header. Names or values that are not valid HTTP are skipped.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match (
            HeaderName::from_bytes(name.as_ref().as_bytes()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.request.headers.append(name, value);
            }
            _ => tracing::debug!(header = name.as_ref(), "skipping invalid request header"),
        }
        self
    }

    /// Adds a cookie.
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.cookies.insert(name.into(), value.into());
        self
    }

    /// Adds a submitted form field.
    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.form.push((name.into(), value.into()));
        self
    }

    /// Sets the requesting user.
    pub fn user(mut self, user: User) -> Self {
        self.request.user = user;
        self
    }

    /// Sets the settings in effect.
    pub fn settings(mut self, settings: Arc<Settings>) -> Self {
        self.request.settings = settings;
        self
    }

    /// Sets the resolver for this request.
    pub fn urlconf(mut self, urlconf: Arc<dyn Resolver>) -> Self {
        self.request.urlconf = Some(urlconf);
        self
    }

    /// Skips CSRF enforcement for this request.
    pub fn dont_enforce_csrf_checks(mut self, skip: bool) -> Self {
        self.request.dont_enforce_csrf_checks = skip;
        self
    }

    /// Inserts a typed extension.
    pub fn extension<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.request.extensions.insert(value);
        self
    }

    /// Finishes the request.
    pub fn build(self) -> Request {
        self.request
    }
}
