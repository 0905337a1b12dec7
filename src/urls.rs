//! URL resolution, reversal and redirect-URL helpers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::{form_urlencoded, Url};

use crate::error::{Error, Result};
use crate::http::Response;
use crate::request::Request;
use crate::view::{view_fn, View, ViewArgs};

/// Error handlers a resolver registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorHandler {
    /// 400, for suspicious operations
    BadRequest,
    /// 403, for permission denied
    PermissionDenied,
    /// 404, for not found
    NotFound,
    /// 500, for uncaught errors
    ServerError,
}

/// The URL resolution collaborator.
pub trait Resolver: Send + Sync {
    /// Maps a path to a view and its arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no route matches.
    fn resolve(&self, path: &str) -> Result<ResolverMatch>;

    /// Builds the path of a named route.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoReverseMatch`] for unknown names or missing arguments.
    fn reverse(&self, name: &str, kwargs: &[(&str, &str)]) -> Result<String>;

    /// Returns the view registered for an error status, with its arguments.
    fn resolve_error_handler(&self, handler: ErrorHandler) -> (Arc<dyn View>, ViewArgs);
}

/// The view a path resolved to, plus the arguments captured from the path.
#[derive(Clone)]
pub struct ResolverMatch {
    /// The matched view
    pub view: Arc<dyn View>,
    /// Captured arguments
    pub args: ViewArgs,
    /// Route name, if the route has one
    pub url_name: Option<String>,
}

impl ResolverMatch {
    /// Builds a match for `view` with no arguments.
    pub fn new(view: Arc<dyn View>) -> Self {
        Self {
            view,
            args: ViewArgs::default(),
            url_name: None,
        }
    }
}

impl fmt::Debug for ResolverMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverMatch")
            .field("view", &self.view.name())
            .field("args", &self.args)
            .field("url_name", &self.url_name)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

struct Route {
    segments: Vec<Segment>,
    trailing_slash: bool,
    view: Arc<dyn View>,
    name: Option<String>,
}

impl Route {
    fn parse(pattern: &str, view: Arc<dyn View>, name: Option<String>) -> Self {
        let trimmed = pattern.trim_matches('/');
        let segments = trimmed
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                Some(param) => Segment::Param(param.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self {
            segments,
            trailing_slash: pattern.ends_with('/') && !trimmed.is_empty(),
            view,
            name,
        }
    }

    fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() {
            return self.segments.is_empty().then(BTreeMap::new);
        }
        if trimmed.ends_with('/') != self.trailing_slash {
            return None;
        }
        let parts: Vec<&str> = trimmed.trim_end_matches('/').split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut kwargs = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => {
                    kwargs.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(kwargs)
    }

    fn reverse(&self, kwargs: &[(&str, &str)]) -> Option<String> {
        let mut path = String::from("/");
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                path.push('/');
            }
            match segment {
                Segment::Literal(lit) => path.push_str(lit),
                Segment::Param(name) => {
                    let (_, value) = kwargs.iter().find(|(k, _)| k == name)?;
                    path.push_str(value);
                }
            }
        }
        if self.trailing_slash {
            path.push('/');
        }
        Some(path)
    }
}

/// A route table: `<name>` segments capture keyword arguments.
///
/// # Examples
///
/// ```
/// use view_policy::{view_fn, Resolver, Response, UrlConf};
///
/// let urls = UrlConf::new()
///     .route("articles/<year>/", view_fn("archive", |_, _| Ok(Some(Response::ok("")))))
///     .name("archive");
///
/// let matched = urls.resolve("/articles/2024/").unwrap();
/// assert_eq!(matched.args.kwarg("year"), Some("2024"));
/// assert_eq!(urls.reverse("archive", &[("year", "1999")]).unwrap(), "/articles/1999/");
/// ```
pub struct UrlConf {
    routes: Vec<Route>,
    error_handlers: BTreeMap<u16, Arc<dyn View>>,
}

impl UrlConf {
    /// Empty table with the default error views.
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            error_handlers: BTreeMap::new(),
        }
    }

    /// Adds a route.
    pub fn route(mut self, pattern: &str, view: Arc<dyn View>) -> Self {
        self.routes.push(Route::parse(pattern, view, None));
        self
    }

    /// Names the most recently added route.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        if let Some(route) = self.routes.last_mut() {
            route.name = Some(name.into());
        }
        self
    }

    /// Overrides the view used for an error status.
    pub fn error_handler(mut self, handler: ErrorHandler, view: Arc<dyn View>) -> Self {
        self.error_handlers.insert(status_of(handler), view);
        self
    }
}

impl Default for UrlConf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UrlConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlConf")
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl Resolver for UrlConf {
    fn resolve(&self, path: &str) -> Result<ResolverMatch> {
        for route in &self.routes {
            if let Some(kwargs) = route.matches(path) {
                return Ok(ResolverMatch {
                    view: route.view.clone(),
                    args: ViewArgs {
                        args: Vec::new(),
                        kwargs,
                    },
                    url_name: route.name.clone(),
                });
            }
        }
        Err(Error::NotFound(format!("No route matches '{}'", path)))
    }

    fn reverse(&self, name: &str, kwargs: &[(&str, &str)]) -> Result<String> {
        self.routes
            .iter()
            .filter(|r| r.name.as_deref() == Some(name))
            .find_map(|r| r.reverse(kwargs))
            .ok_or_else(|| Error::NoReverseMatch(format!("Reverse for '{}' not found", name)))
    }

    fn resolve_error_handler(&self, handler: ErrorHandler) -> (Arc<dyn View>, ViewArgs) {
        let view = self
            .error_handlers
            .get(&status_of(handler))
            .cloned()
            .unwrap_or_else(|| default_error_view(handler));
        (view, ViewArgs::default())
    }
}

fn status_of(handler: ErrorHandler) -> u16 {
    match handler {
        ErrorHandler::BadRequest => 400,
        ErrorHandler::PermissionDenied => 403,
        ErrorHandler::NotFound => 404,
        ErrorHandler::ServerError => 500,
    }
}

fn default_error_view(handler: ErrorHandler) -> Arc<dyn View> {
    match handler {
        ErrorHandler::BadRequest => view_fn("bad_request", |_, _| {
            Ok(Some(Response::bad_request("<h1>Bad Request (400)</h1>")))
        }),
        ErrorHandler::PermissionDenied => view_fn("permission_denied", |_, _| {
            Ok(Some(Response::forbidden("<h1>403 Forbidden</h1>")))
        }),
        ErrorHandler::NotFound => view_fn("page_not_found", |request: &mut Request, _| {
            let body = format!(
                "<h1>Not Found</h1><p>The requested URL {} was not found on this server.</p>",
                request.path()
            );
            Ok(Some(Response::not_found(body)))
        }),
        ErrorHandler::ServerError => view_fn("server_error", |_, _| {
            Ok(Some(Response::server_error("<h1>Server Error (500)</h1>")))
        }),
    }
}

const IRI_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');

/// Percent-encodes the characters that cannot appear in a URI.
///
/// Reserved characters and existing `%XX` escapes are kept as they are.
pub fn iri_to_uri(iri: &str) -> String {
    utf8_percent_encode(iri, IRI_ESCAPE).to_string()
}

/// Sets query parameters on `url`, replacing existing ones with the same name.
///
/// Works on relative and absolute URLs; order of untouched parameters and
/// any fragment are preserved.
///
/// ```
/// use view_policy::urls::update_query;
///
/// assert_eq!(update_query("/login/?a=1", &[("next", "/x/")]), "/login/?a=1&next=%2Fx%2F");
/// assert_eq!(update_query("/login/?next=/old/", &[("next", "/x/")]), "/login/?next=%2Fx%2F");
/// ```
pub fn update_query(url: &str, params: &[(&str, &str)]) -> String {
    let (rest, fragment) = match url.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (url, None),
    };
    let (base, query) = rest.split_once('?').unwrap_or((rest, ""));

    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    for (name, value) in params {
        match pairs.iter_mut().find(|(k, _)| k == name) {
            Some(pair) => pair.1 = (*value).to_string(),
            None => pairs.push(((*name).to_string(), (*value).to_string())),
        }
    }

    let mut out = base.to_string();
    if !pairs.is_empty() {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        out.push('?');
        out.push_str(&encoded);
    }
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

fn origin_of(url: &Url) -> (String, Option<String>, Option<u16>) {
    (
        url.scheme().to_string(),
        url.host_str().map(str::to_ascii_lowercase),
        url.port_or_known_default(),
    )
}

/// Strips scheme and host from `url` when they match the redirect target's
/// or the current request's.
///
/// Relative URLs are returned unchanged, so applying this twice is the same
/// as applying it once.
///
/// ```
/// use view_policy::urls::simplify_redirect;
///
/// assert_eq!(
///     simplify_redirect("http://a.com/x/?q=1", "http://a.com/login/", None),
///     "/x/?q=1"
/// );
/// assert_eq!(simplify_redirect("http://b.com/x/", "/login/", None), "http://b.com/x/");
/// assert_eq!(simplify_redirect("/x/", "/login/", None), "/x/");
/// ```
pub fn simplify_redirect(url: &str, redirect_url: &str, request: Option<&Request>) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.cannot_be_a_base() || parsed.host_str().is_none() {
        return url.to_string();
    }
    let origin = origin_of(&parsed);

    let same_as_redirect = Url::parse(redirect_url)
        .map(|r| origin_of(&r) == origin)
        .unwrap_or(false);
    let same_as_request = request
        .and_then(|req| Url::parse(&req.build_absolute_uri(Some("/"))).ok())
        .map(|r| origin_of(&r) == origin)
        .unwrap_or(false);

    if !(same_as_redirect || same_as_request) {
        return url.to_string();
    }

    let mut simplified = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        simplified.push('?');
        simplified.push_str(query);
    }
    if let Some(fragment) = parsed.fragment() {
        simplified.push('#');
        simplified.push_str(fragment);
    }
    simplified
}
