//! Page caching and `Cache-Control` policies.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use http::header::{CACHE_CONTROL, EXPIRES, LAST_MODIFIED};
use http::{Method, StatusCode};
use parking_lot::Mutex;

use crate::error::Result;
use crate::http::Response;
use crate::request::Request;
use crate::view::{AllowPolicy, ClassView, ViewArgs, ViewHandler};

use super::vary::{has_vary_header, vary_headers};

/// Longest lifetime, in seconds, given to a cached page or an `Expires` date.
///
/// Larger `max-age` values and timeouts are clamped to one year.
pub const MAX_CACHE_TIMEOUT: u64 = 365 * 24 * 60 * 60;

/// A value kept in a [`Cache`].
#[derive(Debug, Clone)]
pub enum Cached {
    /// Request headers the page varies on, learned per URL
    HeaderList(Vec<String>),
    /// A cached response
    Page(Response),
}

/// The cache collaborator used by [`CachePage`].
pub trait Cache: Send + Sync {
    /// Returns a live entry.
    fn get(&self, key: &str) -> Option<Cached>;

    /// Stores an entry for `timeout`.
    fn set(&self, key: &str, value: Cached, timeout: Duration);
}

/// An in-process [`Cache`] with per-entry expiry.
#[derive(Default)]
pub struct LocalCache {
    entries: Mutex<HashMap<String, (Cached, Instant)>>,
}

impl LocalCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Cache for LocalCache {
    fn get(&self, key: &str) -> Option<Cached> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: Cached, timeout: Duration) {
        let timeout = timeout.min(Duration::from_secs(MAX_CACHE_TIMEOUT));
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + timeout));
    }
}

impl fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCache")
            .field("entries", &self.len())
            .finish()
    }
}

/// Parsed `Cache-Control` directives, in header order.
fn cache_directives(response: &Response) -> Vec<(String, Option<String>)> {
    response
        .header(CACHE_CONTROL.as_str())
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(|d| match d.split_once('=') {
                    Some((k, v)) => (k.trim().to_ascii_lowercase(), Some(v.trim().to_string())),
                    None => (d.to_ascii_lowercase(), None),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `max-age` from `Cache-Control`, if present and numeric.
pub fn get_max_age(response: &Response) -> Option<u64> {
    cache_directives(response)
        .into_iter()
        .find(|(k, _)| k == "max-age")
        .and_then(|(_, v)| v)
        .and_then(|v| v.parse().ok())
}

/// Merges directives into `Cache-Control`.
///
/// A new `max-age` never raises an existing one, and `public` and `private`
/// replace each other.
///
/// ```
/// use view_policy::Response;
/// use view_policy::behaviors::patch_cache_control;
///
/// let mut response = Response::ok("");
/// patch_cache_control(&mut response, &[("public", None), ("max-age", Some("60".into()))]);
/// patch_cache_control(&mut response, &[("private", None), ("max-age", Some("300".into()))]);
/// assert_eq!(response.header("cache-control"), Some("max-age=60, private"));
/// ```
pub fn patch_cache_control(response: &mut Response, directives: &[(&str, Option<String>)]) {
    let mut current = cache_directives(response);
    for (name, value) in directives {
        let name = name.to_ascii_lowercase();
        let opposite = match name.as_str() {
            "public" => Some("private"),
            "private" => Some("public"),
            _ => None,
        };
        if let Some(opposite) = opposite {
            current.retain(|(k, _)| k != opposite);
        }
        let mut value = value.clone();
        if name == "max-age" {
            let existing = current
                .iter()
                .find(|(k, _)| k == "max-age")
                .and_then(|(_, v)| v.as_deref())
                .and_then(|v| v.parse::<u64>().ok());
            let new = value.as_deref().and_then(|v| v.parse::<u64>().ok());
            if let (Some(existing), Some(new)) = (existing, new) {
                value = Some(existing.min(new).to_string());
            }
        }
        match current.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => current.push((name, value)),
        }
    }
    let header = current
        .iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{}={}", k, v),
            None => k.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    response.set_header(CACHE_CONTROL, header);
}

/// Adds `Last-Modified` (if absent), `Expires` and `max-age` for a response
/// cached for `timeout` seconds, at most [`MAX_CACHE_TIMEOUT`].
pub fn patch_response_headers(response: &mut Response, timeout: u64) {
    let timeout = timeout.min(MAX_CACHE_TIMEOUT);
    let now = SystemTime::now();
    if !response.has_header(LAST_MODIFIED.as_str()) {
        response.set_header(LAST_MODIFIED, httpdate::fmt_http_date(now));
    }
    if !response.has_header(EXPIRES.as_str()) {
        let expires = now + Duration::from_secs(timeout);
        response.set_header(EXPIRES, httpdate::fmt_http_date(expires));
    }
    patch_cache_control(response, &[("max-age", Some(timeout.to_string()))]);
}

/// Caches successful `GET` and `HEAD` responses.
///
/// Cache entries are keyed by prefix, absolute URL and the values of the
/// request headers the response varies on. Responses marked `private` or
/// `no-store`, and responses that set cookies while varying on `Cookie` for
/// a request without cookies, are not stored.
///
/// ```
/// use std::sync::Arc;
/// use view_policy::{CachePage, ClassView, LocalCache, Request, Response, View, ViewArgs};
/// use http::Method;
///
/// let cache = Arc::new(LocalCache::new());
/// let view = ClassView::builder("Home")
///     .get(|_, _| Ok(Response::ok("home")))
///     .allow(Arc::new(CachePage::new(cache.clone()).timeout(60)))
///     .build();
///
/// let mut request = Request::builder(Method::GET, "/").build();
/// view.call(&mut request, &ViewArgs::new()).unwrap();
/// assert!(!cache.is_empty());
/// ```
#[derive(Clone)]
pub struct CachePage {
    enabled: bool,
    cache: Arc<dyn Cache>,
    timeout: Option<u64>,
    key_prefix: Option<String>,
}

impl CachePage {
    /// Caches in `cache` with the settings' timeout and prefix.
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            enabled: true,
            cache,
            timeout: None,
            key_prefix: None,
        }
    }

    /// Default timeout in seconds, used when the response has no `max-age`.
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Turns the policy on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn prefix<'r>(&'r self, request: &'r Request) -> &'r str {
        self.key_prefix
            .as_deref()
            .unwrap_or(&request.settings().cache_key_prefix)
    }

    fn header_key(&self, request: &Request) -> String {
        format!(
            "cache_header.{}.{}",
            self.prefix(request),
            request.build_absolute_uri(None)
        )
    }

    fn page_key(&self, request: &Request, headers: &[String]) -> String {
        let values: Vec<&str> = headers
            .iter()
            .map(|h| request.header(h).unwrap_or(""))
            .collect();
        format!(
            "cache_page.{}.GET.{}.{}",
            self.prefix(request),
            request.build_absolute_uri(None),
            values.join("|")
        )
    }

    /// The cached response for this request, if any.
    pub fn fetch(&self, request: &Request) -> Option<Response> {
        let Some(Cached::HeaderList(headers)) = self.cache.get(&self.header_key(request)) else {
            return None;
        };
        match self.cache.get(&self.page_key(request, &headers)) {
            Some(Cached::Page(response)) => Some(response),
            _ => None,
        }
    }

    /// Stores `response` when it is cacheable, patching its caching headers.
    pub fn update(&self, request: &Request, response: &mut Response) {
        if response.status() != StatusCode::OK {
            return;
        }
        if request.cookies().is_empty()
            && !response.cookies().is_empty()
            && has_vary_header(response, "Cookie")
        {
            return;
        }
        let directives = cache_directives(response);
        if directives.iter().any(|(k, _)| k == "private" || k == "no-store") {
            return;
        }
        let timeout = get_max_age(response)
            .or(self.timeout)
            .unwrap_or(request.settings().cache_timeout)
            .min(MAX_CACHE_TIMEOUT);
        if timeout == 0 {
            return;
        }
        patch_response_headers(response, timeout);

        let headers = vary_headers(response);
        let ttl = Duration::from_secs(timeout);
        self.cache
            .set(&self.header_key(request), Cached::HeaderList(headers.clone()), ttl);
        self.cache
            .set(&self.page_key(request, &headers), Cached::Page(response.clone()), ttl);
        request.log().debug(format_args!("cached page for {}s", timeout));
    }
}

impl fmt::Debug for CachePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePage")
            .field("enabled", &self.enabled)
            .field("timeout", &self.timeout)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl AllowPolicy for CachePage {
    fn name(&self) -> &str {
        "cache_page"
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
        if !self.enabled {
            return Ok(Some(inner));
        }
        Ok(Some(Box::new(move |request: &mut Request, args: &ViewArgs| {
            let cacheable = *request.method() == Method::GET || *request.method() == Method::HEAD;
            if cacheable {
                if let Some(response) = self.fetch(request) {
                    request.log().debug(format_args!("page cache hit"));
                    return Ok(response);
                }
            }
            let mut response = inner(request, args)?;
            if cacheable {
                self.update(request, &mut response);
            }
            Ok(response)
        })))
    }
}

/// Adds `Cache-Control` directives to every response of the view.
///
/// `public(true)` sets `public`, `public(false)` sets `private`. Without
/// any directive the policy does nothing.
#[derive(Debug, Clone)]
pub struct CacheControl {
    enabled: bool,
    public: Option<bool>,
    no_cache: bool,
    no_transform: bool,
    must_revalidate: bool,
    proxy_revalidate: bool,
    max_age: Option<u64>,
    s_maxage: Option<u64>,
}

impl CacheControl {
    /// No directives yet.
    pub fn new() -> Self {
        Self {
            enabled: true,
            public: None,
            no_cache: false,
            no_transform: false,
            must_revalidate: false,
            proxy_revalidate: false,
            max_age: None,
            s_maxage: None,
        }
    }

    /// `public` when true, `private` when false.
    pub fn public(mut self, public: bool) -> Self {
        self.public = Some(public);
        self
    }

    /// `no-cache`.
    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    /// `no-transform`.
    pub fn no_transform(mut self) -> Self {
        self.no_transform = true;
        self
    }

    /// `must-revalidate`.
    pub fn must_revalidate(mut self) -> Self {
        self.must_revalidate = true;
        self
    }

    /// `proxy-revalidate`.
    pub fn proxy_revalidate(mut self) -> Self {
        self.proxy_revalidate = true;
        self
    }

    /// `max-age`.
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// `s-maxage`.
    pub fn s_maxage(mut self, seconds: u64) -> Self {
        self.s_maxage = Some(seconds);
        self
    }

    /// Turns the policy on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The directives this policy applies.
    pub fn directives(&self) -> Vec<(&'static str, Option<String>)> {
        let mut directives = Vec::new();
        match self.public {
            Some(true) => directives.push(("public", None)),
            Some(false) => directives.push(("private", None)),
            None => {}
        }
        let flags = [
            ("no-cache", self.no_cache),
            ("no-transform", self.no_transform),
            ("must-revalidate", self.must_revalidate),
            ("proxy-revalidate", self.proxy_revalidate),
        ];
        directives.extend(flags.into_iter().filter(|(_, on)| *on).map(|(k, _)| (k, None)));
        // Zero ages are treated as unset.
        if let Some(age) = self.max_age.filter(|a| *a > 0) {
            directives.push(("max-age", Some(age.to_string())));
        }
        if let Some(age) = self.s_maxage.filter(|a| *a > 0) {
            directives.push(("s-maxage", Some(age.to_string())));
        }
        directives
    }
}

impl Default for CacheControl {
    fn default() -> Self {
        Self::new()
    }
}

impl AllowPolicy for CacheControl {
    fn name(&self) -> &str {
        "cache_control"
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
        let directives = self.directives();
        if !self.enabled || directives.is_empty() {
            return Ok(Some(inner));
        }
        Ok(Some(Box::new(move |request: &mut Request, args: &ViewArgs| {
            let mut response = inner(request, args)?;
            patch_cache_control(&mut response, &directives);
            Ok(response)
        })))
    }
}

/// Marks every response of the view as never cacheable.
#[derive(Debug, Clone)]
pub struct NeverCache {
    enabled: bool,
}

impl NeverCache {
    /// The enabled policy.
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// Turns the policy on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for NeverCache {
    fn default() -> Self {
        Self::new()
    }
}

/// `Expires` now and a `Cache-Control` that forbids caching.
pub fn add_never_cache_headers(response: &mut Response) {
    response.set_header(EXPIRES, httpdate::fmt_http_date(SystemTime::now()));
    patch_cache_control(
        response,
        &[
            ("max-age", Some("0".to_string())),
            ("no-cache", None),
            ("no-store", None),
            ("must-revalidate", None),
            ("private", None),
        ],
    );
}

impl AllowPolicy for NeverCache {
    fn name(&self) -> &str {
        "never_cache"
    }

    fn allow_handler<'a>(
        &'a self,
        _view: &'a ClassView,
        _request: &Request,
        _args: &ViewArgs,
        inner: Option<ViewHandler<'a>>,
    ) -> Result<Option<ViewHandler<'a>>> {
        match inner {
            Some(inner) if self.enabled => Ok(Some(Box::new(
                move |request: &mut Request, args: &ViewArgs| {
                    let mut response = inner(request, args)?;
                    add_never_cache_headers(&mut response);
                    Ok(response)
                },
            ))),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Cookie;
    use crate::view::View;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_view(policy: Arc<dyn AllowPolicy>, hits: Arc<AtomicUsize>) -> Arc<ClassView> {
        ClassView::builder("Counted")
            .get(move |_, _| {
                let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Response::ok(format!("call {}", n)))
            })
            .post(|_, _| Ok(Response::ok("posted")))
            .allow(policy)
            .build()
    }

    fn call(view: &ClassView, method: Method, lang: &str) -> Response {
        let mut request = Request::builder(method, "/page/")
            .header("accept-language", lang)
            .build();
        view.call(&mut request, &ViewArgs::new()).unwrap().unwrap()
    }

    #[test]
    fn caches_get_responses() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(LocalCache::new());
        let view = counting_view(Arc::new(CachePage::new(cache).timeout(30)), hits.clone());

        let first = call(&view, Method::GET, "en");
        let second = call(&view, Method::GET, "en");
        assert_eq!(first.text(), "call 1");
        assert_eq!(second.text(), "call 1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(first.header("cache-control"), Some("max-age=30"));
        assert!(first.has_header("expires"));
        assert!(first.has_header("last-modified"));
    }

    #[test]
    fn post_is_never_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(LocalCache::new());
        let view = counting_view(Arc::new(CachePage::new(cache.clone())), hits);
        call(&view, Method::POST, "en");
        assert!(cache.is_empty());
    }

    #[test]
    fn vary_headers_split_the_cache() {
        let cache = Arc::new(LocalCache::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let view = ClassView::builder("Localized")
            .get(move |request, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                let lang = request.header("accept-language").unwrap_or("").to_string();
                Ok(Response::ok(lang).with_header(http::header::VARY, "Accept-Language"))
            })
            .allow(Arc::new(CachePage::new(cache)))
            .build();

        assert_eq!(call(&view, Method::GET, "en").text(), "en");
        assert_eq!(call(&view, Method::GET, "fr").text(), "fr");
        assert_eq!(call(&view, Method::GET, "en").text(), "en");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn private_and_cookie_responses_are_not_stored() {
        let cache = Arc::new(LocalCache::new());
        let page = CachePage::new(cache.clone());
        let request = Request::builder(Method::GET, "/").build();

        let mut private = Response::ok("").with_header(CACHE_CONTROL, "private");
        page.update(&request, &mut private);
        assert!(cache.is_empty());

        let mut session = Response::ok("").with_header(http::header::VARY, "Cookie");
        session.set_cookie(Cookie::new("sessionid", "x"));
        page.update(&request, &mut session);
        assert!(cache.is_empty());

        let mut fine = Response::ok("");
        page.update(&request, &mut fine);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn max_age_overrides_timeout() {
        let cache = Arc::new(LocalCache::new());
        let page = CachePage::new(cache).timeout(10);
        let request = Request::builder(Method::GET, "/").build();
        let mut response = Response::ok("").with_header(CACHE_CONTROL, "max-age=90");
        page.update(&request, &mut response);
        assert_eq!(get_max_age(&response), Some(90));
    }

    #[test]
    fn huge_max_age_is_clamped() {
        let cache = Arc::new(LocalCache::new());
        let view = ClassView::builder("Forever")
            .get(|_, _| {
                Ok(Response::ok("forever").with_header(CACHE_CONTROL, "max-age=300000000000"))
            })
            .allow(Arc::new(CachePage::new(cache.clone())))
            .build();

        let response = call(&view, Method::GET, "en");
        assert_eq!(get_max_age(&response), Some(MAX_CACHE_TIMEOUT));
        assert!(response.has_header("expires"));
        assert_eq!(cache.len(), 2);
        assert_eq!(call(&view, Method::GET, "en").text(), "forever");
    }

    #[test]
    fn unbounded_timeout_does_not_overflow() {
        let cache = Arc::new(LocalCache::new());
        let page = CachePage::new(cache.clone()).timeout(u64::MAX);
        let request = Request::builder(Method::GET, "/").build();
        let mut response = Response::ok("");
        page.update(&request, &mut response);
        assert_eq!(get_max_age(&response), Some(MAX_CACHE_TIMEOUT));
        assert!(cache.get(&page.header_key(&request)).is_some());

        cache.set("raw", Cached::HeaderList(vec![]), Duration::MAX);
        assert!(cache.get("raw").is_some());
    }

    #[test]
    fn zero_timeout_skips_caching() {
        let cache = Arc::new(LocalCache::new());
        let page = CachePage::new(cache.clone()).timeout(0);
        let request = Request::builder(Method::GET, "/").build();
        page.update(&request, &mut Response::ok(""));
        assert!(cache.is_empty());
    }

    #[test]
    fn local_cache_expires_entries() {
        let cache = LocalCache::new();
        cache.set("k", Cached::HeaderList(vec![]), Duration::ZERO);
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_control_policy_applies_directives() {
        let policy = CacheControl::new()
            .public(false)
            .must_revalidate()
            .max_age(120);
        assert_eq!(
            policy.directives(),
            vec![
                ("private", None),
                ("must-revalidate", None),
                ("max-age", Some("120".to_string()))
            ]
        );
        let view = ClassView::builder("Private")
            .get(|_, _| Ok(Response::ok("")))
            .allow(Arc::new(policy))
            .build();
        let response = call(&view, Method::GET, "en");
        assert_eq!(
            response.header("cache-control"),
            Some("private, must-revalidate, max-age=120")
        );
    }

    #[test]
    fn empty_cache_control_is_disabled() {
        assert!(CacheControl::new().max_age(0).directives().is_empty());
    }

    #[test]
    fn never_cache_headers() {
        let view = ClassView::builder("Fresh")
            .get(|_, _| Ok(Response::ok("")))
            .allow(Arc::new(NeverCache::new()))
            .build();
        let response = call(&view, Method::GET, "en");
        assert_eq!(
            response.header("cache-control"),
            Some("max-age=0, no-cache, no-store, must-revalidate, private")
        );
        assert!(response.has_header("expires"));
    }
}
