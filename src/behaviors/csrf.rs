//! Cross-site request forgery protection.
//!
//! The token lives in a cookie. Unsafe requests must echo it back in the
//! form field or header named by the settings. Responses carry the cookie
//! once something used the token.

use http::Method;
use rand::distr::Alphanumeric;
use rand::Rng;
use subtle::ConstantTimeEq;
use url::Url;

use crate::error::Result;
use crate::http::{Cookie, Response};
use crate::middleware::{Middleware, Stages};
use crate::request::Request;
use crate::urls::ResolverMatch;
use crate::view::{Next, ViewArgs, ViewDecorator, ViewOutcome};

use super::vary::patch_vary_headers;

/// Length of a CSRF token.
pub const CSRF_KEY_LENGTH: usize = 32;

const REASON_NO_REFERER: &str = "Referer checking failed - no Referer.";
const REASON_NO_CSRF_COOKIE: &str = "CSRF cookie not set.";
const REASON_BAD_TOKEN: &str = "CSRF token missing or incorrect.";

/// Per-request CSRF bookkeeping, kept in the request extensions.
#[derive(Debug, Clone, Default)]
struct CsrfState {
    cookie: Option<String>,
    cookie_used: bool,
    processing_done: bool,
}

fn csrf_state(request: &Request) -> CsrfState {
    request
        .extensions()
        .get::<CsrfState>()
        .cloned()
        .unwrap_or_default()
}

fn update_state(request: &mut Request, f: impl FnOnce(&mut CsrfState)) {
    let mut state = request
        .extensions_mut()
        .remove::<CsrfState>()
        .unwrap_or_default();
    f(&mut state);
    request.extensions_mut().insert(state);
}

fn new_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CSRF_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// Keeps the alphanumeric part of a cookie token; oversized or empty
/// tokens are replaced.
fn sanitize_token(token: &str) -> String {
    if token.len() > CSRF_KEY_LENGTH {
        return new_token();
    }
    let cleaned: String = token.chars().filter(char::is_ascii_alphanumeric).collect();
    if cleaned.is_empty() {
        new_token()
    } else {
        cleaned
    }
}

fn tokens_match(submitted: &str, expected: &str) -> bool {
    bool::from(submitted.as_bytes().ct_eq(expected.as_bytes()))
}

fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str() == b.host_str()
                && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}

fn is_safe_method(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE].contains(method)
}

/// Returns the request's CSRF token and makes sure the response sets the
/// cookie. A token is created when the request has none yet.
///
/// ```
/// use view_policy::Request;
/// use view_policy::behaviors::get_token;
/// use http::Method;
///
/// let mut request = Request::builder(Method::GET, "/").build();
/// let token = get_token(&mut request);
/// assert_eq!(token.len(), 32);
/// assert_eq!(get_token(&mut request), token);
/// ```
pub fn get_token(request: &mut Request) -> String {
    let mut token = String::new();
    update_state(request, |state| {
        state.cookie_used = true;
        token = state.cookie.get_or_insert_with(new_token).clone();
    });
    token
}

/// Replaces the request's CSRF token, e.g. after login.
pub fn rotate_token(request: &mut Request) {
    update_state(request, |state| {
        state.cookie = Some(new_token());
        state.cookie_used = true;
    });
}

/// Checks unsafe requests and emits the CSRF cookie.
///
/// As a middleware it checks every view not marked exempt. The decorators
/// in this module run the same checks for a single view.
#[derive(Debug, Clone)]
pub struct CsrfViewMiddleware {
    enforce: bool,
    ensure_cookie: bool,
}

impl CsrfViewMiddleware {
    /// The enforcing middleware.
    pub fn new() -> Self {
        Self {
            enforce: true,
            ensure_cookie: false,
        }
    }

    fn accept(&self, request: &mut Request) -> Option<Response> {
        update_state(request, |state| state.processing_done = true);
        None
    }

    fn reject(&self, request: &Request, reason: &str) -> Option<Response> {
        if !self.enforce {
            request
                .log()
                .debug(format_args!("CSRF check failed, not enforced: {}", reason));
            return None;
        }
        request.log().warn(
            403,
            format_args!("Forbidden ({}): {}", reason, request.path()),
        );
        Some(Response::forbidden(format!(
            "<h1>Forbidden (403)</h1><p>CSRF verification failed. Request aborted.</p><p>{}</p>",
            reason
        )))
    }

    /// Runs the checks for a view. Returns the rejection, if any.
    pub fn check(&self, request: &mut Request, exempt: bool) -> Option<Response> {
        let outcome = self.evaluate(request, exempt);
        if self.ensure_cookie {
            get_token(request);
        }
        outcome
    }

    fn evaluate(&self, request: &mut Request, exempt: bool) -> Option<Response> {
        if csrf_state(request).processing_done {
            return None;
        }
        let settings = request.settings().clone();
        let csrf_token = request.cookie(&settings.csrf_cookie_name).map(sanitize_token);
        let cookie = csrf_token.clone().unwrap_or_else(new_token);
        update_state(request, |state| state.cookie = Some(cookie));

        if exempt || is_safe_method(request.method()) {
            return None;
        }
        if request.dont_enforce_csrf_checks() {
            return self.accept(request);
        }

        if request.is_secure() {
            let Some(referer) = request.header(http::header::REFERER.as_str()) else {
                return self.reject(request, REASON_NO_REFERER);
            };
            let good_referer = format!("https://{}/", request.host());
            if !same_origin(referer, &good_referer) {
                let reason = format!(
                    "Referer checking failed - {} does not match {}.",
                    referer, good_referer
                );
                return self.reject(request, &reason);
            }
        }

        let Some(csrf_token) = csrf_token else {
            return self.reject(request, REASON_NO_CSRF_COOKIE);
        };
        let submitted = request
            .form_value(&settings.csrf_form_field)
            .filter(|v| !v.is_empty())
            .or_else(|| request.header(&settings.csrf_header_name))
            .unwrap_or("");
        if !tokens_match(submitted, &csrf_token) {
            return self.reject(request, REASON_BAD_TOKEN);
        }
        self.accept(request)
    }

    /// Sets the cookie and `Vary: Cookie` when the token was used.
    pub fn finish(&self, request: &Request, mut response: Response) -> Response {
        if response.csrf_processing_done {
            return response;
        }
        let state = csrf_state(request);
        let (Some(token), true) = (state.cookie, state.cookie_used) else {
            return response;
        };
        let settings = request.settings();
        response.set_cookie(
            Cookie::new(settings.csrf_cookie_name.clone(), token).max_age(settings.csrf_cookie_age),
        );
        patch_vary_headers(&mut response, &["Cookie"]);
        response.csrf_processing_done = true;
        response
    }

    fn decorate(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
        if let Some(rejection) = self.check(request, false) {
            return Ok(Some(rejection));
        }
        let response = next(request, args)?;
        Ok(response.map(|response| self.finish(request, response)))
    }
}

impl Default for CsrfViewMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for CsrfViewMiddleware {
    fn name(&self) -> &str {
        "csrf"
    }

    fn stages(&self) -> Stages {
        Stages::VIEW | Stages::RESPONSE
    }

    fn process_view(
        &self,
        request: &mut Request,
        resolved: &ResolverMatch,
    ) -> Result<Option<Response>> {
        Ok(self.check(request, resolved.view.csrf_exempt()))
    }

    fn process_response(&self, request: &mut Request, response: Response) -> Result<Response> {
        Ok(self.finish(request, response))
    }
}

/// Enforces CSRF checks on one view.
#[derive(Debug, Clone, Default)]
pub struct CsrfProtect {
    middleware: CsrfViewMiddleware,
}

impl CsrfProtect {
    /// The decorator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewDecorator for CsrfProtect {
    fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
        self.middleware.decorate(request, args, next)
    }
}

/// Makes the token available to the view without rejecting anything.
#[derive(Debug, Clone)]
pub struct RequiresCsrfToken {
    middleware: CsrfViewMiddleware,
}

impl RequiresCsrfToken {
    /// The decorator.
    pub fn new() -> Self {
        Self {
            middleware: CsrfViewMiddleware {
                enforce: false,
                ensure_cookie: false,
            },
        }
    }
}

impl Default for RequiresCsrfToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewDecorator for RequiresCsrfToken {
    fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
        self.middleware.decorate(request, args, next)
    }
}

/// Always sends the CSRF cookie, without rejecting anything.
#[derive(Debug, Clone)]
pub struct EnsureCsrfCookie {
    middleware: CsrfViewMiddleware,
}

impl EnsureCsrfCookie {
    /// The decorator.
    pub fn new() -> Self {
        Self {
            middleware: CsrfViewMiddleware {
                enforce: false,
                ensure_cookie: true,
            },
        }
    }
}

impl Default for EnsureCsrfCookie {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewDecorator for EnsureCsrfCookie {
    fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
        self.middleware.decorate(request, args, next)
    }
}

/// Exempts a view from [`CsrfViewMiddleware`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrfExempt;

impl ViewDecorator for CsrfExempt {
    fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
        next(request, args)
    }

    fn csrf_exempt(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{decorate, view_fn, View};
    use http::StatusCode;
    use std::sync::Arc;

    const TOKEN: &str = "abcdefghijklmnopqrstuvwxyz012345";

    fn form_view() -> Arc<dyn View> {
        view_fn("form", |_, _| Ok(Some(Response::ok("accepted"))))
    }

    fn call(view: &dyn View, request: &mut Request) -> Response {
        view.call(request, &ViewArgs::new()).unwrap().unwrap()
    }

    #[test]
    fn sanitizes_cookie_tokens() {
        assert_eq!(sanitize_token("abc-def"), "abcdef");
        assert_eq!(sanitize_token("!!!").len(), CSRF_KEY_LENGTH);
        assert_ne!(sanitize_token(&"a".repeat(40)), "a".repeat(40));
    }

    #[test]
    fn post_without_cookie_is_rejected() {
        let view = decorate(form_view(), Arc::new(CsrfProtect::new()));
        let mut request = Request::builder(Method::POST, "/form/").build();
        let response = call(view.as_ref(), &mut request);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.text().contains(REASON_NO_CSRF_COOKIE));
    }

    #[test]
    fn matching_form_token_is_accepted() {
        let view = decorate(form_view(), Arc::new(CsrfProtect::new()));
        let mut request = Request::builder(Method::POST, "/form/")
            .cookie("csrftoken", TOKEN)
            .form_field("csrfmiddlewaretoken", TOKEN)
            .build();
        assert_eq!(call(view.as_ref(), &mut request).text(), "accepted");
    }

    #[test]
    fn header_token_is_accepted_and_mismatch_rejected() {
        let view = decorate(form_view(), Arc::new(CsrfProtect::new()));
        let mut request = Request::builder(Method::POST, "/form/")
            .cookie("csrftoken", TOKEN)
            .header("X-CSRFToken", TOKEN)
            .build();
        assert_eq!(call(view.as_ref(), &mut request).status(), StatusCode::OK);

        let mut request = Request::builder(Method::POST, "/form/")
            .cookie("csrftoken", TOKEN)
            .form_field("csrfmiddlewaretoken", "wrong")
            .build();
        let response = call(view.as_ref(), &mut request);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.text().contains(REASON_BAD_TOKEN));
    }

    #[test]
    fn https_requires_same_origin_referer() {
        let view = decorate(form_view(), Arc::new(CsrfProtect::new()));
        let secure = |referer: Option<&str>| {
            let mut builder = Request::builder(Method::POST, "/form/")
                .scheme("https")
                .host("example.com")
                .cookie("csrftoken", TOKEN)
                .form_field("csrfmiddlewaretoken", TOKEN);
            if let Some(referer) = referer {
                builder = builder.header("referer", referer);
            }
            builder.build()
        };
        assert_eq!(call(view.as_ref(), &mut secure(None)).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            call(view.as_ref(), &mut secure(Some("https://evil.com/"))).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            call(view.as_ref(), &mut secure(Some("https://example.com/form/"))).status(),
            StatusCode::OK
        );
    }

    #[test]
    fn test_clients_can_skip_checks() {
        let view = decorate(form_view(), Arc::new(CsrfProtect::new()));
        let mut request = Request::builder(Method::POST, "/form/")
            .dont_enforce_csrf_checks(true)
            .build();
        assert_eq!(call(view.as_ref(), &mut request).status(), StatusCode::OK);
    }

    #[test]
    fn requires_token_never_rejects() {
        let view = decorate(form_view(), Arc::new(RequiresCsrfToken::new()));
        let mut request = Request::builder(Method::POST, "/form/").build();
        assert_eq!(call(view.as_ref(), &mut request).status(), StatusCode::OK);
    }

    #[test]
    fn ensure_cookie_sets_cookie_on_get() {
        let view = decorate(form_view(), Arc::new(EnsureCsrfCookie::new()));
        let mut request = Request::builder(Method::GET, "/form/").build();
        let response = call(view.as_ref(), &mut request);
        let cookie = response.cookie("csrftoken").unwrap();
        assert_eq!(cookie.value.len(), CSRF_KEY_LENGTH);
        assert_eq!(cookie.max_age, Some(31_449_600));
        assert_eq!(response.header("vary"), Some("Cookie"));
    }

    #[test]
    fn unused_token_sets_no_cookie() {
        let view = decorate(form_view(), Arc::new(CsrfProtect::new()));
        let mut request = Request::builder(Method::GET, "/form/").build();
        assert!(call(view.as_ref(), &mut request).cookies().is_empty());
    }

    #[test]
    fn get_token_keeps_the_cookie_value() {
        let view = decorate(
            view_fn("form", |request: &mut Request, _| {
                let token = get_token(request);
                Ok(Some(Response::ok(token)))
            }),
            Arc::new(CsrfProtect::new()),
        );
        let mut request = Request::builder(Method::GET, "/form/")
            .cookie("csrftoken", TOKEN)
            .build();
        let response = call(view.as_ref(), &mut request);
        assert_eq!(response.text(), TOKEN);
        assert_eq!(response.cookie("csrftoken").unwrap().value, TOKEN);
    }

    #[test]
    fn middleware_skips_exempt_views() {
        let middleware = CsrfViewMiddleware::new();
        let exempt = decorate(form_view(), Arc::new(CsrfExempt));
        assert!(exempt.csrf_exempt());

        let mut request = Request::builder(Method::POST, "/form/").build();
        let resolved = ResolverMatch::new(exempt);
        assert!(middleware.process_view(&mut request, &resolved).unwrap().is_none());

        let mut request = Request::builder(Method::POST, "/form/").build();
        let resolved = ResolverMatch::new(form_view());
        let rejected = middleware.process_view(&mut request, &resolved).unwrap().unwrap();
        assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn rotate_token_changes_value() {
        let mut request = Request::builder(Method::GET, "/").build();
        let first = get_token(&mut request);
        rotate_token(&mut request);
        assert_ne!(get_token(&mut request), first);
    }
}
