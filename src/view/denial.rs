//! The raise / message / redirect protocol run when a policy denies a request.
//!
//! A [`Denial`] is the per-behavior configuration; [`DenialProtocol`]
//! resolves it against the request into a [`DenialConfig`] and runs the
//! three steps. Every resolution hook and step is a provided trait method,
//! so a custom responder overrides only what it needs.

use std::borrow::Cow;

use crate::error::{Error, ErrorKind, Result};
use crate::http::Response;
use crate::messages::{add_message, Level};
use crate::request::Request;
use crate::urls::{simplify_redirect, update_query};

use super::chain::ViewHandler;
use super::ViewArgs;

#[derive(Debug, Clone, PartialEq, Eq)]
enum NextName {
    FromSettings,
    Named(String),
    Disabled,
}

/// Unresolved denial configuration for one behavior.
///
/// Unset options fall back to defaults when the denial runs: raise the
/// permission-denied error, warning level, no tags, the login URL, the
/// current absolute URL and the `next` parameter.
///
/// # Examples
///
/// ```
/// use view_policy::{Denial, DenialProtocol, Level, Request};
/// use http::Method;
///
/// let denial = Denial::new("login_required")
///     .message("Please log in")
///     .message_level(Level::Info);
///
/// let request = Request::builder(Method::GET, "/resource/").build();
/// let config = denial.resolve(&request);
/// assert!(!config.raise);
/// assert_eq!(config.redirect_url, "/accounts/login/");
/// assert_eq!(config.redirect_next_name.as_deref(), Some("next"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    prefix: Cow<'static, str>,
    raise: bool,
    exception: Option<ErrorKind>,
    message: Option<String>,
    message_level: Option<Level>,
    message_tags: Option<String>,
    redirect_url: Option<String>,
    redirect_next_url: Option<String>,
    redirect_next_name: NextName,
}

impl Denial {
    /// Denial for the behavior named `prefix`, all options unset.
    pub fn new(prefix: impl Into<Cow<'static, str>>) -> Self {
        Self {
            prefix: prefix.into(),
            raise: false,
            exception: None,
            message: None,
            message_level: None,
            message_tags: None,
            redirect_url: None,
            redirect_next_url: None,
            redirect_next_name: NextName::FromSettings,
        }
    }

    /// Name of the owning behavior.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Raise an error instead of redirecting.
    pub fn raise(mut self, raise: bool) -> Self {
        self.raise = raise;
        self
    }

    /// Error raised when raising.
    pub fn exception(mut self, kind: ErrorKind) -> Self {
        self.exception = Some(kind);
        self
    }

    /// Message queued before redirecting. Empty means none.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Level of the queued message.
    pub fn message_level(mut self, level: Level) -> Self {
        self.message_level = Some(level);
        self
    }

    /// Extra tags of the queued message.
    pub fn message_tags(mut self, tags: impl Into<String>) -> Self {
        self.message_tags = Some(tags.into());
        self
    }

    /// Redirect target. A route name is reversed first.
    pub fn redirect_url(mut self, url: impl Into<String>) -> Self {
        self.redirect_url = Some(url.into());
        self
    }

    /// Destination passed to the redirect target.
    pub fn redirect_next_url(mut self, url: impl Into<String>) -> Self {
        self.redirect_next_url = Some(url.into());
        self
    }

    /// Query parameter carrying the destination. Empty disables it.
    pub fn redirect_next_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.redirect_next_name = if name.is_empty() {
            NextName::Disabled
        } else {
            NextName::Named(name)
        };
        self
    }

    /// Redirect without a destination parameter.
    pub fn without_next(mut self) -> Self {
        self.redirect_next_name = NextName::Disabled;
        self
    }
}

/// Fully resolved denial options, computed fresh for every denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialConfig {
    /// Raise instead of redirecting
    pub raise: bool,
    /// Error raised when raising
    pub exception: ErrorKind,
    /// Message to queue, if any
    pub message: Option<String>,
    /// Level of the queued message
    pub message_level: Level,
    /// Extra tags of the queued message
    pub message_tags: String,
    /// Redirect target
    pub redirect_url: String,
    /// Destination passed to the target
    pub redirect_next_url: String,
    /// Parameter carrying the destination, if any
    pub redirect_next_name: Option<String>,
}

/// Result of running a denial.
#[derive(Debug)]
pub enum DenyOutcome {
    /// The denial raised; no message was queued and no response built.
    Raise(Error),
    /// The denial redirected.
    Redirect(Response),
}

impl DenyOutcome {
    /// `Err` for a raise, `Ok` for a redirect.
    pub fn into_result(self) -> Result<Response> {
        match self {
            DenyOutcome::Raise(err) => Err(err),
            DenyOutcome::Redirect(response) => Ok(response),
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

/// Resolution hooks and the three denial steps.
pub trait DenialProtocol {
    /// The configuration being resolved.
    fn denial(&self) -> &Denial;

    /// Whether to raise.
    fn resolve_raise(&self, _request: &Request) -> bool {
        self.denial().raise
    }

    /// Error to raise.
    fn resolve_exception(&self, _request: &Request) -> ErrorKind {
        self.denial().exception.unwrap_or_default()
    }

    /// Message to queue.
    fn resolve_message(&self, _request: &Request) -> Option<String> {
        non_empty(self.denial().message.as_ref()).map(str::to_string)
    }

    /// Message level.
    fn resolve_message_level(&self, _request: &Request) -> Level {
        self.denial().message_level.unwrap_or_default()
    }

    /// Message tags.
    fn resolve_message_tags(&self, _request: &Request) -> String {
        self.denial().message_tags.clone().unwrap_or_default()
    }

    /// Redirect target: the configured URL as given, else the login URL
    /// reversed through the request's resolver, else the login URL verbatim.
    fn resolve_redirect_url(&self, request: &Request) -> String {
        if let Some(url) = non_empty(self.denial().redirect_url.as_ref()) {
            return url.to_string();
        }
        let login_url = request.settings().login_url.as_str();
        request
            .urlconf()
            .and_then(|resolver| resolver.reverse(login_url, &[]).ok())
            .unwrap_or_else(|| login_url.to_string())
    }

    /// Destination: the configured URL, else the request's absolute URL.
    fn resolve_redirect_next_url(&self, request: &Request) -> String {
        match non_empty(self.denial().redirect_next_url.as_ref()) {
            Some(url) => url.to_string(),
            None => request.build_absolute_uri(None),
        }
    }

    /// Destination parameter name, `None` when disabled.
    fn resolve_redirect_next_name(&self, request: &Request) -> Option<String> {
        match &self.denial().redirect_next_name {
            NextName::Named(name) => Some(name.clone()),
            NextName::FromSettings => {
                Some(request.settings().redirect_field_name.clone()).filter(|n| !n.is_empty())
            }
            NextName::Disabled => None,
        }
    }

    /// Resolves every option. Reads only.
    fn resolve(&self, request: &Request) -> DenialConfig {
        DenialConfig {
            raise: self.resolve_raise(request),
            exception: self.resolve_exception(request),
            message: self.resolve_message(request),
            message_level: self.resolve_message_level(request),
            message_tags: self.resolve_message_tags(request),
            redirect_url: self.resolve_redirect_url(request),
            redirect_next_url: self.resolve_redirect_next_url(request),
            redirect_next_name: self.resolve_redirect_next_name(request),
        }
    }

    /// Redirect target with the simplified destination appended.
    fn full_redirect_url(&self, request: &Request, config: &DenialConfig) -> String {
        match &config.redirect_next_name {
            Some(name) => {
                let next =
                    simplify_redirect(&config.redirect_next_url, &config.redirect_url, Some(request));
                update_query(&config.redirect_url, &[(name.as_str(), next.as_str())])
            }
            None => config.redirect_url.clone(),
        }
    }

    /// Step 1: the error to raise, if raising.
    fn raise_step(&self, _request: &Request, config: &DenialConfig) -> Option<Error> {
        config
            .raise
            .then(|| config.exception.into_error(self.denial().prefix()))
    }

    /// Step 2: queues the message, if any.
    fn message_step(&self, request: &mut Request, config: &DenialConfig) {
        if let Some(message) = &config.message {
            add_message(
                request,
                config.message_level,
                message.clone(),
                config.message_tags.clone(),
            );
        }
    }

    /// Step 3: the redirect.
    fn respond_step(&self, request: &Request, config: &DenialConfig) -> Response {
        Response::redirect(&self.full_redirect_url(request, config))
    }

    /// Runs the three steps in order.
    fn deny(&self, request: &mut Request) -> DenyOutcome {
        let config = self.resolve(request);
        if let Some(err) = self.raise_step(request, &config) {
            return DenyOutcome::Raise(err);
        }
        self.message_step(request, &config);
        DenyOutcome::Redirect(self.respond_step(request, &config))
    }

    /// A chain handler that runs this denial.
    fn handler(&self) -> ViewHandler<'_>
    where
        Self: Sized,
    {
        Box::new(move |request: &mut Request, _: &ViewArgs| self.deny(request).into_result())
    }
}

impl DenialProtocol for Denial {
    fn denial(&self) -> &Denial {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urls::UrlConf;
    use crate::view::view_fn;
    use http::{Method, StatusCode};
    use std::sync::Arc;

    fn request() -> Request {
        Request::builder(Method::GET, "/resource/")
            .host("testserver")
            .build()
    }

    #[test]
    fn defaults_redirect_to_login_with_next() {
        let mut request = request();
        let outcome = Denial::new("login_required").deny(&mut request);
        let response = outcome.into_result().unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.header("location"),
            Some("/accounts/login/?next=%2Fresource%2F")
        );
        assert!(request.messages().is_empty());
    }

    #[test]
    fn raise_skips_message_and_redirect() {
        let mut request = request();
        let outcome = Denial::new("login_required")
            .raise(true)
            .message("ignored")
            .deny(&mut request);
        assert!(matches!(outcome, DenyOutcome::Raise(Error::PermissionDenied(_))));
        assert!(request.messages().is_empty());
    }

    #[test]
    fn configured_exception_is_raised() {
        let mut request = request();
        let outcome = Denial::new("x")
            .raise(true)
            .exception(ErrorKind::NotFound)
            .deny(&mut request);
        assert!(matches!(outcome, DenyOutcome::Raise(Error::NotFound(_))));
    }

    #[test]
    fn message_is_queued_once() {
        let mut request = request();
        Denial::new("login_required")
            .message("Please log in")
            .message_tags("auth")
            .deny(&mut request);
        assert_eq!(request.messages().len(), 1);
        let message = &request.messages()[0];
        assert_eq!(message.message, "Please log in");
        assert_eq!(message.level, Level::Warning);
        assert_eq!(message.tags(), "auth warning");
    }

    #[test]
    fn empty_message_queues_nothing() {
        let mut request = request();
        Denial::new("x").message("").deny(&mut request);
        assert!(request.messages().is_empty());
    }

    #[test]
    fn next_name_can_be_disabled_or_renamed() {
        let request = request();
        let plain = Denial::new("x").without_next();
        let config = plain.resolve(&request);
        assert_eq!(plain.full_redirect_url(&request, &config), "/accounts/login/");

        let renamed = Denial::new("x").redirect_next_name("to");
        let config = renamed.resolve(&request);
        assert_eq!(
            renamed.full_redirect_url(&request, &config),
            "/accounts/login/?to=%2Fresource%2F"
        );
        assert_eq!(Denial::new("x").redirect_next_name("").resolve(&request).redirect_next_name, None);
    }

    #[test]
    fn foreign_next_url_keeps_its_origin() {
        let request = request();
        let denial = Denial::new("x")
            .redirect_url("https://sso.example.com/login")
            .redirect_next_url("http://testserver/after/");
        let config = denial.resolve(&request);
        assert_eq!(
            denial.full_redirect_url(&request, &config),
            "https://sso.example.com/login?next=%2Fafter%2F"
        );
    }

    #[test]
    fn login_url_is_reversed_when_it_names_a_route() {
        let urls = UrlConf::new()
            .route("auth/signin/", view_fn("signin", |_, _| Ok(None)))
            .name("signin");
        let mut settings = crate::Settings::default();
        settings.login_url = "signin".into();
        let request = Request::builder(Method::GET, "/r/")
            .settings(Arc::new(settings))
            .urlconf(Arc::new(urls))
            .build();
        assert_eq!(Denial::new("x").resolve(&request).redirect_url, "/auth/signin/");
    }

    #[test]
    fn configured_redirect_url_is_not_reversed() {
        let urls = UrlConf::new()
            .route("auth/signin/", view_fn("signin", |_, _| Ok(None)))
            .name("signin");
        let request = Request::builder(Method::GET, "/r/")
            .urlconf(Arc::new(urls))
            .build();
        let denial = Denial::new("x").redirect_url("signin");
        assert_eq!(denial.resolve(&request).redirect_url, "signin");
    }

    struct NoRedirect(Denial);

    impl DenialProtocol for NoRedirect {
        fn denial(&self) -> &Denial {
            &self.0
        }

        fn respond_step(&self, _request: &Request, _config: &DenialConfig) -> Response {
            Response::forbidden("nope")
        }
    }

    #[test]
    fn steps_can_be_overridden() {
        let mut request = request();
        let responder = NoRedirect(Denial::new("x").message("denied"));
        let response = responder.deny(&mut request).into_result().unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(request.messages().len(), 1);
    }
}
