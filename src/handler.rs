//! The staged request pipeline.
//!
//! [`RequestHandler`] splits request handling into small provided methods so
//! an implementor can override a single stage: how the resolver is picked,
//! how a view is resolved, how each middleware phase runs, how errors become
//! responses. [`Handler`] is the stock implementation.
//!
//! ```text
//! get_resolver
//!   ↓ apply_request_middleware   (first response wins)
//!   ↓ apply_view_middleware      (first response wins)
//!   ↓ apply_view                 (exception middleware on failure)
//!   ↓ validate_response
//!   ↓ apply_template_response_middleware + render
//!   ↓ apply_response_middleware
//!   ↓ apply_response_fixes
//! ```

use std::fmt;
use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::{Method, StatusCode};

use crate::config::Settings;
use crate::error::{Error, ErrorKind, Result};
use crate::http::{JsonRenderer, Renderer, Response};
use crate::middleware::{Middleware, MiddlewareStack};
use crate::request::Request;
use crate::signals::{ExceptionSignal, Receiver, SignalEvent};
use crate::urls::{ErrorHandler, Resolver, ResolverMatch};

/// Request handling with one override point per stage.
pub trait RequestHandler {
    /// Settings attached to every request.
    fn settings(&self) -> &Arc<Settings>;

    /// Default resolver.
    fn urlconf(&self) -> &Arc<dyn Resolver>;

    /// Loaded middleware.
    fn middleware(&self) -> &MiddlewareStack;

    /// Observers of uncaught errors.
    fn exception_signal(&self) -> &ExceptionSignal;

    /// Renderer for deferred templates.
    fn renderer(&self) -> &dyn Renderer;

    /// Picks the resolver for this request and attaches it, with the
    /// settings, to the request. A resolver already set on the request wins.
    fn get_resolver(&self, request: &mut Request) -> Arc<dyn Resolver> {
        let resolver = request
            .urlconf()
            .cloned()
            .unwrap_or_else(|| self.urlconf().clone());
        request.set_urlconf(resolver.clone());
        request.set_settings(self.settings().clone());
        resolver
    }

    /// Resolves the request path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when nothing matches.
    fn get_resolver_match(&self, request: &Request, resolver: &dyn Resolver) -> Result<ResolverMatch> {
        resolver.resolve(request.path_info())
    }

    /// Resolves the view once per request and caches the match on it.
    ///
    /// # Errors
    ///
    /// Returns resolution errors; nothing is cached on failure.
    fn resolve_view(
        &self,
        request: &mut Request,
        resolver: &dyn Resolver,
    ) -> Result<Arc<ResolverMatch>> {
        if let Some(cached) = request.resolver_match() {
            return Ok(cached.clone());
        }
        let resolved = Arc::new(self.get_resolver_match(request, resolver)?);
        request.set_resolver_match(resolved.clone());
        Ok(resolved)
    }

    /// Runs request middleware until one responds.
    ///
    /// # Errors
    ///
    /// Propagates middleware errors.
    fn apply_request_middleware(
        &self,
        request: &mut Request,
        _resolver: &dyn Resolver,
    ) -> Result<Option<Response>> {
        for middleware in self.middleware().request() {
            if let Some(response) = middleware.process_request(request)? {
                tracing::debug!(middleware = middleware.name(), "request middleware responded");
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Runs view middleware until one responds.
    ///
    /// # Errors
    ///
    /// Propagates resolution and middleware errors.
    fn apply_view_middleware(
        &self,
        request: &mut Request,
        resolver: &dyn Resolver,
    ) -> Result<Option<Response>> {
        let resolved = self.resolve_view(request, resolver)?;
        for middleware in self.middleware().view() {
            if let Some(response) = middleware.process_view(request, &resolved)? {
                tracing::debug!(middleware = middleware.name(), "view middleware responded");
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Runs exception middleware until one responds.
    ///
    /// # Errors
    ///
    /// Propagates middleware errors.
    fn apply_exception_middleware(
        &self,
        request: &mut Request,
        _resolver: &dyn Resolver,
        error: &Error,
    ) -> Result<Option<Response>> {
        for middleware in self.middleware().exception() {
            if let Some(response) = middleware.process_exception(request, error)? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Calls the resolved view. Failures go through exception middleware
    /// and are returned unchanged if none responds.
    ///
    /// # Errors
    ///
    /// Returns the view's error when no exception middleware handles it.
    /// [`Error::Exit`] is returned without consulting middleware.
    fn apply_view(&self, request: &mut Request, resolver: &dyn Resolver) -> Result<Option<Response>> {
        let resolved = self.resolve_view(request, resolver)?;
        match resolved.view.call(request, &resolved.args) {
            Ok(response) => Ok(response),
            Err(err) if err.is_exit() => Err(err),
            Err(err) => match self.apply_exception_middleware(request, resolver, &err)? {
                Some(response) => Ok(Some(response)),
                None => Err(err),
            },
        }
    }

    /// Rejects a missing response, naming the view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImproperlyConfigured`] when `response` is `None`.
    fn validate_response(&self, request: &Request, response: Option<Response>) -> Result<Response> {
        response.ok_or_else(|| {
            let name = request
                .resolver_match()
                .map(|m| m.view.name())
                .unwrap_or_else(|| "<unresolved>".to_string());
            Error::ImproperlyConfigured(format!("The view {} didn't return a response.", name))
        })
    }

    /// Runs template-response middleware and renders, for deferred
    /// responses only.
    ///
    /// # Errors
    ///
    /// Propagates middleware and rendering errors.
    fn apply_template_response_middleware(
        &self,
        request: &mut Request,
        _resolver: &dyn Resolver,
        mut response: Response,
    ) -> Result<Response> {
        if response.is_rendered() {
            return Ok(response);
        }
        for middleware in self.middleware().template_response() {
            response = middleware.process_template_response(request, response)?;
        }
        response.render(self.renderer(), request)?;
        Ok(response)
    }

    /// Runs every response middleware.
    ///
    /// # Errors
    ///
    /// Propagates middleware errors.
    fn apply_response_middleware(
        &self,
        request: &mut Request,
        _resolver: &dyn Resolver,
        mut response: Response,
    ) -> Result<Response> {
        for middleware in self.middleware().response() {
            response = middleware.process_response(request, response)?;
        }
        Ok(response)
    }

    /// Drops bodies that must not be sent: `HEAD` responses and
    /// informational, `204` and `304` statuses.
    fn apply_response_fixes(&self, request: &Request, mut response: Response) -> Response {
        let status = response.status();
        let bodiless = status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;
        if (bodiless || *request.method() == Method::HEAD) && !response.body().is_empty() {
            response.set_body(Vec::new());
        }
        response
    }

    /// Calls the registered error view.
    ///
    /// # Errors
    ///
    /// Returns the error view's error, or [`Error::ImproperlyConfigured`] if
    /// it produced nothing.
    fn call_error_handler(
        &self,
        request: &mut Request,
        resolver: &dyn Resolver,
        handler: ErrorHandler,
    ) -> Result<Response> {
        let (view, args) = resolver.resolve_error_handler(handler);
        view.call(request, &args)?.ok_or_else(|| {
            Error::ImproperlyConfigured(format!(
                "The error handler {} didn't return a response.",
                view.name()
            ))
        })
    }

    /// Maps [`Error::NotFound`] to a 404.
    ///
    /// # Errors
    ///
    /// Returns the error view's failure.
    fn handle_not_found(
        &self,
        request: &mut Request,
        resolver: &dyn Resolver,
        error: Error,
    ) -> Result<Response> {
        request
            .log()
            .warn(404, format_args!("Not Found: {}", request.path()));
        if self.settings().debug {
            return Ok(technical_404_response(request, &error));
        }
        self.call_error_handler(request, resolver, ErrorHandler::NotFound)
    }

    /// Maps [`Error::PermissionDenied`] to a 403.
    ///
    /// # Errors
    ///
    /// Returns the error view's failure.
    fn handle_permission_denied(
        &self,
        request: &mut Request,
        resolver: &dyn Resolver,
        _error: Error,
    ) -> Result<Response> {
        request.log().warn(
            403,
            format_args!("Forbidden (Permission denied): {}", request.path()),
        );
        self.call_error_handler(request, resolver, ErrorHandler::PermissionDenied)
    }

    /// Maps [`Error::SuspiciousOperation`] to a 400, logging on the
    /// `security.<kind>` channel.
    ///
    /// # Errors
    ///
    /// Returns the error view's failure.
    fn handle_suspicious_operation(
        &self,
        request: &mut Request,
        resolver: &dyn Resolver,
        error: Error,
    ) -> Result<Response> {
        let kind = match &error {
            Error::SuspiciousOperation { kind, .. } => *kind,
            _ => "SuspiciousOperation",
        };
        request.log().security(kind, format_args!("{}", error));
        self.call_error_handler(request, resolver, ErrorHandler::BadRequest)
    }

    /// Signals observers, then returns the error when exceptions
    /// propagate, a diagnostic page in debug mode, or the 500 view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exit`] untouched, `error` itself when
    /// `propagate_exceptions` is set, and the 500 view's own failure.
    fn handle_uncaught_exception(
        &self,
        request: &mut Request,
        resolver: &dyn Resolver,
        error: Error,
    ) -> Result<Response> {
        if error.is_exit() {
            return Err(error);
        }
        self.exception_signal().send(&SignalEvent {
            sender: std::any::type_name::<Self>(),
            request: &*request,
            error: &error,
        });
        if self.settings().propagate_exceptions {
            return Err(error);
        }
        request.log().error(
            500,
            format_args!("Internal Server Error: {}: {}", request.path(), error),
        );
        if self.settings().debug {
            return Ok(technical_500_response(request, &error));
        }
        self.call_error_handler(request, resolver, ErrorHandler::ServerError)
    }

    /// View middleware, then the view.
    ///
    /// # Errors
    ///
    /// Propagates resolution, middleware and view errors.
    fn view_response(&self, request: &mut Request, resolver: &dyn Resolver) -> Result<Option<Response>> {
        if let Some(response) = self.apply_view_middleware(request, resolver)? {
            return Ok(Some(response));
        }
        self.apply_view(request, resolver)
    }

    /// Validates the response and runs the template-response phase.
    ///
    /// # Errors
    ///
    /// Propagates validation, middleware and rendering errors.
    fn render_response(
        &self,
        request: &mut Request,
        resolver: &dyn Resolver,
        response: Option<Response>,
    ) -> Result<Response> {
        let response = self.validate_response(request, response)?;
        self.apply_template_response_middleware(request, resolver, response)
    }

    /// Runs the stages up to rendering and maps client-intent errors to
    /// responses.
    ///
    /// # Errors
    ///
    /// Returns every error that is not a not-found, permission-denied or
    /// suspicious-operation error, and failures of the error views.
    fn generate_response(&self, request: &mut Request, resolver: &dyn Resolver) -> Result<Response> {
        let outcome = match self.apply_request_middleware(request, resolver) {
            Ok(Some(response)) => self.render_response(request, resolver, Some(response)),
            Ok(None) => self
                .view_response(request, resolver)
                .and_then(|response| self.render_response(request, resolver, response)),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(response) => Ok(response),
            Err(err) => match err.kind() {
                Some(ErrorKind::NotFound) => self.handle_not_found(request, resolver, err),
                Some(ErrorKind::PermissionDenied) => {
                    self.handle_permission_denied(request, resolver, err)
                }
                Some(ErrorKind::SuspiciousOperation) => {
                    self.handle_suspicious_operation(request, resolver, err)
                }
                None => Err(err),
            },
        }
    }

    /// Response middleware, then response fixes.
    ///
    /// # Errors
    ///
    /// Propagates response middleware errors.
    fn process_response(
        &self,
        request: &mut Request,
        resolver: &dyn Resolver,
        response: Response,
    ) -> Result<Response> {
        let response = self.apply_response_middleware(request, resolver, response)?;
        Ok(self.apply_response_fixes(request, response))
    }

    /// Handles one request end to end.
    ///
    /// # Errors
    ///
    /// Only [`Error::Exit`], errors returned because
    /// `propagate_exceptions` is set, and failures of the 500 view escape.
    fn get_response(&self, request: &mut Request) -> Result<Response> {
        let resolver = self.get_resolver(request);
        let resolver = resolver.as_ref();
        let response = match self.generate_response(request, resolver) {
            Ok(response) => response,
            Err(err) => self.handle_uncaught_exception(request, resolver, err)?,
        };
        match self.process_response(request, resolver, response) {
            Ok(response) => Ok(response),
            Err(err) => {
                let response = self.handle_uncaught_exception(request, resolver, err)?;
                Ok(self.apply_response_fixes(request, response))
            }
        }
    }
}

/// Plain-text 404 page shown in debug mode.
pub fn technical_404_response(request: &Request, error: &Error) -> Response {
    let body = format!(
        "Page not found (404)\nRequest Method: {}\nRequest URL: {}\n\n{}\n",
        request.method(),
        request.build_absolute_uri(None),
        error
    );
    Response::not_found(body).with_header(CONTENT_TYPE, "text/plain; charset=utf-8")
}

/// Plain-text 500 page shown in debug mode.
pub fn technical_500_response(request: &Request, error: &Error) -> Response {
    let body = format!(
        "Internal Server Error\nRequest Method: {}\nRequest URL: {}\n\n{}\n",
        request.method(),
        request.build_absolute_uri(None),
        error
    );
    Response::server_error(body).with_header(CONTENT_TYPE, "text/plain; charset=utf-8")
}

/// The stock request handler.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use view_policy::{view_fn, Handler, Request, RequestHandler, Response, UrlConf};
/// use http::{Method, StatusCode};
///
/// let urls = UrlConf::new().route("hello/", view_fn("hello", |_, _| Ok(Some(Response::ok("hi")))));
/// let handler = Handler::builder(Arc::new(urls)).build();
///
/// let mut request = Request::builder(Method::GET, "/hello/").build();
/// assert_eq!(handler.get_response(&mut request).unwrap().text(), "hi");
///
/// let mut request = Request::builder(Method::GET, "/nope/").build();
/// assert_eq!(handler.get_response(&mut request).unwrap().status(), StatusCode::NOT_FOUND);
/// ```
pub struct Handler {
    settings: Arc<Settings>,
    urlconf: Arc<dyn Resolver>,
    middleware: MiddlewareStack,
    exception_signal: ExceptionSignal,
    renderer: Arc<dyn Renderer>,
}

impl Handler {
    /// Starts a handler resolving through `urlconf`.
    pub fn builder(urlconf: Arc<dyn Resolver>) -> HandlerBuilder {
        HandlerBuilder {
            handler: Handler {
                settings: Arc::new(Settings::default()),
                urlconf,
                middleware: MiddlewareStack::new(),
                exception_signal: ExceptionSignal::new(),
                renderer: Arc::new(JsonRenderer),
            },
        }
    }
}

impl RequestHandler for Handler {
    fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    fn urlconf(&self) -> &Arc<dyn Resolver> {
        &self.urlconf
    }

    fn middleware(&self) -> &MiddlewareStack {
        &self.middleware
    }

    fn exception_signal(&self) -> &ExceptionSignal {
        &self.exception_signal
    }

    fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("settings", &self.settings)
            .field("middleware", &self.middleware)
            .field("exception_signal", &self.exception_signal)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Handler`].
pub struct HandlerBuilder {
    handler: Handler,
}

impl HandlerBuilder {
    /// Replaces the settings.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.handler.settings = Arc::new(settings);
        self
    }

    /// Loads a middleware. Load order matters, see [`MiddlewareStack`].
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.handler.middleware = self.handler.middleware.load(middleware);
        self
    }

    /// Connects an uncaught-error observer.
    pub fn on_exception(mut self, receiver: Receiver) -> Self {
        self.handler.exception_signal.connect(receiver);
        self
    }

    /// Replaces the template renderer.
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.handler.renderer = renderer;
        self
    }

    /// Finishes the handler.
    pub fn build(self) -> Handler {
        self.handler
    }
}
