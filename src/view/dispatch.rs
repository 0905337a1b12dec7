use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::header::{ALLOW, CONTENT_LENGTH};
use http::{Method, StatusCode};

use crate::error::Result;
use crate::http::Response;
use crate::request::Request;

use super::chain::{AllowPolicy, DecisionChain, DenyPolicy, ViewHandler};
use super::decorate::ViewDecorator;
use super::method::{HttpMethodAllow, HttpMethodDeny};
use super::{View, ViewArgs, ViewOutcome};

/// A verb handler registered on a [`ClassView`].
pub type MethodHandler = Arc<dyn Fn(&mut Request, &ViewArgs) -> Result<Response> + Send + Sync>;

/// Methods a view accepts unless told otherwise.
pub const DEFAULT_METHODS: [Method; 8] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
    Method::TRACE,
];

/// A view made of verb handlers behind a decision chain.
///
/// The chain is fixed when the view is built: the configured deny policies
/// come first, followed by the method gate, so access checks always take
/// precedence over `405 Method Not Allowed`. Allow policies wrap the verb
/// handler picked by the method gate.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use view_policy::{ClassView, LoginRequired, Request, Response, View, ViewArgs};
/// use http::{Method, StatusCode};
///
/// let view = ClassView::builder("Dashboard")
///     .get(|_request, _args| Ok(Response::ok("dashboard")))
///     .deny(Arc::new(LoginRequired::new()))
///     .build();
///
/// let mut request = Request::builder(Method::GET, "/dashboard/").build();
/// let response = view.call(&mut request, &ViewArgs::new()).unwrap().unwrap();
/// assert_eq!(response.status(), StatusCode::FOUND);
/// ```
pub struct ClassView {
    name: String,
    http_method_names: Vec<Method>,
    handlers: HashMap<Method, MethodHandler>,
    chain: DecisionChain,
    decorators: Vec<Arc<dyn ViewDecorator>>,
}

impl ClassView {
    /// Starts a view named `name`.
    pub fn builder(name: impl Into<String>) -> ClassViewBuilder {
        ClassViewBuilder {
            name: name.into(),
            http_method_names: DEFAULT_METHODS.to_vec(),
            handlers: HashMap::new(),
            chain: DecisionChain::new(),
            decorators: Vec::new(),
        }
    }

    /// The decision chain, method gate included.
    pub fn chain(&self) -> &DecisionChain {
        &self.chain
    }

    /// Methods the view declares.
    pub fn http_method_names(&self) -> &[Method] {
        &self.http_method_names
    }

    /// Whether a handler exists for `method`, counting the built-in
    /// `OPTIONS` handler and `HEAD` served by `GET`.
    pub fn has_handler(&self, method: &Method) -> bool {
        self.handlers.contains_key(method)
            || *method == Method::OPTIONS
            || (*method == Method::HEAD && self.handlers.contains_key(&Method::GET))
    }

    /// Whether the view declares `method` and can handle it.
    pub fn supports(&self, method: &Method) -> bool {
        self.http_method_names.contains(method) && self.has_handler(method)
    }

    /// Methods listed in `Allow` headers.
    pub fn allowed_methods(&self) -> Vec<Method> {
        self.http_method_names
            .iter()
            .filter(|m| self.has_handler(m))
            .cloned()
            .collect()
    }

    /// The handler for `method`, if one exists.
    pub fn method_handler(&self, method: &Method) -> Option<ViewHandler<'_>> {
        let registered = self.handlers.get(method).or_else(|| {
            (*method == Method::HEAD)
                .then(|| self.handlers.get(&Method::GET))
                .flatten()
        });
        let handler: ViewHandler<'_> = match registered {
            Some(handler) => {
                let handler = handler.clone();
                Box::new(move |request: &mut Request, args: &ViewArgs| handler(request, args))
            }
            None if *method == Method::OPTIONS => {
                Box::new(move |_: &mut Request, _: &ViewArgs| Ok(self.options()))
            }
            None => return None,
        };
        Some(handler)
    }

    /// Answers `OPTIONS` with the allowed methods.
    pub fn options(&self) -> Response {
        let allow = self
            .allowed_methods()
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Response::new(StatusCode::OK)
            .with_header(ALLOW, allow)
            .with_header(CONTENT_LENGTH, "0")
    }

    /// Logs and answers `405 Method Not Allowed`.
    pub fn http_method_not_allowed(&self, request: &Request) -> Response {
        request.log().warn(
            405,
            format_args!(
                "Method Not Allowed ({}): {}",
                request.method(),
                request.path()
            ),
        );
        Response::method_not_allowed(&self.allowed_methods())
    }

    /// Handler answering `405`.
    pub fn not_allowed_handler(&self) -> ViewHandler<'_> {
        Box::new(move |request: &mut Request, _: &ViewArgs| {
            Ok(self.http_method_not_allowed(request))
        })
    }

    /// Returns the denial handler of the first failing deny policy.
    ///
    /// # Errors
    ///
    /// Propagates configuration errors raised while evaluating policies.
    pub fn get_deny_handler<'a>(
        &'a self,
        request: &Request,
        args: &ViewArgs,
    ) -> Result<Option<ViewHandler<'a>>> {
        Ok(self
            .chain
            .deny_handler(self, request, args)?
            .map(|(name, handler)| {
                tracing::debug!(view = %self.name, policy = name, "request denied");
                handler
            }))
    }

    /// Returns the allow handler built by the allow chain.
    ///
    /// # Errors
    ///
    /// Propagates configuration errors raised while evaluating policies.
    pub fn get_allow_handler<'a>(
        &'a self,
        request: &Request,
        args: &ViewArgs,
    ) -> Result<Option<ViewHandler<'a>>> {
        self.chain.allow_handler(self, request, args)
    }

    /// Runs the deny chain, then the allow chain, then falls back to 405.
    /// Exactly one handler runs.
    ///
    /// # Errors
    ///
    /// Returns policy configuration errors and whatever the chosen handler
    /// returns, including errors raised by denials configured to raise.
    pub fn dispatch(&self, request: &mut Request, args: &ViewArgs) -> Result<Response> {
        let handler = match self.get_deny_handler(request, args)? {
            Some(handler) => handler,
            None => match self.get_allow_handler(request, args)? {
                Some(handler) => handler,
                None => self.not_allowed_handler(),
            },
        };
        handler(request, args)
    }

    fn call_layer(&self, index: usize, request: &mut Request, args: &ViewArgs) -> ViewOutcome {
        match self.decorators.get(index) {
            Some(decorator) => decorator.call(
                request,
                args,
                &|request: &mut Request, args: &ViewArgs| {
                    self.call_layer(index + 1, request, args)
                },
            ),
            None => self.dispatch(request, args).map(Some),
        }
    }
}

impl View for ClassView {
    fn call(&self, request: &mut Request, args: &ViewArgs) -> ViewOutcome {
        self.call_layer(0, request, args)
    }

    fn name(&self) -> String {
        format!("{}::call", self.name)
    }

    fn csrf_exempt(&self) -> bool {
        self.decorators.iter().any(|d| d.csrf_exempt())
    }
}

impl fmt::Debug for ClassView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.handlers.keys().map(Method::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("ClassView")
            .field("name", &self.name)
            .field("handlers", &methods)
            .field("chain", &self.chain)
            .field("decorators", &self.decorators.len())
            .finish()
    }
}

/// Builder for [`ClassView`].
pub struct ClassViewBuilder {
    name: String,
    http_method_names: Vec<Method>,
    handlers: HashMap<Method, MethodHandler>,
    chain: DecisionChain,
    decorators: Vec<Arc<dyn ViewDecorator>>,
}

impl ClassViewBuilder {
    /// Registers a handler for `method`.
    pub fn handler<F>(mut self, method: Method, handler: F) -> Self
    where
        F: Fn(&mut Request, &ViewArgs) -> Result<Response> + Send + Sync + 'static,
    {
        self.handlers.insert(method, Arc::new(handler));
        self
    }

    /// Registers the `GET` handler; it also serves `HEAD`.
    pub fn get<F>(self, handler: F) -> Self
    where
        F: Fn(&mut Request, &ViewArgs) -> Result<Response> + Send + Sync + 'static,
    {
        self.handler(Method::GET, handler)
    }

    /// Registers the `POST` handler.
    pub fn post<F>(self, handler: F) -> Self
    where
        F: Fn(&mut Request, &ViewArgs) -> Result<Response> + Send + Sync + 'static,
    {
        self.handler(Method::POST, handler)
    }

    /// Registers the `PUT` handler.
    pub fn put<F>(self, handler: F) -> Self
    where
        F: Fn(&mut Request, &ViewArgs) -> Result<Response> + Send + Sync + 'static,
    {
        self.handler(Method::PUT, handler)
    }

    /// Registers the `DELETE` handler.
    pub fn delete<F>(self, handler: F) -> Self
    where
        F: Fn(&mut Request, &ViewArgs) -> Result<Response> + Send + Sync + 'static,
    {
        self.handler(Method::DELETE, handler)
    }

    /// Restricts the declared methods.
    pub fn http_method_names(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.http_method_names = methods.into_iter().collect();
        self
    }

    /// Appends a deny policy. Earlier policies take precedence.
    pub fn deny(mut self, policy: Arc<dyn DenyPolicy>) -> Self {
        self.chain = self.chain.deny(policy);
        self
    }

    /// Appends an allow policy. Earlier policies wrap later ones.
    pub fn allow(mut self, policy: Arc<dyn AllowPolicy>) -> Self {
        self.chain = self.chain.allow(policy);
        self
    }

    /// Appends a decorator. Earlier decorators wrap later ones.
    pub fn decorate(mut self, decorator: Arc<dyn ViewDecorator>) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Finishes the view, closing both chains with the method gate.
    pub fn build(self) -> Arc<ClassView> {
        let chain = self
            .chain
            .deny(Arc::new(HttpMethodDeny::new()))
            .allow(Arc::new(HttpMethodAllow::new()));
        Arc::new(ClassView {
            name: self.name,
            http_method_names: self.http_method_names,
            handlers: self.handlers,
            chain,
            decorators: self.decorators,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_view() -> Arc<ClassView> {
        ClassView::builder("Article")
            .get(|_, _| Ok(Response::ok("read")))
            .post(|_, _| Ok(Response::ok("written")))
            .build()
    }

    fn call(view: &ClassView, method: Method) -> Response {
        let mut request = Request::builder(method, "/article/").build();
        view.call(&mut request, &ViewArgs::new()).unwrap().unwrap()
    }

    #[test]
    fn dispatches_by_method() {
        let view = article_view();
        assert_eq!(call(&view, Method::GET).text(), "read");
        assert_eq!(call(&view, Method::POST).text(), "written");
    }

    #[test]
    fn head_falls_back_to_get() {
        let view = article_view();
        assert_eq!(call(&view, Method::HEAD).text(), "read");
    }

    #[test]
    fn options_lists_allowed_methods() {
        let response = call(&article_view(), Method::OPTIONS);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.header("allow"), Some("GET, POST, HEAD, OPTIONS"));
    }

    #[test]
    fn unsupported_method_is_405() {
        let response = call(&article_view(), Method::DELETE);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.header("allow"), Some("GET, POST, HEAD, OPTIONS"));
    }

    #[test]
    fn undeclared_method_is_405_even_with_handler() {
        let view = ClassView::builder("ReadOnly")
            .get(|_, _| Ok(Response::ok("read")))
            .post(|_, _| Ok(Response::ok("written")))
            .http_method_names([Method::GET])
            .build();
        assert_eq!(call(&view, Method::POST).status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(call(&view, Method::GET).text(), "read");
    }

    #[test]
    fn method_gate_closes_both_chains() {
        let view = article_view();
        assert_eq!(view.chain().deny_names(), vec!["http_method_deny"]);
        assert_eq!(view.chain().allow_names(), vec!["http_method_allow"]);
    }

    #[test]
    fn name_identifies_view() {
        assert_eq!(article_view().name(), "Article::call");
    }
}
