use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use http::Method;
use parking_lot::Mutex;

use crate::config::Settings;
use crate::error::Result;
use crate::handler::{Handler, RequestHandler};
use crate::http::{Renderer, Response};
use crate::messages::Message;
use crate::middleware::MiddlewareStack;
use crate::request::{Request, RequestBuilder};
use crate::signals::ExceptionSignal;
use crate::urls::{Resolver, ResolverMatch};
use crate::user::User;
use crate::view::{View, ViewArgs};

/// The view a client request targets directly, bypassing URL resolution.
#[derive(Clone)]
struct ViewTarget {
    view: Arc<dyn View>,
    args: ViewArgs,
}

/// A [`Handler`] that runs the view a [`TestClient`] targets and keeps the
/// last request it finished.
pub struct ClientHandler {
    inner: Handler,
    last_request: Mutex<Option<Request>>,
}

impl ClientHandler {
    /// Wraps `inner`.
    pub fn new(inner: Handler) -> Self {
        Self {
            inner,
            last_request: Mutex::new(None),
        }
    }

    /// The request as it was when its response was finished.
    pub fn last_request(&self) -> Option<Request> {
        self.last_request.lock().clone()
    }
}

impl RequestHandler for ClientHandler {
    fn settings(&self) -> &Arc<Settings> {
        self.inner.settings()
    }

    fn urlconf(&self) -> &Arc<dyn Resolver> {
        self.inner.urlconf()
    }

    fn middleware(&self) -> &MiddlewareStack {
        self.inner.middleware()
    }

    fn exception_signal(&self) -> &ExceptionSignal {
        self.inner.exception_signal()
    }

    fn renderer(&self) -> &dyn Renderer {
        self.inner.renderer()
    }

    fn get_resolver_match(&self, request: &Request, resolver: &dyn Resolver) -> Result<ResolverMatch> {
        match request.extensions().get::<ViewTarget>() {
            Some(target) => Ok(ResolverMatch {
                view: target.view.clone(),
                args: target.args.clone(),
                url_name: None,
            }),
            None => self.inner.get_resolver_match(request, resolver),
        }
    }

    fn apply_response_fixes(&self, request: &Request, response: Response) -> Response {
        *self.last_request.lock() = Some(request.clone());
        self.inner.apply_response_fixes(request, response)
    }
}

impl fmt::Debug for ClientHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandler")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// A response plus the request that produced it.
#[derive(Debug)]
pub struct TestResponse {
    /// The final response
    pub response: Response,
    /// The request after the pipeline ran
    pub request: Request,
}

impl TestResponse {
    /// Messages queued during the request.
    pub fn messages(&self) -> &[Message] {
        self.request.messages()
    }
}

impl Deref for TestResponse {
    type Target = Response;

    fn deref(&self) -> &Response {
        &self.response
    }
}

/// Drives a [`ClientHandler`] the way a browser would: keeps cookies
/// between requests and sends them back.
///
/// CSRF checks are skipped unless turned on with
/// [`enforce_csrf_checks`](TestClient::enforce_csrf_checks).
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use http::StatusCode;
/// use view_policy::testing::TestClient;
/// use view_policy::{view_fn, Response, UrlConf};
///
/// let mut client = TestClient::with_urls(Arc::new(UrlConf::new()));
/// let view = view_fn("hello", |_, _| Ok(Some(Response::ok("hi"))));
///
/// let response = client.get("/hello/").view(view).send().unwrap();
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.request.path(), "/hello/");
/// ```
#[derive(Debug)]
pub struct TestClient {
    handler: ClientHandler,
    user: User,
    cookies: BTreeMap<String, String>,
    enforce_csrf_checks: bool,
    host: String,
}

impl TestClient {
    /// A client for `handler`.
    pub fn new(handler: Handler) -> Self {
        Self {
            handler: ClientHandler::new(handler),
            user: User::anonymous(),
            cookies: BTreeMap::new(),
            enforce_csrf_checks: false,
            host: "testserver".to_string(),
        }
    }

    /// A client for a default handler over `urlconf`.
    pub fn with_urls(urlconf: Arc<dyn Resolver>) -> Self {
        Self::new(Handler::builder(urlconf).build())
    }

    /// Sends requests as `user`.
    pub fn user(mut self, user: User) -> Self {
        self.user = user;
        self
    }

    /// Switches the user for later requests.
    pub fn set_user(&mut self, user: User) {
        self.user = user;
    }

    /// Enforces CSRF checks on requests.
    pub fn enforce_csrf_checks(mut self, enforce: bool) -> Self {
        self.enforce_csrf_checks = enforce;
        self
    }

    /// Sets the `Host` requests carry.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Stores a cookie in the jar.
    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// The cookie jar.
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// The handler, for inspecting the last request.
    pub fn handler(&self) -> &ClientHandler {
        &self.handler
    }

    /// Starts a request with any method.
    pub fn request(&mut self, method: Method, path: &str) -> ClientRequest<'_> {
        let mut builder = Request::builder(method, path)
            .host(&self.host)
            .user(self.user.clone())
            .dont_enforce_csrf_checks(!self.enforce_csrf_checks);
        for (name, value) in &self.cookies {
            builder = builder.cookie(name.clone(), value.clone());
        }
        ClientRequest {
            client: self,
            builder,
            view: None,
            args: ViewArgs::new(),
        }
    }

    /// Starts a `GET`.
    pub fn get(&mut self, path: &str) -> ClientRequest<'_> {
        self.request(Method::GET, path)
    }

    /// Starts a `POST`.
    pub fn post(&mut self, path: &str) -> ClientRequest<'_> {
        self.request(Method::POST, path)
    }

    /// Starts a `HEAD`.
    pub fn head(&mut self, path: &str) -> ClientRequest<'_> {
        self.request(Method::HEAD, path)
    }

    /// Starts an `OPTIONS`.
    pub fn options(&mut self, path: &str) -> ClientRequest<'_> {
        self.request(Method::OPTIONS, path)
    }

    /// Starts a `PUT`.
    pub fn put(&mut self, path: &str) -> ClientRequest<'_> {
        self.request(Method::PUT, path)
    }

    /// Starts a `PATCH`.
    pub fn patch(&mut self, path: &str) -> ClientRequest<'_> {
        self.request(Method::PATCH, path)
    }

    /// Starts a `DELETE`.
    pub fn delete(&mut self, path: &str) -> ClientRequest<'_> {
        self.request(Method::DELETE, path)
    }

    fn store_cookies(&mut self, response: &Response) {
        for cookie in response.cookies() {
            if cookie.max_age == Some(0) {
                self.cookies.remove(&cookie.name);
            } else {
                self.cookies.insert(cookie.name.clone(), cookie.value.clone());
            }
        }
    }
}

/// A request being prepared by a [`TestClient`].
pub struct ClientRequest<'a> {
    client: &'a mut TestClient,
    builder: RequestBuilder,
    view: Option<Arc<dyn View>>,
    args: ViewArgs,
}

impl ClientRequest<'_> {
    /// Runs `view` instead of resolving the path.
    pub fn view(mut self, view: Arc<dyn View>) -> Self {
        self.view = Some(view);
        self
    }

    /// Arguments passed to the targeted view, in any order with
    /// [`Self::view`]. Ignored when the path is resolved instead.
    pub fn args(mut self, args: ViewArgs) -> Self {
        self.args = args;
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    /// Adds a form field.
    pub fn form(mut self, name: &str, value: &str) -> Self {
        self.builder = self.builder.form_field(name, value);
        self
    }

    /// Sends the request through the handler and stores returned cookies.
    ///
    /// # Errors
    ///
    /// Returns whatever escapes the handler: [`Error::Exit`] or a
    /// propagated exception.
    ///
    /// [`Error::Exit`]: crate::Error::Exit
    pub fn send(self) -> Result<TestResponse> {
        let mut builder = self.builder;
        if let Some(view) = self.view {
            builder = builder.extension(ViewTarget {
                view,
                args: self.args,
            });
        }
        let mut request = builder.build();
        let response = self.client.handler.get_response(&mut request)?;
        self.client.store_cookies(&response);
        Ok(TestResponse { response, request })
    }
}

impl fmt::Debug for ClientRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRequest")
            .field("builder", &self.builder)
            .field("targets_view", &self.view.is_some())
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}
