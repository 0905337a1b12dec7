use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http::{Method, StatusCode};
use parking_lot::Mutex;
use serde_json::Map;
use view_policy::testing::{assert_header, assert_status};
use view_policy::{
    view_fn, CsrfExempt, CsrfViewMiddleware, Error, Handler, Middleware, Request, RequestHandler,
    Resolver, ResolverMatch, Response, Result, SignalRecorder, Stages, UrlConf, ViewArgs,
    XFrameOptionsMiddleware,
};

/// Records which hooks ran, optionally answering early.
struct Probe {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    respond_on_request: bool,
    respond_on_view: bool,
}

impl Probe {
    fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name,
            log: log.clone(),
            respond_on_request: false,
            respond_on_view: false,
        }
    }

    fn record(&self, stage: &str) {
        self.log.lock().push(format!("{}:{}", self.name, stage));
    }
}

impl Middleware for Probe {
    fn name(&self) -> &str {
        self.name
    }

    fn stages(&self) -> Stages {
        Stages::REQUEST | Stages::VIEW | Stages::RESPONSE
    }

    fn process_request(&self, _request: &mut Request) -> Result<Option<Response>> {
        self.record("request");
        Ok(self.respond_on_request.then(|| Response::ok(self.name)))
    }

    fn process_view(
        &self,
        _request: &mut Request,
        _resolved: &ResolverMatch,
    ) -> Result<Option<Response>> {
        self.record("view");
        Ok(self.respond_on_view.then(|| Response::ok(self.name)))
    }

    fn process_response(&self, _request: &mut Request, response: Response) -> Result<Response> {
        self.record("response");
        Ok(response)
    }
}

fn logged_urls(log: &Arc<Mutex<Vec<String>>>) -> UrlConf {
    let log = log.clone();
    UrlConf::new().route(
        "page/",
        view_fn("page", move |_, _| {
            log.lock().push("view".to_string());
            Ok(Some(Response::ok("page")))
        }),
    )
}

fn get(handler: &Handler, path: &str) -> Response {
    let mut request = Request::builder(Method::GET, path).build();
    handler.get_response(&mut request).unwrap()
}

#[test]
fn request_middleware_short_circuits_its_phase() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut first = Probe::new("first", &log);
    first.respond_on_request = true;
    let handler = Handler::builder(Arc::new(logged_urls(&log)))
        .middleware(Arc::new(first))
        .middleware(Arc::new(Probe::new("second", &log)))
        .build();

    let response = get(&handler, "/page/");
    assert_eq!(response.text(), "first");
    // Response middleware runs in reverse load order.
    assert_eq!(
        *log.lock(),
        ["first:request", "second:response", "first:response"]
    );
}

#[test]
fn view_middleware_short_circuits_the_view() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut first = Probe::new("first", &log);
    first.respond_on_view = true;
    let handler = Handler::builder(Arc::new(logged_urls(&log)))
        .middleware(Arc::new(first))
        .middleware(Arc::new(Probe::new("second", &log)))
        .build();

    assert_eq!(get(&handler, "/page/").text(), "first");
    let log = log.lock();
    assert!(log.contains(&"first:view".to_string()));
    assert!(!log.contains(&"second:view".to_string()));
    assert!(!log.contains(&"view".to_string()));
}

#[test]
fn resolution_happens_once_per_request() {
    struct CountingResolver {
        inner: UrlConf,
        resolved: AtomicUsize,
    }

    impl Resolver for CountingResolver {
        fn resolve(&self, path: &str) -> Result<ResolverMatch> {
            self.resolved.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve(path)
        }

        fn reverse(&self, name: &str, kwargs: &[(&str, &str)]) -> Result<String> {
            self.inner.reverse(name, kwargs)
        }

        fn resolve_error_handler(
            &self,
            handler: view_policy::ErrorHandler,
        ) -> (Arc<dyn view_policy::View>, ViewArgs) {
            self.inner.resolve_error_handler(handler)
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let resolver = Arc::new(CountingResolver {
        inner: logged_urls(&log),
        resolved: AtomicUsize::new(0),
    });
    let handler = Handler::builder(resolver.clone())
        .middleware(Arc::new(Probe::new("probe", &log)))
        .build();

    let mut request = Request::builder(Method::GET, "/page/").build();
    handler.get_response(&mut request).unwrap();
    let first = handler
        .resolve_view(&mut request, &*resolver)
        .unwrap();
    let second = handler
        .resolve_view(&mut request, &*resolver)
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(resolver.resolved.load(Ordering::SeqCst), 1);
}

#[test]
fn view_without_response_is_a_500_naming_the_view() {
    let recorder = SignalRecorder::new();
    let urls = UrlConf::new().route("empty/", view_fn("empty_view", |_, _| Ok(None)));
    let handler = Handler::builder(Arc::new(urls))
        .on_exception(recorder.receiver())
        .build();

    assert_status(&get(&handler, "/empty/"), StatusCode::INTERNAL_SERVER_ERROR);
    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].error.contains("empty_view"));
}

#[test]
fn uncaught_errors_are_signalled_once() {
    let recorder = SignalRecorder::new();
    let urls = UrlConf::new().route("boom/", view_fn("boom", |_, _| Err(Error::other("kaboom"))));
    let handler = Handler::builder(Arc::new(urls))
        .on_exception(recorder.receiver())
        .build();

    assert_status(&get(&handler, "/boom/"), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.events()[0].path, "/boom/");
}

#[test]
fn exit_passes_through_every_layer() {
    let recorder = SignalRecorder::new();
    let urls = UrlConf::new().route("quit/", view_fn("quit", |_, _| Err(Error::Exit(3))));
    let handler = Handler::builder(Arc::new(urls))
        .on_exception(recorder.receiver())
        .build();

    let mut request = Request::builder(Method::GET, "/quit/").build();
    let err = handler.get_response(&mut request).unwrap_err();
    assert!(matches!(err, Error::Exit(3)));
    assert_eq!(recorder.count(), 0);
}

#[test]
fn client_errors_map_to_error_views() {
    let urls = UrlConf::new()
        .route("denied/", view_fn("denied", |_, _| Err(Error::PermissionDenied("no".into()))))
        .route("evil/", view_fn("evil", |_, _| Err(Error::suspicious("tampered"))))
        .route(
            "custom/",
            view_fn("custom", |_, _| Err(Error::NotFound("gone".into()))),
        )
        .error_handler(
            view_policy::ErrorHandler::NotFound,
            view_fn("custom_404", |_, _| Ok(Some(Response::not_found("custom 404")))),
        );
    let handler = Handler::builder(Arc::new(urls)).build();

    assert_status(&get(&handler, "/denied/"), StatusCode::FORBIDDEN);
    assert_status(&get(&handler, "/evil/"), StatusCode::BAD_REQUEST);
    assert_eq!(get(&handler, "/custom/").text(), "custom 404");
    assert_eq!(get(&handler, "/unrouted/").text(), "custom 404");
}

#[test]
fn templates_render_after_template_middleware() {
    struct AddContext;

    impl Middleware for AddContext {
        fn stages(&self) -> Stages {
            Stages::TEMPLATE_RESPONSE
        }

        fn process_template_response(
            &self,
            _request: &mut Request,
            response: Response,
        ) -> Result<Response> {
            let template = response.pending_template().cloned();
            let mut context = template.map(|t| t.context).unwrap_or_default();
            context.insert("extra".into(), serde_json::Value::Bool(true));
            Ok(Response::template("page.html", context))
        }
    }

    let urls = UrlConf::new().route(
        "tpl/",
        view_fn("tpl", |_, _| Ok(Some(Response::template("page.html", Map::new())))),
    );
    let handler = Handler::builder(Arc::new(urls))
        .middleware(Arc::new(AddContext))
        .build();

    let response = get(&handler, "/tpl/");
    assert!(response.is_rendered());
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["template"], "page.html");
    assert_eq!(body["context"]["extra"], true);
}

#[test]
fn clickjacking_and_csrf_middleware() {
    let urls = UrlConf::new()
        .route("form/", view_fn("form", |_, _| Ok(Some(Response::ok("ok")))))
        .route(
            "hook/",
            view_policy::decorate(
                view_fn("hook", |_, _| Ok(Some(Response::ok("hooked")))),
                Arc::new(CsrfExempt),
            ),
        );
    let handler = Handler::builder(Arc::new(urls))
        .middleware(Arc::new(CsrfViewMiddleware::new()))
        .middleware(Arc::new(XFrameOptionsMiddleware))
        .build();

    let post = |path: &str| {
        let mut request = Request::builder(Method::POST, path).build();
        handler.get_response(&mut request).unwrap()
    };

    let rejected = post("/form/");
    assert_status(&rejected, StatusCode::FORBIDDEN);
    assert_header(&rejected, "x-frame-options", "SAMEORIGIN");

    let exempt = post("/hook/");
    assert_status(&exempt, StatusCode::OK);
    assert_eq!(exempt.text(), "hooked");
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn request_events_are_logged_with_path() {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(captured.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let handler = Handler::builder(Arc::new(UrlConf::new())).build();

    tracing::subscriber::with_default(subscriber, || {
        assert_status(&get(&handler, "/missing/"), StatusCode::NOT_FOUND);
    });

    let output = String::from_utf8(captured.0.lock().clone()).unwrap();
    assert!(output.contains("view_policy::request"));
    assert!(output.contains("Not Found: /missing/"));
}
