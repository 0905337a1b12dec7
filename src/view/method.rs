use http::Method;

use crate::error::Result;
use crate::request::Request;

use super::chain::{AllowPolicy, DenyPolicy, ViewHandler};
use super::dispatch::ClassView;
use super::ViewArgs;

/// Returns whether `method` is in `names` and the view can handle it.
fn method_test(view: &ClassView, names: Option<&[Method]>, method: &Method) -> bool {
    let declared = names.unwrap_or(view.http_method_names());
    declared.contains(method) && view.has_handler(method)
}

/// Deny-mode method gate.
///
/// Denies with `405` when the request method is not declared or has no
/// handler. [`ClassView`] always appends one as the last deny policy; the
/// [`only`](Self::only) form restricts a view further, as `RequireGet` does.
#[derive(Debug, Clone, Default)]
pub struct HttpMethodDeny {
    methods: Option<Vec<Method>>,
    name: Option<&'static str>,
}

impl HttpMethodDeny {
    /// Gate using the view's declared methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate accepting only `methods`.
    pub fn only(name: &'static str, methods: impl IntoIterator<Item = Method>) -> Self {
        Self {
            methods: Some(methods.into_iter().collect()),
            name: Some(name),
        }
    }

    /// Methods this gate accepts, if restricted.
    pub fn methods(&self) -> Option<&[Method]> {
        self.methods.as_deref()
    }

    /// The shared method predicate.
    pub fn test(&self, view: &ClassView, request: &Request) -> bool {
        method_test(view, self.methods(), request.method())
    }
}

impl DenyPolicy for HttpMethodDeny {
    fn name(&self) -> &str {
        self.name.unwrap_or("http_method_deny")
    }

    fn deny_handler<'a>(
        &'a self,
        view: &'a ClassView,
        request: &Request,
        _args: &ViewArgs,
    ) -> Result<Option<ViewHandler<'a>>> {
        if self.test(view, request) {
            Ok(None)
        } else {
            Ok(Some(view.not_allowed_handler()))
        }
    }
}

/// Allow-mode method gate: supplies the verb handler, or `405`.
///
/// This is the innermost allow policy; it ignores any handler passed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpMethodAllow;

impl HttpMethodAllow {
    /// The gate.
    pub fn new() -> Self {
        Self
    }
}

impl AllowPolicy for HttpMethodAllow {
    fn name(&self) -> &str {
        "http_method_allow"
    }

    fn allow_handler<'a>(
        &'a self,
        view: &'a ClassView,
        request: &Request,
        _args: &ViewArgs,
        _inner: Option<ViewHandler<'a>>,
    ) -> Result<Option<ViewHandler<'a>>> {
        let method = request.method();
        let handler = method_test(view, None, method)
            .then(|| view.method_handler(method))
            .flatten()
            .unwrap_or_else(|| view.not_allowed_handler());
        Ok(Some(handler))
    }
}
