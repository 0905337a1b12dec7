//! Views and the machinery that dispatches them.
//!
//! A [`View`] is anything the request pipeline can call. Most application
//! views are either plain functions wrapped with [`view_fn`] or a
//! [`ClassView`]: a verb-to-handler table guarded by an ordered list of
//! deny policies and wrapped by allow policies.
//!
//! # Dispatch
//!
//! ```text
//! ClassView::call
//!   ↓ decorators, outermost first
//! ClassView::dispatch
//!   ↓ deny chain: first failing policy supplies the handler
//!   ↓ otherwise allow chain: method handler wrapped by allow policies
//!   ↓ otherwise 405
//! handler(request, args)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::http::Response;
use crate::request::Request;

mod chain;
mod decorate;
mod denial;
mod dispatch;
mod method;
pub mod shortcuts;

pub use chain::{AllowPolicy, DecisionChain, DenyPolicy, ViewHandler};
pub use decorate::{decorate, Decorated, Next, ViewDecorator};
pub use denial::{Denial, DenialConfig, DenialProtocol, DenyOutcome};
pub use dispatch::{ClassView, ClassViewBuilder, MethodHandler, DEFAULT_METHODS};
pub use method::{HttpMethodAllow, HttpMethodDeny};

/// What a view returns. `Ok(None)` is a programming error the pipeline
/// reports by view name.
pub type ViewOutcome = Result<Option<Response>>;

/// Arguments captured from the URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewArgs {
    /// Positional arguments
    pub args: Vec<String>,
    /// Keyword arguments
    pub kwargs: BTreeMap<String, String>,
}

impl ViewArgs {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a positional argument.
    pub fn with_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Adds a keyword argument.
    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// A keyword argument.
    pub fn kwarg(&self, name: &str) -> Option<&str> {
        self.kwargs.get(name).map(String::as_str)
    }
}

/// A request handler the pipeline can call.
pub trait View: Send + Sync {
    /// Handles the request.
    fn call(&self, request: &mut Request, args: &ViewArgs) -> ViewOutcome;

    /// Name used in diagnostics.
    fn name(&self) -> String {
        format!("{}::call", std::any::type_name::<Self>())
    }

    /// Whether CSRF protection skips this view.
    fn csrf_exempt(&self) -> bool {
        false
    }
}

type ViewFunc = dyn Fn(&mut Request, &ViewArgs) -> ViewOutcome + Send + Sync;

/// A view backed by a closure.
pub struct FnView {
    name: String,
    func: Box<ViewFunc>,
}

impl FnView {
    /// Wraps `func` under `name`.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Request, &ViewArgs) -> ViewOutcome + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl View for FnView {
    fn call(&self, request: &mut Request, args: &ViewArgs) -> ViewOutcome {
        (self.func)(request, args)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl fmt::Debug for FnView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnView").field("name", &self.name).finish()
    }
}

/// Shorthand for an [`FnView`] behind an `Arc`.
///
/// ```
/// use view_policy::{view_fn, Response};
///
/// let home = view_fn("home", |_request, _args| Ok(Some(Response::ok("hello"))));
/// assert_eq!(home.name(), "home");
/// ```
pub fn view_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn View>
where
    F: Fn(&mut Request, &ViewArgs) -> ViewOutcome + Send + Sync + 'static,
{
    Arc::new(FnView::new(name, func))
}
