use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::http::Response;
use crate::request::Request;

use super::{ClassView, ViewArgs};

/// A handler chosen for one dispatch. Exactly one runs per request.
pub type ViewHandler<'a> = Box<dyn FnOnce(&mut Request, &ViewArgs) -> Result<Response> + 'a>;

/// A participant in the deny chain.
///
/// A policy whose check fails returns its own denial handler; a passing or
/// disabled policy returns `None` so the next policy is consulted.
pub trait DenyPolicy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Returns a denial handler when the request fails this policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImproperlyConfigured`](crate::Error::ImproperlyConfigured)
    /// when the policy cannot be evaluated as configured.
    fn deny_handler<'a>(
        &'a self,
        view: &'a ClassView,
        request: &Request,
        args: &ViewArgs,
    ) -> Result<Option<ViewHandler<'a>>>;
}

/// A participant in the allow chain.
///
/// Allow policies are folded from the innermost (the method gate) outwards;
/// each receives the handler built so far and may wrap or replace it.
pub trait AllowPolicy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Wraps `inner`, or returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error when the policy cannot be evaluated as configured.
    fn allow_handler<'a>(
        &'a self,
        view: &'a ClassView,
        request: &Request,
        args: &ViewArgs,
        inner: Option<ViewHandler<'a>>,
    ) -> Result<Option<ViewHandler<'a>>>;
}

/// Ordered deny and allow policies for one view.
///
/// The same policy instance is never registered twice in one list.
#[derive(Clone, Default)]
pub struct DecisionChain {
    deny: Vec<Arc<dyn DenyPolicy>>,
    allow: Vec<Arc<dyn AllowPolicy>>,
}

impl DecisionChain {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a deny policy, lowest priority last.
    pub fn deny(mut self, policy: Arc<dyn DenyPolicy>) -> Self {
        if !self.deny.iter().any(|p| Arc::ptr_eq(p, &policy)) {
            self.deny.push(policy);
        }
        self
    }

    /// Appends an allow policy, innermost last.
    pub fn allow(mut self, policy: Arc<dyn AllowPolicy>) -> Self {
        if !self.allow.iter().any(|p| Arc::ptr_eq(p, &policy)) {
            self.allow.push(policy);
        }
        self
    }

    /// Names of the deny policies in evaluation order.
    pub fn deny_names(&self) -> Vec<&str> {
        self.deny.iter().map(|p| p.name()).collect()
    }

    /// Names of the allow policies, outermost first.
    pub fn allow_names(&self) -> Vec<&str> {
        self.allow.iter().map(|p| p.name()).collect()
    }

    /// Finds the first failing deny policy and returns its name and handler.
    ///
    /// # Errors
    ///
    /// Propagates configuration errors from the policy being evaluated;
    /// later policies are not evaluated.
    pub fn deny_handler<'a>(
        &'a self,
        view: &'a ClassView,
        request: &Request,
        args: &ViewArgs,
    ) -> Result<Option<(&'a str, ViewHandler<'a>)>> {
        for policy in &self.deny {
            if let Some(handler) = policy.deny_handler(view, request, args)? {
                return Ok(Some((policy.name(), handler)));
            }
        }
        Ok(None)
    }

    /// Builds the allow handler by folding from the innermost policy out.
    ///
    /// # Errors
    ///
    /// Propagates configuration errors from any allow policy.
    pub fn allow_handler<'a>(
        &'a self,
        view: &'a ClassView,
        request: &Request,
        args: &ViewArgs,
    ) -> Result<Option<ViewHandler<'a>>> {
        let mut handler = None;
        for policy in self.allow.iter().rev() {
            handler = policy.allow_handler(view, request, args, handler)?;
        }
        Ok(handler)
    }
}

impl fmt::Debug for DecisionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionChain")
            .field("deny", &self.deny_names())
            .field("allow", &self.allow_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use http::{Method, StatusCode};

    struct Gate {
        name: &'static str,
        pass: bool,
    }

    impl DenyPolicy for Gate {
        fn name(&self) -> &str {
            self.name
        }

        fn deny_handler<'a>(
            &'a self,
            _view: &'a ClassView,
            _request: &Request,
            _args: &ViewArgs,
        ) -> Result<Option<ViewHandler<'a>>> {
            if self.pass {
                return Ok(None);
            }
            Ok(Some(Box::new(move |_: &mut Request, _: &ViewArgs| {
                Ok(Response::forbidden(self.name))
            })))
        }
    }

    struct Broken;

    impl DenyPolicy for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn deny_handler<'a>(
            &'a self,
            _view: &'a ClassView,
            _request: &Request,
            _args: &ViewArgs,
        ) -> Result<Option<ViewHandler<'a>>> {
            Err(Error::ImproperlyConfigured("broken".into()))
        }
    }

    fn view() -> Arc<ClassView> {
        ClassView::builder("V")
            .get(|_, _| Ok(Response::ok("ok")))
            .build()
    }

    #[test]
    fn first_failing_policy_wins() {
        let chain = DecisionChain::new()
            .deny(Arc::new(Gate { name: "a", pass: true }))
            .deny(Arc::new(Gate { name: "b", pass: false }))
            .deny(Arc::new(Gate { name: "c", pass: false }));
        let view = view();
        let mut request = Request::builder(Method::GET, "/").build();
        let args = ViewArgs::new();

        let (name, handler) = chain.deny_handler(&view, &request, &args).unwrap().unwrap();
        assert_eq!(name, "b");
        let response = handler(&mut request, &args).unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.text(), "b");
    }

    #[test]
    fn config_error_stops_evaluation() {
        let chain = DecisionChain::new()
            .deny(Arc::new(Broken))
            .deny(Arc::new(Gate { name: "late", pass: false }));
        let view = view();
        let request = Request::builder(Method::GET, "/").build();
        let result = chain.deny_handler(&view, &request, &ViewArgs::new());
        assert!(matches!(result, Err(Error::ImproperlyConfigured(_))));
    }

    #[test]
    fn same_instance_is_registered_once() {
        let gate: Arc<dyn DenyPolicy> = Arc::new(Gate { name: "a", pass: true });
        let chain = DecisionChain::new().deny(gate.clone()).deny(gate);
        assert_eq!(chain.deny_names(), vec!["a"]);
    }

    #[test]
    fn empty_chain_has_no_handlers() {
        let chain = DecisionChain::new();
        let view = view();
        let request = Request::builder(Method::GET, "/").build();
        assert!(chain.deny_handler(&view, &request, &ViewArgs::new()).unwrap().is_none());
        assert!(chain.allow_handler(&view, &request, &ViewArgs::new()).unwrap().is_none());
    }
}
