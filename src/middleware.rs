//! Pipeline middleware and the ordered stage lists built from it.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::http::Response;
use crate::request::Request;
use crate::urls::ResolverMatch;

bitflags! {
    /// The pipeline stages a middleware takes part in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Stages: u8 {
        /// Before URL resolution
        const REQUEST = 1;
        /// After resolution, before the view
        const VIEW = 1 << 1;
        /// When the view fails
        const EXCEPTION = 1 << 2;
        /// Before a deferred template is rendered
        const TEMPLATE_RESPONSE = 1 << 3;
        /// On every outgoing response
        const RESPONSE = 1 << 4;
    }
}

/// A pipeline middleware.
///
/// Every hook defaults to "do nothing". [`Middleware::stages`] decides which
/// stage lists the middleware is loaded into.
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Stages this middleware takes part in.
    fn stages(&self) -> Stages {
        Stages::all()
    }

    /// Runs before resolution. A response short-circuits the request phase.
    ///
    /// # Errors
    ///
    /// Errors are mapped to responses by the pipeline.
    fn process_request(&self, _request: &mut Request) -> Result<Option<Response>> {
        Ok(None)
    }

    /// Runs before the view. A response short-circuits the view phase.
    ///
    /// # Errors
    ///
    /// Errors are mapped to responses by the pipeline.
    fn process_view(
        &self,
        _request: &mut Request,
        _resolved: &ResolverMatch,
    ) -> Result<Option<Response>> {
        Ok(None)
    }

    /// Runs when the view fails. The first response wins.
    ///
    /// # Errors
    ///
    /// Errors replace the original failure.
    fn process_exception(&self, _request: &mut Request, _error: &Error) -> Result<Option<Response>> {
        Ok(None)
    }

    /// Transforms a response whose template is not rendered yet.
    ///
    /// # Errors
    ///
    /// Errors are mapped to responses by the pipeline.
    fn process_template_response(
        &self,
        _request: &mut Request,
        response: Response,
    ) -> Result<Response> {
        Ok(response)
    }

    /// Transforms every outgoing response.
    ///
    /// # Errors
    ///
    /// Errors are handled as uncaught.
    fn process_response(&self, _request: &mut Request, response: Response) -> Result<Response> {
        Ok(response)
    }
}

/// Ordered stage lists.
///
/// Request and view middleware run in load order; exception,
/// template-response and response middleware run in reverse load order.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    request: Vec<Arc<dyn Middleware>>,
    view: Vec<Arc<dyn Middleware>>,
    exception: Vec<Arc<dyn Middleware>>,
    template_response: Vec<Arc<dyn Middleware>>,
    response: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    /// No middleware.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a middleware into the lists of its stages.
    pub fn load(mut self, middleware: Arc<dyn Middleware>) -> Self {
        let stages = middleware.stages();
        if stages.contains(Stages::REQUEST) {
            self.request.push(middleware.clone());
        }
        if stages.contains(Stages::VIEW) {
            self.view.push(middleware.clone());
        }
        if stages.contains(Stages::EXCEPTION) {
            self.exception.insert(0, middleware.clone());
        }
        if stages.contains(Stages::TEMPLATE_RESPONSE) {
            self.template_response.insert(0, middleware.clone());
        }
        if stages.contains(Stages::RESPONSE) {
            self.response.insert(0, middleware);
        }
        self
    }

    /// Request-stage list.
    pub fn request(&self) -> &[Arc<dyn Middleware>] {
        &self.request
    }

    /// View-stage list.
    pub fn view(&self) -> &[Arc<dyn Middleware>] {
        &self.view
    }

    /// Exception-stage list.
    pub fn exception(&self) -> &[Arc<dyn Middleware>] {
        &self.exception
    }

    /// Template-response-stage list.
    pub fn template_response(&self) -> &[Arc<dyn Middleware>] {
        &self.template_response
    }

    /// Response-stage list.
    pub fn response(&self) -> &[Arc<dyn Middleware>] {
        &self.response
    }
}

impl fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |list: &[Arc<dyn Middleware>]| -> Vec<String> {
            list.iter().map(|m| m.name().to_string()).collect()
        };
        f.debug_struct("MiddlewareStack")
            .field("request", &names(&self.request))
            .field("view", &names(&self.view))
            .field("exception", &names(&self.exception))
            .field("template_response", &names(&self.template_response))
            .field("response", &names(&self.response))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, Stages);

    impl Middleware for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn stages(&self) -> Stages {
            self.1
        }
    }

    fn names(list: &[Arc<dyn Middleware>]) -> Vec<&str> {
        list.iter().map(|m| m.name()).collect()
    }

    #[test]
    fn request_phases_keep_order_response_phases_reverse() {
        let stack = MiddlewareStack::new()
            .load(Arc::new(Named("a", Stages::all())))
            .load(Arc::new(Named("b", Stages::all())));
        assert_eq!(names(stack.request()), vec!["a", "b"]);
        assert_eq!(names(stack.view()), vec!["a", "b"]);
        assert_eq!(names(stack.exception()), vec!["b", "a"]);
        assert_eq!(names(stack.template_response()), vec!["b", "a"]);
        assert_eq!(names(stack.response()), vec!["b", "a"]);
    }

    #[test]
    fn stages_select_lists() {
        let stack = MiddlewareStack::new().load(Arc::new(Named(
            "resp",
            Stages::RESPONSE | Stages::EXCEPTION,
        )));
        assert!(stack.request().is_empty());
        assert!(stack.view().is_empty());
        assert_eq!(names(stack.response()), vec!["resp"]);
        assert_eq!(names(stack.exception()), vec!["resp"]);
    }
}
