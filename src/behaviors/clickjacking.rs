//! `X-Frame-Options` decorators and middleware.

use http::header::X_FRAME_OPTIONS;

use crate::error::Result;
use crate::http::Response;
use crate::middleware::{Middleware, Stages};
use crate::request::Request;
use crate::view::{Next, ViewArgs, ViewDecorator, ViewOutcome};

fn set_unless_present(response: &mut Response, value: &str) {
    if !response.has_header(X_FRAME_OPTIONS.as_str()) {
        response.set_header(X_FRAME_OPTIONS, value);
    }
}

/// Sends `X-Frame-Options: DENY` unless the view set the header itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct XFrameOptionsDeny;

impl ViewDecorator for XFrameOptionsDeny {
    fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
        let mut response = next(request, args)?;
        if let Some(response) = response.as_mut() {
            set_unless_present(response, "DENY");
        }
        Ok(response)
    }
}

/// Sends `X-Frame-Options: SAMEORIGIN` unless the view set the header
/// itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct XFrameOptionsSameOrigin;

impl ViewDecorator for XFrameOptionsSameOrigin {
    fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
        let mut response = next(request, args)?;
        if let Some(response) = response.as_mut() {
            set_unless_present(response, "SAMEORIGIN");
        }
        Ok(response)
    }
}

/// Marks responses exempt from [`XFrameOptionsMiddleware`].
#[derive(Debug, Clone, Copy, Default)]
pub struct XFrameOptionsExempt;

impl ViewDecorator for XFrameOptionsExempt {
    fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
        let mut response = next(request, args)?;
        if let Some(response) = response.as_mut() {
            response.set_xframe_options_exempt(true);
        }
        Ok(response)
    }
}

/// Applies `settings.x_frame_options` to every non-exempt response that
/// lacks the header.
#[derive(Debug, Clone, Copy, Default)]
pub struct XFrameOptionsMiddleware;

impl Middleware for XFrameOptionsMiddleware {
    fn name(&self) -> &str {
        "xframe_options"
    }

    fn stages(&self) -> Stages {
        Stages::RESPONSE
    }

    fn process_response(&self, request: &mut Request, mut response: Response) -> Result<Response> {
        if !response.xframe_options_exempt() {
            let value = request.settings().x_frame_options.to_ascii_uppercase();
            set_unless_present(&mut response, &value);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{decorate, view_fn, View};
    use http::Method;
    use std::sync::Arc;

    fn page() -> Arc<dyn View> {
        view_fn("page", |_, _| Ok(Some(Response::ok("page"))))
    }

    fn run(view: &dyn View) -> (Request, Response) {
        let mut request = Request::builder(Method::GET, "/").build();
        let response = view.call(&mut request, &ViewArgs::new()).unwrap().unwrap();
        (request, response)
    }

    #[test]
    fn decorators_set_header() {
        let (_, deny) = run(decorate(page(), Arc::new(XFrameOptionsDeny)).as_ref());
        assert_eq!(deny.header("x-frame-options"), Some("DENY"));
        let (_, same) = run(decorate(page(), Arc::new(XFrameOptionsSameOrigin)).as_ref());
        assert_eq!(same.header("x-frame-options"), Some("SAMEORIGIN"));
    }

    #[test]
    fn existing_header_wins() {
        let view = view_fn("page", |_, _| {
            Ok(Some(Response::ok("").with_header(X_FRAME_OPTIONS, "SAMEORIGIN")))
        });
        let (_, response) = run(decorate(view, Arc::new(XFrameOptionsDeny)).as_ref());
        assert_eq!(response.header("x-frame-options"), Some("SAMEORIGIN"));
    }

    #[test]
    fn middleware_respects_exemption() {
        let middleware = XFrameOptionsMiddleware;
        let (mut request, plain) = run(page().as_ref());
        let plain = middleware.process_response(&mut request, plain).unwrap();
        assert_eq!(plain.header("x-frame-options"), Some("SAMEORIGIN"));

        let (mut request, exempt) = run(decorate(page(), Arc::new(XFrameOptionsExempt)).as_ref());
        let exempt = middleware.process_response(&mut request, exempt).unwrap();
        assert!(!exempt.has_header("x-frame-options"));
    }
}
