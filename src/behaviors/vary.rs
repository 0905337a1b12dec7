//! `Vary` header maintenance.

use http::header::VARY;

use crate::error::Result;
use crate::http::Response;
use crate::request::Request;
use crate::view::{AllowPolicy, ClassView, ViewArgs, ViewHandler};

/// Header names listed in the response's `Vary`, in order.
pub fn vary_headers(response: &Response) -> Vec<String> {
    response
        .header(VARY.as_str())
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Whether `Vary` lists `header`, ignoring case.
pub fn has_vary_header(response: &Response, header: &str) -> bool {
    vary_headers(response)
        .iter()
        .any(|h| h.eq_ignore_ascii_case(header))
}

/// Adds `headers` to `Vary`, skipping names already listed in any case.
///
/// ```
/// use view_policy::Response;
/// use view_policy::behaviors::patch_vary_headers;
///
/// let mut response = Response::ok("").with_header(http::header::VARY, "Accept");
/// patch_vary_headers(&mut response, &["accept", "Cookie"]);
/// assert_eq!(response.header("vary"), Some("Accept, Cookie"));
/// ```
pub fn patch_vary_headers(response: &mut Response, headers: &[&str]) {
    let mut vary = vary_headers(response);
    for header in headers {
        if !vary.iter().any(|h| h.eq_ignore_ascii_case(header)) {
            vary.push((*header).to_string());
        }
    }
    if !vary.is_empty() {
        response.set_header(VARY, vary.join(", "));
    }
}

/// Adds headers to `Vary` on every response of the view. Without headers
/// the policy does nothing.
#[derive(Debug, Clone, Default)]
pub struct VaryOnHeaders {
    headers: Vec<String>,
}

impl VaryOnHeaders {
    /// Varies on `headers`.
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
        }
    }
}

impl AllowPolicy for VaryOnHeaders {
    fn name(&self) -> &str {
        "vary_on_headers"
    }

    fn allow_handler<'a>(
        &'a self,
        _view: &'a ClassView,
        _request: &Request,
        _args: &ViewArgs,
        inner: Option<ViewHandler<'a>>,
    ) -> Result<Option<ViewHandler<'a>>> {
        let Some(inner) = inner else {
            return Ok(None);
        };
        if self.headers.is_empty() {
            return Ok(Some(inner));
        }
        Ok(Some(Box::new(move |request: &mut Request, args: &ViewArgs| {
            let mut response = inner(request, args)?;
            let headers: Vec<&str> = self.headers.iter().map(String::as_str).collect();
            patch_vary_headers(&mut response, &headers);
            Ok(response)
        })))
    }
}

/// Adds `Cookie` to `Vary`.
#[derive(Debug, Clone)]
pub struct VaryOnCookie {
    enabled: bool,
}

impl VaryOnCookie {
    /// The enabled policy.
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// Turns the policy on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for VaryOnCookie {
    fn default() -> Self {
        Self::new()
    }
}

impl AllowPolicy for VaryOnCookie {
    fn name(&self) -> &str {
        "vary_on_cookie"
    }

    fn allow_handler<'a>(
        &'a self,
        _view: &'a ClassView,
        _request: &Request,
        _args: &ViewArgs,
        inner: Option<ViewHandler<'a>>,
    ) -> Result<Option<ViewHandler<'a>>> {
        match inner {
            Some(inner) if self.enabled => Ok(Some(Box::new(
                move |request: &mut Request, args: &ViewArgs| {
                    let mut response = inner(request, args)?;
                    patch_vary_headers(&mut response, &["Cookie"]);
                    Ok(response)
                },
            ))),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::View;
    use http::Method;
    use std::sync::Arc;

    fn get(view: &ClassView) -> Response {
        let mut request = Request::builder(Method::GET, "/").build();
        view.call(&mut request, &ViewArgs::new()).unwrap().unwrap()
    }

    #[test]
    fn patch_is_case_insensitive_and_ordered() {
        let mut response = Response::ok("");
        patch_vary_headers(&mut response, &["Accept-Language", "Cookie"]);
        patch_vary_headers(&mut response, &["cookie", "Accept-Encoding"]);
        assert_eq!(
            response.header("vary"),
            Some("Accept-Language, Cookie, Accept-Encoding")
        );
        assert!(has_vary_header(&response, "ACCEPT-ENCODING"));
    }

    #[test]
    fn policies_stack() {
        let view = ClassView::builder("Page")
            .get(|_, _| Ok(Response::ok("page")))
            .allow(Arc::new(VaryOnCookie::new()))
            .allow(Arc::new(VaryOnHeaders::new(["Accept"])))
            .build();
        // VaryOnHeaders is inner, so it patches first.
        assert_eq!(get(&view).header("vary"), Some("Accept, Cookie"));
    }

    #[test]
    fn disabled_policies_leave_vary_alone() {
        let view = ClassView::builder("Page")
            .get(|_, _| Ok(Response::ok("page")))
            .allow(Arc::new(VaryOnCookie::new().enabled(false)))
            .allow(Arc::new(VaryOnHeaders::new(Vec::<String>::new())))
            .build();
        assert!(!get(&view).has_header("vary"));
    }
}
