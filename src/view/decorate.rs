use std::fmt;
use std::sync::Arc;

use crate::request::Request;

use super::{View, ViewArgs, ViewOutcome};

/// The wrapped view, as seen by a decorator.
pub type Next<'a> = &'a dyn Fn(&mut Request, &ViewArgs) -> ViewOutcome;

/// Wraps a whole view: runs before and after it, or instead of it.
pub trait ViewDecorator: Send + Sync {
    /// Handles the request, calling `next` to reach the wrapped view.
    fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome;

    /// Whether wrapping a view marks it exempt from CSRF protection.
    fn csrf_exempt(&self) -> bool {
        false
    }
}

/// A view wrapped by one decorator.
pub struct Decorated {
    view: Arc<dyn View>,
    decorator: Arc<dyn ViewDecorator>,
}

impl View for Decorated {
    fn call(&self, request: &mut Request, args: &ViewArgs) -> ViewOutcome {
        self.decorator.call(request, args, &|request: &mut Request, args: &ViewArgs| {
            self.view.call(request, args)
        })
    }

    fn name(&self) -> String {
        self.view.name()
    }

    fn csrf_exempt(&self) -> bool {
        self.decorator.csrf_exempt() || self.view.csrf_exempt()
    }
}

impl fmt::Debug for Decorated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decorated")
            .field("view", &self.view.name())
            .finish_non_exhaustive()
    }
}

/// Wraps any view, typically a function view, with a decorator.
///
/// ```
/// use std::sync::Arc;
/// use view_policy::{decorate, view_fn, Response, View, XFrameOptionsDeny};
///
/// let view = decorate(
///     view_fn("page", |_, _| Ok(Some(Response::ok("")))),
///     Arc::new(XFrameOptionsDeny),
/// );
/// assert_eq!(view.name(), "page");
/// ```
pub fn decorate(view: Arc<dyn View>, decorator: Arc<dyn ViewDecorator>) -> Arc<dyn View> {
    Arc::new(Decorated { view, decorator })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Response;
    use crate::view::{view_fn, ClassView};
    use http::Method;
    use parking_lot::Mutex;

    struct Trace {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ViewDecorator for Trace {
        fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
            self.log.lock().push(format!("enter {}", self.label));
            let outcome = next(request, args);
            self.log.lock().push(format!("leave {}", self.label));
            outcome
        }
    }

    struct Exempt;

    impl ViewDecorator for Exempt {
        fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
            next(request, args)
        }

        fn csrf_exempt(&self) -> bool {
            true
        }
    }

    #[test]
    fn first_decorator_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let view = ClassView::builder("V")
            .get(|_, _| Ok(Response::ok("")))
            .decorate(Arc::new(Trace { label: "outer", log: log.clone() }))
            .decorate(Arc::new(Trace { label: "inner", log: log.clone() }))
            .build();
        let mut request = Request::builder(Method::GET, "/").build();
        view.call(&mut request, &ViewArgs::new()).unwrap();
        assert_eq!(
            *log.lock(),
            vec!["enter outer", "enter inner", "leave inner", "leave outer"]
        );
    }

    #[test]
    fn csrf_exempt_mark_propagates() {
        let plain = view_fn("v", |_, _| Ok(Some(Response::ok(""))));
        assert!(!plain.csrf_exempt());
        let exempt = decorate(plain, Arc::new(Exempt));
        assert!(exempt.csrf_exempt());
        let rewrapped = decorate(exempt, Arc::new(Trace { label: "x", log: Arc::default() }));
        assert!(rewrapped.csrf_exempt());
    }
}
