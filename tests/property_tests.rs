//! Property tests for the decision chain and redirect handling.

use std::sync::Arc;

use http::{Method, StatusCode};
use proptest::prelude::*;
use view_policy::urls::simplify_redirect;
use view_policy::{ClassView, Request, Response, TestRequired, View, ViewArgs};

fn gated_view(outcomes: &[bool]) -> Arc<ClassView> {
    let mut builder = ClassView::builder("Gated").get(|_, _| Ok(Response::ok("ok")));
    for (index, passes) in outcomes.iter().copied().enumerate() {
        let gate = TestRequired::new()
            .predicate(move |_, _| passes)
            .configure(|d| d.message(format!("gate {}", index)));
        builder = builder.deny(Arc::new(gate));
    }
    builder.build()
}

fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9]{1,8}", 0..4).prop_map(|segments| {
        let mut path = String::from("/");
        for segment in segments {
            path.push_str(&segment);
            path.push('/');
        }
        path
    })
}

fn arb_host() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("example.com".to_string()),
        Just("other.org".to_string()),
        Just("example.com:8000".to_string()),
    ]
}

proptest! {
    /// The first failing policy supplies the denial, whatever follows it.
    #[test]
    fn first_failing_policy_wins(outcomes in prop::collection::vec(any::<bool>(), 1..8)) {
        let view = gated_view(&outcomes);
        let mut request = Request::builder(Method::GET, "/gated/").build();
        let response = view.call(&mut request, &ViewArgs::new()).unwrap().unwrap();

        match outcomes.iter().position(|passes| !passes) {
            Some(index) => {
                prop_assert_eq!(response.status(), StatusCode::FOUND);
                prop_assert_eq!(request.messages().len(), 1);
                prop_assert_eq!(&request.messages()[0].message, &format!("gate {}", index));
            }
            None => {
                prop_assert_eq!(response.status(), StatusCode::OK);
                prop_assert!(request.messages().is_empty());
            }
        }
    }

    /// Simplifying twice is the same as simplifying once.
    #[test]
    fn simplification_is_idempotent(
        host in arb_host(),
        target_host in arb_host(),
        path in arb_path(),
        query in prop::option::of("[a-z]{1,5}=[a-z0-9]{1,5}"),
    ) {
        let mut url = format!("http://{}{}", host, path);
        if let Some(query) = &query {
            url.push('?');
            url.push_str(query);
        }
        let target = format!("http://{}/login/", target_host);

        let once = simplify_redirect(&url, &target, None);
        let twice = simplify_redirect(&once, &target, None);
        prop_assert_eq!(&once, &twice);

        if host == target_host {
            prop_assert!(once.starts_with('/'));
        } else {
            prop_assert_eq!(&once, &url);
        }
    }

    /// Relative URLs are never changed.
    #[test]
    fn relative_urls_are_untouched(path in arb_path(), host in arb_host()) {
        let request = Request::builder(Method::GET, "/").host(&host).build();
        let target = format!("http://{}/login/", host);
        prop_assert_eq!(simplify_redirect(&path, &target, Some(&request)), path);
    }
}
