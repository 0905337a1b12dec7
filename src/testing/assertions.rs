use std::collections::BTreeSet;

use http::header::LOCATION;
use http::StatusCode;
use url::form_urlencoded;

use crate::http::Response;
use crate::messages::Level;

use super::TestResponse;

fn tag_set(tags: &str) -> BTreeSet<&str> {
    tags.split(' ').map(str::trim).filter(|t| !t.is_empty()).collect()
}

/// Asserts the response status.
#[track_caller]
pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "unexpected status, body: {}",
        response.text()
    );
}

/// Asserts a response header value.
#[track_caller]
pub fn assert_header(response: &Response, name: &str, expected: &str) {
    assert_eq!(
        response.header(name),
        Some(expected),
        "unexpected value for header {}",
        name
    );
}

/// Asserts a redirect to `expected_url` whose query holds exactly
/// `query`, in any order.
///
/// # Examples
///
/// ```
/// use view_policy::Response;
/// use view_policy::testing::assert_redirects;
///
/// let response = Response::redirect("/login/?b=2&next=%2Fresource%2F");
/// assert_redirects(&response, "/login/", &[("next", "/resource/"), ("b", "2")]);
/// ```
#[track_caller]
pub fn assert_redirects(response: &Response, expected_url: &str, query: &[(&str, &str)]) {
    assert!(
        response.status().is_redirection(),
        "expected a redirect, got {}",
        response.status()
    );
    let location = response
        .header(LOCATION.as_str())
        .unwrap_or_else(|| panic!("redirect without a Location header"));
    let (url, actual_query) = location.split_once('?').unwrap_or((location, ""));
    assert_eq!(url, expected_url, "unexpected redirect target");

    let actual: BTreeSet<(String, String)> = form_urlencoded::parse(actual_query.as_bytes())
        .into_owned()
        .collect();
    let expected: BTreeSet<(String, String)> = query
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    assert_eq!(actual, expected, "unexpected redirect query");
}

/// Asserts a message with `content` was queued. `level` and `tags` narrow
/// the match; `limit` caps how many messages may be queued.
#[track_caller]
pub fn assert_message(
    response: &TestResponse,
    content: &str,
    level: Option<Level>,
    tags: Option<&str>,
    limit: Option<usize>,
) {
    let messages = response.messages();
    assert!(!messages.is_empty(), "no messages were queued");
    if let Some(limit) = limit {
        assert!(
            messages.len() <= limit,
            "expected at most {} messages, got {}",
            limit,
            messages.len()
        );
    }
    let wanted_tags = tags.map(tag_set);
    let found = messages.iter().any(|message| {
        message.message == content
            && level.map_or(true, |level| message.level == level)
            && wanted_tags
                .as_ref()
                .map_or(true, |wanted| tag_set(&message.tags()) == *wanted)
    });
    assert!(
        found,
        "no message matching {:?} (level {:?}, tags {:?}) in {:?}",
        content, level, tags, messages
    );
}

/// Asserts no messages were queued.
#[track_caller]
pub fn assert_no_messages(response: &TestResponse) {
    assert!(
        response.messages().is_empty(),
        "expected no messages, got {:?}",
        response.messages()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::add_message;
    use crate::request::Request;
    use http::Method;

    fn with_messages() -> TestResponse {
        let mut request = Request::builder(Method::GET, "/").build();
        add_message(&mut request, Level::Warning, "Please log in", "");
        add_message(&mut request, Level::Info, "Hello", "greeting");
        TestResponse {
            response: Response::ok(""),
            request,
        }
    }

    #[test]
    fn message_matching() {
        let response = with_messages();
        assert_message(&response, "Please log in", None, None, None);
        assert_message(&response, "Please log in", Some(Level::Warning), Some("warning"), Some(2));
        assert_message(&response, "Hello", None, Some("info greeting"), None);
    }

    #[test]
    #[should_panic(expected = "no message matching")]
    fn message_level_mismatch_panics() {
        assert_message(&with_messages(), "Hello", Some(Level::Error), None, None);
    }

    #[test]
    #[should_panic(expected = "at most 1 messages")]
    fn message_limit_panics() {
        assert_message(&with_messages(), "Hello", None, None, Some(1));
    }

    #[test]
    fn no_messages() {
        let response = TestResponse {
            response: Response::ok(""),
            request: Request::builder(Method::GET, "/").build(),
        };
        assert_no_messages(&response);
    }

    #[test]
    #[should_panic(expected = "unexpected redirect query")]
    fn redirect_query_must_match() {
        let response = Response::redirect("/login/?next=%2Fa%2F");
        assert_redirects(&response, "/login/", &[("next", "/b/")]);
    }
}
