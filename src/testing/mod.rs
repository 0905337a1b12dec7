//! Helpers for testing views end to end.
//!
//! [`TestClient`] sends requests through a [`ClientHandler`], the stock
//! pipeline with one stage overridden so a request can target a view
//! directly. The assertion helpers panic with a readable message, so they
//! work in any test harness.
//!
//! ```
//! use std::sync::Arc;
//! use http::StatusCode;
//! use view_policy::behaviors::LoginRequired;
//! use view_policy::testing::{assert_message, assert_redirects, TestClient};
//! use view_policy::{ClassView, Level, Response, UrlConf};
//!
//! let view = ClassView::builder("Resource")
//!     .get(|_, _| Ok(Response::ok("secret")))
//!     .deny(Arc::new(
//!         LoginRequired::new().configure(|d| d.message("Please log in")),
//!     ))
//!     .build();
//!
//! let mut client = TestClient::with_urls(Arc::new(UrlConf::new()));
//! let response = client.get("/resource/").view(view).send().unwrap();
//! assert_redirects(&response, "/accounts/login/", &[("next", "/resource/")]);
//! assert_message(&response, "Please log in", Some(Level::Warning), None, Some(1));
//! ```

mod assertions;
mod client;

pub use assertions::{
    assert_header, assert_message, assert_no_messages, assert_redirects, assert_status,
};
pub use client::{ClientHandler, ClientRequest, TestClient, TestResponse};
