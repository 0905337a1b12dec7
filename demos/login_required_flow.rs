//! Login-required flow demonstration.
//!
//! This example runs one protected view through the request pipeline:
//! 1. Anonymous visitors are redirected to the login page with a message
//! 2. Signed-in users reach the handler
//! 3. Unsupported methods get 405 only after access is granted
//! 4. A raising denial becomes a 403 page
//!
//! Run with: `cargo run --example login_required_flow`

use std::sync::Arc;

use http::Method;
use view_policy::{
    ClassView, Handler, LoginRequired, Request, RequestHandler, Response, UrlConf, User,
};

fn dashboard(login: LoginRequired) -> Arc<ClassView> {
    ClassView::builder("Dashboard")
        .get(|request, _| {
            Ok(Response::ok(format!(
                "Welcome back, {}",
                request.user().username()
            )))
        })
        .deny(Arc::new(login))
        .build()
}

fn run(handler: &Handler, method: Method, path: &str, user: User) {
    let mut request = Request::builder(method.clone(), path).user(user).build();
    match handler.get_response(&mut request) {
        Ok(response) => {
            println!("  {} {} -> {}", method, path, response.status());
            if let Some(location) = response.header("location") {
                println!("    Location: {}", location);
            }
            if let Some(allow) = response.header("allow") {
                println!("    Allow: {}", allow);
            }
            for message in request.messages() {
                println!("    Message [{:?}]: {}", message.level, message.message);
            }
            if response.status().is_success() {
                println!("    Body: {}", response.text());
            }
        }
        Err(e) => eprintln!("  {} {} -> error: {}", method, path, e),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Login Required Flow ===");

    let urls = UrlConf::new()
        .route(
            "dashboard/",
            dashboard(
                LoginRequired::new().configure(|d| d.message("Please sign in to continue")),
            ),
        )
        .route(
            "api/",
            dashboard(LoginRequired::new().configure(|d| d.raise(true))),
        );
    let handler = Handler::builder(Arc::new(urls)).build();

    println!("\n--- Scenario 1: Anonymous visitor ---");
    run(&handler, Method::GET, "/dashboard/", User::anonymous());

    println!("\n--- Scenario 2: Signed-in user ---");
    run(&handler, Method::GET, "/dashboard/", User::authenticated("ada"));

    println!("\n--- Scenario 3: Unsupported method ---");
    run(&handler, Method::DELETE, "/dashboard/", User::anonymous());
    run(&handler, Method::DELETE, "/dashboard/", User::authenticated("ada"));

    println!("\n--- Scenario 4: Raising denial ---");
    run(&handler, Method::GET, "/api/", User::anonymous());
}
