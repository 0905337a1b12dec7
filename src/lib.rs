//! Composable access policies and a staged request pipeline for views.
//!
//! This crate provides the parts of a web framework that decide what a view
//! does with a request before and around its handler:
//! - **Denials**: the raise / message / redirect protocol a failing policy
//!   answers with, configured per behavior
//! - **Decision chain**: deny policies checked in order, allow policies
//!   wrapping the method handler
//! - **Dispatch**: [`ClassView`] maps HTTP verbs to handlers behind the chain
//! - **Pipeline**: [`Handler`] runs middleware stages around the view and
//!   maps errors to responses
//!
//! # Core Types
//!
//! - [`Request`] / [`Response`]: the HTTP parts plus pipeline annotations
//! - [`Denial`] / [`DenialProtocol`]: per-behavior denial configuration
//! - [`DenyPolicy`] / [`AllowPolicy`]: the two phases of the decision chain
//! - [`ClassView`]: verb-to-handler dispatch
//! - [`RequestHandler`] / [`Handler`]: the request pipeline
//! - [`behaviors`]: ready-made policies and decorators
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use http::{Method, StatusCode};
//! use view_policy::{ClassView, LoginRequired, Request, Response, View, ViewArgs};
//!
//! let view = ClassView::builder("Resource")
//!     .get(|_, _| Ok(Response::ok("secret")))
//!     .deny(Arc::new(LoginRequired::new()))
//!     .build();
//!
//! let mut request = Request::builder(Method::GET, "/resource/").build();
//! let response = view.call(&mut request, &ViewArgs::new()).unwrap().unwrap();
//!
//! assert_eq!(response.status(), StatusCode::FOUND);
//! assert_eq!(
//!     response.header("location"),
//!     Some("/accounts/login/?next=%2Fresource%2F")
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod handler;
mod http;
mod logging;
mod messages;
mod middleware;
mod request;
mod signals;
mod user;
mod view;

pub mod behaviors;
pub mod testing;
pub mod urls;

pub use behaviors::{
    CacheControl, CachePage, Condition, CsrfExempt, CsrfProtect, CsrfViewMiddleware,
    EnsureCsrfCookie, GZipPage, GroupsRequired, LocalCache, LoginRequired, NeverCache,
    ObjectPermissionsRequired, PermissionsRequired, RequireGet, RequirePost, RequireSafe,
    RequiresCsrfToken, TestRequired, VaryOnCookie, VaryOnHeaders, XFrameOptionsDeny,
    XFrameOptionsExempt, XFrameOptionsMiddleware, XFrameOptionsSameOrigin,
};
pub use config::Settings;
pub use error::{BoxError, Error, ErrorKind, Result};
pub use handler::{technical_404_response, technical_500_response, Handler, HandlerBuilder, RequestHandler};
pub use crate::http::{Cookie, JsonRenderer, Renderer, Response, Template};
pub use logging::RequestLog;
pub use messages::{add_message, Level, Message};
pub use middleware::{Middleware, MiddlewareStack, Stages};
pub use request::{Request, RequestBuilder};
pub use signals::{ExceptionSignal, Receiver, RecordedSignal, SignalEvent, SignalRecorder};
pub use urls::{ErrorHandler, Resolver, ResolverMatch, UrlConf};
pub use user::{GroupDirectory, GroupId, StaticGroups, User};
pub use view::shortcuts;
pub use view::{
    decorate, view_fn, AllowPolicy, ClassView, ClassViewBuilder, DecisionChain, Decorated,
    Denial, DenialConfig, DenialProtocol, DenyOutcome, DenyPolicy, FnView, HttpMethodAllow,
    HttpMethodDeny, MethodHandler, Next, View, ViewArgs, ViewDecorator, ViewHandler, ViewOutcome,
    DEFAULT_METHODS,
};

/// Default query parameter carrying the post-login destination.
pub const REDIRECT_FIELD_NAME: &str = "next";
