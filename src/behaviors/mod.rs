//! Ready-made policies and decorators for class-based views.
//!
//! Deny policies gate access and answer through their [`Denial`]:
//! [`LoginRequired`], [`ActiveRequired`], [`StaffRequired`],
//! [`SuperuserRequired`], [`GroupsRequired`], [`PermissionsRequired`],
//! [`ObjectPermissionsRequired`], [`TestRequired`] and the method gates
//! [`RequireGet`], [`RequirePost`], [`RequireSafe`].
//!
//! Allow policies wrap the method handler: [`Condition`], [`CachePage`],
//! [`CacheControl`], [`NeverCache`], [`VaryOnHeaders`], [`VaryOnCookie`].
//!
//! Decorators wrap a whole view, class-based or not: the `X-Frame-Options`
//! family, the CSRF family and [`GZipPage`].
//!
//! [`Denial`]: crate::Denial
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use http::{Method, StatusCode};
//! use view_policy::behaviors::{LoginRequired, NeverCache};
//! use view_policy::{ClassView, Request, Response, User, View, ViewArgs};
//!
//! let view = ClassView::builder("Account")
//!     .get(|_, _| Ok(Response::ok("account")))
//!     .deny(Arc::new(LoginRequired::new().configure(|d| d.raise(true))))
//!     .allow(Arc::new(NeverCache::new()))
//!     .build();
//!
//! let mut request = Request::builder(Method::GET, "/account/")
//!     .user(User::authenticated("ada"))
//!     .build();
//! let response = view.call(&mut request, &ViewArgs::new()).unwrap().unwrap();
//! assert_eq!(response.status(), StatusCode::OK);
//! assert!(response.header("cache-control").unwrap().contains("no-store"));
//! ```

mod auth;
mod cache;
mod clickjacking;
mod csrf;
mod gzip;
mod http;
mod vary;

pub use auth::{
    ActiveRequired, GroupRef, GroupsRequired, LoginRequired, ObjectPermissionsRequired,
    ObjectSupplier, PermissionsRequired, StaffRequired, SuperuserRequired, TestFn, TestRequired,
};
pub use cache::{
    add_never_cache_headers, get_max_age, patch_cache_control, patch_response_headers, Cache,
    CacheControl, CachePage, Cached, LocalCache, NeverCache, MAX_CACHE_TIMEOUT,
};
pub use clickjacking::{
    XFrameOptionsDeny, XFrameOptionsExempt, XFrameOptionsMiddleware, XFrameOptionsSameOrigin,
};
pub use csrf::{
    get_token, rotate_token, CsrfExempt, CsrfProtect, CsrfViewMiddleware, EnsureCsrfCookie,
    RequiresCsrfToken, CSRF_KEY_LENGTH,
};
pub use gzip::{gzip_response, GZipPage, MIN_GZIP_LENGTH};
pub use self::http::{Condition, ETagFn, LastModifiedFn, RequireGet, RequirePost, RequireSafe};
pub use vary::{has_vary_header, patch_vary_headers, vary_headers, VaryOnCookie, VaryOnHeaders};
