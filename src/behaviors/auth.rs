//! Deny-phase access checks on the requesting user.
//!
//! Each gate pairs a test with a [`Denial`] configured under the gate's
//! name. A gate that passes, or is disabled, lets the next deny policy run.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::request::Request;
use crate::user::{GroupDirectory, GroupId};
use crate::view::{ClassView, Denial, DenialProtocol, DenyPolicy, ViewArgs, ViewHandler};

/// Returns the gate's denial handler when `passes` is false.
fn deny_unless<P: DenialProtocol>(policy: &P, passes: bool) -> Option<ViewHandler<'_>> {
    (!passes).then(|| policy.handler())
}

macro_rules! user_flag_gate {
    ($(#[$doc:meta])* $name:ident, $prefix:literal, |$user:ident| $test:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            enabled: bool,
            denial: Denial,
        }

        impl $name {
            /// Enabled gate with default denial options.
            pub fn new() -> Self {
                Self {
                    enabled: true,
                    denial: Denial::new($prefix),
                }
            }

            /// Turns the gate on or off.
            pub fn enabled(mut self, enabled: bool) -> Self {
                self.enabled = enabled;
                self
            }

            /// Adjusts the denial options.
            pub fn configure(mut self, f: impl FnOnce(Denial) -> Denial) -> Self {
                self.denial = f(self.denial);
                self
            }

            /// Whether the request passes. Disabled gates always pass.
            pub fn test(&self, request: &Request) -> bool {
                let $user = request.user();
                !self.enabled || $test
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl DenialProtocol for $name {
            fn denial(&self) -> &Denial {
                &self.denial
            }
        }

        impl DenyPolicy for $name {
            fn name(&self) -> &str {
                self.denial.prefix()
            }

            fn deny_handler<'a>(
                &'a self,
                _view: &'a ClassView,
                request: &Request,
                _args: &ViewArgs,
            ) -> Result<Option<ViewHandler<'a>>> {
                Ok(deny_unless(self, self.test(request)))
            }
        }
    };
}

user_flag_gate!(
    /// Requires an authenticated user.
    ///
    /// # Examples
    ///
    /// ```
    /// use view_policy::{LoginRequired, Request, User};
    /// use http::Method;
    ///
    /// let gate = LoginRequired::new();
    /// let anonymous = Request::builder(Method::GET, "/").build();
    /// let member = Request::builder(Method::GET, "/").user(User::authenticated("ann")).build();
    /// assert!(!gate.test(&anonymous));
    /// assert!(gate.test(&member));
    /// ```
    LoginRequired,
    "login_required",
    |user| user.is_authenticated()
);

user_flag_gate!(
    /// Requires an active user.
    ActiveRequired,
    "active_required",
    |user| user.is_active()
);

user_flag_gate!(
    /// Requires a staff member.
    StaffRequired,
    "staff_required",
    |user| user.is_staff()
);

user_flag_gate!(
    /// Requires a superuser.
    SuperuserRequired,
    "superuser_required",
    |user| user.is_superuser()
);

/// A group named in [`GroupsRequired`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRef {
    /// Resolved through the configured [`GroupDirectory`]
    Named(String),
    /// Used as is
    Id(GroupId),
}

impl From<&str> for GroupRef {
    fn from(name: &str) -> Self {
        GroupRef::Named(name.to_string())
    }
}

impl From<String> for GroupRef {
    fn from(name: String) -> Self {
        GroupRef::Named(name)
    }
}

impl From<GroupId> for GroupRef {
    fn from(id: GroupId) -> Self {
        GroupRef::Id(id)
    }
}

/// Requires membership of every listed group. An empty list disables the
/// gate.
#[derive(Clone)]
pub struct GroupsRequired {
    enabled: bool,
    groups: Vec<GroupRef>,
    directory: Option<Arc<dyn GroupDirectory>>,
    denial: Denial,
}

impl GroupsRequired {
    /// Gate over `groups`.
    pub fn new<G: Into<GroupRef>>(groups: impl IntoIterator<Item = G>) -> Self {
        Self {
            enabled: true,
            groups: groups.into_iter().map(Into::into).collect(),
            directory: None,
            denial: Denial::new("groups_required"),
        }
    }

    /// Directory used to resolve named groups.
    pub fn directory(mut self, directory: Arc<dyn GroupDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Turns the gate on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adjusts the denial options.
    pub fn configure(mut self, f: impl FnOnce(Denial) -> Denial) -> Self {
        self.denial = f(self.denial);
        self
    }

    /// The required groups as ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImproperlyConfigured`] when a named group does not
    /// exist or no directory is configured to look it up.
    pub fn group_ids(&self) -> Result<BTreeSet<GroupId>> {
        self.groups
            .iter()
            .map(|group| match group {
                GroupRef::Id(id) => Ok(*id),
                GroupRef::Named(name) => self
                    .directory
                    .as_ref()
                    .and_then(|directory| directory.group_id(name))
                    .ok_or_else(|| {
                        Error::ImproperlyConfigured(format!(
                            "The group '{}' named in groups_required does not exist.",
                            name
                        ))
                    }),
            })
            .collect()
    }

    /// Whether the request passes.
    ///
    /// # Errors
    ///
    /// See [`GroupsRequired::group_ids`].
    pub fn test(&self, request: &Request) -> Result<bool> {
        if !self.enabled || self.groups.is_empty() {
            return Ok(true);
        }
        let required = self.group_ids()?;
        Ok(required.is_subset(request.user().groups()))
    }
}

impl fmt::Debug for GroupsRequired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupsRequired")
            .field("enabled", &self.enabled)
            .field("groups", &self.groups)
            .field("denial", &self.denial)
            .finish_non_exhaustive()
    }
}

impl DenialProtocol for GroupsRequired {
    fn denial(&self) -> &Denial {
        &self.denial
    }
}

impl DenyPolicy for GroupsRequired {
    fn name(&self) -> &str {
        self.denial.prefix()
    }

    fn deny_handler<'a>(
        &'a self,
        _view: &'a ClassView,
        request: &Request,
        _args: &ViewArgs,
    ) -> Result<Option<ViewHandler<'a>>> {
        Ok(deny_unless(self, self.test(request)?))
    }
}

/// Requires every listed permission. An empty list disables the gate.
#[derive(Debug, Clone)]
pub struct PermissionsRequired {
    enabled: bool,
    permissions: Vec<String>,
    denial: Denial,
}

impl PermissionsRequired {
    /// Gate over `permissions`.
    pub fn new<S: Into<String>>(permissions: impl IntoIterator<Item = S>) -> Self {
        Self {
            enabled: true,
            permissions: permissions.into_iter().map(Into::into).collect(),
            denial: Denial::new("permissions_required"),
        }
    }

    /// Turns the gate on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adjusts the denial options.
    pub fn configure(mut self, f: impl FnOnce(Denial) -> Denial) -> Self {
        self.denial = f(self.denial);
        self
    }

    /// Whether the request passes.
    pub fn test(&self, request: &Request) -> bool {
        !self.enabled
            || self.permissions.is_empty()
            || request.user().has_perms(&self.permissions, None)
    }
}

impl DenialProtocol for PermissionsRequired {
    fn denial(&self) -> &Denial {
        &self.denial
    }
}

impl DenyPolicy for PermissionsRequired {
    fn name(&self) -> &str {
        self.denial.prefix()
    }

    fn deny_handler<'a>(
        &'a self,
        _view: &'a ClassView,
        request: &Request,
        _args: &ViewArgs,
    ) -> Result<Option<ViewHandler<'a>>> {
        Ok(deny_unless(self, self.test(request)))
    }
}

/// Supplies the key of the object a permission check applies to.
pub type ObjectSupplier = Arc<dyn Fn(&Request, &ViewArgs) -> Option<String> + Send + Sync>;

/// Requires every listed permission on one object.
///
/// Disabled unless both permissions and an object are present: without a
/// supplier, or when the supplier returns `None`, every request passes.
#[derive(Clone)]
pub struct ObjectPermissionsRequired {
    enabled: bool,
    permissions: Vec<String>,
    object: Option<ObjectSupplier>,
    denial: Denial,
}

impl ObjectPermissionsRequired {
    /// Gate over `permissions`; set the object with [`Self::object`].
    pub fn new<S: Into<String>>(permissions: impl IntoIterator<Item = S>) -> Self {
        Self {
            enabled: true,
            permissions: permissions.into_iter().map(Into::into).collect(),
            object: None,
            denial: Denial::new("object_permissions_required"),
        }
    }

    /// Sets the object supplier.
    pub fn object<F>(mut self, supplier: F) -> Self
    where
        F: Fn(&Request, &ViewArgs) -> Option<String> + Send + Sync + 'static,
    {
        self.object = Some(Arc::new(supplier));
        self
    }

    /// Turns the gate on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adjusts the denial options.
    pub fn configure(mut self, f: impl FnOnce(Denial) -> Denial) -> Self {
        self.denial = f(self.denial);
        self
    }

    /// Whether the request passes.
    pub fn test(&self, request: &Request, args: &ViewArgs) -> bool {
        let Some(object) = self.object.as_ref() else {
            return true;
        };
        if !self.enabled || self.permissions.is_empty() {
            return true;
        }
        match object(request, args) {
            Some(key) => request.user().has_perms(&self.permissions, Some(&key)),
            None => true,
        }
    }
}

impl fmt::Debug for ObjectPermissionsRequired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPermissionsRequired")
            .field("enabled", &self.enabled)
            .field("permissions", &self.permissions)
            .field("object", &self.object.is_some())
            .field("denial", &self.denial)
            .finish()
    }
}

impl DenialProtocol for ObjectPermissionsRequired {
    fn denial(&self) -> &Denial {
        &self.denial
    }
}

impl DenyPolicy for ObjectPermissionsRequired {
    fn name(&self) -> &str {
        self.denial.prefix()
    }

    fn deny_handler<'a>(
        &'a self,
        _view: &'a ClassView,
        request: &Request,
        args: &ViewArgs,
    ) -> Result<Option<ViewHandler<'a>>> {
        Ok(deny_unless(self, self.test(request, args)))
    }
}

/// An arbitrary access predicate.
pub type TestFn = Arc<dyn Fn(&Request, &ViewArgs) -> bool + Send + Sync>;

/// Requires a custom predicate to hold. Without a predicate the gate is
/// disabled.
///
/// ```
/// use view_policy::{Request, TestRequired, ViewArgs};
/// use http::Method;
///
/// let gate = TestRequired::new().predicate(|request, _| request.query_value("token").is_some());
/// let request = Request::builder(Method::GET, "/?token=1").build();
/// assert!(gate.test(&request, &ViewArgs::new()));
/// ```
#[derive(Clone)]
pub struct TestRequired {
    enabled: bool,
    predicate: Option<TestFn>,
    denial: Denial,
}

impl TestRequired {
    /// Gate with no predicate yet.
    pub fn new() -> Self {
        Self {
            enabled: true,
            predicate: None,
            denial: Denial::new("test_required"),
        }
    }

    /// Sets the predicate.
    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Request, &ViewArgs) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Turns the gate on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adjusts the denial options.
    pub fn configure(mut self, f: impl FnOnce(Denial) -> Denial) -> Self {
        self.denial = f(self.denial);
        self
    }

    /// Whether the request passes.
    pub fn test(&self, request: &Request, args: &ViewArgs) -> bool {
        match (&self.predicate, self.enabled) {
            (Some(predicate), true) => predicate(request, args),
            _ => true,
        }
    }
}

impl Default for TestRequired {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TestRequired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRequired")
            .field("enabled", &self.enabled)
            .field("predicate", &self.predicate.is_some())
            .field("denial", &self.denial)
            .finish()
    }
}

impl DenialProtocol for TestRequired {
    fn denial(&self) -> &Denial {
        &self.denial
    }
}

impl DenyPolicy for TestRequired {
    fn name(&self) -> &str {
        self.denial.prefix()
    }

    fn deny_handler<'a>(
        &'a self,
        _view: &'a ClassView,
        request: &Request,
        args: &ViewArgs,
    ) -> Result<Option<ViewHandler<'a>>> {
        Ok(deny_unless(self, self.test(request, args)))
    }
}
