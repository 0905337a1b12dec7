//! The identity attached to a request by the session/auth layer.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Identifier of a user group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u64);

/// The user making a request.
///
/// Permissions are `"app_label.codename"` strings. Object permissions are
/// keyed by an object key chosen by the application.
///
/// # Examples
///
/// ```
/// use view_policy::User;
///
/// let anon = User::anonymous();
/// assert!(!anon.is_authenticated());
///
/// let alice = User::authenticated("alice").with_permission("blog.add_post");
/// assert!(alice.has_perms(&["blog.add_post"], None));
/// assert!(!alice.has_perms(&["blog.delete_post"], None));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    username: String,
    authenticated: bool,
    active: bool,
    staff: bool,
    superuser: bool,
    groups: BTreeSet<GroupId>,
    permissions: BTreeSet<String>,
    object_permissions: BTreeMap<String, BTreeSet<String>>,
}

impl User {
    /// The anonymous user: unauthenticated, inactive, no groups.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An authenticated, active user.
    pub fn authenticated(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            authenticated: true,
            active: true,
            ..Self::default()
        }
    }

    /// Marks the user inactive.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Marks the user as staff.
    pub fn staff(mut self) -> Self {
        self.staff = true;
        self
    }

    /// Marks the user as superuser.
    pub fn superuser(mut self) -> Self {
        self.superuser = true;
        self
    }

    /// Adds a group membership.
    pub fn with_group(mut self, group: GroupId) -> Self {
        self.groups.insert(group);
        self
    }

    /// Grants a global permission.
    pub fn with_permission(mut self, perm: impl Into<String>) -> Self {
        self.permissions.insert(perm.into());
        self
    }

    /// Grants a permission on a single object.
    pub fn with_object_permission(mut self, obj: impl Into<String>, perm: impl Into<String>) -> Self {
        self.object_permissions
            .entry(obj.into())
            .or_default()
            .insert(perm.into());
        self
    }

    /// Login name, empty for the anonymous user.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Whether the user has logged in.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Whether the account is active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the user is staff.
    pub fn is_staff(&self) -> bool {
        self.staff
    }

    /// Whether the user is a superuser.
    pub fn is_superuser(&self) -> bool {
        self.superuser
    }

    /// Group memberships.
    pub fn groups(&self) -> &BTreeSet<GroupId> {
        &self.groups
    }

    /// Checks one permission, globally or on `obj`.
    ///
    /// Inactive users have no permissions; active superusers have all of them.
    pub fn has_perm(&self, perm: &str, obj: Option<&str>) -> bool {
        if !self.active {
            return false;
        }
        if self.superuser {
            return true;
        }
        match obj {
            Some(key) => self
                .object_permissions
                .get(key)
                .is_some_and(|perms| perms.contains(perm)),
            None => self.permissions.contains(perm),
        }
    }

    /// Checks that every permission is held.
    pub fn has_perms<S: AsRef<str>>(&self, perms: &[S], obj: Option<&str>) -> bool {
        perms.iter().all(|p| self.has_perm(p.as_ref(), obj))
    }
}

/// Looks up groups by name.
pub trait GroupDirectory: Send + Sync {
    /// Returns the id of the named group, if it exists.
    fn group_id(&self, name: &str) -> Option<GroupId>;
}

/// A fixed in-memory [`GroupDirectory`].
#[derive(Debug, Clone, Default)]
pub struct StaticGroups {
    by_name: HashMap<String, GroupId>,
}

impl StaticGroups {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a group.
    pub fn with_group(mut self, name: impl Into<String>, id: GroupId) -> Self {
        self.by_name.insert(name.into(), id);
        self
    }
}

impl GroupDirectory for StaticGroups {
    fn group_id(&self, name: &str) -> Option<GroupId> {
        self.by_name.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_has_nothing() {
        let user = User::anonymous();
        assert!(!user.is_authenticated());
        assert!(!user.is_active());
        assert!(!user.has_perm("a.b", None));
    }

    #[test]
    fn inactive_superuser_has_no_perms() {
        let user = User::authenticated("root").superuser().inactive();
        assert!(!user.has_perm("a.b", None));
        assert!(User::authenticated("root").superuser().has_perm("a.b", None));
    }

    #[test]
    fn object_permissions_are_scoped() {
        let user = User::authenticated("bob").with_object_permission("post:1", "blog.change_post");
        assert!(user.has_perms(&["blog.change_post"], Some("post:1")));
        assert!(!user.has_perms(&["blog.change_post"], Some("post:2")));
        assert!(!user.has_perms(&["blog.change_post"], None));
    }

    #[test]
    fn empty_perm_list_passes() {
        let empty: [&str; 0] = [];
        assert!(User::authenticated("x").has_perms(&empty, None));
    }

    #[test]
    fn static_groups_lookup() {
        let groups = StaticGroups::new().with_group("editors", GroupId(7));
        assert_eq!(groups.group_id("editors"), Some(GroupId(7)));
        assert_eq!(groups.group_id("missing"), None);
    }
}
