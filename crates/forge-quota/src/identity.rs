use async_trait::async_trait;

/// Sentinel identity for unauthenticated callers. Quota for anonymous
/// traffic pools under this single id.
pub const ANONYMOUS_USER_ID: &str = "anonymous";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
}

/// Resolved caller identity, as produced by the identity provider at the
/// request edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub roles: Vec<Role>,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: Vec::new(),
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: vec![Role::Admin],
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USER_ID)
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    /// Administrative quota operations require ownership or the admin role.
    pub fn can_manage(&self, user_id: &str) -> bool {
        self.is_admin() || self.user_id == user_id
    }
}

/// Collaborator seam for the external auth provider.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn current_caller(&self) -> Caller;
}
