//! Shared identifier and role types.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Store-assigned user identifier. Never reused, even after a rolled back insert.
pub type UserId = i64;

/// Role label carried in token claims and in the endpoint access map.
///
/// The store keeps roles as a boolean flag (`true` = admin); this is the string-typed view
/// used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoleLabel {
    User,
    Admin,
}

impl RoleLabel {
    pub fn is_admin(self) -> bool {
        matches!(self, RoleLabel::Admin)
    }

    /// Whether a caller holding `self` may call an endpoint that requires `required`.
    ///
    /// Admin satisfies every requirement.
    pub fn satisfies(self, required: RoleLabel) -> bool {
        self >= required
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoleLabel::User => "user",
            RoleLabel::Admin => "admin",
        }
    }
}

impl From<bool> for RoleLabel {
    fn from(is_admin: bool) -> Self {
        if is_admin { RoleLabel::Admin } else { RoleLabel::User }
    }
}

impl From<RoleLabel> for bool {
    fn from(role: RoleLabel) -> Self {
        role.is_admin()
    }
}

impl fmt::Display for RoleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method names recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditMethod {
    CreateUser,
    GetUser,
    UpdateUser,
    DeleteUser,
    Login,
    GetRole,
    LoadAccess,
    SeedAccess,
    BootstrapAdmin,
}

impl AuditMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditMethod::CreateUser => "Create user",
            AuditMethod::GetUser => "Get user",
            AuditMethod::UpdateUser => "Update user",
            AuditMethod::DeleteUser => "Delete user",
            AuditMethod::Login => "Login",
            AuditMethod::GetRole => "Get role",
            AuditMethod::LoadAccess => "Load endpoint access",
            AuditMethod::SeedAccess => "Seed endpoint access",
            AuditMethod::BootstrapAdmin => "Bootstrap admin",
        }
    }
}

impl fmt::Display for AuditMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(RoleLabel::Admin.satisfies(RoleLabel::User));
        assert!(RoleLabel::Admin.satisfies(RoleLabel::Admin));
        assert!(RoleLabel::User.satisfies(RoleLabel::User));
        assert!(!RoleLabel::User.satisfies(RoleLabel::Admin));
    }

    #[test]
    fn test_role_wire_format() {
        assert_eq!(serde_json::to_string(&RoleLabel::Admin).unwrap(), "\"admin\"");
        assert_eq!(serde_json::from_str::<RoleLabel>("\"user\"").unwrap(), RoleLabel::User);
        assert_eq!(RoleLabel::from(true), RoleLabel::Admin);
        assert!(!bool::from(RoleLabel::User));
    }
}
