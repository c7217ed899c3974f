//! Role-based authorization.
//!
//! # Rules
//!
//! | role      | own secrets | other secrets | grants | users, stats, restricted |
//! |-----------|-------------|---------------|--------|--------------------------|
//! | `user`    | read/write  | none          | no     | no                       |
//! | `manager` | read/write  | read/write    | yes    | no                       |
//! | `admin`   | read/write  | read/write    | yes    | yes                      |
//!
//! For any secret operation the decision is
//! `role in {admin, manager} || secret.created_by == session.username`.
//! Grants are recorded sharing metadata and never widen this rule.

use crate::auth::Session;
use crate::error::{Result, VaultError};
use crate::store::{SecretRecord, UserRole};

/// Something a session may attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadSecret,
    UpdateSecret,
    DeleteSecret,
    ManageGrants,
    ManageUsers,
    ViewStatistics,
    SetRestricted,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadSecret => "read secret",
            Self::UpdateSecret => "update secret",
            Self::DeleteSecret => "delete secret",
            Self::ManageGrants => "manage access grants",
            Self::ManageUsers => "manage users",
            Self::ViewStatistics => "view statistics",
            Self::SetRestricted => "set restricted visibility",
        }
    }

    fn is_secret_operation(&self) -> bool {
        matches!(self, Self::ReadSecret | Self::UpdateSecret | Self::DeleteSecret)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `role` sees and mutates every secret rather than only its own.
pub fn sees_all_secrets(role: UserRole) -> bool {
    matches!(role, UserRole::Admin | UserRole::Manager)
}

/// Pure decision table. `is_owner` only matters for secret operations.
pub fn allows(role: UserRole, op: Operation, is_owner: bool) -> bool {
    if op.is_secret_operation() {
        return sees_all_secrets(role) || is_owner;
    }
    match op {
        Operation::ManageGrants => sees_all_secrets(role),
        Operation::ManageUsers | Operation::ViewStatistics | Operation::SetRestricted => {
            role == UserRole::Admin
        }
        _ => false,
    }
}

/// Check a secret operation against the session.
///
/// # Errors
///
/// Returns [`VaultError::PermissionDenied`] naming the operation and secret.
pub fn authorize_secret(session: &Session, op: Operation, secret: &SecretRecord) -> Result<()> {
    let is_owner = secret.created_by == session.username();
    if allows(session.role(), op, is_owner) {
        return Ok(());
    }

    tracing::warn!(
        user = session.username(),
        role = %session.role(),
        secret_id = secret.id,
        operation = %op,
        "permission denied"
    );
    Err(VaultError::denied(format!("{op} {}", secret.id)))
}

/// Check an operation that is not tied to one secret.
pub fn authorize(session: &Session, op: Operation) -> Result<()> {
    if allows(session.role(), op, false) {
        return Ok(());
    }

    tracing::warn!(
        user = session.username(),
        role = %session.role(),
        operation = %op,
        "permission denied"
    );
    Err(VaultError::denied(op.as_str()))
}

/// The owner a listing must be restricted to, or `None` for every secret.
pub fn listing_owner(session: &Session) -> Option<&str> {
    if sees_all_secrets(session.role()) {
        None
    } else {
        Some(session.username())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_OPS: [Operation; 3] = [
        Operation::ReadSecret,
        Operation::UpdateSecret,
        Operation::DeleteSecret,
    ];

    #[test]
    fn user_only_touches_own_secrets() {
        for op in SECRET_OPS {
            assert!(allows(UserRole::User, op, true));
            assert!(!allows(UserRole::User, op, false));
        }
    }

    #[test]
    fn manager_and_admin_touch_any_secret() {
        for role in [UserRole::Manager, UserRole::Admin] {
            for op in SECRET_OPS {
                assert!(allows(role, op, false), "{role} {op}");
            }
        }
    }

    #[test]
    fn grants_need_manager_or_admin() {
        assert!(!allows(UserRole::User, Operation::ManageGrants, true));
        assert!(allows(UserRole::Manager, Operation::ManageGrants, false));
        assert!(allows(UserRole::Admin, Operation::ManageGrants, false));
    }

    #[test]
    fn admin_only_operations() {
        for op in [
            Operation::ManageUsers,
            Operation::ViewStatistics,
            Operation::SetRestricted,
        ] {
            assert!(allows(UserRole::Admin, op, false));
            assert!(!allows(UserRole::Manager, op, true));
            assert!(!allows(UserRole::User, op, true));
        }
    }
}
