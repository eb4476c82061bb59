//! Roles and per-space permissions.
//!
//! A user carries one global role plus an optional map of space-name to
//! role grants. `admin` is unconditionally allowed everywhere.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// User role, globally or on a single space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access
    Read,
    /// Read and write access
    Write,
    /// Full access, including space and user administration
    Admin,
}

impl Role {
    /// True when this role covers read-class commands
    pub fn can_read(&self) -> bool {
        matches!(self, Role::Read | Role::Write | Role::Admin)
    }

    /// True when this role covers write-class commands
    pub fn can_write(&self) -> bool {
        matches!(self, Role::Write | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Read => f.write_str("read"),
            Role::Write => f.write_str("write"),
            Role::Admin => f.write_str("admin"),
        }
    }
}

impl FromStr for Role {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "read" => Ok(Role::Read),
            "write" => Ok(Role::Write),
            "admin" => Ok(Role::Admin),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown role: {}",
                other
            ))),
        }
    }
}

/// Authenticated user view handed to the dispatcher (no credential material)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    /// Login name
    pub username: String,
    /// Global role
    pub role: Role,
    /// Per-space grants, space name to role
    #[serde(default)]
    pub permissions: HashMap<String, Role>,
}

impl UserInfo {
    /// Effective role on a space: the stronger of the global role and the grant
    fn effective_role(&self, space: &str) -> Role {
        match (self.role, self.permissions.get(space)) {
            (Role::Admin, _) => Role::Admin,
            (global, Some(&granted)) if granted.can_write() || !global.can_write() => granted,
            (global, _) => global,
        }
    }

    /// True for admins
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admin, or read/write granted on the space
    pub fn can_read(&self, space: &str) -> bool {
        self.effective_role(space).can_read()
    }

    /// Admin, or write granted on the space
    pub fn can_write(&self, space: &str) -> bool {
        self.effective_role(space).can_write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, grants: &[(&str, Role)]) -> UserInfo {
        UserInfo {
            username: "u".into(),
            role,
            permissions: grants
                .iter()
                .map(|(s, r)| (s.to_string(), *r))
                .collect(),
        }
    }

    #[test]
    fn test_admin_covers_everything() {
        let u = user(Role::Admin, &[]);
        assert!(u.is_admin());
        assert!(u.can_read("any"));
        assert!(u.can_write("any"));
    }

    #[test]
    fn test_reader_cannot_write() {
        let u = user(Role::Read, &[]);
        assert!(u.can_read("s"));
        assert!(!u.can_write("s"));
    }

    #[test]
    fn test_grant_elevates_single_space() {
        let u = user(Role::Read, &[("s", Role::Write)]);
        assert!(u.can_write("s"));
        assert!(!u.can_write("other"));
    }

    #[test]
    fn test_grant_does_not_demote_global_role() {
        let u = user(Role::Write, &[("s", Role::Read)]);
        assert!(u.can_write("s"));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("root".parse::<Role>().is_err());
    }
}
