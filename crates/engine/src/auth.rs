//! Credential store.
//!
//! One JSON document (`users.json`) mapping username to an Argon2 password
//! hash, a global role and per-space grants. Rewritten atomically on every
//! mutation. A missing store bootstraps a default `admin`/`admin`
//! credential so a fresh instance is administrable.

use crate::atomic_write;
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axon_core::error::{Error, Result};
use axon_core::{Role, UserInfo};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

const USERS_FILE: &str = "users.json";

/// Bootstrap credential for a fresh instance
const DEFAULT_ADMIN: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    /// Argon2 PHC string (embeds the per-credential salt)
    password_verifier: String,
    role: Role,
    #[serde(default)]
    permissions: HashMap<String, Role>,
}

/// Persistent username -> credential map
pub struct AuthStore {
    path: PathBuf,
    users: RwLock<HashMap<String, UserRecord>>,
}

impl AuthStore {
    /// Open the store under the instance base directory, creating the
    /// default admin credential when no store exists yet.
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref();
        std::fs::create_dir_all(base)?;
        let path = base.join(USERS_FILE);

        let users: HashMap<String, UserRecord> = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            let mut users = HashMap::new();
            users.insert(
                DEFAULT_ADMIN.to_string(),
                UserRecord {
                    password_verifier: hash_password(DEFAULT_ADMIN)?,
                    role: Role::Admin,
                    permissions: HashMap::new(),
                },
            );
            info!("created default admin credential");
            users
        };

        let store = AuthStore {
            path,
            users: RwLock::new(users),
        };
        store.persist()?;
        Ok(store)
    }

    /// Verify a login, returning the user's view on success.
    pub fn verify(&self, username: &str, password: &str) -> Result<UserInfo> {
        let users = self.users.read();
        let record = users
            .get(username)
            .ok_or_else(|| Error::AuthFailed(format!("unknown user: {}", username)))?;

        let parsed = PasswordHash::new(&record.password_verifier)
            .map_err(|e| Error::Storage(format!("corrupt password hash: {}", e)))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| Error::AuthFailed("invalid password".into()))?;

        Ok(UserInfo {
            username: username.to_string(),
            role: record.role,
            permissions: record.permissions.clone(),
        })
    }

    /// Create a user with a global role.
    pub fn create_user(&self, username: &str, password: &str, role: Role) -> Result<()> {
        if username.is_empty() {
            return Err(Error::InvalidInput("username cannot be empty".into()));
        }
        {
            let mut users = self.users.write();
            if users.contains_key(username) {
                return Err(Error::UserExists(username.to_string()));
            }
            users.insert(
                username.to_string(),
                UserRecord {
                    password_verifier: hash_password(password)?,
                    role,
                    permissions: HashMap::new(),
                },
            );
        }
        self.persist()
    }

    /// Delete a user.
    pub fn delete_user(&self, username: &str) -> Result<()> {
        {
            let mut users = self.users.write();
            if users.remove(username).is_none() {
                return Err(Error::UserNotFound(username.to_string()));
            }
        }
        self.persist()
    }

    /// Grant a per-space role to a user.
    pub fn grant(&self, username: &str, space: &str, role: Role) -> Result<()> {
        {
            let mut users = self.users.write();
            let record = users
                .get_mut(username)
                .ok_or_else(|| Error::UserNotFound(username.to_string()))?;
            record.permissions.insert(space.to_string(), role);
        }
        self.persist()
    }

    /// All usernames, sorted.
    pub fn list_users(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn persist(&self) -> Result<()> {
        let users = self.users.read();
        let json = serde_json::to_vec_pretty(&*users)?;
        atomic_write(&self.path, &json)
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Storage(format!("password hashing failed: {}", e)))?
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_admin_bootstrap() {
        let dir = TempDir::new().unwrap();
        let store = AuthStore::open(dir.path()).unwrap();

        let user = store.verify("admin", "admin").unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(user.is_admin());
    }

    #[test]
    fn test_bad_password_and_unknown_user() {
        let dir = TempDir::new().unwrap();
        let store = AuthStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.verify("admin", "wrong"),
            Err(Error::AuthFailed(_))
        ));
        assert!(matches!(
            store.verify("ghost", "pw"),
            Err(Error::AuthFailed(_))
        ));
    }

    #[test]
    fn test_create_verify_delete_user() {
        let dir = TempDir::new().unwrap();
        let store = AuthStore::open(dir.path()).unwrap();

        store.create_user("alice", "secret", Role::Read).unwrap();
        let user = store.verify("alice", "secret").unwrap();
        assert_eq!(user.role, Role::Read);

        assert!(matches!(
            store.create_user("alice", "other", Role::Write),
            Err(Error::UserExists(_))
        ));

        store.delete_user("alice").unwrap();
        assert!(store.verify("alice", "secret").is_err());
        assert!(matches!(
            store.delete_user("alice"),
            Err(Error::UserNotFound(_))
        ));
    }

    #[test]
    fn test_grants_survive_reload() {
        let dir = TempDir::new().unwrap();
        {
            let store = AuthStore::open(dir.path()).unwrap();
            store.create_user("bob", "pw", Role::Read).unwrap();
            store.grant("bob", "orders", Role::Write).unwrap();
        }

        let store = AuthStore::open(dir.path()).unwrap();
        let user = store.verify("bob", "pw").unwrap();
        assert!(user.can_write("orders"));
        assert!(!user.can_write("other"));
        assert!(user.can_read("other"));
    }

    #[test]
    fn test_existing_admin_password_not_reset() {
        let dir = TempDir::new().unwrap();
        {
            let store = AuthStore::open(dir.path()).unwrap();
            store.delete_user("admin").unwrap();
            store.create_user("admin", "changed", Role::Admin).unwrap();
        }
        let store = AuthStore::open(dir.path()).unwrap();
        assert!(store.verify("admin", "admin").is_err());
        assert!(store.verify("admin", "changed").is_ok());
    }

    #[test]
    fn test_list_users() {
        let dir = TempDir::new().unwrap();
        let store = AuthStore::open(dir.path()).unwrap();
        store.create_user("zed", "pw", Role::Write).unwrap();
        store.create_user("amy", "pw", Role::Read).unwrap();
        assert_eq!(store.list_users(), vec!["admin", "amy", "zed"]);
    }
}
