//! Authentication and administrative privilege
//!
//! Callers present a `user:password` token. Tokens resolve to a [`Principal`];
//! configuration changes, fencing and switchover controls require an admin
//! principal. Secrets are compared in constant time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::errors::{CdcError, CdcResult};

/// A configured user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub admin: bool,
}

impl UserEntry {
    pub fn new(name: impl Into<String>, password: impl Into<String>, admin: bool) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            admin,
        }
    }
}

/// Default administrative user.
pub fn default_users() -> Vec<UserEntry> {
    vec![UserEntry::new("root", "Milvus", true)]
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub admin: bool,
}

impl Principal {
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: true,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: false,
        }
    }

    pub fn require_admin(&self, action: &str) -> CdcResult<()> {
        if self.admin {
            Ok(())
        } else {
            Err(CdcError::permission_denied(format!(
                "user '{}' is not allowed to {}",
                self.name, action
            )))
        }
    }
}

/// Split `user:password`.
pub fn split_token(token: &str) -> Option<(&str, &str)> {
    let (user, password) = token.split_once(':')?;
    if user.is_empty() {
        None
    } else {
        Some((user, password))
    }
}

fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Users known to one cluster or to the operator
#[derive(Debug, Clone, Default)]
pub struct AuthTable {
    users: HashMap<String, UserEntry>,
}

impl AuthTable {
    pub fn new(users: impl IntoIterator<Item = UserEntry>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.name.clone(), u)).collect(),
        }
    }

    /// Resolve a token. Unknown users and wrong passwords are both `PermissionDenied`.
    pub fn authenticate(&self, token: &str) -> CdcResult<Principal> {
        let (name, password) = split_token(token)
            .ok_or_else(|| CdcError::permission_denied("malformed credential"))?;
        match self.users.get(name) {
            Some(user) if constant_time_str_eq(&user.password, password) => Ok(Principal {
                name: user.name.clone(),
                admin: user.admin,
            }),
            _ => Err(CdcError::permission_denied("invalid credential")),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AuthTable {
        AuthTable::new(vec![
            UserEntry::new("root", "Milvus", true),
            UserEntry::new("reader", "secret", false),
        ])
    }

    #[test]
    fn test_admin_token_resolves() {
        let principal = table().authenticate("root:Milvus").unwrap();
        assert!(principal.admin);
        assert!(principal.require_admin("update configuration").is_ok());
    }

    #[test]
    fn test_non_admin_denied_for_admin_actions() {
        let principal = table().authenticate("reader:secret").unwrap();
        let err = principal.require_admin("update configuration").unwrap_err();
        assert_eq!(err.code(), "XCDC_PERMISSION_DENIED");
    }

    #[test]
    fn test_bad_credentials() {
        assert!(table().authenticate("root:wrong").is_err());
        assert!(table().authenticate("ghost:Milvus").is_err());
        assert!(table().authenticate("no-colon").is_err());
        assert!(table().authenticate(":Milvus").is_err());
    }

    #[test]
    fn test_password_may_contain_colon() {
        let table = AuthTable::new(vec![UserEntry::new("u", "a:b", false)]);
        assert!(table.authenticate("u:a:b").is_ok());
    }
}
