//! UserDirectory - caller identity lookup
//!
//! The hub only needs a user's roles (to gate camera access) and the
//! preferred video codec; where users are stored is outside this crate.
//! `StaticUserDirectory` serves the `CAMHUB_USERS` list.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Default codec for video clips when none is configured
pub const DEFAULT_CODEC: &str = "h264";

/// Roles and preferences of a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub roles: BTreeSet<String>,
    pub default_codec: String,
}

impl UserInfo {
    pub fn new(name: impl Into<String>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            default_codec: DEFAULT_CODEC.to_string(),
        }
    }

    /// True when any of the caller's roles is in `allowed`
    pub fn has_any_role(&self, allowed: &BTreeSet<String>) -> bool {
        !self.roles.is_disjoint(allowed)
    }
}

/// Caller lookup
pub trait UserDirectory: Send + Sync {
    fn user_info(&self, name: &str) -> Option<UserInfo>;
}

/// Fixed in-memory user list
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: HashMap<String, UserInfo>,
}

impl StaticUserDirectory {
    pub fn new(users: impl IntoIterator<Item = UserInfo>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.name.clone(), u)).collect(),
        }
    }

    /// Parse `name:role|role;name:role`
    ///
    /// A trailing `@codec` on the name sets the user's default codec
    /// (`alice@h265:admin`).
    pub fn from_spec(spec: &str) -> Result<Self> {
        let mut users = Vec::new();
        for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (head, roles) = entry
                .split_once(':')
                .ok_or_else(|| Error::Config(format!("Invalid user entry '{}'", entry)))?;

            let (name, codec) = match head.split_once('@') {
                Some((name, codec)) => (name.trim(), Some(codec.trim())),
                None => (head.trim(), None),
            };
            if name.is_empty() {
                return Err(Error::Config(format!("Missing user name in '{}'", entry)));
            }

            let roles: Vec<&str> = roles
                .split('|')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .collect();

            let mut user = UserInfo::new(name, roles);
            if let Some(codec) = codec.filter(|c| !c.is_empty()) {
                user.default_codec = codec.to_string();
            }
            users.push(user);
        }
        Ok(Self::new(users))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for StaticUserDirectory {
    fn user_info(&self, name: &str) -> Option<UserInfo> {
        self.users.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec() {
        let dir = StaticUserDirectory::from_spec("alice:admin|user; bob@h265:viewer ;").unwrap();
        assert_eq!(dir.len(), 2);

        let alice = dir.user_info("alice").unwrap();
        assert!(alice.roles.contains("admin"));
        assert!(alice.roles.contains("user"));
        assert_eq!(alice.default_codec, DEFAULT_CODEC);

        let bob = dir.user_info("bob").unwrap();
        assert_eq!(bob.default_codec, "h265");
        assert!(dir.user_info("carol").is_none());
    }

    #[test]
    fn test_from_spec_rejects_malformed() {
        assert!(StaticUserDirectory::from_spec("alice").is_err());
        assert!(StaticUserDirectory::from_spec(":admin").is_err());
        assert!(StaticUserDirectory::from_spec("").unwrap().is_empty());
    }

    #[test]
    fn test_has_any_role() {
        let user = UserInfo::new("alice", ["user"]);
        let allowed: BTreeSet<String> = ["admin", "user"].iter().map(|s| s.to_string()).collect();
        assert!(user.has_any_role(&allowed));

        let user = UserInfo::new("eve", ["guest"]);
        assert!(!user.has_any_role(&allowed));
    }
}
