// # Authorization
//
// Role-based access control plus per-topic ACLs. A user is allowed an action
// when a global permission covers it, or when the topic named by a
// `topic:<name>` resource grants it to them directly.

use crate::error::{BusError, Result};
use crate::security::authentication::User;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

/// Resource prefix for topic-scoped permissions.
const TOPIC_RESOURCE_PREFIX: &str = "topic:";

/// RBAC and topic ACL registry.
pub struct AuthorizationManager {
    enabled: bool,
    topic_level_permissions: bool,
    role_permissions: DashMap<String, HashSet<String>>,
    /// topic -> user id -> granted actions
    topic_acl: DashMap<String, HashMap<String, HashSet<String>>>,
}

impl AuthorizationManager {
    pub fn new(enabled: bool, topic_level_permissions: bool) -> Self {
        let manager = Self {
            enabled,
            topic_level_permissions,
            role_permissions: DashMap::new(),
            topic_acl: DashMap::new(),
        };
        manager.install_default_roles();
        manager
    }

    fn install_default_roles(&self) {
        let defaults: [(&str, &[&str]); 4] = [
            ("admin", &["read", "write", "delete", "manage"]),
            ("producer", &["write"]),
            ("consumer", &["read"]),
            ("user", &["read", "write"]),
        ];
        for (role, permissions) in defaults {
            self.role_permissions.insert(
                role.to_string(),
                permissions.iter().map(|p| p.to_string()).collect(),
            );
        }
    }

    pub fn create_role(&self, role: &str, permissions: HashSet<String>) {
        tracing::info!(role = %role, ?permissions, "role created");
        self.role_permissions.insert(role.to_string(), permissions);
    }

    /// Grant a role's permission set to the user record.
    pub fn assign_role(&self, user: &mut User, role: &str) -> Result<()> {
        let permissions = self
            .role_permissions
            .get(role)
            .ok_or_else(|| BusError::Internal(format!("unknown role {role}")))?;
        user.roles.insert(role.to_string());
        user.permissions.extend(permissions.iter().cloned());
        Ok(())
    }

    pub fn grant_topic_permission(&self, topic: &str, user_id: &str, actions: HashSet<String>) {
        let mut acl = self.topic_acl.entry(topic.to_string()).or_default();
        acl.entry(user_id.to_string()).or_default().extend(actions);
    }

    pub fn revoke_topic_permissions(&self, topic: &str) {
        self.topic_acl.remove(topic);
    }

    /// Permission decision: global permission first, then the topic ACL for
    /// `topic:<name>` resources.
    pub fn check_permission(&self, user: &User, resource: &str, action: &str) -> bool {
        if !self.enabled {
            return true;
        }

        if user.has_permission(action) {
            return true;
        }

        if self.topic_level_permissions {
            if let Some(topic) = resource.strip_prefix(TOPIC_RESOURCE_PREFIX) {
                if let Some(acl) = self.topic_acl.get(topic) {
                    if let Some(granted) = acl.get(&user.id) {
                        return granted.contains(action);
                    }
                }
            }
        }

        false
    }

    /// Effective permissions: the user's own set plus topic grants.
    pub fn user_permissions(&self, user: &User, topic: Option<&str>) -> HashSet<String> {
        let mut permissions = user.permissions.clone();
        if let (true, Some(topic)) = (self.topic_level_permissions, topic) {
            if let Some(acl) = self.topic_acl.get(topic) {
                if let Some(granted) = acl.get(&user.id) {
                    permissions.extend(granted.iter().cloned());
                }
            }
        }
        permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            username: "ada".to_string(),
            email: None,
            roles: HashSet::new(),
            permissions: HashSet::new(),
            api_keys: HashSet::new(),
            created_at_ms: 0,
            last_login_ms: None,
            is_active: true,
        }
    }

    #[test]
    fn test_default_roles() {
        let manager = AuthorizationManager::new(true, true);
        let mut u = user();
        manager.assign_role(&mut u, "producer").unwrap();
        assert!(u.has_role("producer"));
        assert!(manager.check_permission(&u, "topic:vitals", "write"));
        assert!(!manager.check_permission(&u, "topic:vitals", "read"));

        assert!(manager.assign_role(&mut u, "chief-of-staff").is_err());
    }

    #[test]
    fn test_topic_acl_grants() {
        let manager = AuthorizationManager::new(true, true);
        let u = user();
        assert!(!manager.check_permission(&u, "topic:vitals", "read"));

        manager.grant_topic_permission("vitals", &u.id, HashSet::from(["read".to_string()]));
        assert!(manager.check_permission(&u, "topic:vitals", "read"));
        // The grant is scoped to that topic.
        assert!(!manager.check_permission(&u, "topic:billing", "read"));
        // And to the granted action.
        assert!(!manager.check_permission(&u, "topic:vitals", "write"));
    }

    #[test]
    fn test_effective_permissions_merge() {
        let manager = AuthorizationManager::new(true, true);
        let mut u = user();
        manager.assign_role(&mut u, "consumer").unwrap();
        manager.grant_topic_permission("vitals", &u.id, HashSet::from(["manage".to_string()]));

        let effective = manager.user_permissions(&u, Some("vitals"));
        assert!(effective.contains("read"));
        assert!(effective.contains("manage"));
        assert!(!effective.contains("write"));
    }

    #[test]
    fn test_disabled_authorization_allows_all() {
        let manager = AuthorizationManager::new(false, true);
        let u = user();
        assert!(manager.check_permission(&u, "topic:anything", "delete"));
    }
}
