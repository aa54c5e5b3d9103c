//! # Security Manager
//!
//! Authentication (API keys, signed bearer tokens), authorization (RBAC +
//! per-topic ACLs, IP policy, rate limiting), payload encryption with key
//! rotation, and the tamper-evident audit stream. Every decision emits
//! exactly one audit event.

pub mod audit;
pub mod authentication;
pub mod authorization;
pub mod encryption;
pub mod rate_limit;

pub use audit::{
    AuditEvent, AuditEventType, AuditLog, AuditQuery, AuditResult, AuditSink,
    DEFAULT_AUDIT_CAPACITY,
};
pub use authentication::{AuthenticationManager, User};
pub use authorization::AuthorizationManager;
pub use encryption::{EncryptedPayload, EncryptionAlgorithm, EncryptionEngine};
pub use rate_limit::RateLimiter;

use crate::error::{BusError, Result};
use crate::util::{system_clock, SharedClock};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ============================================================================
// Configuration
// ============================================================================

/// Security manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub authentication_enabled: bool,
    pub authorization_enabled: bool,
    pub audit_enabled: bool,

    pub encryption_enabled: bool,
    pub encryption_algorithm: EncryptionAlgorithm,
    pub encryption_key_bits: usize,
    pub key_rotation_interval_ms: u64,

    pub token_issuer: String,
    pub token_ttl_ms: u64,
    pub api_key_length: usize,
    pub max_api_keys_per_user: usize,

    pub default_permissions: HashSet<String>,
    pub topic_level_permissions: bool,

    pub audit_capacity: usize,
    pub sensitive_data_masking: bool,

    pub max_message_size: usize,
    pub rate_limiting_enabled: bool,
    pub max_requests_per_minute: usize,
    pub ip_whitelist: HashSet<String>,
    pub ip_blacklist: HashSet<String>,

    /// Maintenance loop cadence (rate-limit cleanup, key rotation)
    pub maintenance_interval_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            authentication_enabled: true,
            authorization_enabled: true,
            audit_enabled: true,
            encryption_enabled: true,
            encryption_algorithm: EncryptionAlgorithm::Hybrid,
            encryption_key_bits: 2048,
            key_rotation_interval_ms: 86_400_000, // 24h
            token_issuer: "pulsebus".to_string(),
            token_ttl_ms: 3_600_000, // 1h
            api_key_length: 32,
            max_api_keys_per_user: 16,
            default_permissions: HashSet::from(["read".to_string(), "write".to_string()]),
            topic_level_permissions: true,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            sensitive_data_masking: true,
            max_message_size: 10 * 1024 * 1024, // 10 MB
            rate_limiting_enabled: true,
            max_requests_per_minute: 1_000,
            ip_whitelist: HashSet::new(),
            ip_blacklist: HashSet::new(),
            maintenance_interval_ms: 3_600_000, // 1h
        }
    }
}

/// Caller credentials for authentication.
#[derive(Debug, Clone)]
pub enum AuthCredentials {
    ApiKey(String),
    Bearer(String),
}

impl AuthCredentials {
    fn scheme(&self) -> &'static str {
        match self {
            AuthCredentials::ApiKey(_) => "api_key",
            AuthCredentials::Bearer(_) => "bearer",
        }
    }
}

// ============================================================================
// Security manager
// ============================================================================

/// Message security manager.
pub struct SecurityManager {
    config: SecurityConfig,
    encryption: EncryptionEngine,
    authn: AuthenticationManager,
    authz: AuthorizationManager,
    rate_limiter: RateLimiter,
    audit: AuditLog,
    running: RwLock<bool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SecurityManager {
    pub fn new(config: SecurityConfig) -> Result<Arc<Self>> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: SecurityConfig, clock: SharedClock) -> Result<Arc<Self>> {
        let encryption = EncryptionEngine::new(
            config.encryption_algorithm,
            config.encryption_key_bits,
            config.key_rotation_interval_ms,
            clock.clone(),
        )?;
        let authn = AuthenticationManager::new(
            config.token_issuer.clone(),
            config.token_ttl_ms,
            config.api_key_length,
            config.max_api_keys_per_user,
            clock.clone(),
        );
        let authz = AuthorizationManager::new(
            config.authorization_enabled,
            config.topic_level_permissions,
        );
        let rate_limiter = RateLimiter::new(
            config.rate_limiting_enabled,
            config.max_requests_per_minute,
            clock.clone(),
        );
        let audit = AuditLog::new(
            config.audit_capacity,
            config.sensitive_data_masking,
            clock,
        );

        Ok(Arc::new(Self {
            encryption,
            authn,
            authz,
            rate_limiter,
            audit,
            running: RwLock::new(false),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            config,
        }))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut running = self.running.write();
            if *running {
                return Err(BusError::AlreadyRunning);
            }
            *running = true;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = self.clone();
        let interval = Duration::from_millis(self.config.maintenance_interval_ms.max(100));
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                manager.rate_limiter.cleanup();
                let rotated = manager.encryption.rotate_due_keys();
                if rotated > 0 {
                    tracing::info!(rotated, "encryption keys rotated");
                }
            }
        });

        *self.shutdown.lock() = Some(shutdown_tx);
        self.tasks.lock().push(task);
        tracing::info!("security manager started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        {
            let mut running = self.running.write();
            if !*running {
                return Ok(());
            }
            *running = false;
        }
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("security manager stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------

    /// Authenticate caller credentials. Every attempt is audited.
    pub fn authenticate(
        &self,
        credentials: &AuthCredentials,
        ip_address: Option<&str>,
    ) -> Result<User> {
        let user = match credentials {
            AuthCredentials::ApiKey(key) => self.authn.authenticate_api_key(key),
            AuthCredentials::Bearer(token) => self.authn.authenticate_token(token),
        };

        let resource = format!("auth:{}", credentials.scheme());
        let result = if user.is_some() {
            AuditResult::Success
        } else {
            AuditResult::Failure
        };
        self.audit.log_event(
            AuditEventType::Authentication,
            user.as_ref().map(|u| u.id.as_str()),
            &resource,
            "authenticate",
            result,
            ip_address,
            json!({"auth_type": credentials.scheme()})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );

        user.ok_or_else(|| BusError::Unauthorized("invalid credentials".to_string()))
    }

    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------

    /// Authorization decision chain: IP policy, then rate limit, then the
    /// permission check, short-circuiting on the first denial. Every decision
    /// is audited.
    pub fn authorize(
        &self,
        user: &User,
        resource: &str,
        action: &str,
        ip_address: Option<&str>,
    ) -> Result<()> {
        if let Some(ip) = ip_address {
            if self.config.ip_blacklist.contains(ip) {
                self.audit_denied(user, resource, action, ip_address, "ip_blacklisted");
                return Err(BusError::Forbidden("ip_blacklisted".to_string()));
            }
            if !self.config.ip_whitelist.is_empty() && !self.config.ip_whitelist.contains(ip) {
                self.audit_denied(user, resource, action, ip_address, "ip_not_whitelisted");
                return Err(BusError::Forbidden("ip_not_whitelisted".to_string()));
            }
        }

        if !self.rate_limiter.check(&user.id) {
            self.audit_denied(user, resource, action, ip_address, "rate_limit_exceeded");
            return Err(BusError::RateLimited(user.id.clone()));
        }

        let allowed = self.authz.check_permission(user, resource, action);
        self.audit.log_event(
            AuditEventType::Authorization,
            Some(&user.id),
            resource,
            action,
            if allowed {
                AuditResult::Success
            } else {
                AuditResult::Denied
            },
            ip_address,
            serde_json::Map::new(),
        );

        if allowed {
            Ok(())
        } else {
            Err(BusError::Forbidden(format!(
                "user {} lacks {action} on {resource}",
                user.username
            )))
        }
    }

    fn audit_denied(
        &self,
        user: &User,
        resource: &str,
        action: &str,
        ip_address: Option<&str>,
        reason: &str,
    ) {
        self.audit.log_event(
            AuditEventType::AccessDenied,
            Some(&user.id),
            resource,
            action,
            AuditResult::Denied,
            ip_address,
            json!({"reason": reason}).as_object().cloned().unwrap_or_default(),
        );
    }

    // ------------------------------------------------------------------
    // Payload crypto
    // ------------------------------------------------------------------

    pub fn encryption_enabled(&self) -> bool {
        self.config.encryption_enabled
    }

    pub fn encrypt_payload(&self, plaintext: &[u8], user: &User) -> Result<EncryptedPayload> {
        match self.encryption.encrypt(plaintext, "master") {
            Ok(payload) => {
                self.audit.log_event(
                    AuditEventType::Encryption,
                    Some(&user.id),
                    "message",
                    "encrypt",
                    AuditResult::Success,
                    None,
                    json!({"algorithm": payload.algorithm})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                );
                Ok(payload)
            }
            Err(e) => {
                self.audit.log_event(
                    AuditEventType::Encryption,
                    Some(&user.id),
                    "message",
                    "encrypt",
                    AuditResult::Error,
                    None,
                    json!({"error": e.to_string()}).as_object().cloned().unwrap_or_default(),
                );
                Err(e)
            }
        }
    }

    pub fn decrypt_payload(&self, payload: &EncryptedPayload, user: &User) -> Result<Vec<u8>> {
        match self.encryption.decrypt(payload) {
            Ok(plaintext) => {
                self.audit.log_event(
                    AuditEventType::Decryption,
                    Some(&user.id),
                    "message",
                    "decrypt",
                    AuditResult::Success,
                    None,
                    json!({"algorithm": payload.algorithm})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                );
                Ok(plaintext)
            }
            Err(e) => {
                self.audit.log_event(
                    AuditEventType::Decryption,
                    Some(&user.id),
                    "message",
                    "decrypt",
                    AuditResult::Error,
                    None,
                    json!({"error": e.to_string()}).as_object().cloned().unwrap_or_default(),
                );
                Err(e)
            }
        }
    }

    /// Enforce the configured payload size ceiling.
    pub fn validate_message_size(&self, size: usize) -> Result<()> {
        if size > self.config.max_message_size {
            return Err(BusError::PayloadTooLarge {
                size,
                limit: self.config.max_message_size,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Identity surface
    // ------------------------------------------------------------------

    pub fn create_user(&self, username: &str, email: Option<String>, roles: HashSet<String>) -> User {
        let mut user = self.authn.create_user(
            username,
            email,
            HashSet::new(),
            self.config.default_permissions.clone(),
        );
        for role in roles {
            if let Err(e) = self.authz.assign_role(&mut user, &role) {
                tracing::warn!(username = %username, role = %role, error = %e, "role grant skipped");
            }
        }
        self.authn.update_user(&user);
        user
    }

    pub fn generate_api_key(&self, user_id: &str) -> Result<String> {
        self.authn.generate_api_key(user_id)
    }

    pub fn revoke_api_key(&self, api_key: &str) -> bool {
        self.authn.revoke_api_key(api_key)
    }

    pub fn issue_token(&self, user_id: &str) -> Result<String> {
        self.authn.issue_token(user_id)
    }

    pub fn deactivate_user(&self, user_id: &str) -> bool {
        self.authn.deactivate_user(user_id)
    }

    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.authn.get_user(user_id)
    }

    pub fn create_role(&self, role: &str, permissions: HashSet<String>) {
        self.authz.create_role(role, permissions);
    }

    pub fn assign_role(&self, user_id: &str, role: &str) -> Result<()> {
        let mut user = self
            .authn
            .get_user(user_id)
            .ok_or_else(|| BusError::Unauthorized(format!("unknown user {user_id}")))?;
        self.authz.assign_role(&mut user, role)?;
        self.authn.update_user(&user);
        Ok(())
    }

    pub fn grant_topic_permission(&self, topic: &str, user_id: &str, actions: HashSet<String>) {
        self.authz.grant_topic_permission(topic, user_id, actions);
    }

    /// Drop every ACL entry for a deleted topic.
    pub fn revoke_topic_permissions(&self, topic: &str) {
        self.authz.revoke_topic_permissions(topic);
    }

    // ------------------------------------------------------------------
    // Audit surface
    // ------------------------------------------------------------------

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn audit_events(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        self.audit.query(query)
    }

    pub fn security_violations(&self, limit: usize) -> Vec<AuditEvent> {
        self.audit.security_violations(limit)
    }

    pub fn stats(&self) -> SecurityStatsSnapshot {
        SecurityStatsSnapshot {
            total_users: self.authn.user_count(),
            active_users: self.authn.active_user_count(),
            api_keys: self.authn.api_key_count(),
            audit_events: self.audit.len(),
            security_violations: self.audit.security_violations(usize::MAX).len(),
            encryption_enabled: self.config.encryption_enabled,
            encryption_algorithm: self.config.encryption_algorithm,
            encryption_keys: self.encryption.key_count(),
            rate_limited_users: self.rate_limiter.tracked_users(),
        }
    }
}

/// Security counters snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityStatsSnapshot {
    pub total_users: usize,
    pub active_users: usize,
    pub api_keys: usize,
    pub audit_events: usize,
    pub security_violations: usize,
    pub encryption_enabled: bool,
    pub encryption_algorithm: EncryptionAlgorithm,
    pub encryption_keys: usize,
    pub rate_limited_users: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;

    fn test_config() -> SecurityConfig {
        SecurityConfig {
            encryption_key_bits: 1024,
            max_requests_per_minute: 5,
            ..Default::default()
        }
    }

    fn manager() -> (Arc<SecurityManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let manager = SecurityManager::with_clock(test_config(), clock.clone()).unwrap();
        (manager, clock)
    }

    #[test]
    fn test_authenticate_api_key_audited() {
        let (manager, _) = manager();
        let user = manager.create_user("ada", None, HashSet::new());
        let key = manager.generate_api_key(&user.id).unwrap();

        let authenticated = manager
            .authenticate(&AuthCredentials::ApiKey(key), Some("10.0.0.1"))
            .unwrap();
        assert_eq!(authenticated.id, user.id);

        let err = manager
            .authenticate(&AuthCredentials::ApiKey("bogus".to_string()), None)
            .unwrap_err();
        assert!(matches!(err, BusError::Unauthorized(_)));

        let events = manager.audit_events(&AuditQuery {
            event_type: Some(AuditEventType::Authentication),
            ..Default::default()
        });
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_authorize_chain_order() {
        let (manager, _) = manager();
        let mut config = test_config();
        config.ip_blacklist.insert("10.6.6.6".to_string());
        let manager2 = SecurityManager::with_clock(config, Arc::new(ManualClock::new(0))).unwrap();

        let user = manager2.create_user("ada", None, HashSet::new());
        // Blacklisted IP loses even with valid permissions.
        let err = manager2
            .authorize(&user, "topic:vitals", "write", Some("10.6.6.6"))
            .unwrap_err();
        assert!(matches!(err, BusError::Forbidden(ref r) if r == "ip_blacklisted"));

        // Rate limiting kicks in after the window fills.
        let user = manager.create_user("bob", None, HashSet::new());
        for _ in 0..5 {
            manager.authorize(&user, "topic:vitals", "write", None).unwrap();
        }
        let err = manager
            .authorize(&user, "topic:vitals", "write", None)
            .unwrap_err();
        assert!(matches!(err, BusError::RateLimited(_)));
    }

    #[test]
    fn test_authorize_permission_denied_audited() {
        let (manager, _) = manager();
        let user = manager.authn.create_user("eve", None, HashSet::new(), HashSet::new());
        let err = manager
            .authorize(&user, "topic:vitals", "write", None)
            .unwrap_err();
        assert!(matches!(err, BusError::Forbidden(_)));
        assert_eq!(manager.security_violations(10).len(), 1);
    }

    #[test]
    fn test_whitelist_enforced_when_present() {
        let mut config = test_config();
        config.ip_whitelist.insert("10.0.0.1".to_string());
        let manager = SecurityManager::with_clock(config, Arc::new(ManualClock::new(0))).unwrap();
        let user = manager.create_user("ada", None, HashSet::new());

        assert!(manager.authorize(&user, "topic:vitals", "write", Some("10.0.0.1")).is_ok());
        let err = manager
            .authorize(&user, "topic:vitals", "write", Some("10.0.0.2"))
            .unwrap_err();
        assert!(matches!(err, BusError::Forbidden(ref r) if r == "ip_not_whitelisted"));
    }

    #[test]
    fn test_payload_crypto_round_trip() {
        let (manager, _) = manager();
        let user = manager.create_user("ada", None, HashSet::new());
        let payload = manager.encrypt_payload(b"bp 120/80", &user).unwrap();
        assert_eq!(manager.decrypt_payload(&payload, &user).unwrap(), b"bp 120/80");

        let encrypt_events = manager.audit_events(&AuditQuery {
            event_type: Some(AuditEventType::Encryption),
            ..Default::default()
        });
        assert_eq!(encrypt_events.len(), 1);
    }

    #[test]
    fn test_message_size_ceiling() {
        let (manager, _) = manager();
        assert!(manager.validate_message_size(1024).is_ok());
        let err = manager
            .validate_message_size(11 * 1024 * 1024)
            .unwrap_err();
        assert!(matches!(err, BusError::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_custom_roles_compose() {
        let (manager, _) = manager();
        manager.create_role(
            "auditor",
            HashSet::from(["read".to_string(), "audit".to_string()]),
        );
        let user = manager.authn.create_user("frank", None, HashSet::new(), HashSet::new());
        manager.assign_role(&user.id, "auditor").unwrap();

        let reloaded = manager.get_user(&user.id).unwrap();
        assert!(reloaded.has_role("auditor"));
        assert!(reloaded.has_permission("audit"));
        assert!(manager.assign_role(&user.id, "nonexistent").is_err());
    }

    #[test]
    fn test_stats_surface() {
        let (manager, _) = manager();
        let user = manager.create_user("ada", None, HashSet::from(["producer".to_string()]));
        manager.generate_api_key(&user.id).unwrap();

        let stats = manager.stats();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.active_users, 1);
        assert_eq!(stats.api_keys, 1);
        assert!(stats.encryption_enabled);
        assert_eq!(stats.encryption_keys, 2); // symmetric + asymmetric master
    }
}
