// # Authentication
//
// Opaque API keys and compact HMAC-SHA256 signed bearer tokens. A token
// carries the user id, roles, issuer and expiry; verification checks the
// signature, issuer, expiry and that the user is still active.

use crate::error::{BusError, Result};
use crate::util::SharedClock;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashSet;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// An authenticated principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub roles: HashSet<String>,
    pub permissions: HashSet<String>,
    pub api_keys: HashSet<String>,
    pub created_at_ms: u64,
    pub last_login_ms: Option<u64>,
    pub is_active: bool,
}

impl User {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Signed token claims.
#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    name: String,
    roles: Vec<String>,
    iss: String,
    iat: u64,
    exp: u64,
}

/// User and credential registry.
pub struct AuthenticationManager {
    users: DashMap<String, User>,
    /// api key -> user id
    api_keys: DashMap<String, String>,
    token_secret: Vec<u8>,
    token_issuer: String,
    token_ttl_ms: u64,
    api_key_length: usize,
    max_api_keys_per_user: usize,
    clock: SharedClock,
}

impl AuthenticationManager {
    pub fn new(
        token_issuer: String,
        token_ttl_ms: u64,
        api_key_length: usize,
        max_api_keys_per_user: usize,
        clock: SharedClock,
    ) -> Self {
        let mut token_secret = vec![0u8; 32];
        rand::rng().fill_bytes(&mut token_secret);
        Self {
            users: DashMap::new(),
            api_keys: DashMap::new(),
            token_secret,
            token_issuer,
            token_ttl_ms,
            api_key_length,
            max_api_keys_per_user,
            clock,
        }
    }

    // ------------------------------------------------------------------
    // User management
    // ------------------------------------------------------------------

    pub fn create_user(
        &self,
        username: &str,
        email: Option<String>,
        roles: HashSet<String>,
        permissions: HashSet<String>,
    ) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email,
            roles,
            permissions,
            api_keys: HashSet::new(),
            created_at_ms: self.clock.now_ms(),
            last_login_ms: None,
            is_active: true,
        };
        tracing::info!(username = %user.username, user_id = %user.id, "user created");
        self.users.insert(user.id.clone(), user.clone());
        user
    }

    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).map(|u| u.clone())
    }

    /// Persist changes to an existing user record (role grants and the like).
    pub fn update_user(&self, user: &User) {
        self.users.insert(user.id.clone(), user.clone());
    }

    /// Deactivate a user, revoking every API key they hold.
    pub fn deactivate_user(&self, user_id: &str) -> bool {
        let mut user = match self.users.get_mut(user_id) {
            Some(user) => user,
            None => return false,
        };
        user.is_active = false;
        for key in user.api_keys.drain() {
            self.api_keys.remove(&key);
        }
        tracing::info!(user_id = %user_id, "user deactivated");
        true
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn active_user_count(&self) -> usize {
        self.users.iter().filter(|u| u.is_active).count()
    }

    pub fn api_key_count(&self) -> usize {
        self.api_keys.len()
    }

    // ------------------------------------------------------------------
    // API keys
    // ------------------------------------------------------------------

    pub fn generate_api_key(&self, user_id: &str) -> Result<String> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| BusError::Unauthorized(format!("unknown user {user_id}")))?;
        if user.api_keys.len() >= self.max_api_keys_per_user {
            return Err(BusError::LimitExceeded(format!(
                "user {user_id} already holds {} api keys",
                user.api_keys.len()
            )));
        }

        let mut raw = vec![0u8; 32];
        rand::rng().fill_bytes(&mut raw);
        let mut key = URL_SAFE_NO_PAD.encode(raw);
        key.truncate(self.api_key_length);

        user.api_keys.insert(key.clone());
        self.api_keys.insert(key.clone(), user_id.to_string());
        Ok(key)
    }

    pub fn revoke_api_key(&self, api_key: &str) -> bool {
        match self.api_keys.remove(api_key) {
            Some((_, user_id)) => {
                if let Some(mut user) = self.users.get_mut(&user_id) {
                    user.api_keys.remove(api_key);
                }
                true
            }
            None => false,
        }
    }

    pub fn authenticate_api_key(&self, api_key: &str) -> Option<User> {
        let user_id = self.api_keys.get(api_key)?.clone();
        let mut user = self.users.get_mut(&user_id)?;
        if !user.is_active {
            return None;
        }
        user.last_login_ms = Some(self.clock.now_ms());
        Some(user.clone())
    }

    // ------------------------------------------------------------------
    // Bearer tokens
    // ------------------------------------------------------------------

    pub fn issue_token(&self, user_id: &str) -> Result<String> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| BusError::Unauthorized(format!("unknown user {user_id}")))?;

        let now_ms = self.clock.now_ms();
        let claims = TokenClaims {
            sub: user.id.clone(),
            name: user.username.clone(),
            roles: user.roles.iter().cloned().collect(),
            iss: self.token_issuer.clone(),
            iat: now_ms / 1_000,
            exp: (now_ms + self.token_ttl_ms) / 1_000,
        };

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signing_input = format!("{header}.{body}");
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);

        user.last_login_ms = Some(now_ms);
        Ok(format!("{signing_input}.{signature}"))
    }

    pub fn authenticate_token(&self, token: &str) -> Option<User> {
        let mut segments = token.splitn(3, '.');
        let header = segments.next()?;
        let body = segments.next()?;
        let signature = segments.next()?;

        let signing_input = format!("{header}.{body}");
        let provided = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.token_secret).ok()?;
        mac.update(signing_input.as_bytes());
        if mac.verify_slice(&provided).is_err() {
            tracing::warn!("bearer token signature mismatch");
            return None;
        }

        let claims: TokenClaims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(body).ok()?).ok()?;
        if claims.iss != self.token_issuer {
            tracing::warn!(issuer = %claims.iss, "bearer token from foreign issuer");
            return None;
        }
        if claims.exp <= self.clock.now_ms() / 1_000 {
            tracing::debug!("bearer token expired");
            return None;
        }

        let mut user = self.users.get_mut(&claims.sub)?;
        if !user.is_active {
            return None;
        }
        user.last_login_ms = Some(self.clock.now_ms());
        Some(user.clone())
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.token_secret)
            .map_err(|e| BusError::Internal(format!("hmac init: {e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;
    use std::sync::Arc;

    fn manager() -> (AuthenticationManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let manager = AuthenticationManager::new(
            "pulsebus".to_string(),
            3_600_000,
            32,
            4,
            clock.clone(),
        );
        (manager, clock)
    }

    fn any_user(manager: &AuthenticationManager) -> User {
        manager.create_user("ada", None, HashSet::new(), HashSet::new())
    }

    #[test]
    fn test_api_key_round_trip() {
        let (manager, _) = manager();
        let user = any_user(&manager);
        let key = manager.generate_api_key(&user.id).unwrap();
        assert_eq!(key.len(), 32);

        let authenticated = manager.authenticate_api_key(&key).unwrap();
        assert_eq!(authenticated.id, user.id);
        assert!(authenticated.last_login_ms.is_some());

        assert!(manager.revoke_api_key(&key));
        assert!(manager.authenticate_api_key(&key).is_none());
    }

    #[test]
    fn test_api_key_cap() {
        let (manager, _) = manager();
        let user = any_user(&manager);
        for _ in 0..4 {
            manager.generate_api_key(&user.id).unwrap();
        }
        let err = manager.generate_api_key(&user.id).unwrap_err();
        assert!(matches!(err, BusError::LimitExceeded(_)));
    }

    #[test]
    fn test_token_round_trip_and_expiry() {
        let (manager, clock) = manager();
        let user = any_user(&manager);
        let token = manager.issue_token(&user.id).unwrap();

        let authenticated = manager.authenticate_token(&token).unwrap();
        assert_eq!(authenticated.id, user.id);

        clock.advance_ms(3_600_001);
        assert!(manager.authenticate_token(&token).is_none());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let (manager, _) = manager();
        let user = any_user(&manager);
        let token = manager.issue_token(&user.id).unwrap();

        let mut tampered = token.clone();
        tampered.replace_range(token.len() - 2.., "xx");
        assert!(manager.authenticate_token(&tampered).is_none());

        // A token from a manager with a different secret is rejected too.
        let (other, _) = self::manager();
        let other_user = other.create_user("eve", None, HashSet::new(), HashSet::new());
        let foreign = other.issue_token(&other_user.id).unwrap();
        assert!(manager.authenticate_token(&foreign).is_none());
    }

    #[test]
    fn test_deactivation_revokes_everything() {
        let (manager, _) = manager();
        let user = any_user(&manager);
        let key = manager.generate_api_key(&user.id).unwrap();
        let token = manager.issue_token(&user.id).unwrap();

        assert!(manager.deactivate_user(&user.id));
        assert!(manager.authenticate_api_key(&key).is_none());
        assert!(manager.authenticate_token(&token).is_none());
        assert_eq!(manager.active_user_count(), 0);
        assert_eq!(manager.api_key_count(), 0);
    }
}
