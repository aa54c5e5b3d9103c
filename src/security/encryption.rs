// # Payload Encryption
//
// Symmetric (AES-256-GCM), asymmetric (RSA-OAEP-SHA256) and hybrid payload
// encryption with generation-windowed key rotation: rotation appends a new
// generation and retains the previous ones so in-flight ciphertext stays
// decryptable until its generation ages out of the window.

use crate::error::{BusError, Result};
use crate::util::SharedClock;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{HashMap, VecDeque};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// OAEP-SHA256 overhead: 2 × hash length + 2.
const OAEP_OVERHEAD: usize = 66;

/// Generations kept per key name across rotations.
const RETAINED_GENERATIONS: usize = 2;

/// Encryption scheme selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionAlgorithm {
    Symmetric,
    Asymmetric,
    Hybrid,
}

/// Wire form of an encrypted payload body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub encrypted: bool,
    pub algorithm: EncryptionAlgorithm,
    pub key_id: String,
    /// Base64 ciphertext (nonce-prefixed for the symmetric part)
    pub data: String,
    /// Base64 RSA-wrapped symmetric key; present iff `algorithm = hybrid`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
}

struct SymmetricGeneration {
    generation: u32,
    key: Key<Aes256Gcm>,
    created_ms: u64,
}

struct AsymmetricGeneration {
    generation: u32,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    created_ms: u64,
}

/// Key store and cipher front-end.
pub struct EncryptionEngine {
    scheme: EncryptionAlgorithm,
    rsa_bits: usize,
    rotation_interval_ms: u64,
    symmetric: Mutex<HashMap<String, VecDeque<SymmetricGeneration>>>,
    asymmetric: Mutex<HashMap<String, VecDeque<AsymmetricGeneration>>>,
    clock: SharedClock,
}

fn key_id(name: &str, generation: u32) -> String {
    format!("{name}.v{generation}")
}

fn parse_key_id(key_id: &str) -> Result<(&str, u32)> {
    let (name, generation) = key_id
        .rsplit_once(".v")
        .ok_or_else(|| BusError::Encryption(format!("malformed key id {key_id}")))?;
    let generation = generation
        .parse()
        .map_err(|_| BusError::Encryption(format!("malformed key id {key_id}")))?;
    Ok((name, generation))
}

impl EncryptionEngine {
    /// Build the engine and generate the master key material for the scheme.
    pub fn new(
        scheme: EncryptionAlgorithm,
        rsa_bits: usize,
        rotation_interval_ms: u64,
        clock: SharedClock,
    ) -> Result<Self> {
        let engine = Self {
            scheme,
            rsa_bits,
            rotation_interval_ms,
            symmetric: Mutex::new(HashMap::new()),
            asymmetric: Mutex::new(HashMap::new()),
            clock,
        };

        engine.generate_symmetric("master")?;
        if scheme != EncryptionAlgorithm::Symmetric {
            engine.generate_asymmetric("master")?;
        }
        Ok(engine)
    }

    pub fn scheme(&self) -> EncryptionAlgorithm {
        self.scheme
    }

    fn generate_symmetric(&self, name: &str) -> Result<String> {
        let mut store = self.symmetric.lock();
        let generations = store.entry(name.to_string()).or_default();
        let generation = generations.back().map(|g| g.generation + 1).unwrap_or(1);
        generations.push_back(SymmetricGeneration {
            generation,
            key: Aes256Gcm::generate_key(OsRng),
            created_ms: self.clock.now_ms(),
        });
        while generations.len() > RETAINED_GENERATIONS {
            generations.pop_front();
        }
        Ok(key_id(name, generation))
    }

    fn generate_asymmetric(&self, name: &str) -> Result<String> {
        let private_key = RsaPrivateKey::new(&mut OsRng, self.rsa_bits)
            .map_err(|e| BusError::Encryption(format!("rsa keygen: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);

        let mut store = self.asymmetric.lock();
        let generations = store.entry(name.to_string()).or_default();
        let generation = generations.back().map(|g| g.generation + 1).unwrap_or(1);
        generations.push_back(AsymmetricGeneration {
            generation,
            private_key,
            public_key,
            created_ms: self.clock.now_ms(),
        });
        while generations.len() > RETAINED_GENERATIONS {
            generations.pop_front();
        }
        Ok(key_id(name, generation))
    }

    // ------------------------------------------------------------------
    // Encrypt / decrypt
    // ------------------------------------------------------------------

    /// Encrypt under the configured scheme with the named key's newest
    /// generation.
    pub fn encrypt(&self, plaintext: &[u8], key_name: &str) -> Result<EncryptedPayload> {
        match self.scheme {
            EncryptionAlgorithm::Symmetric => self.encrypt_symmetric(plaintext, key_name),
            EncryptionAlgorithm::Asymmetric => self.encrypt_asymmetric(plaintext, key_name),
            EncryptionAlgorithm::Hybrid => self.encrypt_hybrid(plaintext, key_name),
        }
    }

    /// Decrypt a payload, locating the generation its `key_id` names. Fails
    /// when the generation has aged out of the retention window.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        if !payload.encrypted {
            return BASE64
                .decode(&payload.data)
                .map_err(|e| BusError::Encryption(format!("base64: {e}")));
        }
        match payload.algorithm {
            EncryptionAlgorithm::Symmetric => self.decrypt_symmetric(payload),
            EncryptionAlgorithm::Asymmetric => self.decrypt_asymmetric(payload),
            EncryptionAlgorithm::Hybrid => self.decrypt_hybrid(payload),
        }
    }

    fn encrypt_symmetric(&self, plaintext: &[u8], key_name: &str) -> Result<EncryptedPayload> {
        let store = self.symmetric.lock();
        let generation = store
            .get(key_name)
            .and_then(|g| g.back())
            .ok_or_else(|| BusError::Encryption(format!("unknown symmetric key {key_name}")))?;

        let sealed = seal_aes_gcm(&generation.key, plaintext)?;
        Ok(EncryptedPayload {
            encrypted: true,
            algorithm: EncryptionAlgorithm::Symmetric,
            key_id: key_id(key_name, generation.generation),
            data: BASE64.encode(sealed),
            encrypted_key: None,
        })
    }

    fn decrypt_symmetric(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        let (name, generation) = parse_key_id(&payload.key_id)?;
        let store = self.symmetric.lock();
        let entry = store
            .get(name)
            .and_then(|g| g.iter().find(|k| k.generation == generation))
            .ok_or_else(|| {
                BusError::Encryption(format!("symmetric key {} no longer retained", payload.key_id))
            })?;

        let sealed = BASE64
            .decode(&payload.data)
            .map_err(|e| BusError::Encryption(format!("base64: {e}")))?;
        open_aes_gcm(&entry.key, &sealed)
    }

    fn encrypt_asymmetric(&self, plaintext: &[u8], key_name: &str) -> Result<EncryptedPayload> {
        let capacity = self.rsa_bits / 8 - OAEP_OVERHEAD;
        if plaintext.len() > capacity {
            return Err(BusError::Encryption(format!(
                "payload of {} bytes exceeds asymmetric capacity {capacity}; callers must chunk",
                plaintext.len()
            )));
        }

        let store = self.asymmetric.lock();
        let generation = store
            .get(key_name)
            .and_then(|g| g.back())
            .ok_or_else(|| BusError::Encryption(format!("unknown asymmetric key {key_name}")))?;

        let ciphertext = generation
            .public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| BusError::Encryption(format!("rsa encrypt: {e}")))?;

        Ok(EncryptedPayload {
            encrypted: true,
            algorithm: EncryptionAlgorithm::Asymmetric,
            key_id: key_id(key_name, generation.generation),
            data: BASE64.encode(ciphertext),
            encrypted_key: None,
        })
    }

    fn decrypt_asymmetric(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        let (name, generation) = parse_key_id(&payload.key_id)?;
        let store = self.asymmetric.lock();
        let entry = store
            .get(name)
            .and_then(|g| g.iter().find(|k| k.generation == generation))
            .ok_or_else(|| {
                BusError::Encryption(format!("asymmetric key {} no longer retained", payload.key_id))
            })?;

        let ciphertext = BASE64
            .decode(&payload.data)
            .map_err(|e| BusError::Encryption(format!("base64: {e}")))?;
        entry
            .private_key
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .map_err(|e| BusError::Encryption(format!("rsa decrypt: {e}")))
    }

    fn encrypt_hybrid(&self, plaintext: &[u8], key_name: &str) -> Result<EncryptedPayload> {
        let ephemeral = Aes256Gcm::generate_key(OsRng);
        let sealed = seal_aes_gcm(&ephemeral, plaintext)?;

        let store = self.asymmetric.lock();
        let generation = store
            .get(key_name)
            .and_then(|g| g.back())
            .ok_or_else(|| BusError::Encryption(format!("unknown asymmetric key {key_name}")))?;

        let wrapped = generation
            .public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), ephemeral.as_slice())
            .map_err(|e| BusError::Encryption(format!("rsa wrap: {e}")))?;

        Ok(EncryptedPayload {
            encrypted: true,
            algorithm: EncryptionAlgorithm::Hybrid,
            key_id: key_id(key_name, generation.generation),
            data: BASE64.encode(sealed),
            encrypted_key: Some(BASE64.encode(wrapped)),
        })
    }

    fn decrypt_hybrid(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        let wrapped = payload
            .encrypted_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                BusError::Encryption("hybrid payload missing encrypted_key".to_string())
            })?;

        let (name, generation) = parse_key_id(&payload.key_id)?;
        let store = self.asymmetric.lock();
        let entry = store
            .get(name)
            .and_then(|g| g.iter().find(|k| k.generation == generation))
            .ok_or_else(|| {
                BusError::Encryption(format!("asymmetric key {} no longer retained", payload.key_id))
            })?;

        let wrapped = BASE64
            .decode(wrapped)
            .map_err(|e| BusError::Encryption(format!("base64: {e}")))?;
        let raw_key = entry
            .private_key
            .decrypt(Oaep::new::<Sha256>(), &wrapped)
            .map_err(|e| BusError::Encryption(format!("rsa unwrap: {e}")))?;
        if raw_key.len() != 32 {
            return Err(BusError::Encryption("unwrapped key has wrong length".to_string()));
        }
        let key = Key::<Aes256Gcm>::clone_from_slice(&raw_key);

        let sealed = BASE64
            .decode(&payload.data)
            .map_err(|e| BusError::Encryption(format!("base64: {e}")))?;
        open_aes_gcm(&key, &sealed)
    }

    // ------------------------------------------------------------------
    // Rotation
    // ------------------------------------------------------------------

    /// Regenerate every key whose newest generation is older than the
    /// rotation interval. Returns the number of rotated keys.
    pub fn rotate_due_keys(&self) -> usize {
        let now = self.clock.now_ms();
        let mut rotated = 0;

        let due_symmetric: Vec<String> = {
            let store = self.symmetric.lock();
            store
                .iter()
                .filter(|(_, generations)| {
                    generations
                        .back()
                        .map(|g| now.saturating_sub(g.created_ms) > self.rotation_interval_ms)
                        .unwrap_or(false)
                })
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in due_symmetric {
            if self.generate_symmetric(&name).is_ok() {
                tracing::info!(key = %name, "symmetric key rotated");
                rotated += 1;
            }
        }

        let due_asymmetric: Vec<String> = {
            let store = self.asymmetric.lock();
            store
                .iter()
                .filter(|(_, generations)| {
                    generations
                        .back()
                        .map(|g| now.saturating_sub(g.created_ms) > self.rotation_interval_ms)
                        .unwrap_or(false)
                })
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in due_asymmetric {
            if self.generate_asymmetric(&name).is_ok() {
                tracing::info!(key = %name, "asymmetric key rotated");
                rotated += 1;
            }
        }

        rotated
    }

    pub fn key_count(&self) -> usize {
        self.symmetric.lock().len() + self.asymmetric.lock().len()
    }
}

fn seal_aes_gcm(key: &Key<Aes256Gcm>, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| BusError::Encryption(format!("aes-gcm encrypt: {e}")))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open_aes_gcm(key: &Key<Aes256Gcm>, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(BusError::Encryption("ciphertext too short".to_string()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| BusError::Encryption(format!("aes-gcm decrypt: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;
    use std::sync::Arc;

    const TEST_RSA_BITS: usize = 1024;

    fn engine(scheme: EncryptionAlgorithm) -> (EncryptionEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let engine =
            EncryptionEngine::new(scheme, TEST_RSA_BITS, 86_400_000, clock.clone()).unwrap();
        (engine, clock)
    }

    #[test]
    fn test_symmetric_round_trip() {
        let (engine, _) = engine(EncryptionAlgorithm::Symmetric);
        let payload = engine.encrypt(b"pulse 72 bpm", "master").unwrap();
        assert_eq!(payload.algorithm, EncryptionAlgorithm::Symmetric);
        assert!(payload.encrypted_key.is_none());
        assert_eq!(engine.decrypt(&payload).unwrap(), b"pulse 72 bpm");
    }

    #[test]
    fn test_asymmetric_round_trip_and_capacity() {
        let (engine, _) = engine(EncryptionAlgorithm::Asymmetric);
        let payload = engine.encrypt(b"short secret", "master").unwrap();
        assert_eq!(engine.decrypt(&payload).unwrap(), b"short secret");

        // 1024-bit OAEP-SHA256 capacity is 62 bytes; larger must error.
        let oversized = vec![0u8; 63];
        let err = engine.encrypt(&oversized, "master").unwrap_err();
        assert!(matches!(err, BusError::Encryption(_)));
    }

    #[test]
    fn test_hybrid_round_trip_carries_wrapped_key() {
        let (engine, _) = engine(EncryptionAlgorithm::Hybrid);
        let body = vec![7u8; 4096]; // beyond RSA capacity, fine for hybrid
        let payload = engine.encrypt(&body, "master").unwrap();
        assert_eq!(payload.algorithm, EncryptionAlgorithm::Hybrid);
        assert!(payload
            .encrypted_key
            .as_deref()
            .map(|k| !k.is_empty())
            .unwrap_or(false));
        assert_eq!(engine.decrypt(&payload).unwrap(), body);
    }

    #[test]
    fn test_hybrid_without_wrapped_key_rejected() {
        let (engine, _) = engine(EncryptionAlgorithm::Hybrid);
        let mut payload = engine.encrypt(b"x", "master").unwrap();
        payload.encrypted_key = None;
        assert!(engine.decrypt(&payload).is_err());
    }

    #[test]
    fn test_rotation_retains_previous_generation() {
        let (engine, clock) = engine(EncryptionAlgorithm::Symmetric);
        let old = engine.encrypt(b"old data", "master").unwrap();

        clock.advance_ms(86_400_001);
        assert_eq!(engine.rotate_due_keys(), 1);

        // Old ciphertext still decrypts within the retention window.
        assert_eq!(engine.decrypt(&old).unwrap(), b"old data");

        // New ciphertext uses the new generation.
        let fresh = engine.encrypt(b"new data", "master").unwrap();
        assert_ne!(fresh.key_id, old.key_id);

        // A second rotation ages the first generation out.
        clock.advance_ms(86_400_001);
        assert_eq!(engine.rotate_due_keys(), 1);
        assert!(engine.decrypt(&old).is_err());
        assert_eq!(engine.decrypt(&fresh).unwrap(), b"new data");
    }

    #[test]
    fn test_wire_format() {
        let (engine, _) = engine(EncryptionAlgorithm::Hybrid);
        let payload = engine.encrypt(b"x", "master").unwrap();
        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire["encrypted"], serde_json::json!(true));
        assert_eq!(wire["algorithm"], serde_json::json!("hybrid"));
        assert!(wire["key_id"].as_str().unwrap().starts_with("master.v"));
        assert!(wire["data"].is_string());
        assert!(wire["encrypted_key"].is_string());
    }
}
