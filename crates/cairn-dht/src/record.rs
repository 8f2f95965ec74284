use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use cairn_crypto::{Signature, SigningKey, VerifyingKey};
use cairn_types::PeerId;

use crate::error::{DhtError, DhtResult};

/// Default namespace accepted by a fresh validator.
pub const SIGNED_NAMESPACE: &str = "/signed/";

/// A signed value record: `(key, value, author, signature over key‖value‖author)`.
///
/// The author's public key travels with the record so any receiver can check
/// both the signature and that the author id is the hash of that key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub author: PeerId,
    pub public_key: [u8; 32],
    pub signature: Signature,
}

impl SignedRecord {
    /// Create and sign a record.
    pub fn make(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, signer: &SigningKey) -> Self {
        let key = key.into();
        let value = value.into();
        let author = signer.peer_id();
        let blob = signing_blob(&key, &value, &author);
        Self {
            signature: signer.sign(&blob),
            public_key: *signer.verifying_key().as_bytes(),
            key,
            value,
            author,
        }
    }

    /// Verify the signature and that the author is the hash of the carried
    /// public key.
    pub fn verify(&self) -> DhtResult<()> {
        let vk = VerifyingKey::from_bytes(&self.public_key)
            .map_err(|_| DhtError::InvalidRecord("malformed public key"))?;
        if vk.peer_id() != self.author {
            return Err(DhtError::InvalidRecord("author does not match public key"));
        }
        let blob = signing_blob(&self.key, &self.value, &self.author);
        vk.verify(&blob, &self.signature)
            .map_err(|_| DhtError::InvalidRecord("bad signature"))
    }
}

/// The blob protected by a record signature: `key ‖ value ‖ author`.
fn signing_blob(key: &[u8], value: &[u8], author: &PeerId) -> Vec<u8> {
    let mut blob = Vec::with_capacity(key.len() + value.len() + 32);
    blob.extend_from_slice(key);
    blob.extend_from_slice(value);
    blob.extend_from_slice(author.as_bytes());
    blob
}

/// Namespace policy plus signature checks for inbound PUT_VALUE records.
pub struct RecordValidator {
    namespaces: Vec<String>,
}

impl RecordValidator {
    /// Validator accepting the default `/signed/` namespace.
    pub fn new() -> Self {
        Self {
            namespaces: vec![SIGNED_NAMESPACE.to_string()],
        }
    }

    /// Register an additional accepted key-prefix namespace.
    pub fn register(&mut self, prefix: impl Into<String>) {
        self.namespaces.push(prefix.into());
    }

    /// Full validation: namespace policy, author/key binding, signature.
    pub fn validate(&self, record: &SignedRecord) -> DhtResult<()> {
        let key = std::str::from_utf8(&record.key)
            .map_err(|_| DhtError::InvalidRecord("key is not utf-8"))?;
        if !self.namespaces.iter().any(|ns| key.starts_with(ns.as_str())) {
            return Err(DhtError::InvalidRecord("key outside registered namespaces"));
        }
        record.verify()
    }
}

impl Default for RecordValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Local store of validated records, keyed by record key.
pub struct RecordStore {
    records: RwLock<HashMap<Vec<u8>, SignedRecord>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, record: SignedRecord) {
        self.records
            .write()
            .expect("lock poisoned")
            .insert(record.key.clone(), record);
    }

    pub fn get(&self, key: &[u8]) -> Option<SignedRecord> {
        self.records.read().expect("lock poisoned").get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}
