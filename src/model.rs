//! Platform state objects a light client can ask for
//!
//! These are the decoded forms of the payloads carried in responses. They
//! are plain values: decoding always allocates fresh ones, nothing borrows
//! from the response buffer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 32-byte platform identifier (identities, contracts, documents)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier([u8; 32]);

impl Identifier {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", hex::encode(self.0))
    }
}

/// 20-byte hash160 of a public key
pub type PublicKeyHash = [u8; 20];

/// Identity key algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    EcdsaSecp256k1,
    Bls12_381,
    EcdsaHash160,
    Bip13ScriptHash,
    EddsaHash160,
}

impl KeyType {
    /// Exact length of the key data for this type
    pub fn data_len(self) -> usize {
        match self {
            KeyType::EcdsaSecp256k1 => 33,
            KeyType::Bls12_381 => 48,
            KeyType::EcdsaHash160 | KeyType::Bip13ScriptHash | KeyType::EddsaHash160 => 20,
        }
    }
}

/// What an identity key may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Purpose {
    Authentication,
    Encryption,
    Decryption,
    Withdraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityLevel {
    Master,
    Critical,
    High,
    Medium,
}

/// Public key registered on an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPublicKey {
    /// Key id, unique within the identity
    pub id: u32,
    pub key_type: KeyType,
    pub purpose: Purpose,
    pub security_level: SecurityLevel,
    /// Raw key material, length depends on `key_type`
    pub data: Vec<u8>,
    pub read_only: bool,
    /// Block time (ms) at which the key was disabled
    pub disabled_at: Option<u64>,
}

impl IdentityPublicKey {
    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some()
    }
}

/// Platform identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Identifier,
    /// Keys by key id
    pub public_keys: BTreeMap<u32, IdentityPublicKey>,
    /// Credit balance
    pub balance: u64,
    pub revision: u64,
}

impl Identity {
    /// Keys that are still enabled
    pub fn active_keys(&self) -> impl Iterator<Item = &IdentityPublicKey> {
        self.public_keys.values().filter(|key| !key.is_disabled())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAndRevision {
    pub balance: u64,
    pub revision: u64,
}

/// Property type in a document schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Integer,
    Text,
    Bytes,
    Boolean,
    Identifier,
}

/// Index over document properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub properties: Vec<String>,
    pub unique: bool,
}

/// Schema of one document type in a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentType {
    pub properties: BTreeMap<String, FieldType>,
    pub required: Vec<String>,
    pub indices: Vec<Index>,
}

/// Data contract: the schemas documents are stored under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataContract {
    pub id: Identifier,
    pub owner_id: Identifier,
    pub version: u32,
    /// Document types by name
    pub document_types: BTreeMap<String, DocumentType>,
}

impl DataContract {
    pub fn document_type(&self, name: &str) -> Option<&DocumentType> {
        self.document_types.get(name)
    }
}

/// One historical revision of a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractHistoryEntry {
    /// Block time (ms) the revision was stored at
    pub date_ms: u64,
    pub contract: DataContract,
}

/// Document property value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
    Boolean(bool),
    Identifier(Identifier),
}

/// Document stored under a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: Identifier,
    pub owner_id: Identifier,
    pub revision: Option<u64>,
    pub created_at: Option<u64>,
    pub updated_at: Option<u64>,
    pub properties: BTreeMap<String, Value>,
}
