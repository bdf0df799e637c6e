//! Queries, requests and responses exchanged with platform nodes
//!
//! A [`Request`] names one query kind plus whether the caller wants a
//! proof. A [`Response`] carries either plain data or a proof, never both;
//! the enum makes the other combinations unrepresentable.
//!
//! Requests and responses travel as bincode (fixed-width integers, no
//! trailing bytes allowed).

use crate::model::{Identifier, PublicKeyHash, Value};
use crate::transport::PlatformMethod;
use crate::{Error, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Largest request/response accepted off the wire
pub const MAX_WIRE_SIZE: u64 = 64 * 1024 * 1024;

/// Default page size
pub const DEFAULT_LIMIT: u32 = 100;

/// Largest page a node will serve
pub const MAX_LIMIT: u32 = 100;

const STATE_KEY_CONTEXT: &str = "platform-light-client/state-key/v1";

pub(crate) fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .with_limit(MAX_WIRE_SIZE)
}

/// Comparison operator in a document query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhereOperator {
    Equal,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
    In,
}

/// Condition on a document property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhereClause {
    pub field: String,
    pub operator: WhereOperator,
    /// For [`WhereOperator::In`] every element of `values` is a candidate,
    /// otherwise only the first one is used.
    pub values: Vec<Value>,
}

impl WhereClause {
    pub fn equal(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            operator: WhereOperator::Equal,
            values: vec![value],
        }
    }

    /// Whether a property value satisfies this clause.
    ///
    /// Ordering comparisons only apply to integers and text; anything
    /// else never matches them.
    pub fn matches(&self, value: &Value) -> bool {
        let Some(first) = self.values.first() else {
            return false;
        };
        match self.operator {
            WhereOperator::Equal => value == first,
            WhereOperator::In => self.values.iter().any(|candidate| candidate == value),
            op => match (value, first) {
                (Value::Integer(a), Value::Integer(b)) => compare(op, a.cmp(b)),
                (Value::Text(a), Value::Text(b)) => compare(op, a.cmp(b)),
                _ => false,
            },
        }
    }
}

fn compare(op: WhereOperator, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        WhereOperator::GreaterThan => ordering == Greater,
        WhereOperator::GreaterThanOrEquals => ordering != Less,
        WhereOperator::LessThan => ordering == Less,
        WhereOperator::LessThanOrEquals => ordering != Greater,
        WhereOperator::Equal => ordering == Equal,
        WhereOperator::In => false,
    }
}

/// Document query under a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentQuery {
    pub contract_id: Identifier,
    pub document_type: String,
    pub where_clauses: Vec<WhereClause>,
    /// `(property, ascending)`
    pub order_by: Vec<(String, bool)>,
    pub limit: u32,
    pub start_after: Option<Identifier>,
}

impl DocumentQuery {
    pub fn new(contract_id: Identifier, document_type: impl Into<String>) -> Self {
        Self {
            contract_id,
            document_type: document_type.into(),
            where_clauses: Vec::new(),
            order_by: Vec::new(),
            limit: DEFAULT_LIMIT,
            start_after: None,
        }
    }

    pub fn with_where(mut self, clause: WhereClause) -> Self {
        self.where_clauses.push(clause);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// What to prove about an identity in a [`Query::GetProofs`] batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityProofKind {
    FullIdentity,
    Balance,
    Keys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProofRequest {
    pub identity_id: Identifier,
    pub kind: IdentityProofKind,
}

impl IdentityProofRequest {
    pub fn new(identity_id: Identifier, kind: IdentityProofKind) -> Self {
        Self { identity_id, kind }
    }
}

/// One document in a [`Query::GetProofs`] batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentProofRequest {
    pub contract_id: Identifier,
    pub document_type: String,
    /// The document type stores every revision rather than the latest one
    pub document_type_keeps_history: bool,
    pub document_id: Identifier,
}

/// State a light client can ask a node for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Query {
    GetIdentity {
        id: Identifier,
    },
    GetIdentities {
        ids: Vec<Identifier>,
    },
    GetIdentityKeys {
        identity_id: Identifier,
        /// `None` asks for all keys
        key_ids: Option<Vec<u32>>,
        limit: u32,
    },
    GetIdentityBalance {
        id: Identifier,
    },
    GetIdentityBalanceAndRevision {
        id: Identifier,
    },
    GetDataContract {
        id: Identifier,
    },
    GetDataContracts {
        ids: Vec<Identifier>,
    },
    GetDataContractHistory {
        id: Identifier,
        /// Only revisions stored at or after this time (ms)
        start_at_ms: u64,
        limit: u32,
        offset: u32,
    },
    GetDocuments(DocumentQuery),
    GetIdentitiesByPublicKeyHashes {
        public_key_hashes: Vec<PublicKeyHash>,
    },
    GetIdentityByPublicKeyHash {
        public_key_hash: PublicKeyHash,
    },
    /// Several identities, contracts and documents proven under one root.
    /// Answers come back in request order.
    GetProofs {
        identities: Vec<IdentityProofRequest>,
        contracts: Vec<Identifier>,
        documents: Vec<DocumentProofRequest>,
    },
}

impl Query {
    /// RPC method that serves this query
    pub fn method(&self) -> PlatformMethod {
        match self {
            Query::GetIdentity { .. } => PlatformMethod::GetIdentity,
            Query::GetIdentities { .. } => PlatformMethod::GetIdentities,
            Query::GetIdentityKeys { .. } => PlatformMethod::GetIdentityKeys,
            Query::GetIdentityBalance { .. } => PlatformMethod::GetIdentityBalance,
            Query::GetIdentityBalanceAndRevision { .. } => {
                PlatformMethod::GetIdentityBalanceAndRevision
            }
            Query::GetDataContract { .. } => PlatformMethod::GetDataContract,
            Query::GetDataContracts { .. } => PlatformMethod::GetDataContracts,
            Query::GetDataContractHistory { .. } => PlatformMethod::GetDataContractHistory,
            Query::GetDocuments(_) => PlatformMethod::GetDocuments,
            Query::GetIdentitiesByPublicKeyHashes { .. } => {
                PlatformMethod::GetIdentitiesByPublicKeyHashes
            }
            Query::GetIdentityByPublicKeyHash { .. } => PlatformMethod::GetIdentityByPublicKeyHashes,
            Query::GetProofs { .. } => PlatformMethod::GetProofs,
        }
    }

    /// Short kind name for logs
    pub fn kind(&self) -> &'static str {
        self.method().name()
    }

    /// Check the query is well formed before sending or verifying it
    pub fn validate(&self) -> Result<()> {
        match self {
            Query::GetIdentities { ids } | Query::GetDataContracts { ids } => {
                non_empty(ids.len(), "ids")?;
                within_limit(ids.len() as u32, "ids")
            }
            Query::GetIdentityKeys { key_ids, limit, .. } => {
                if let Some(key_ids) = key_ids {
                    non_empty(key_ids.len(), "key_ids")?;
                }
                within_limit(*limit, "limit")
            }
            Query::GetDataContractHistory { limit, .. } => within_limit(*limit, "limit"),
            Query::GetDocuments(query) => {
                if query.document_type.is_empty() {
                    return Err(Error::InvalidRequest(
                        "document_type must not be empty".to_string(),
                    ));
                }
                if query.where_clauses.iter().any(|c| c.values.is_empty()) {
                    return Err(Error::InvalidRequest(
                        "where clause without a value".to_string(),
                    ));
                }
                within_limit(query.limit, "limit")
            }
            Query::GetIdentitiesByPublicKeyHashes { public_key_hashes } => {
                non_empty(public_key_hashes.len(), "public_key_hashes")?;
                within_limit(public_key_hashes.len() as u32, "public_key_hashes")
            }
            Query::GetProofs {
                identities,
                contracts,
                documents,
            } => {
                let total = identities.len() + contracts.len() + documents.len();
                non_empty(total, "proof request")?;
                within_limit(u32::try_from(total).unwrap_or(u32::MAX), "proof requests")?;
                if documents.iter().any(|d| d.document_type.is_empty()) {
                    return Err(Error::InvalidRequest(
                        "document_type must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            Query::GetIdentity { .. }
            | Query::GetIdentityBalance { .. }
            | Query::GetIdentityBalanceAndRevision { .. }
            | Query::GetDataContract { .. }
            | Query::GetIdentityByPublicKeyHash { .. } => Ok(()),
        }
    }

    /// Digest of the canonical query encoding.
    ///
    /// Mixed into the proof leaf so a proof only verifies for the query it
    /// was produced for. A query that cannot be encoded has no state key
    /// and fails with [`Error::InvalidRequest`].
    pub fn state_key(&self) -> Result<[u8; 32]> {
        let encoded = wire_options()
            .serialize(self)
            .map_err(|e| Error::InvalidRequest(format!("unencodable {} query: {}", self.kind(), e)))?;
        Ok(blake3::derive_key(STATE_KEY_CONTEXT, &encoded))
    }
}

fn non_empty(len: usize, what: &str) -> Result<()> {
    if len == 0 {
        return Err(Error::InvalidRequest(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn within_limit(value: u32, what: &str) -> Result<()> {
    if value == 0 || value > MAX_LIMIT {
        return Err(Error::InvalidRequest(format!(
            "{} must be between 1 and {}, got {}",
            what, MAX_LIMIT, value
        )));
    }
    Ok(())
}

/// Query plus proof preference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub query: Query,
    /// Ask the node to answer with a proof instead of plain data
    pub prove: bool,
}

impl Request {
    pub fn new(query: Query, prove: bool) -> Self {
        Self { query, prove }
    }

    /// Request asking for a proof
    pub fn proved(query: Query) -> Self {
        Self::new(query, true)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        wire_options()
            .serialize(self)
            .map_err(|e| Error::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        wire_options()
            .deserialize(bytes)
            .map_err(|e| Error::InvalidRequest(format!("undecodable request: {}", e)))
    }
}

/// Chain context the node reported with its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Platform block height
    pub height: u64,
    pub core_chain_locked_height: u32,
    pub time_ms: u64,
    pub protocol_version: u32,
}

/// Answer body: plain state or a proof that embeds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseResult {
    /// Unverified payload
    Data(Vec<u8>),
    /// Encoded [`Proof`](crate::proof::Proof)
    Proof(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub result: ResponseResult,
    pub metadata: ResponseMetadata,
}

impl Response {
    pub fn with_data(data: Vec<u8>, metadata: ResponseMetadata) -> Self {
        Self {
            result: ResponseResult::Data(data),
            metadata,
        }
    }

    pub fn with_proof(proof: Vec<u8>, metadata: ResponseMetadata) -> Self {
        Self {
            result: ResponseResult::Proof(proof),
            metadata,
        }
    }

    pub fn has_proof(&self) -> bool {
        matches!(self.result, ResponseResult::Proof(_))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        wire_options()
            .serialize(self)
            .map_err(|e| Error::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        wire_options()
            .deserialize(bytes)
            .map_err(|e| Error::Decode(format!("undecodable response: {}", e)))
    }
}
