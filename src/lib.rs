//! # Platform Light Client
//!
//! Proof-verifying light client for platform chain state. Nodes answer
//! queries with a Merkle proof plus a quorum signature over the root; this
//! crate checks both before handing back the decoded object, so callers
//! trust the quorum rather than the node they happened to ask.
//!
//! ## Features
//!
//! - Binary proof decoding with strict bounds
//! - Order-sensitive Merkle root recomputation bound to the query asked
//! - BIP-340 Schnorr quorum signature verification
//! - Versioned, schema-checked payload decoding for every query kind
//! - Quorum key caching bounded by age and chain height
//! - Async client over any unary transport, with resolver timeouts
//! - CBOR call surface with stable numeric status codes
//!
//! ## Architecture
//!
//! A verification runs cheapest check first:
//! 1. Decode the proof ([`Proof::decode`])
//! 2. Recompute the root and compare it with the signed and expected roots
//! 3. Resolve the quorum key through a caller-supplied [`QuorumKeyResolver`]
//! 4. Verify the quorum signature
//! 5. Decode the payload ([`ResponseDecoder`])

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]
#![allow(missing_docs)] // Internal implementation details

pub mod cache;
pub mod client;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod model;
pub mod proof;
pub mod query;
pub mod quorum;
pub mod transport;
pub mod verification;

#[cfg(test)]
mod test_utils;

pub use cache::{CacheStats, CachedQuorumKeyResolver};
pub use client::{ClientStats, LightClient};
pub use config::{KeyCacheConfig, VerifierConfig};
pub use decode::{
    encode_payload, ProvedIdentity, ProvedState, ResponseDecoder, VerifiedPayload, PAYLOAD_VERSION,
};
pub use engine::{
    PreparedVerification, Provenance, QuorumAttestation, VerificationEngine, VerifiedObject,
};
pub use error::{Error, ErrorKind, Result};
pub use ffi::{identity_proof_to_cbor, proof_to_cbor, CallStatus, STATUS_OK};
pub use model::{
    BalanceAndRevision, ContractHistoryEntry, DataContract, Document, DocumentType, Identifier,
    Identity, IdentityPublicKey, KeyType, Purpose, SecurityLevel, Value,
};
pub use proof::{Proof, ProofBuilder, ProofLimits, ProofNode, QuorumSignature};
pub use query::{
    DocumentProofRequest, DocumentQuery, IdentityProofKind, IdentityProofRequest, Query, Request,
    Response, ResponseMetadata, ResponseResult, WhereClause, WhereOperator,
};
pub use quorum::{
    resolver_fn, MemoizedResolver, QuorumHash, QuorumKeyResolver, QuorumPublicKey, QuorumType,
    StaticQuorumKeys,
};
pub use transport::{MethodDescriptor, PlatformMethod, PlatformTransport, StatusCode, TransportStatus};
pub use verification::{ProofVerifier, RootHash, VerifiedRoot};
