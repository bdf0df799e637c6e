//! Proof verification
//!
//! Recomputes the Merkle root from a proof's path, checks it against the
//! signed and expected roots, and verifies the quorum's BIP-340 Schnorr
//! signature over it. Verification is all-or-nothing: either every step
//! passes and a [`VerifiedRoot`] comes back, or the first failing step's
//! error does.
//!
//! Steps run cheapest first so a broken proof never costs a key lookup or
//! a signature check.

use crate::proof::{leaf_hash, Proof, SIGNATURE_LEN};
use crate::query::ResponseMetadata;
use crate::quorum::{QuorumHash, QuorumPublicKey, QuorumType};
use crate::{Error, Result};
use secp256k1::{schnorr, Message, SECP256K1};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

const SIGNING_CONTEXT: &[u8] = b"platform-light-client/quorum-signature/v1";

/// Root of the platform state tree
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RootHash([u8; 32]);

impl RootHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RootHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for RootHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootHash({})", hex::encode(self.0))
    }
}

/// Digest a quorum signs for a root in a given round.
///
/// Every metadata field is covered, so whatever a node reports alongside
/// a proof is as authentic as the root itself.
pub fn signing_digest(
    quorum_type: QuorumType,
    quorum_hash: &QuorumHash,
    round: u32,
    metadata: &ResponseMetadata,
    root: &RootHash,
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(SIGNING_CONTEXT);
    hasher.update(&[quorum_type.0]);
    hasher.update(quorum_hash.as_bytes());
    hasher.update(&round.to_le_bytes());
    hasher.update(&metadata.height.to_le_bytes());
    hasher.update(&metadata.core_chain_locked_height.to_le_bytes());
    hasher.update(&metadata.time_ms.to_le_bytes());
    hasher.update(&metadata.protocol_version.to_le_bytes());
    hasher.update(root.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Root that passed every check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedRoot {
    pub root: RootHash,
    pub quorum_key: QuorumPublicKey,
    pub verified: bool,
}

/// Merkle root and quorum signature verifier
#[derive(Debug, Clone)]
pub struct ProofVerifier {
    /// Maximum proof depth allowed
    max_depth: usize,

    /// Only accept signatures from this quorum type
    quorum_type: Option<QuorumType>,
}

impl ProofVerifier {
    /// Create a new proof verifier with default settings
    pub fn new() -> Self {
        Self {
            max_depth: 64,
            quorum_type: None,
        }
    }

    /// Create a verifier with custom settings
    pub fn with_config(max_depth: usize, quorum_type: Option<QuorumType>) -> Self {
        Self {
            max_depth,
            quorum_type,
        }
    }

    /// Structural checks that do not need any hashing
    pub fn check_structure(&self, proof: &Proof) -> Result<()> {
        if proof.depth() > self.max_depth {
            return Err(Error::MalformedProof(format!(
                "Proof depth {} exceeds maximum {}",
                proof.depth(),
                self.max_depth
            )));
        }
        if proof.signature.signature.len() != SIGNATURE_LEN {
            return Err(Error::MalformedProof(format!(
                "signature length {} (expected {})",
                proof.signature.signature.len(),
                SIGNATURE_LEN
            )));
        }
        Ok(())
    }

    /// Reduce the proof path to a candidate root, leaf first
    pub fn recompute_root(&self, proof: &Proof, state_key: &[u8; 32]) -> RootHash {
        let leaf = leaf_hash(state_key, &proof.value);
        let root = proof
            .proof_path
            .iter()
            .fold(leaf, |current, node| node.apply(&current));
        RootHash::new(root)
    }

    /// Compare a candidate root with the root the quorum signed and, if
    /// given, the root the caller expects.
    pub fn check_root(
        &self,
        proof: &Proof,
        candidate: &RootHash,
        expected: Option<&RootHash>,
    ) -> Result<()> {
        if *candidate != proof.signed_root {
            return Err(Error::RootMismatch {
                expected: proof.signed_root,
                actual: *candidate,
            });
        }

        if let Some(expected) = expected {
            if candidate != expected {
                return Err(Error::RootMismatch {
                    expected: *expected,
                    actual: *candidate,
                });
            }
        }

        Ok(())
    }

    /// Reject signatures from quorum types this verifier does not trust
    pub fn check_quorum_type(&self, proof: &Proof) -> Result<()> {
        match self.quorum_type {
            Some(required) if required != proof.signature.quorum_type => {
                Err(Error::InvalidSignature {
                    quorum_hash: proof.signature.quorum_hash,
                    reason: format!(
                        "quorum type {} not accepted (expected {})",
                        proof.signature.quorum_type, required
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    /// Verify the quorum signature over `root` and the response metadata
    pub fn verify_signature(
        &self,
        proof: &Proof,
        root: &RootHash,
        metadata: &ResponseMetadata,
        key: &QuorumPublicKey,
    ) -> Result<VerifiedRoot> {
        let record = &proof.signature;
        let invalid = |reason: String| Error::InvalidSignature {
            quorum_hash: record.quorum_hash,
            reason,
        };

        let public_key = key
            .to_x_only()
            .map_err(|e| invalid(format!("unusable quorum key: {}", e)))?;
        let signature = schnorr::Signature::from_slice(&record.signature)
            .map_err(|e| invalid(format!("unparseable signature: {}", e)))?;

        let digest = signing_digest(
            record.quorum_type,
            &record.quorum_hash,
            record.round,
            metadata,
            root,
        );

        SECP256K1
            .verify_schnorr(&signature, &Message::from_digest(digest), &public_key)
            .map_err(|_| invalid("signature does not match root".to_string()))?;

        trace!(
            "Quorum {} signature verified for root {}",
            record.quorum_hash,
            root
        );
        Ok(VerifiedRoot {
            root: *root,
            quorum_key: *key,
            verified: true,
        })
    }

    /// Run every check on a decoded proof
    pub fn verify(
        &self,
        proof: &Proof,
        state_key: &[u8; 32],
        expected_root: Option<&RootHash>,
        metadata: &ResponseMetadata,
        key: &QuorumPublicKey,
    ) -> Result<VerifiedRoot> {
        self.check_structure(proof)?;
        let candidate = self.recompute_root(proof, state_key);
        self.check_root(proof, &candidate, expected_root)?;
        self.check_quorum_type(proof)?;
        let verified = self.verify_signature(proof, &candidate, metadata, key)?;

        debug!("Proof of depth {} verified, root {}", proof.depth(), candidate);
        Ok(verified)
    }
}

impl Default for ProofVerifier {
    fn default() -> Self {
        Self::new()
    }
}
