//! Verification orchestrator
//!
//! Ties the proof decoder, the verifier and the payload decoder together
//! for one request/response pair. A call ends in exactly one outcome: a
//! [`VerifiedObject`] or the first error hit.
//!
//! Work is split in two phases so the key lookup, the only step that may
//! block, can run wherever the caller likes:
//!
//! 1. [`VerificationEngine::prepare`] decodes the proof, recomputes the
//!    root and compares it with the signed and expected roots. Nothing is
//!    looked up and no signature is checked, so a broken proof fails here
//!    for the price of a few hashes.
//! 2. [`PreparedVerification::finish`] checks the quorum signature with
//!    the resolved key and only then decodes the payload.
//!
//! The engine holds no mutable state; any number of verifications may run
//! concurrently against one engine.

use crate::config::VerifierConfig;
use crate::decode::{ResponseDecoder, VerifiedPayload};
use crate::proof::{Proof, ProofLimits};
use crate::query::{Request, Response, ResponseMetadata, ResponseResult};
use crate::quorum::{QuorumHash, QuorumKeyResolver, QuorumPublicKey, QuorumType};
use crate::verification::{ProofVerifier, RootHash};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Quorum that signed a verified root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumAttestation {
    pub quorum_type: QuorumType,
    pub quorum_hash: QuorumHash,
    pub round: u32,
    /// Core height the responding node asserted; keys are resolved for it
    pub core_chain_locked_height: u32,
}

/// How much of a [`VerifiedObject`] is backed by a proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// `false` only on the trust-reduced path, where the caller did not
    /// ask for a proof and the node sent none
    pub verified: bool,
    pub root_hash: Option<RootHash>,
    pub quorum: Option<QuorumAttestation>,
    /// Key the quorum signature was checked with
    pub quorum_key: Option<QuorumPublicKey>,
    /// Covered by the quorum signature when `verified`, as reported by
    /// the node otherwise
    pub metadata: ResponseMetadata,
}

/// Decoded answer plus its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedObject {
    pub payload: VerifiedPayload,
    pub provenance: Provenance,
}

impl VerifiedObject {
    pub fn is_verified(&self) -> bool {
        self.provenance.verified
    }

    /// CBOR encoding, as handed across the call boundary
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out).map_err(|e| Error::Encoding(e.to_string()))?;
        Ok(out)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

enum Pending {
    Proven {
        proof: Proof,
        root: RootHash,
        quorum: QuorumAttestation,
    },
    Unproven {
        payload: Vec<u8>,
    },
}

/// Verification whose cheap checks have passed, waiting for a quorum key
pub struct PreparedVerification<'a> {
    engine: &'a VerificationEngine,
    request: &'a Request,
    metadata: ResponseMetadata,
    pending: Pending,
}

impl PreparedVerification<'_> {
    /// Quorum whose key is needed, `None` on the trust-reduced path
    pub fn quorum(&self) -> Option<QuorumAttestation> {
        match &self.pending {
            Pending::Proven { quorum, .. } => Some(*quorum),
            Pending::Unproven { .. } => None,
        }
    }

    /// Check the quorum signature with `key`, then decode the payload.
    ///
    /// A proven response without a key fails; the payload of a proof is
    /// never decoded unless its signature checked out.
    pub fn finish(self, key: Option<&QuorumPublicKey>) -> Result<VerifiedObject> {
        let engine = self.engine;
        let query = &self.request.query;

        match self.pending {
            Pending::Proven {
                proof,
                root,
                quorum,
            } => {
                let key = key.ok_or_else(|| {
                    Error::Internal("proven response finished without a quorum key".to_string())
                })?;
                let verified = engine
                    .verifier
                    .verify_signature(&proof, &root, &self.metadata, key)?;

                let payload = engine.decoder.decode(query, &proof.value)?;
                debug!(
                    "Verified {} at height {} under root {}",
                    query.kind(),
                    self.metadata.height,
                    verified.root
                );

                Ok(VerifiedObject {
                    payload,
                    provenance: Provenance {
                        verified: verified.verified,
                        root_hash: Some(verified.root),
                        quorum: Some(quorum),
                        quorum_key: Some(verified.quorum_key),
                        metadata: self.metadata,
                    },
                })
            }
            Pending::Unproven { payload } => {
                let payload = engine.decoder.decode(query, &payload)?;
                Ok(VerifiedObject {
                    payload,
                    provenance: Provenance {
                        verified: false,
                        root_hash: None,
                        quorum: None,
                        quorum_key: None,
                        metadata: self.metadata,
                    },
                })
            }
        }
    }
}

/// Stateless verification orchestrator
#[derive(Debug, Clone)]
pub struct VerificationEngine {
    verifier: ProofVerifier,
    decoder: ResponseDecoder,
    limits: ProofLimits,
    allow_unproven: bool,
}

impl VerificationEngine {
    pub fn new(config: &VerifierConfig) -> Self {
        Self {
            verifier: ProofVerifier::with_config(
                config.max_proof_depth,
                config.required_quorum_type(),
            ),
            decoder: ResponseDecoder::new(config.max_value_size),
            limits: config.proof_limits(),
            allow_unproven: config.allow_unproven,
        }
    }

    /// Run every check that needs no quorum key.
    ///
    /// Fails with [`Error::InvalidResponse`] when the request asked for a
    /// proof and the response has none, or when plain data is not accepted
    /// at all. A proof the request did not ask for is verified anyway.
    pub fn prepare<'a>(
        &'a self,
        request: &'a Request,
        response: &Response,
        expected_root: Option<&RootHash>,
    ) -> Result<PreparedVerification<'a>> {
        request.query.validate()?;

        let pending = match &response.result {
            ResponseResult::Data(payload) => {
                if request.prove {
                    return Err(Error::InvalidResponse(format!(
                        "{} requested a proof but the response carries plain data",
                        request.query.kind()
                    )));
                }
                if !self.allow_unproven {
                    return Err(Error::InvalidResponse(
                        "unproven responses are not accepted".to_string(),
                    ));
                }
                debug!(
                    "Accepting unproven {} response, payload is not verified",
                    request.query.kind()
                );
                Pending::Unproven {
                    payload: payload.clone(),
                }
            }
            ResponseResult::Proof(bytes) => {
                if !request.prove {
                    debug!(
                        "Response to {} carries an unrequested proof, verifying it",
                        request.query.kind()
                    );
                }

                let proof = Proof::decode(bytes, &self.limits)?;
                self.verifier.check_structure(&proof)?;

                let candidate = self
                    .verifier
                    .recompute_root(&proof, &request.query.state_key()?);
                self.verifier.check_root(&proof, &candidate, expected_root)?;
                self.verifier.check_quorum_type(&proof)?;

                let quorum = QuorumAttestation {
                    quorum_type: proof.signature.quorum_type,
                    quorum_hash: proof.signature.quorum_hash,
                    round: proof.signature.round,
                    core_chain_locked_height: response.metadata.core_chain_locked_height,
                };
                Pending::Proven {
                    proof,
                    root: candidate,
                    quorum,
                }
            }
        };

        Ok(PreparedVerification {
            engine: self,
            request,
            metadata: response.metadata,
            pending,
        })
    }

    /// Verify `response` as the answer to `request`.
    ///
    /// The resolver is consulted at most once, and only after the proof
    /// decoded and its root matched.
    pub fn verify<R: QuorumKeyResolver + ?Sized>(
        &self,
        request: &Request,
        response: &Response,
        resolver: &R,
        expected_root: Option<&RootHash>,
    ) -> Result<VerifiedObject> {
        let prepared = self.prepare(request, response, expected_root)?;
        let key = match prepared.quorum() {
            Some(quorum) => Some(resolver.resolve(
                quorum.quorum_type,
                &quorum.quorum_hash,
                quorum.core_chain_locked_height,
            )?),
            None => None,
        };
        prepared.finish(key.as_ref())
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::new(&VerifierConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::encode_payload;
    use crate::query::Query;
    use crate::proof::ProofBuilder;
    use crate::quorum::StaticQuorumKeys;
    use crate::test_utils::{
        proved_identity_exchange, quorum_keypair, sample_identity, sibling, signed_proof,
        test_metadata, test_quorum_hash, CountingResolver, TEST_CORE_HEIGHT,
    };
    use proptest::prelude::*;

    /// Offset of the first branch entry in an encoded proof
    fn branches_start(value_len: usize) -> usize {
        4 + 1 + 4 + value_len + 2
    }

    /// Proved identity exchange with a path `depth` levels deep
    fn deep_identity_exchange(depth: usize) -> (Request, Response, QuorumPublicKey) {
        let (keypair, key) = quorum_keypair(1);
        let identity = sample_identity(6);
        let query = Query::GetIdentity { id: identity.id };
        let mut builder =
            ProofBuilder::new(query.state_key().unwrap(), encode_payload(&Some(identity)).unwrap())
                .quorum(QuorumType::LLMQ_100_67, test_quorum_hash());
        for level in 0..depth {
            builder = if level % 2 == 0 {
                builder.add_left_sibling(sibling(level as u8))
            } else {
                builder.add_right_sibling(sibling(level as u8))
            };
        }
        let proof = builder.sign(&keypair, &test_metadata());
        (
            Request::proved(query),
            Response::with_proof(proof.encode().unwrap(), test_metadata()),
            key,
        )
    }

    fn keys_for(key: QuorumPublicKey) -> CountingResolver<StaticQuorumKeys> {
        CountingResolver::new(StaticQuorumKeys::new().with_key(
            QuorumType::LLMQ_100_67,
            test_quorum_hash(),
            key,
        ))
    }

    fn proof_bytes(response: &Response) -> Vec<u8> {
        match &response.result {
            ResponseResult::Proof(bytes) => bytes.clone(),
            ResponseResult::Data(_) => panic!("expected a proof response"),
        }
    }

    #[test]
    fn test_verify_identity_proof() {
        let (keypair, key) = quorum_keypair(1);
        let identity = sample_identity(7);
        let (request, response) = proved_identity_exchange(&identity, &keypair);
        let resolver = keys_for(key);

        let verified = VerificationEngine::default()
            .verify(&request, &response, &resolver, None)
            .unwrap();

        assert!(verified.is_verified());
        assert_eq!(verified.payload, VerifiedPayload::Identity(Some(identity)));
        assert_eq!(verified.provenance.metadata, test_metadata());

        let quorum = verified.provenance.quorum.unwrap();
        assert_eq!(quorum.quorum_hash, test_quorum_hash());
        assert_eq!(quorum.core_chain_locked_height, TEST_CORE_HEIGHT);
        assert_eq!(verified.provenance.quorum_key, Some(key));
        assert_eq!(resolver.calls(), 1);
    }

    #[test]
    fn test_verification_is_idempotent() {
        let (keypair, key) = quorum_keypair(1);
        let (request, response) = proved_identity_exchange(&sample_identity(3), &keypair);
        let resolver = keys_for(key);
        let engine = VerificationEngine::default();

        let first = engine.verify(&request, &response, &resolver, None).unwrap();
        let second = engine.verify(&request, &response, &resolver, None).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.to_cbor().unwrap(), second.to_cbor().unwrap());
    }

    #[test]
    fn test_corrupted_last_branch_fails_before_key_lookup() {
        let (keypair, key) = quorum_keypair(1);
        let identity = sample_identity(7);
        let (request, response) = proved_identity_exchange(&identity, &keypair);
        let engine = VerificationEngine::default();

        let bytes = proof_bytes(&response);
        let proof = Proof::decode(&bytes, &ProofLimits::default()).unwrap();
        let last_entry = branches_start(proof.value.len()) + (proof.depth() - 1) * 33;

        // Sibling byte: decodes fine, root no longer matches.
        let mut flipped = bytes.clone();
        flipped[last_entry + 32] ^= 0x01;
        let resolver = keys_for(key);
        let err = engine
            .verify(
                &request,
                &Response::with_proof(flipped, response.metadata),
                &resolver,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::RootMismatch { .. }));
        assert_eq!(resolver.calls(), 0);

        // Direction byte: the decoder rejects it.
        let mut bad_direction = bytes;
        bad_direction[last_entry] = 7;
        let resolver = keys_for(key);
        let err = engine
            .verify(
                &request,
                &Response::with_proof(bad_direction, response.metadata),
                &resolver,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MalformedProof(_)));
        assert_eq!(resolver.calls(), 0);
    }

    #[test]
    fn test_truncated_proof_is_malformed() {
        let (keypair, key) = quorum_keypair(1);
        let (request, response) = proved_identity_exchange(&sample_identity(2), &keypair);
        let mut bytes = proof_bytes(&response);
        bytes.truncate(bytes.len() - 1);

        let resolver = keys_for(key);
        let err = VerificationEngine::default()
            .verify(
                &request,
                &Response::with_proof(bytes, response.metadata),
                &resolver,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MalformedProof(_)));
        assert_eq!(resolver.calls(), 0);
    }

    #[test]
    fn test_other_quorum_key_is_invalid_signature() {
        let (keypair, _) = quorum_keypair(1);
        let (_, other) = quorum_keypair(2);
        let (request, response) = proved_identity_exchange(&sample_identity(2), &keypair);

        let err = VerificationEngine::default()
            .verify(&request, &response, &keys_for(other), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignature { .. }));
    }

    #[test]
    fn test_proof_for_other_identity_does_not_verify() {
        let (keypair, key) = quorum_keypair(1);
        let (_, response) = proved_identity_exchange(&sample_identity(2), &keypair);
        let request = Request::proved(Query::GetIdentity {
            id: sample_identity(9).id,
        });

        let err = VerificationEngine::default()
            .verify(&request, &response, &keys_for(key), None)
            .unwrap_err();
        assert!(matches!(err, Error::RootMismatch { .. }));
    }

    #[test]
    fn test_expected_root_is_enforced() {
        let (keypair, key) = quorum_keypair(1);
        let (request, response) = proved_identity_exchange(&sample_identity(2), &keypair);
        let engine = VerificationEngine::default();
        let resolver = keys_for(key);

        let verified = engine.verify(&request, &response, &resolver, None).unwrap();
        let root = verified.provenance.root_hash.unwrap();
        assert!(engine
            .verify(&request, &response, &resolver, Some(&root))
            .is_ok());

        let wrong = RootHash::new([0u8; 32]);
        let err = engine
            .verify(&request, &response, &resolver, Some(&wrong))
            .unwrap_err();
        assert!(matches!(err, Error::RootMismatch { expected, .. } if expected == wrong));
    }

    #[test]
    fn test_missing_key_and_unavailable_resolver() {
        let (keypair, _) = quorum_keypair(1);
        let (request, response) = proved_identity_exchange(&sample_identity(2), &keypair);
        let engine = VerificationEngine::default();

        let err = engine
            .verify(&request, &response, &StaticQuorumKeys::new(), None)
            .unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));

        let down = crate::quorum::resolver_fn(|_, _, _| {
            Err(Error::ResolverUnavailable("core RPC down".to_string()))
        });
        let err = engine.verify(&request, &response, &down, None).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_quorum_type_policy_checked_before_lookup() {
        let (keypair, key) = quorum_keypair(1);
        let (request, response) = proved_identity_exchange(&sample_identity(2), &keypair);
        let config = VerifierConfig {
            quorum_type: Some(QuorumType::LLMQ_TEST_PLATFORM.0),
            ..Default::default()
        };
        let resolver = keys_for(key);

        let err = VerificationEngine::new(&config)
            .verify(&request, &response, &resolver, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignature { .. }));
        assert_eq!(resolver.calls(), 0);
    }

    #[test]
    fn test_plain_data_for_proved_request_is_rejected() {
        let identity = sample_identity(2);
        let request = Request::proved(Query::GetIdentity { id: identity.id });
        let response = Response::with_data(
            encode_payload(&Some(identity)).unwrap(),
            test_metadata(),
        );
        let resolver = keys_for(quorum_keypair(1).1);

        let err = VerificationEngine::default()
            .verify(&request, &response, &resolver, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
        assert_eq!(resolver.calls(), 0);
    }

    #[test]
    fn test_unproven_path() {
        let identity = sample_identity(2);
        let request = Request::new(Query::GetIdentity { id: identity.id }, false);
        let response = Response::with_data(
            encode_payload(&Some(identity.clone())).unwrap(),
            test_metadata(),
        );
        let resolver = keys_for(quorum_keypair(1).1);

        let object = VerificationEngine::default()
            .verify(&request, &response, &resolver, None)
            .unwrap();
        assert!(!object.is_verified());
        assert_eq!(object.provenance.root_hash, None);
        assert_eq!(object.provenance.quorum_key, None);
        assert_eq!(object.payload.into_identity(), Some(identity));
        assert_eq!(resolver.calls(), 0);

        let strict = VerifierConfig {
            allow_unproven: false,
            ..Default::default()
        };
        let err = VerificationEngine::new(&strict)
            .verify(&request, &response, &resolver, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[test]
    fn test_unrequested_proof_is_still_verified() {
        let (keypair, _) = quorum_keypair(1);
        let (_, other) = quorum_keypair(2);
        let (proved, response) = proved_identity_exchange(&sample_identity(2), &keypair);
        let request = Request::new(proved.query, false);

        let err = VerificationEngine::default()
            .verify(&request, &response, &keys_for(other), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignature { .. }));
    }

    #[test]
    fn test_payload_version_checked_after_signature() {
        let (keypair, key) = quorum_keypair(1);
        let identity = sample_identity(2);
        let query = Query::GetIdentity { id: identity.id };
        let mut payload = encode_payload(&Some(identity)).unwrap();
        payload[0] = 9;
        let proof = signed_proof(&query, payload, &keypair);
        let response = Response::with_proof(proof.encode().unwrap(), test_metadata());

        let err = VerificationEngine::default()
            .verify(&Request::proved(query), &response, &keys_for(key), None)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { version: 9, .. }));
    }

    #[test]
    fn test_signature_binds_reported_metadata() {
        let (keypair, key) = quorum_keypair(1);
        let (request, response) = proved_identity_exchange(&sample_identity(2), &keypair);
        let engine = VerificationEngine::default();

        let edits: [fn(&mut ResponseMetadata); 4] = [
            |m| m.height += 1,
            |m| m.core_chain_locked_height += 1,
            |m| m.time_ms += 1,
            |m| m.protocol_version += 1,
        ];
        for edit in edits {
            let mut tampered = response.clone();
            edit(&mut tampered.metadata);
            let err = engine
                .verify(&request, &tampered, &keys_for(key), None)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidSignature { .. }));
        }
    }

    #[test]
    fn test_prepare_then_finish() {
        let (keypair, key) = quorum_keypair(1);
        let (request, response) = proved_identity_exchange(&sample_identity(2), &keypair);
        let engine = VerificationEngine::default();

        let prepared = engine.prepare(&request, &response, None).unwrap();
        assert_eq!(prepared.quorum().unwrap().quorum_type, QuorumType::LLMQ_100_67);
        assert!(matches!(prepared.finish(None), Err(Error::Internal(_))));

        let prepared = engine.prepare(&request, &response, None).unwrap();
        let object = prepared.finish(Some(&key)).unwrap();
        assert!(object.is_verified());
    }

    #[test]
    fn test_output_encodings() {
        let (keypair, key) = quorum_keypair(1);
        let identity = sample_identity(4);
        let (request, response) = proved_identity_exchange(&identity, &keypair);
        let object = VerificationEngine::default()
            .verify(&request, &response, &keys_for(key), None)
            .unwrap();

        let cbor = object.to_cbor().unwrap();
        let decoded: VerifiedObject = ciborium::de::from_reader(cbor.as_slice()).unwrap();
        assert_eq!(decoded, object);

        let json = object.to_json().unwrap();
        assert!(json.contains("\"verified\":true"));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let balance = &parsed["payload"]["Identity"]["balance"];
        assert_eq!(balance.as_u64(), Some(identity.balance));
    }

    proptest! {
        #[test]
        fn prop_bit_flip_in_encoded_sibling_fails_before_lookup(
            depth in 1usize..12,
            branch in any::<prop::sample::Index>(),
            byte in 0usize..32,
            bit in 0u8..8,
        ) {
            let (request, response, key) = deep_identity_exchange(depth);
            let mut bytes = proof_bytes(&response);
            let value_len = Proof::decode(&bytes, &ProofLimits::default()).unwrap().value.len();
            let entry = branches_start(value_len) + branch.index(depth) * 33;
            bytes[entry + 1 + byte] ^= 1 << bit;

            let resolver = keys_for(key);
            let result = VerificationEngine::default().verify(
                &request,
                &Response::with_proof(bytes, response.metadata),
                &resolver,
                None,
            );
            prop_assert!(
                matches!(result, Err(Error::RootMismatch { .. })),
                "expected RootMismatch, got {:?}",
                result
            );
            prop_assert_eq!(resolver.calls(), 0);
        }

        #[test]
        fn prop_permuted_encoded_branches_fail_before_lookup(
            order in (2usize..10).prop_flat_map(|depth| Just((0..depth).collect::<Vec<usize>>()).prop_shuffle()),
        ) {
            prop_assume!(order.iter().enumerate().any(|(i, &j)| i != j));
            let (request, response, key) = deep_identity_exchange(order.len());
            let bytes = proof_bytes(&response);
            let value_len = Proof::decode(&bytes, &ProofLimits::default()).unwrap().value.len();
            let start = branches_start(value_len);
            let end = start + order.len() * 33;

            let entries: Vec<&[u8]> = bytes[start..end].chunks(33).collect();
            let mut permuted = bytes[..start].to_vec();
            for &i in &order {
                permuted.extend_from_slice(entries[i]);
            }
            permuted.extend_from_slice(&bytes[end..]);

            let resolver = keys_for(key);
            let result = VerificationEngine::default().verify(
                &request,
                &Response::with_proof(permuted, response.metadata),
                &resolver,
                None,
            );
            prop_assert!(
                matches!(result, Err(Error::RootMismatch { .. })),
                "expected RootMismatch, got {:?}",
                result
            );
            prop_assert_eq!(resolver.calls(), 0);
        }
    }
}
