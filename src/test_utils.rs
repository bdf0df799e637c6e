//! Shared fixtures for unit tests

use crate::decode::encode_payload;
use crate::model::{
    DataContract, Document, DocumentType, FieldType, Identifier, Identity, IdentityPublicKey,
    Index, KeyType, Purpose, SecurityLevel, Value,
};
use crate::proof::{Proof, ProofBuilder};
use crate::query::{Query, Request, Response, ResponseMetadata};
use crate::quorum::{QuorumHash, QuorumKeyResolver, QuorumPublicKey, QuorumType};
use crate::Result;
use secp256k1::{Keypair, SecretKey, SECP256K1};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) const TEST_HEIGHT: u64 = 1_200;
pub(crate) const TEST_CORE_HEIGHT: u32 = 880_000;

/// Deterministic quorum keypair; different seeds give different keys
pub(crate) fn quorum_keypair(seed: u8) -> (Keypair, QuorumPublicKey) {
    let mut bytes = [0x11u8; 32];
    bytes[31] = seed.max(1);
    let secret = SecretKey::from_slice(&bytes).expect("valid secret key");
    let keypair = Keypair::from_secret_key(SECP256K1, &secret);
    let public = QuorumPublicKey::from(keypair.x_only_public_key().0);
    (keypair, public)
}

/// Distinct sibling hash per `n`
pub(crate) fn sibling(n: u8) -> [u8; 32] {
    *blake3::hash(&[n]).as_bytes()
}

pub(crate) fn test_quorum_hash() -> QuorumHash {
    QuorumHash::new([0x5a; 32])
}

pub(crate) fn test_metadata() -> ResponseMetadata {
    ResponseMetadata {
        height: TEST_HEIGHT,
        core_chain_locked_height: TEST_CORE_HEIGHT,
        time_ms: 1_700_000_000_000,
        protocol_version: 1,
    }
}

pub(crate) fn sample_identity(seed: u8) -> Identity {
    let key = |id: u32, key_type: KeyType, purpose: Purpose| IdentityPublicKey {
        id,
        key_type,
        purpose,
        security_level: if id == 0 {
            SecurityLevel::Master
        } else {
            SecurityLevel::High
        },
        data: vec![seed.wrapping_add(id as u8); key_type.data_len()],
        read_only: false,
        disabled_at: None,
    };

    Identity {
        id: Identifier::new([seed; 32]),
        public_keys: BTreeMap::from([
            (0, key(0, KeyType::EcdsaSecp256k1, Purpose::Authentication)),
            (1, key(1, KeyType::Bls12_381, Purpose::Authentication)),
            (2, key(2, KeyType::EcdsaHash160, Purpose::Withdraw)),
        ]),
        balance: 50_000 + seed as u64,
        revision: 1,
    }
}

pub(crate) fn sample_contract(seed: u8) -> DataContract {
    let domain = DocumentType {
        properties: BTreeMap::from([
            ("label".to_string(), FieldType::Text),
            ("records".to_string(), FieldType::Bytes),
        ]),
        required: vec!["label".to_string()],
        indices: vec![Index {
            name: "byLabel".to_string(),
            properties: vec!["label".to_string()],
            unique: true,
        }],
    };

    DataContract {
        id: Identifier::new([seed; 32]),
        owner_id: Identifier::new([seed.wrapping_add(1); 32]),
        version: 1,
        document_types: BTreeMap::from([("domain".to_string(), domain)]),
    }
}

/// "domain" document of [`sample_contract`] with a `label` property
pub(crate) fn sample_document(seed: u8, label: &str) -> Document {
    Document {
        id: Identifier::new([seed; 32]),
        owner_id: Identifier::new([1u8; 32]),
        revision: Some(1),
        created_at: None,
        updated_at: None,
        properties: BTreeMap::from([("label".to_string(), Value::Text(label.to_string()))]),
    }
}

/// Proof over `payload` for `query`, two levels deep, signed by `keypair`
pub(crate) fn signed_proof(query: &Query, payload: Vec<u8>, keypair: &Keypair) -> Proof {
    ProofBuilder::new(query.state_key().expect("query encodes"), payload)
        .add_left_sibling(sibling(1))
        .add_right_sibling(sibling(2))
        .quorum(QuorumType::LLMQ_100_67, test_quorum_hash())
        .round(3)
        .sign(keypair, &test_metadata())
}

/// Proved request plus a response whose proof answers it
pub(crate) fn proved_identity_exchange(identity: &Identity, keypair: &Keypair) -> (Request, Response) {
    let query = Query::GetIdentity { id: identity.id };
    let payload = encode_payload(&Some(identity.clone())).expect("payload encodes");
    let proof = signed_proof(&query, payload, keypair);
    (
        Request::proved(query),
        Response::with_proof(proof.encode().expect("proof encodes"), test_metadata()),
    )
}

/// Resolver that counts how often it is consulted
pub(crate) struct CountingResolver<R> {
    inner: R,
    calls: AtomicUsize,
}

impl<R> CountingResolver<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<R: QuorumKeyResolver> QuorumKeyResolver for CountingResolver<R> {
    fn resolve(
        &self,
        quorum_type: QuorumType,
        quorum_hash: &QuorumHash,
        core_chain_locked_height: u32,
    ) -> Result<QuorumPublicKey> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .resolve(quorum_type, quorum_hash, core_chain_locked_height)
    }
}
