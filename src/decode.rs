//! Payload decoding
//!
//! Turns the raw state bytes of a response into the object the query asked
//! for. Payloads start with a schema version byte; unknown versions are
//! refused outright rather than decoded on a best-effort basis.

use crate::model::{
    BalanceAndRevision, ContractHistoryEntry, DataContract, Document, Identifier, Identity,
    IdentityPublicKey, PublicKeyHash,
};
use crate::query::{
    wire_options, DocumentProofRequest, DocumentQuery, IdentityProofKind, IdentityProofRequest,
    Query,
};
use crate::{Error, Result};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::trace;

/// Payload schema version this crate understands
pub const PAYLOAD_VERSION: u8 = 0;

/// Decoded object, tagged by query kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifiedPayload {
    Identity(Option<Identity>),
    Identities(Vec<(Identifier, Option<Identity>)>),
    IdentityKeys(Vec<IdentityPublicKey>),
    Balance(Option<u64>),
    BalanceAndRevision(Option<BalanceAndRevision>),
    DataContract(Option<DataContract>),
    DataContracts(Vec<(Identifier, Option<DataContract>)>),
    DataContractHistory(Vec<ContractHistoryEntry>),
    Documents(Vec<Document>),
    IdentitiesByPublicKeyHashes(Vec<(PublicKeyHash, Option<Identity>)>),
    Proofs(ProvedState),
}

/// Identity answer in a batched proof, shaped by the requested kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvedIdentity {
    Full(Option<Identity>),
    Balance(Option<u64>),
    Keys(Vec<IdentityPublicKey>),
}

impl ProvedIdentity {
    fn kind(&self) -> IdentityProofKind {
        match self {
            ProvedIdentity::Full(_) => IdentityProofKind::FullIdentity,
            ProvedIdentity::Balance(_) => IdentityProofKind::Balance,
            ProvedIdentity::Keys(_) => IdentityProofKind::Keys,
        }
    }
}

/// Answers to a [`Query::GetProofs`] batch, one per sub-request, in
/// request order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvedState {
    pub identities: Vec<(Identifier, ProvedIdentity)>,
    pub contracts: Vec<(Identifier, Option<DataContract>)>,
    pub documents: Vec<(Identifier, Option<Document>)>,
}

impl VerifiedPayload {
    /// Identity carried by single-identity answers
    pub fn into_identity(self) -> Option<Identity> {
        match self {
            VerifiedPayload::Identity(identity) => identity,
            _ => None,
        }
    }
}

/// Encode a payload body the way nodes do
pub fn encode_payload<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    let mut out = vec![PAYLOAD_VERSION];
    out.extend(
        wire_options()
            .serialize(body)
            .map_err(|e| Error::Encoding(e.to_string()))?,
    );
    Ok(out)
}

/// Schema-aware payload decoder
#[derive(Debug, Clone)]
pub struct ResponseDecoder {
    max_payload_size: usize,
}

impl ResponseDecoder {
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    /// Decode `payload` as the answer to `query`
    pub fn decode(&self, query: &Query, payload: &[u8]) -> Result<VerifiedPayload> {
        if payload.len() > self.max_payload_size {
            return Err(Error::Decode(format!(
                "payload of {} bytes exceeds maximum {}",
                payload.len(),
                self.max_payload_size
            )));
        }
        let (&version, body) = payload
            .split_first()
            .ok_or_else(|| Error::Decode("empty payload".to_string()))?;
        if version != PAYLOAD_VERSION {
            return Err(Error::UnsupportedVersion {
                version,
                supported: PAYLOAD_VERSION,
            });
        }

        trace!("Decoding {} byte payload for {}", body.len(), query.kind());

        let decoded = match query {
            Query::GetIdentity { id } => {
                let identity: Option<Identity> = body_of(body)?;
                if let Some(identity) = &identity {
                    check_identity(identity)?;
                    expect_id("identity", id, &identity.id)?;
                }
                VerifiedPayload::Identity(identity)
            }
            Query::GetIdentityByPublicKeyHash { public_key_hash } => {
                let identity: Option<Identity> = body_of(body)?;
                if let Some(identity) = &identity {
                    check_identity(identity)?;
                    check_owns_key_hash(identity, public_key_hash)?;
                }
                VerifiedPayload::Identity(identity)
            }
            Query::GetIdentities { ids } => {
                let entries: Vec<(Identifier, Option<Identity>)> = body_of(body)?;
                check_requested(ids, entries.iter().map(|(id, _)| id), "identity")?;
                for (id, identity) in &entries {
                    if let Some(identity) = identity {
                        check_identity(identity)?;
                        expect_id("identity", id, &identity.id)?;
                    }
                }
                VerifiedPayload::Identities(entries)
            }
            Query::GetIdentityKeys { key_ids, limit, .. } => {
                let keys: Vec<IdentityPublicKey> = body_of(body)?;
                check_count(keys.len(), *limit)?;
                for key in &keys {
                    check_key(key)?;
                    if let Some(key_ids) = key_ids {
                        if !key_ids.contains(&key.id) {
                            return Err(Error::Decode(format!(
                                "key {} was not requested",
                                key.id
                            )));
                        }
                    }
                }
                VerifiedPayload::IdentityKeys(keys)
            }
            Query::GetIdentityBalance { .. } => VerifiedPayload::Balance(body_of(body)?),
            Query::GetIdentityBalanceAndRevision { .. } => {
                VerifiedPayload::BalanceAndRevision(body_of(body)?)
            }
            Query::GetDataContract { id } => {
                let contract: Option<DataContract> = body_of(body)?;
                if let Some(contract) = &contract {
                    check_contract(contract)?;
                    expect_id("contract", id, &contract.id)?;
                }
                VerifiedPayload::DataContract(contract)
            }
            Query::GetDataContracts { ids } => {
                let entries: Vec<(Identifier, Option<DataContract>)> = body_of(body)?;
                check_requested(ids, entries.iter().map(|(id, _)| id), "contract")?;
                for (id, contract) in &entries {
                    if let Some(contract) = contract {
                        check_contract(contract)?;
                        expect_id("contract", id, &contract.id)?;
                    }
                }
                VerifiedPayload::DataContracts(entries)
            }
            Query::GetDataContractHistory {
                id,
                start_at_ms,
                limit,
                ..
            } => {
                let history: Vec<ContractHistoryEntry> = body_of(body)?;
                check_count(history.len(), *limit)?;
                for entry in &history {
                    check_contract(&entry.contract)?;
                    expect_id("contract", id, &entry.contract.id)?;
                    if entry.date_ms < *start_at_ms {
                        return Err(Error::Decode(format!(
                            "history entry at {} precedes requested start {}",
                            entry.date_ms, start_at_ms
                        )));
                    }
                }
                VerifiedPayload::DataContractHistory(history)
            }
            Query::GetDocuments(document_query) => {
                let documents: Vec<Document> = body_of(body)?;
                check_documents(document_query, &documents)?;
                VerifiedPayload::Documents(documents)
            }
            Query::GetIdentitiesByPublicKeyHashes { public_key_hashes } => {
                let entries: Vec<(PublicKeyHash, Option<Identity>)> = body_of(body)?;
                check_requested(
                    public_key_hashes,
                    entries.iter().map(|(hash, _)| hash),
                    "public key hash",
                )?;
                for (hash, identity) in &entries {
                    if let Some(identity) = identity {
                        check_identity(identity)?;
                        check_owns_key_hash(identity, hash)?;
                    }
                }
                VerifiedPayload::IdentitiesByPublicKeyHashes(entries)
            }
            Query::GetProofs {
                identities,
                contracts,
                documents,
            } => {
                let state: ProvedState = body_of(body)?;
                check_proved_state(&state, identities, contracts, documents)?;
                VerifiedPayload::Proofs(state)
            }
        };

        Ok(decoded)
    }
}

fn body_of<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    wire_options()
        .deserialize(body)
        .map_err(|e| Error::Decode(e.to_string()))
}

fn expect_id(what: &str, requested: &Identifier, found: &Identifier) -> Result<()> {
    if requested != found {
        return Err(Error::Decode(format!(
            "{} {} returned for requested {}",
            what, found, requested
        )));
    }
    Ok(())
}

fn check_count(count: usize, limit: u32) -> Result<()> {
    if count > limit as usize {
        return Err(Error::Decode(format!(
            "{} entries returned for limit {}",
            count, limit
        )));
    }
    Ok(())
}

fn check_requested<'a, K, I>(requested: &[K], returned: I, what: &str) -> Result<()>
where
    K: Ord + std::fmt::Debug + 'a,
    I: Iterator<Item = &'a K>,
{
    let requested: BTreeSet<&K> = requested.iter().collect();
    let mut seen = BTreeSet::new();
    for key in returned {
        if !requested.contains(key) {
            return Err(Error::Decode(format!("{} {:?} was not requested", what, key)));
        }
        if !seen.insert(key) {
            return Err(Error::Decode(format!("{} {:?} returned twice", what, key)));
        }
    }
    Ok(())
}

fn check_key(key: &IdentityPublicKey) -> Result<()> {
    let expected = key.key_type.data_len();
    if key.data.len() != expected {
        return Err(Error::Decode(format!(
            "key {} of type {:?} has {} bytes of data, expected {}",
            key.id,
            key.key_type,
            key.data.len(),
            expected
        )));
    }
    Ok(())
}

fn check_identity(identity: &Identity) -> Result<()> {
    for (id, key) in &identity.public_keys {
        if *id != key.id {
            return Err(Error::Decode(format!(
                "identity {} lists key {} under id {}",
                identity.id, key.id, id
            )));
        }
        check_key(key)?;
    }
    Ok(())
}

fn check_owns_key_hash(identity: &Identity, hash: &PublicKeyHash) -> Result<()> {
    let owns = identity
        .public_keys
        .values()
        .any(|key| key_hash160(key).as_ref() == Some(hash));
    if !owns {
        return Err(Error::Decode(format!(
            "identity {} has no key with hash {}",
            identity.id,
            hex::encode(hash)
        )));
    }
    Ok(())
}

/// Hash160-style identifier of a key; hash-typed keys already store one.
fn key_hash160(key: &IdentityPublicKey) -> Option<PublicKeyHash> {
    use crate::model::KeyType;
    match key.key_type {
        KeyType::EcdsaHash160 | KeyType::Bip13ScriptHash | KeyType::EddsaHash160 => {
            key.data.as_slice().try_into().ok()
        }
        KeyType::EcdsaSecp256k1 | KeyType::Bls12_381 => {
            let digest = blake3::hash(&key.data);
            digest.as_bytes()[..20].try_into().ok()
        }
    }
}

fn check_contract(contract: &DataContract) -> Result<()> {
    for (name, document_type) in &contract.document_types {
        for required in &document_type.required {
            if !document_type.properties.contains_key(required) {
                return Err(Error::Decode(format!(
                    "document type {} requires undeclared property {}",
                    name, required
                )));
            }
        }
        for index in &document_type.indices {
            if index.properties.is_empty() {
                return Err(Error::Decode(format!(
                    "index {} of {} has no properties",
                    index.name, name
                )));
            }
            for property in &index.properties {
                if !document_type.properties.contains_key(property) {
                    return Err(Error::Decode(format!(
                        "index {} of {} uses undeclared property {}",
                        index.name, name, property
                    )));
                }
            }
        }
    }
    Ok(())
}

fn check_answer_count(what: &str, requested: usize, answered: usize) -> Result<()> {
    if requested != answered {
        return Err(Error::Decode(format!(
            "{} {} answers for {} requests",
            answered, what, requested
        )));
    }
    Ok(())
}

fn check_proved_state(
    state: &ProvedState,
    identities: &[IdentityProofRequest],
    contracts: &[Identifier],
    documents: &[DocumentProofRequest],
) -> Result<()> {
    check_answer_count("identity", identities.len(), state.identities.len())?;
    check_answer_count("contract", contracts.len(), state.contracts.len())?;
    check_answer_count("document", documents.len(), state.documents.len())?;

    for (request, (id, answer)) in identities.iter().zip(&state.identities) {
        expect_id("identity", &request.identity_id, id)?;
        if answer.kind() != request.kind {
            return Err(Error::Decode(format!(
                "identity {} answered as {:?}, requested {:?}",
                id,
                answer.kind(),
                request.kind
            )));
        }
        match answer {
            ProvedIdentity::Full(Some(identity)) => {
                check_identity(identity)?;
                expect_id("identity", id, &identity.id)?;
            }
            ProvedIdentity::Keys(keys) => keys.iter().try_for_each(check_key)?,
            ProvedIdentity::Full(None) | ProvedIdentity::Balance(_) => {}
        }
    }

    for (requested, (id, contract)) in contracts.iter().zip(&state.contracts) {
        expect_id("contract", requested, id)?;
        if let Some(contract) = contract {
            check_contract(contract)?;
            expect_id("contract", id, &contract.id)?;
        }
    }

    for (request, (id, document)) in documents.iter().zip(&state.documents) {
        expect_id("document", &request.document_id, id)?;
        if let Some(document) = document {
            expect_id("document", id, &document.id)?;
        }
    }

    Ok(())
}

fn check_documents(query: &DocumentQuery, documents: &[Document]) -> Result<()> {
    check_count(documents.len(), query.limit)?;
    for document in documents {
        for clause in &query.where_clauses {
            let matches = document
                .properties
                .get(&clause.field)
                .map(|value| clause.matches(value))
                .unwrap_or(false);
            if !matches {
                return Err(Error::Decode(format!(
                    "document {} does not satisfy where clause on {}",
                    document.id, clause.field
                )));
            }
        }
    }
    Ok(())
}
