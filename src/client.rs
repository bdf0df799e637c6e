//! Light client implementation
//!
//! The light client asks platform nodes for state over a
//! [`PlatformTransport`] and hands back only what verifies against a
//! quorum signature (or, when proofs are not requested, what the caller
//! explicitly agreed to take on trust).

use crate::cache::{CacheStats, CachedQuorumKeyResolver};
use crate::config::VerifierConfig;
use crate::decode::{ProvedState, VerifiedPayload};
use crate::engine::{QuorumAttestation, VerificationEngine, VerifiedObject};
use crate::model::{DataContract, Document, Identifier, Identity};
use crate::query::{
    DocumentProofRequest, DocumentQuery, IdentityProofRequest, Query, Request, Response,
};
use crate::quorum::{QuorumKeyResolver, QuorumPublicKey};
use crate::transport::{self, PlatformTransport};
use crate::verification::RootHash;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};

type KeyCache = CachedQuorumKeyResolver<Arc<dyn QuorumKeyResolver>>;

/// Counters over the client's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    /// Responses verified against a quorum signature
    pub proven: u64,

    /// Responses accepted without a proof
    pub unproven: u64,

    /// Calls that ended in an error
    pub failed: u64,

    /// Resolver calls abandoned after the configured timeout
    pub resolver_timeouts: u64,
}

/// Light client for platform state
///
/// ## Example
///
/// ```no_run
/// use platform_light_client::{
///     Identifier, LightClient, PlatformTransport, StaticQuorumKeys, VerifierConfig,
/// };
/// use std::sync::Arc;
///
/// # async fn example(transport: Arc<dyn PlatformTransport>) -> platform_light_client::Result<()> {
/// let client = LightClient::new(
///     VerifierConfig::default(),
///     transport,
///     Arc::new(StaticQuorumKeys::new()),
/// )?;
///
/// let identity = client.get_identity(Identifier::new([1u8; 32])).await?;
/// # Ok(())
/// # }
/// ```
pub struct LightClient {
    config: VerifierConfig,
    transport: Arc<dyn PlatformTransport>,
    resolver: Arc<KeyCache>,
    engine: VerificationEngine,
    stats: Arc<RwLock<ClientStats>>,
}

impl LightClient {
    /// Create a light client; `resolver` is wrapped in a key cache
    /// configured by `config.key_cache`.
    pub fn new(
        config: VerifierConfig,
        transport: Arc<dyn PlatformTransport>,
        resolver: Arc<dyn QuorumKeyResolver>,
    ) -> Result<Self> {
        config.validate()?;

        let engine = VerificationEngine::new(&config);
        let resolver = Arc::new(CachedQuorumKeyResolver::new(resolver, &config.key_cache));

        Ok(Self {
            config,
            transport,
            resolver,
            engine,
            stats: Arc::new(RwLock::new(ClientStats::default())),
        })
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Query a node and verify its answer
    pub async fn fetch(&self, query: Query) -> Result<VerifiedObject> {
        let result = self.fetch_inner(query).await;
        self.record(&result).await;
        result
    }

    async fn fetch_inner(&self, query: Query) -> Result<VerifiedObject> {
        let request = Request::new(query, self.config.request_proofs);
        request.query.validate()?;

        let method = request.query.method();
        debug!("Calling {} (prove: {})", method, request.prove);

        let bytes = transport::call(self.transport.as_ref(), method, request.to_bytes()?).await?;
        let response = Response::from_bytes(&bytes)?;

        self.verify_response(&request, &response, None).await
    }

    /// Verify a response obtained elsewhere, with the configured resolver
    /// timeout applied to the key lookup.
    pub async fn verify(
        &self,
        request: &Request,
        response: &Response,
        expected_root: Option<&RootHash>,
    ) -> Result<VerifiedObject> {
        let result = self.verify_response(request, response, expected_root).await;
        self.record(&result).await;
        result
    }

    async fn verify_response(
        &self,
        request: &Request,
        response: &Response,
        expected_root: Option<&RootHash>,
    ) -> Result<VerifiedObject> {
        let prepared = self.engine.prepare(request, response, expected_root)?;
        let key = match prepared.quorum() {
            Some(quorum) => Some(self.resolve_key(quorum).await?),
            None => None,
        };
        prepared.finish(key.as_ref())
    }

    /// Run the resolver on its own thread, bounded by the configured timeout.
    ///
    /// The thread is detached: a lookup that never returns is abandoned
    /// without holding up the caller or the runtime's shutdown.
    async fn resolve_key(&self, quorum: QuorumAttestation) -> Result<QuorumPublicKey> {
        let resolver = Arc::clone(&self.resolver);
        let (tx, rx) = oneshot::channel();

        thread::Builder::new()
            .name("quorum-key-lookup".to_string())
            .spawn(move || {
                let result = resolver.resolve(
                    quorum.quorum_type,
                    &quorum.quorum_hash,
                    quorum.core_chain_locked_height,
                );
                // Nobody listens once the caller timed out.
                let _ = tx.send(result);
            })
            .map_err(|e| Error::Internal(format!("cannot start quorum key lookup: {}", e)))?;

        match tokio::time::timeout(self.config.resolver_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Internal(
                "quorum key lookup ended without an answer".to_string(),
            )),
            Err(_) => {
                warn!(
                    "Quorum key lookup for {} timed out after {} ms",
                    quorum.quorum_hash, self.config.resolver_timeout_ms
                );
                self.stats.write().await.resolver_timeouts += 1;
                Err(Error::ResolverUnavailable(format!(
                    "no key for quorum {} within {} ms",
                    quorum.quorum_hash, self.config.resolver_timeout_ms
                )))
            }
        }
    }

    async fn record(&self, result: &Result<VerifiedObject>) {
        let mut stats = self.stats.write().await;
        match result {
            Ok(object) if object.is_verified() => stats.proven += 1,
            Ok(_) => stats.unproven += 1,
            Err(e) => {
                debug!("Verification failed ({}): {}", e.kind(), e);
                stats.failed += 1;
            }
        }
    }

    /// Get an identity by id
    pub async fn get_identity(&self, id: Identifier) -> Result<Option<Identity>> {
        match self.fetch(Query::GetIdentity { id }).await?.payload {
            VerifiedPayload::Identity(identity) => Ok(identity),
            other => Err(unexpected("identity", &other)),
        }
    }

    /// Get the credit balance of an identity
    pub async fn get_identity_balance(&self, id: Identifier) -> Result<Option<u64>> {
        match self.fetch(Query::GetIdentityBalance { id }).await?.payload {
            VerifiedPayload::Balance(balance) => Ok(balance),
            other => Err(unexpected("balance", &other)),
        }
    }

    pub async fn get_data_contract(&self, id: Identifier) -> Result<Option<DataContract>> {
        match self.fetch(Query::GetDataContract { id }).await?.payload {
            VerifiedPayload::DataContract(contract) => Ok(contract),
            other => Err(unexpected("data contract", &other)),
        }
    }

    pub async fn get_documents(&self, query: DocumentQuery) -> Result<Vec<Document>> {
        match self.fetch(Query::GetDocuments(query)).await?.payload {
            VerifiedPayload::Documents(documents) => Ok(documents),
            other => Err(unexpected("documents", &other)),
        }
    }

    /// Prove several identities, contracts and documents in one round trip
    pub async fn get_proofs(
        &self,
        identities: Vec<IdentityProofRequest>,
        contracts: Vec<Identifier>,
        documents: Vec<DocumentProofRequest>,
    ) -> Result<ProvedState> {
        let query = Query::GetProofs {
            identities,
            contracts,
            documents,
        };
        match self.fetch(query).await?.payload {
            VerifiedPayload::Proofs(state) => Ok(state),
            other => Err(unexpected("proofs", &other)),
        }
    }

    pub async fn stats(&self) -> ClientStats {
        self.stats.read().await.clone()
    }

    pub fn key_cache_stats(&self) -> CacheStats {
        self.resolver.stats()
    }
}

fn unexpected(wanted: &str, got: &VerifiedPayload) -> Error {
    Error::Internal(format!("expected {} payload, decoded {:?}", wanted, got))
}
