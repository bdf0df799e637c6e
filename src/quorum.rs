//! Quorum identities, public keys and key resolution
//!
//! The verification engine never looks up quorum keys by itself. It asks a
//! [`QuorumKeyResolver`] handed in by the caller, once per verification.
//! Whatever backs the resolver (chain RPC, a local cache, a fixed test set)
//! owns its own retry and staleness policy.

use crate::{Error, Result};
use parking_lot::Mutex;
use secp256k1::{PublicKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Long-living masternode quorum type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuorumType(pub u8);

impl QuorumType {
    /// 100 members, 67 threshold
    pub const LLMQ_100_67: QuorumType = QuorumType(4);
    /// Regtest platform quorum
    pub const LLMQ_TEST_PLATFORM: QuorumType = QuorumType(106);
    /// Devnet platform quorum
    pub const LLMQ_DEVNET_PLATFORM: QuorumType = QuorumType(107);
}

impl fmt::Display for QuorumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash identifying a quorum instance
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuorumHash([u8; 32]);

impl QuorumHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for QuorumHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for QuorumHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuorumHash({})", hex::encode(self.0))
    }
}

/// Aggregated quorum public key (x-only, BIP-340)
///
/// Bound to one `(quorum_type, quorum_hash)` pair by whoever resolved it.
/// Immutable once built.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuorumPublicKey([u8; 32]);

impl QuorumPublicKey {
    /// Parse key bytes.
    ///
    /// Accepts a 32-byte x-only key or a 33-byte SEC1 compressed key. The
    /// point must be on the curve.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let x_only = match bytes.len() {
            32 => XOnlyPublicKey::from_slice(bytes)
                .map_err(|e| Error::InvalidConfig(format!("invalid x-only quorum key: {}", e)))?,
            33 => PublicKey::from_slice(bytes)
                .map_err(|e| Error::InvalidConfig(format!("invalid compressed quorum key: {}", e)))?
                .x_only_public_key()
                .0,
            len => {
                return Err(Error::InvalidConfig(format!(
                    "quorum key must be 32 or 33 bytes, got {}",
                    len
                )))
            }
        };
        Ok(Self(x_only.serialize()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn to_x_only(self) -> std::result::Result<XOnlyPublicKey, secp256k1::Error> {
        XOnlyPublicKey::from_slice(&self.0)
    }
}

impl From<XOnlyPublicKey> for QuorumPublicKey {
    fn from(key: XOnlyPublicKey) -> Self {
        Self(key.serialize())
    }
}

impl fmt::Debug for QuorumPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuorumPublicKey({})", hex::encode(self.0))
    }
}

/// Source of quorum public keys
///
/// Implementations may block (chain RPC, disk). The engine calls
/// [`resolve`](QuorumKeyResolver::resolve) at most once per verification and
/// treats any error as terminal for that attempt.
pub trait QuorumKeyResolver: Send + Sync {
    /// Look up the public key of a quorum.
    ///
    /// `core_chain_locked_height` is the core height the responding node
    /// asserted; resolvers may use it to pick the right quorum rotation.
    /// Unknown quorums fail with [`Error::KeyNotFound`], transport trouble with
    /// [`Error::ResolverUnavailable`].
    fn resolve(
        &self,
        quorum_type: QuorumType,
        quorum_hash: &QuorumHash,
        core_chain_locked_height: u32,
    ) -> Result<QuorumPublicKey>;
}

impl<R: QuorumKeyResolver + ?Sized> QuorumKeyResolver for Arc<R> {
    fn resolve(
        &self,
        quorum_type: QuorumType,
        quorum_hash: &QuorumHash,
        core_chain_locked_height: u32,
    ) -> Result<QuorumPublicKey> {
        (**self).resolve(quorum_type, quorum_hash, core_chain_locked_height)
    }
}

impl<R: QuorumKeyResolver + ?Sized> QuorumKeyResolver for &R {
    fn resolve(
        &self,
        quorum_type: QuorumType,
        quorum_hash: &QuorumHash,
        core_chain_locked_height: u32,
    ) -> Result<QuorumPublicKey> {
        (**self).resolve(quorum_type, quorum_hash, core_chain_locked_height)
    }
}

/// Resolver backed by a closure, the shape a host-language callback takes.
pub struct FnResolver<F>(F);

/// Wrap a closure as a [`QuorumKeyResolver`]
pub fn resolver_fn<F>(f: F) -> FnResolver<F>
where
    F: Fn(QuorumType, &QuorumHash, u32) -> Result<QuorumPublicKey> + Send + Sync,
{
    FnResolver(f)
}

impl<F> QuorumKeyResolver for FnResolver<F>
where
    F: Fn(QuorumType, &QuorumHash, u32) -> Result<QuorumPublicKey> + Send + Sync,
{
    fn resolve(
        &self,
        quorum_type: QuorumType,
        quorum_hash: &QuorumHash,
        core_chain_locked_height: u32,
    ) -> Result<QuorumPublicKey> {
        (self.0)(quorum_type, quorum_hash, core_chain_locked_height)
    }
}

/// Fixed set of known quorum keys
#[derive(Debug, Clone, Default)]
pub struct StaticQuorumKeys {
    keys: HashMap<(QuorumType, QuorumHash), QuorumPublicKey>,
}

impl StaticQuorumKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key, builder style
    pub fn with_key(
        mut self,
        quorum_type: QuorumType,
        quorum_hash: QuorumHash,
        key: QuorumPublicKey,
    ) -> Self {
        self.insert(quorum_type, quorum_hash, key);
        self
    }

    pub fn insert(&mut self, quorum_type: QuorumType, quorum_hash: QuorumHash, key: QuorumPublicKey) {
        self.keys.insert((quorum_type, quorum_hash), key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl QuorumKeyResolver for StaticQuorumKeys {
    fn resolve(
        &self,
        quorum_type: QuorumType,
        quorum_hash: &QuorumHash,
        _core_chain_locked_height: u32,
    ) -> Result<QuorumPublicKey> {
        self.keys
            .get(&(quorum_type, *quorum_hash))
            .copied()
            .ok_or(Error::KeyNotFound {
                quorum_type,
                quorum_hash: *quorum_hash,
            })
    }
}

/// Outcome of a memoized lookup; errors are not `Clone`, so keep just enough to replay them.
#[derive(Debug, Clone)]
enum Memo {
    Found(QuorumPublicKey),
    NotFound,
    Unavailable(String),
}

/// Resolver wrapper that forwards each distinct quorum to the inner resolver once.
///
/// Scoped to a single boundary call: create it, use it, drop it. Nothing
/// outlives the call, so there is no staleness to manage.
pub struct MemoizedResolver<R> {
    inner: R,
    memo: Mutex<HashMap<(QuorumType, QuorumHash), Memo>>,
}

impl<R: QuorumKeyResolver> MemoizedResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Number of distinct quorums looked up so far
    pub fn distinct_lookups(&self) -> usize {
        self.memo.lock().len()
    }
}

impl<R: QuorumKeyResolver> QuorumKeyResolver for MemoizedResolver<R> {
    fn resolve(
        &self,
        quorum_type: QuorumType,
        quorum_hash: &QuorumHash,
        core_chain_locked_height: u32,
    ) -> Result<QuorumPublicKey> {
        let mut memo = self.memo.lock();
        let entry = memo.entry((quorum_type, *quorum_hash)).or_insert_with(|| {
            match self
                .inner
                .resolve(quorum_type, quorum_hash, core_chain_locked_height)
            {
                Ok(key) => Memo::Found(key),
                Err(Error::KeyNotFound { .. }) => Memo::NotFound,
                Err(e) => Memo::Unavailable(e.to_string()),
            }
        });

        match entry {
            Memo::Found(key) => Ok(*key),
            Memo::NotFound => Err(Error::KeyNotFound {
                quorum_type,
                quorum_hash: *quorum_hash,
            }),
            Memo::Unavailable(message) => Err(Error::ResolverUnavailable(message.clone())),
        }
    }
}
