//! Verifier configuration
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! resolver_timeout_ms = 2000
//! allow_unproven = false
//!
//! [key_cache]
//! capacity = 16
//! ```

use crate::proof::ProofLimits;
use crate::quorum::QuorumType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Verification and client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Maximum number of branch entries in a proof
    pub max_proof_depth: usize,

    /// Maximum size of a proven payload in bytes
    pub max_value_size: usize,

    /// Time the resolver gets before a verification is abandoned
    pub resolver_timeout_ms: u64,

    /// Ask nodes for proofs
    pub request_proofs: bool,

    /// Accept plain data for requests that did not ask for a proof
    pub allow_unproven: bool,

    /// Only accept signatures from this quorum type
    pub quorum_type: Option<u8>,

    pub key_cache: KeyCacheConfig,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_proof_depth: 64,
            max_value_size: 4 * 1024 * 1024,
            resolver_timeout_ms: 5_000,
            request_proofs: true,
            allow_unproven: true,
            quorum_type: None,
            key_cache: KeyCacheConfig::default(),
        }
    }
}

/// Staleness policy of the quorum key cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyCacheConfig {
    /// Maximum number of cached keys
    pub capacity: usize,

    /// Seconds a resolved key stays usable
    pub ttl_secs: u64,

    /// Largest distance, in core blocks, between the height a key was
    /// resolved at and the height it is requested for
    pub max_height_drift: u32,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            ttl_secs: 3_600,
            max_height_drift: 576,
        }
    }
}

impl KeyCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl VerifierConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_proof_depth == 0 || self.max_proof_depth > 256 {
            return Err(Error::InvalidConfig(format!(
                "max_proof_depth must be between 1 and 256, got {}",
                self.max_proof_depth
            )));
        }
        if self.max_value_size == 0 {
            return Err(Error::InvalidConfig(
                "max_value_size must be positive".to_string(),
            ));
        }
        if self.resolver_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "resolver_timeout_ms must be positive".to_string(),
            ));
        }
        if self.key_cache.capacity == 0 {
            return Err(Error::InvalidConfig(
                "key_cache.capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver_timeout_ms)
    }

    pub fn required_quorum_type(&self) -> Option<QuorumType> {
        self.quorum_type.map(QuorumType)
    }

    pub fn proof_limits(&self) -> ProofLimits {
        ProofLimits {
            max_depth: self.max_proof_depth,
            max_value_size: self.max_value_size,
        }
    }
}
