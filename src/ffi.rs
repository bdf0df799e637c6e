//! Cross-boundary call surface
//!
//! Serialized request and response in, CBOR out. Errors come back as a
//! [`CallStatus`] with a stable numeric code (see [`ErrorKind::code`]);
//! nothing unwinds out of these functions.
//!
//! The key provider is called synchronously from inside the call, at most
//! once per distinct quorum.

use crate::config::VerifierConfig;
use crate::engine::VerificationEngine;
use crate::error::ErrorKind;
use crate::query::{Query, Request, Response};
use crate::quorum::{MemoizedResolver, QuorumKeyResolver};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Status code reported for a successful call
pub const STATUS_OK: u8 = 0;

/// Failure reported across the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStatus {
    pub code: u8,
    pub message: String,
}

impl CallStatus {
    pub fn kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(self.code)
    }
}

impl From<Error> for CallStatus {
    fn from(error: Error) -> Self {
        Self {
            code: error.kind().code(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.code, self.message)
    }
}

/// Verify an identity proof and return the verified identity as CBOR
pub fn identity_proof_to_cbor(
    request: &[u8],
    response: &[u8],
    quorum_key_provider: &dyn QuorumKeyResolver,
) -> std::result::Result<Vec<u8>, CallStatus> {
    contained(|| {
        let request = Request::from_bytes(request)?;
        if !matches!(request.query, Query::GetIdentity { .. }) {
            return Err(Error::InvalidRequest(format!(
                "expected a getIdentity request, got {}",
                request.query.kind()
            )));
        }
        verify_to_cbor(&request, response, quorum_key_provider, &VerifierConfig::default())
    })
}

/// Verify any supported response and return the verified object as CBOR
pub fn proof_to_cbor(
    request: &[u8],
    response: &[u8],
    quorum_key_provider: &dyn QuorumKeyResolver,
    config: &VerifierConfig,
) -> std::result::Result<Vec<u8>, CallStatus> {
    contained(|| {
        config.validate()?;
        let request = Request::from_bytes(request)?;
        verify_to_cbor(&request, response, quorum_key_provider, config)
    })
}

fn verify_to_cbor(
    request: &Request,
    response: &[u8],
    provider: &dyn QuorumKeyResolver,
    config: &VerifierConfig,
) -> Result<Vec<u8>> {
    let response = Response::from_bytes(response)?;
    let resolver = MemoizedResolver::new(provider);
    VerificationEngine::new(config)
        .verify(request, &response, &resolver, None)?
        .to_cbor()
}

fn contained<F>(call: F) -> std::result::Result<Vec<u8>, CallStatus>
where
    F: FnOnce() -> Result<Vec<u8>>,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result.map_err(CallStatus::from),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!("Panic inside boundary call: {}", message);
            Err(Error::Internal(format!("panic: {}", message)).into())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
