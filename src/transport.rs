//! Platform RPC surface
//!
//! One unary call per method: serialized request in, serialized response
//! out, over whatever channel the host provides. Connection handling, retries
//! and the gRPC wire format belong to the [`PlatformTransport`] implementation.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Methods of the platform service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformMethod {
    BroadcastStateTransition,
    GetIdentity,
    GetIdentities,
    GetIdentityKeys,
    GetIdentityBalance,
    GetIdentityBalanceAndRevision,
    GetProofs,
    GetDataContract,
    GetDataContractHistory,
    GetDataContracts,
    GetDocuments,
    GetIdentitiesByPublicKeyHashes,
    GetIdentityByPublicKeyHashes,
    WaitForStateTransitionResult,
    GetConsensusParams,
}

/// Static description of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Wire name of the method
    pub name: &'static str,
    /// Request message type
    pub request_type: &'static str,
    /// Response message type
    pub response_type: &'static str,
    /// Whether answers to this method can be verified against a proof
    pub supports_proofs: bool,
    /// Replacement method, if this one is deprecated
    pub deprecated_by: Option<PlatformMethod>,
}

impl PlatformMethod {
    /// Every method, in service declaration order
    pub const ALL: [PlatformMethod; 15] = [
        PlatformMethod::BroadcastStateTransition,
        PlatformMethod::GetIdentity,
        PlatformMethod::GetIdentities,
        PlatformMethod::GetIdentityKeys,
        PlatformMethod::GetIdentityBalance,
        PlatformMethod::GetIdentityBalanceAndRevision,
        PlatformMethod::GetProofs,
        PlatformMethod::GetDataContract,
        PlatformMethod::GetDataContractHistory,
        PlatformMethod::GetDataContracts,
        PlatformMethod::GetDocuments,
        PlatformMethod::GetIdentitiesByPublicKeyHashes,
        PlatformMethod::GetIdentityByPublicKeyHashes,
        PlatformMethod::WaitForStateTransitionResult,
        PlatformMethod::GetConsensusParams,
    ];

    pub fn descriptor(self) -> MethodDescriptor {
        use PlatformMethod::*;

        let (name, request_type, response_type, supports_proofs) = match self {
            BroadcastStateTransition => (
                "broadcastStateTransition",
                "BroadcastStateTransitionRequest",
                "BroadcastStateTransitionResponse",
                false,
            ),
            GetIdentity => ("getIdentity", "GetIdentityRequest", "GetIdentityResponse", true),
            GetIdentities => (
                "getIdentities",
                "GetIdentitiesRequest",
                "GetIdentitiesResponse",
                true,
            ),
            GetIdentityKeys => (
                "getIdentityKeys",
                "GetIdentityKeysRequest",
                "GetIdentityKeysResponse",
                true,
            ),
            // Balance lookups reuse the identity request message.
            GetIdentityBalance => (
                "getIdentityBalance",
                "GetIdentityRequest",
                "GetIdentityBalanceResponse",
                true,
            ),
            GetIdentityBalanceAndRevision => (
                "getIdentityBalanceAndRevision",
                "GetIdentityRequest",
                "GetIdentityBalanceAndRevisionResponse",
                true,
            ),
            GetProofs => ("getProofs", "GetProofsRequest", "GetProofsResponse", true),
            GetDataContract => (
                "getDataContract",
                "GetDataContractRequest",
                "GetDataContractResponse",
                true,
            ),
            GetDataContractHistory => (
                "getDataContractHistory",
                "GetDataContractHistoryRequest",
                "GetDataContractHistoryResponse",
                true,
            ),
            GetDataContracts => (
                "getDataContracts",
                "GetDataContractsRequest",
                "GetDataContractsResponse",
                true,
            ),
            GetDocuments => (
                "getDocuments",
                "GetDocumentsRequest",
                "GetDocumentsResponse",
                true,
            ),
            GetIdentitiesByPublicKeyHashes => (
                "getIdentitiesByPublicKeyHashes",
                "GetIdentitiesByPublicKeyHashesRequest",
                "GetIdentitiesByPublicKeyHashesResponse",
                true,
            ),
            GetIdentityByPublicKeyHashes => (
                "getIdentityByPublicKeyHashes",
                "GetIdentityByPublicKeyHashesRequest",
                "GetIdentityByPublicKeyHashesResponse",
                true,
            ),
            // Reports on a broadcast transition rather than reading state.
            WaitForStateTransitionResult => (
                "waitForStateTransitionResult",
                "WaitForStateTransitionResultRequest",
                "WaitForStateTransitionResultResponse",
                false,
            ),
            GetConsensusParams => (
                "getConsensusParams",
                "GetConsensusParamsRequest",
                "GetConsensusParamsResponse",
                false,
            ),
        };

        let deprecated_by = match self {
            GetIdentityByPublicKeyHashes => Some(GetIdentitiesByPublicKeyHashes),
            _ => None,
        };

        MethodDescriptor {
            name,
            request_type,
            response_type,
            supports_proofs,
            deprecated_by,
        }
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn is_deprecated(self) -> bool {
        self.descriptor().deprecated_by.is_some()
    }

    /// Look a method up by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

impl fmt::Display for PlatformMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// gRPC-style status codes reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// Numeric gRPC code
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Cancelled => 1,
            StatusCode::Unknown => 2,
            StatusCode::InvalidArgument => 3,
            StatusCode::DeadlineExceeded => 4,
            StatusCode::NotFound => 5,
            StatusCode::AlreadyExists => 6,
            StatusCode::PermissionDenied => 7,
            StatusCode::ResourceExhausted => 8,
            StatusCode::FailedPrecondition => 9,
            StatusCode::Aborted => 10,
            StatusCode::OutOfRange => 11,
            StatusCode::Unimplemented => 12,
            StatusCode::Internal => 13,
            StatusCode::Unavailable => 14,
            StatusCode::DataLoss => 15,
            StatusCode::Unauthenticated => 16,
        }
    }

    /// Failures of reachability rather than of content
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            StatusCode::Cancelled
                | StatusCode::DeadlineExceeded
                | StatusCode::ResourceExhausted
                | StatusCode::Unavailable
        )
    }
}

/// Failed call as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStatus {
    pub code: StatusCode,
    pub message: Option<String>,
}

impl TransportStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{:?} ({}): {}", self.code, self.code.code(), message),
            None => write!(f, "{:?} ({})", self.code, self.code.code()),
        }
    }
}

impl From<TransportStatus> for Error {
    fn from(status: TransportStatus) -> Self {
        if status.code.is_transient() {
            Error::ResolverUnavailable(format!("transport: {}", status))
        } else {
            Error::Decode(format!("transport: {}", status))
        }
    }
}

/// Unary RPC channel keyed by method
#[async_trait]
pub trait PlatformTransport: Send + Sync {
    /// Send one serialized request and wait for the serialized response
    async fn unary(
        &self,
        method: PlatformMethod,
        request: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, TransportStatus>;
}

/// Call a method, turning transport failures into crate errors
pub async fn call<T: PlatformTransport + ?Sized>(
    transport: &T,
    method: PlatformMethod,
    request: Vec<u8>,
) -> Result<Vec<u8>> {
    if let Some(replacement) = method.descriptor().deprecated_by {
        tracing::warn!("{} is deprecated, use {}", method, replacement);
    }
    transport.unary(method, request).await.map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_table_is_complete() {
        let names: Vec<&str> = PlatformMethod::ALL.iter().map(|m| m.name()).collect();
        assert_eq!(
            names,
            vec![
                "broadcastStateTransition",
                "getIdentity",
                "getIdentities",
                "getIdentityKeys",
                "getIdentityBalance",
                "getIdentityBalanceAndRevision",
                "getProofs",
                "getDataContract",
                "getDataContractHistory",
                "getDataContracts",
                "getDocuments",
                "getIdentitiesByPublicKeyHashes",
                "getIdentityByPublicKeyHashes",
                "waitForStateTransitionResult",
                "getConsensusParams",
            ]
        );

        for method in PlatformMethod::ALL {
            assert_eq!(PlatformMethod::from_name(method.name()), Some(method));
        }
        assert_eq!(PlatformMethod::from_name("getIdentitiesKeys"), None);
    }

    #[test]
    fn test_request_type_pairing() {
        let balance = PlatformMethod::GetIdentityBalance.descriptor();
        assert_eq!(balance.request_type, "GetIdentityRequest");
        assert_eq!(balance.response_type, "GetIdentityBalanceResponse");
        assert!(!PlatformMethod::GetConsensusParams.descriptor().supports_proofs);
        assert!(!PlatformMethod::WaitForStateTransitionResult.descriptor().supports_proofs);
        assert!(PlatformMethod::GetProofs.descriptor().supports_proofs);
    }

    #[test]
    fn test_deprecation_flag() {
        assert!(PlatformMethod::GetIdentityByPublicKeyHashes.is_deprecated());
        assert_eq!(
            PlatformMethod::GetIdentityByPublicKeyHashes
                .descriptor()
                .deprecated_by,
            Some(PlatformMethod::GetIdentitiesByPublicKeyHashes)
        );
        let deprecated = PlatformMethod::ALL
            .iter()
            .filter(|m| m.is_deprecated())
            .count();
        assert_eq!(deprecated, 1);
    }

    #[test]
    fn test_status_mapping() {
        let unavailable: Error = TransportStatus::new(StatusCode::Unavailable, "down").into();
        assert!(matches!(unavailable, Error::ResolverUnavailable(_)));

        let timeout: Error = TransportStatus::new(StatusCode::DeadlineExceeded, "slow").into();
        assert!(timeout.is_retryable());

        let invalid: Error = TransportStatus::new(StatusCode::InvalidArgument, "bad id").into();
        assert!(matches!(invalid, Error::Decode(_)));
    }
}
