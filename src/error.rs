//! Error types for proof verification

use crate::quorum::{QuorumHash, QuorumType};
use crate::verification::RootHash;
use thiserror::Error;

/// Result type for light client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Light client error types
///
/// Every failure of a verification call ends up as exactly one of these.
/// Nothing is retried internally; [`Error::is_retryable`] tells the caller
/// whether running the whole call again can help.
#[derive(Debug, Error)]
pub enum Error {
    /// Proof bytes could not be decoded or are structurally invalid
    #[error("Malformed proof: {0}")]
    MalformedProof(String),

    /// Recomputed root differs from the claimed or expected root
    #[error("Root mismatch: expected {expected}, computed {actual}")]
    RootMismatch {
        /// Root the proof was checked against
        expected: RootHash,
        /// Root recomputed from the branches
        actual: RootHash,
    },

    /// Quorum signature over the root did not verify
    #[error("Invalid quorum signature from quorum {quorum_hash}: {reason}")]
    InvalidSignature {
        /// Quorum that supposedly signed
        quorum_hash: QuorumHash,
        /// What went wrong
        reason: String,
    },

    /// The resolver does not know the quorum
    #[error("Quorum key not found: type {quorum_type}, hash {quorum_hash}")]
    KeyNotFound {
        /// Quorum type
        quorum_type: QuorumType,
        /// Quorum hash
        quorum_hash: QuorumHash,
    },

    /// The resolver failed or timed out
    #[error("Quorum key resolver unavailable: {0}")]
    ResolverUnavailable(String),

    /// Payload could not be decoded into the expected object
    #[error("Decode error: {0}")]
    Decode(String),

    /// Payload carries a schema version this client does not understand
    #[error("Unsupported payload version {version} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the payload
        version: u8,
        /// Highest version understood
        supported: u8,
    },

    /// Request cannot be served by this call
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response does not fit the request
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Output encoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything that should not happen
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error classification with stable numeric codes for the call boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    MalformedProof = 1,
    RootMismatch = 2,
    InvalidSignature = 3,
    KeyNotFound = 4,
    ResolverUnavailable = 5,
    DecodeError = 6,
    UnsupportedVersion = 7,
    InvalidRequest = 8,
    InvalidResponse = 9,
    InvalidConfig = 10,
    Encoding = 11,
    Internal = 12,
}

impl ErrorKind {
    /// Status code reported across the call boundary. Zero is reserved for success.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Inverse of [`ErrorKind::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        let kind = match code {
            1 => Self::MalformedProof,
            2 => Self::RootMismatch,
            3 => Self::InvalidSignature,
            4 => Self::KeyNotFound,
            5 => Self::ResolverUnavailable,
            6 => Self::DecodeError,
            7 => Self::UnsupportedVersion,
            8 => Self::InvalidRequest,
            9 => Self::InvalidResponse,
            10 => Self::InvalidConfig,
            11 => Self::Encoding,
            12 => Self::Internal,
            _ => return None,
        };
        Some(kind)
    }

    /// Short stable name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedProof => "malformed_proof",
            Self::RootMismatch => "root_mismatch",
            Self::InvalidSignature => "invalid_signature",
            Self::KeyNotFound => "key_not_found",
            Self::ResolverUnavailable => "resolver_unavailable",
            Self::DecodeError => "decode_error",
            Self::UnsupportedVersion => "unsupported_version",
            Self::InvalidRequest => "invalid_request",
            Self::InvalidResponse => "invalid_response",
            Self::InvalidConfig => "invalid_config",
            Self::Encoding => "encoding",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedProof(_) => ErrorKind::MalformedProof,
            Error::RootMismatch { .. } => ErrorKind::RootMismatch,
            Error::InvalidSignature { .. } => ErrorKind::InvalidSignature,
            Error::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Error::ResolverUnavailable(_) => ErrorKind::ResolverUnavailable,
            Error::Decode(_) => ErrorKind::DecodeError,
            Error::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::InvalidResponse(_) => ErrorKind::InvalidResponse,
            Error::InvalidConfig(_) | Error::Io(_) => ErrorKind::InvalidConfig,
            Error::Encoding(_) => ErrorKind::Encoding,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether repeating the whole verification call may succeed.
    ///
    /// Only resolver-side failures qualify; verification has no side effects
    /// so a retry is always safe, just pointless for the other kinds.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::KeyNotFound | ErrorKind::ResolverUnavailable
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}
