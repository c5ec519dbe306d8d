//! Error types for the S2 session engine.
//!
//! Session errors (missing nonce state, missing keys, bootstrap misuse) are
//! separate from provisioning errors (DSK strings, QR codes). A failed
//! authentication check is NOT an error: decryption reports it through
//! `auth_ok` and a resync action.

use thiserror::Error;
use zwave_s2_crypto::CryptoError;

use crate::{NodeId, security_class::SecurityClass};

/// Errors from the security manager and its session tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// No SPAN is established with the peer
    #[error("no secure session established with node {peer}")]
    NoSecureSession {
        /// Peer node
        peer: NodeId,
    },

    /// The peer's MPAN for this group is unknown or out of sync
    #[error("no multicast session with node {peer} in group {group}")]
    NoMulticastSession {
        /// Peer node
        peer: NodeId,
        /// Multicast group id
        group: u8,
    },

    /// Group id was never created by this manager
    #[error("unknown multicast group {0}")]
    UnknownMulticastGroup(u8),

    /// No network key configured for the class
    #[error("network key for {0} is not set")]
    NetworkKeyMissing(SecurityClass),

    /// Class cannot be used for this operation
    #[error("invalid security class {class} for {operation}")]
    InvalidSecurityClass {
        /// Offending class
        class: SecurityClass,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Temporary keys requested for a peer that is not bootstrapping
    #[error("bootstrap not started for node {peer}")]
    BootstrapNotStarted {
        /// Peer node
        peer: NodeId,
    },

    /// Entropy input of the wrong size
    #[error("invalid entropy input: expected 16 bytes, got {actual}")]
    InvalidEntropyInput {
        /// Received length
        actual: usize,
    },

    /// Malformed parameters reached a cryptographic primitive
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl SecurityError {
    /// Returns true if the peer should be sent a fresh nonce.
    ///
    /// Missing nonce state is recoverable by a nonce exchange. Missing keys
    /// and caller mistakes are not.
    pub fn requires_resync(&self) -> bool {
        matches!(self, Self::NoSecureSession { .. } | Self::NoMulticastSession { .. })
    }

    /// Returns true if this error indicates a configuration or programming
    /// mistake rather than peer state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NetworkKeyMissing(_)
                | Self::InvalidSecurityClass { .. }
                | Self::InvalidEntropyInput { .. }
                | Self::Crypto(_)
        )
    }
}

/// Errors from parsing a DSK string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DskError {
    /// Not eight dash-separated groups of five digits
    #[error("DSK must be 8 groups of 5 digits separated by dashes")]
    InvalidFormat,

    /// A group does not fit in 16 bits
    #[error("DSK block {index} is out of range: {value}")]
    BlockOutOfRange {
        /// Zero-based group index
        index: usize,
        /// Parsed value
        value: u32,
    },
}

/// Errors from parsing a provisioning QR code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QrCodeError {
    /// Missing the `90` lead-in
    #[error("QR code must start with 90")]
    InvalidLeadIn,

    /// Shorter than the fixed header
    #[error("QR code too short: {actual} digits")]
    TooShort {
        /// Number of characters
        actual: usize,
    },

    /// Contains characters other than decimal digits
    #[error("QR code contains non-digit characters")]
    InvalidCharacters,

    /// Version field is neither S2 nor SmartStart
    #[error("unsupported QR code version {0}")]
    UnsupportedVersion(u8),

    /// Checksum does not match the SHA-1 of the payload
    #[error("QR code checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum computed over the payload
        expected: u16,
        /// Checksum in the code
        actual: u16,
    },

    /// A fixed-width numeric field exceeds its range
    #[error("QR code field {field} is out of range: {value}")]
    FieldOutOfRange {
        /// Field name
        field: &'static str,
        /// Parsed value
        value: u32,
    },

    /// TLV block header or body is truncated
    #[error("incomplete TLV block at offset {offset}")]
    IncompleteTlv {
        /// Offset into the QR string
        offset: usize,
    },

    /// Known TLV type with a malformed body
    #[error("invalid TLV data for type {tlv_type}")]
    InvalidTlv {
        /// TLV type
        tlv_type: u8,
    },

    /// Unknown TLV marked critical
    #[error("unsupported critical TLV type {0}")]
    UnsupportedCriticalTlv(u8),

    /// Product type or product id TLV missing
    #[error("QR code is missing required {0} TLV")]
    MissingRequiredTlv(&'static str),
}
