//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from S2 cryptographic primitives.
///
/// Every variant describes a caller mistake (wrong buffer shape, exhausted
/// generator). Authentication failures are not errors: the AEAD decoder
/// reports them through [`crate::CcmDecrypted::auth_ok`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Two buffers that must be combined have different lengths
    #[error("length mismatch: {left} bytes vs {right} bytes")]
    LengthMismatch {
        /// Length of the left operand
        left: usize,
        /// Length of the right operand
        right: usize,
    },

    /// Key material has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// CCM nonce length outside the supported range
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Supported nonce lengths
        expected: &'static str,
        /// Actual nonce length
        actual: usize,
    },

    /// CCM authentication tag length is not one of 4, 6, ..., 16
    #[error("invalid authentication tag length: {0}")]
    InvalidAuthTagLength(usize),

    /// Input for a block mode without padding is not block aligned
    #[error("input length {actual} is not a multiple of the block size")]
    InvalidBlockLength {
        /// Actual input length
        actual: usize,
    },

    /// Plaintext too long for the CCM length field
    #[error("message of {actual} bytes does not fit in a {length_field}-byte length field")]
    MessageTooLong {
        /// Size of the CCM length field in bytes
        length_field: usize,
        /// Actual message length
        actual: usize,
    },

    /// DRBG entropy input longer than the seed length
    #[error("entropy input too long: max {max}, got {actual}")]
    EntropyTooLong {
        /// Maximum accepted length
        max: usize,
        /// Actual length
        actual: usize,
    },

    /// DRBG personalization string longer than the seed length
    #[error("personalization string too long: max {max}, got {actual}")]
    PersonalizationTooLong {
        /// Maximum accepted length
        max: usize,
        /// Actual length
        actual: usize,
    },

    /// DRBG additional input longer than the seed length
    #[error("additional input too long: max {max}, got {actual}")]
    AdditionalInputTooLong {
        /// Maximum accepted length
        max: usize,
        /// Actual length
        actual: usize,
    },

    /// DRBG request exceeds the per-call output limit
    #[error("request of {requested} bytes exceeds limit of {max}")]
    RequestTooLarge {
        /// Maximum bytes per request
        max: usize,
        /// Requested bytes
        requested: usize,
    },

    /// DRBG reached its reseed interval
    #[error("reseed required after {generated} requests")]
    ReseedRequired {
        /// Number of requests served since the last (re)seed
        generated: u64,
    },
}

impl CryptoError {
    /// Returns true if the error is caused by a malformed input buffer.
    ///
    /// These are programmer errors: the caller handed over a key, nonce or
    /// operand of the wrong shape. The remaining variants are generator
    /// limits that a caller may recover from by reseeding.
    pub fn is_invalid_input(&self) -> bool {
        !matches!(self, Self::ReseedRequired { .. } | Self::RequestTooLarge { .. })
    }
}
