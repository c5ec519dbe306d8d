//! Buffer helpers shared by the block modes, CMAC and the DRBG.
//!
//! All functions are branch-free over the buffer contents so that timing
//! depends only on lengths.

use crate::error::CryptoError;

/// Result of [`zero_pad`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeroPadded {
    /// Input followed by zero bytes, length a multiple of the block size
    pub output: Vec<u8>,
    /// Number of zero bytes appended
    pub padding_length: usize,
}

/// Pad `input` with zeros to the next multiple of `block_size`.
///
/// Block-aligned input (including the empty slice) is returned unchanged
/// with `padding_length == 0`.
pub fn zero_pad(input: &[u8], block_size: usize) -> ZeroPadded {
    debug_assert!(block_size > 0);
    let remainder = input.len() % block_size;
    let padding_length = if remainder == 0 { 0 } else { block_size - remainder };

    let mut output = Vec::with_capacity(input.len() + padding_length);
    output.extend_from_slice(input);
    output.resize(input.len() + padding_length, 0);

    ZeroPadded { output, padding_length }
}

/// Shift the whole byte sequence left by one bit.
///
/// The high bit of byte `i + 1` is carried into the low bit of byte `i`.
/// The last byte has no carry-in and the top bit of the first byte is lost.
pub fn left_shift1(input: &[u8]) -> Vec<u8> {
    let mut output = vec![0u8; input.len()];
    for i in 0..input.len() {
        let carry = input.get(i + 1).map_or(0, |next| next >> 7);
        output[i] = (input[i] << 1) | carry;
    }
    output
}

/// XOR two equally sized buffers.
///
/// # Errors
///
/// - `CryptoError::LengthMismatch` if the lengths differ
pub fn xor(a: &[u8], b: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if a.len() != b.len() {
        return Err(CryptoError::LengthMismatch { left: a.len(), right: b.len() });
    }
    Ok(a.iter().zip(b).map(|(x, y)| x ^ y).collect())
}

/// XOR `other` into `target`.
///
/// # Errors
///
/// - `CryptoError::LengthMismatch` if the lengths differ
pub fn xor_in_place(target: &mut [u8], other: &[u8]) -> Result<(), CryptoError> {
    if target.len() != other.len() {
        return Err(CryptoError::LengthMismatch { left: target.len(), right: other.len() });
    }
    for (t, o) in target.iter_mut().zip(other) {
        *t ^= o;
    }
    Ok(())
}

/// Increment a big-endian unsigned integer in place.
///
/// Overflow of the whole buffer wraps to zero (nonce counter semantics).
pub fn increment(buffer: &mut [u8]) {
    for byte in buffer.iter_mut().rev() {
        let (value, overflow) = byte.overflowing_add(1);
        *byte = value;
        if !overflow {
            return;
        }
    }
}
