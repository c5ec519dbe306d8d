//! Legacy block modes for S0 and bootstrap framing.
//!
//! S2 itself only uses CCM and CMAC. These helpers exist for the S0 scheme
//! (OFB payload encryption, CBC-MAC authentication) and for the MPAN
//! derivation, which is a single ECB block.

use super::cmac::xor_block;
use crate::{
    bytes::zero_pad,
    error::CryptoError,
    provider::{BLOCK_SIZE, Block, aes128, encrypt_with},
};

/// Length of the S0 message authentication code
pub const S0_MAC_SIZE: usize = 8;

/// Encrypt block-aligned `plaintext` in ECB mode.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
/// - `CryptoError::InvalidBlockLength` if the input is not block aligned
pub fn encrypt_aes128_ecb(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = aes128(key)?;
    if plaintext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidBlockLength { actual: plaintext.len() });
    }

    let mut out = Vec::with_capacity(plaintext.len());
    for chunk in plaintext.chunks_exact(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        out.extend_from_slice(&encrypt_with(&cipher, &block));
    }
    Ok(out)
}

/// Encrypt `plaintext` in CBC mode after zero-padding it to whole blocks.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
/// - `CryptoError::LengthMismatch` if `iv` is not 16 bytes
pub fn encrypt_aes128_cbc(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = aes128(key)?;
    let mut state = block_from(iv)?;

    let padded = zero_pad(plaintext, BLOCK_SIZE).output;
    let mut out = Vec::with_capacity(padded.len());
    for chunk in padded.chunks_exact(BLOCK_SIZE) {
        xor_block(&mut state, chunk);
        state = encrypt_with(&cipher, &state);
        out.extend_from_slice(&state);
    }
    Ok(out)
}

/// Encrypt `plaintext` in OFB mode. Output has the input's length.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
/// - `CryptoError::LengthMismatch` if `iv` is not 16 bytes
pub fn encrypt_aes128_ofb(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = aes128(key)?;
    let mut feedback = block_from(iv)?;

    let mut out = plaintext.to_vec();
    for chunk in out.chunks_mut(BLOCK_SIZE) {
        feedback = encrypt_with(&cipher, &feedback);
        for (byte, k) in chunk.iter_mut().zip(&feedback) {
            *byte ^= k;
        }
    }
    Ok(out)
}

/// Decrypt OFB ciphertext. OFB is symmetric, so this is encryption again.
///
/// # Errors
///
/// See [`encrypt_aes128_ofb`].
pub fn decrypt_aes128_ofb(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    encrypt_aes128_ofb(ciphertext, key, iv)
}

/// Compute the S0 message authentication code.
///
/// CBC-MAC over the zero-padded authentication data; the MAC is the first
/// 8 bytes of the last ciphertext block. `iv` defaults to all zeros.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
/// - `CryptoError::LengthMismatch` if `iv` is not 16 bytes
pub fn compute_mac(
    auth_data: &[u8],
    key: &[u8],
    iv: Option<&[u8]>,
) -> Result<[u8; S0_MAC_SIZE], CryptoError> {
    let zero_iv = [0u8; BLOCK_SIZE];
    let ciphertext = encrypt_aes128_cbc(auth_data, key, iv.unwrap_or(&zero_iv))?;

    let mut mac = [0u8; S0_MAC_SIZE];
    if ciphertext.len() >= BLOCK_SIZE {
        let last = ciphertext.len() - BLOCK_SIZE;
        mac.copy_from_slice(&ciphertext[last..last + S0_MAC_SIZE]);
    }
    Ok(mac)
}

fn block_from(iv: &[u8]) -> Result<Block, CryptoError> {
    <Block>::try_from(iv).map_err(|_| CryptoError::LengthMismatch { left: iv.len(), right: BLOCK_SIZE })
}

#[cfg(test)]
mod tests {
    use super::*;

    // SP 800-38A F.1.1 / F.2.1 / F.4.1 key and first plaintext block
    const KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";
    const IV: &str = "000102030405060708090a0b0c0d0e0f";
    const P1: &str = "6bc1bee22e409f96e93d7e117393172a";

    #[test]
    fn ecb_matches_sp800_38a() {
        let out = encrypt_aes128_ecb(&hex::decode(P1).unwrap(), &hex::decode(KEY).unwrap()).unwrap();
        assert_eq!(hex::encode(out), "3ad77bb40d7a3660a89ecaf32466ef97");
    }

    #[test]
    fn cbc_matches_sp800_38a() {
        let out = encrypt_aes128_cbc(
            &hex::decode(P1).unwrap(),
            &hex::decode(KEY).unwrap(),
            &hex::decode(IV).unwrap(),
        )
        .unwrap();
        assert_eq!(hex::encode(out), "7649abac8119b246cee98e9b12e9197d");
    }

    #[test]
    fn ofb_matches_sp800_38a() {
        let out = encrypt_aes128_ofb(
            &hex::decode(P1).unwrap(),
            &hex::decode(KEY).unwrap(),
            &hex::decode(IV).unwrap(),
        )
        .unwrap();
        assert_eq!(hex::encode(out), "3b3fd92eb72dad20333449f8e83cfb4a");
    }

    #[test]
    fn ofb_roundtrip_partial_block() {
        let key = hex::decode(KEY).unwrap();
        let iv = hex::decode(IV).unwrap();
        let plaintext = b"legacy S0 payload, 29 bytes!!";

        let ciphertext = encrypt_aes128_ofb(plaintext, &key, &iv).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_eq!(decrypt_aes128_ofb(&ciphertext, &key, &iv).unwrap(), plaintext);
    }

    #[test]
    fn ecb_rejects_unaligned_input() {
        let result = encrypt_aes128_ecb(&[0u8; 17], &[0u8; 16]);
        assert_eq!(result, Err(CryptoError::InvalidBlockLength { actual: 17 }));
    }

    #[test]
    fn cbc_rejects_short_iv() {
        assert!(matches!(
            encrypt_aes128_cbc(b"abc", &[0u8; 16], &[0u8; 8]),
            Err(CryptoError::LengthMismatch { left: 8, right: 16 })
        ));
    }

    #[test]
    fn mac_is_prefix_of_last_cbc_block() {
        let key = [0x0fu8; 16];
        let data = b"0123456789abcdef0123";

        let ciphertext = encrypt_aes128_cbc(data, &key, &[0u8; 16]).unwrap();
        let mac = compute_mac(data, &key, None).unwrap();

        assert_eq!(ciphertext.len(), 32);
        assert_eq!(&mac[..], &ciphertext[16..24]);
    }

    #[test]
    fn mac_depends_on_iv() {
        let key = [0x0fu8; 16];
        let a = compute_mac(b"data", &key, None).unwrap();
        let b = compute_mac(b"data", &key, Some(&[1u8; 16])).unwrap();
        assert_ne!(a, b);
    }
}
