//! AES-128-CCM (NIST SP 800-38C, RFC 3610)
//!
//! S2 frames use a 13-byte nonce and an 8-byte tag, but the codec accepts
//! every parameter combination CCM defines.
//!
//! Decryption reports a failed tag through [`CcmDecrypted::auth_ok`] instead
//! of an error, so a forged frame travels the same control flow as a genuine
//! one until the caller inspects the flag.

use aes::Aes128;
use subtle::ConstantTimeEq;

use super::cmac::xor_block;
use crate::{
    error::CryptoError,
    provider::{BLOCK_SIZE, Block, aes128, encrypt_with},
};

/// Nonce length used by S2
pub const S2_NONCE_SIZE: usize = 13;

/// Authentication tag length used by S2
pub const S2_AUTH_TAG_SIZE: usize = 8;

const MIN_NONCE_SIZE: usize = 7;
const MAX_NONCE_SIZE: usize = 13;

/// Output of [`encrypt_aes128_ccm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcmOutput {
    /// Ciphertext, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// Encrypted authentication tag
    pub auth_tag: Vec<u8>,
}

/// Output of [`decrypt_aes128_ccm`].
///
/// When `auth_ok` is false the plaintext is whatever the keystream produced
/// and MUST be discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcmDecrypted {
    /// Decrypted bytes (only meaningful when `auth_ok`)
    pub plaintext: Vec<u8>,
    /// Whether the authentication tag verified
    pub auth_ok: bool,
}

/// Encrypt and authenticate `plaintext`.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
/// - `CryptoError::InvalidNonceLength` if `iv` is not 7..=13 bytes
/// - `CryptoError::InvalidAuthTagLength` if `auth_tag_len` is not even in 4..=16
/// - `CryptoError::MessageTooLong` if the plaintext exceeds the length field
pub fn encrypt_aes128_ccm(
    plaintext: &[u8],
    key: &[u8],
    iv: &[u8],
    additional_data: &[u8],
    auth_tag_len: usize,
) -> Result<CcmOutput, CryptoError> {
    let params = CcmParams::new(key, iv, auth_tag_len, plaintext.len())?;

    let tag = params.cbc_mac(additional_data, plaintext);
    let ciphertext = params.ctr(plaintext);

    let s0 = params.keystream_block(0);
    let auth_tag = tag.iter().zip(&s0).take(auth_tag_len).map(|(t, s)| t ^ s).collect();

    Ok(CcmOutput { ciphertext, auth_tag })
}

/// Decrypt `ciphertext` and verify `auth_tag`.
///
/// The tag length is taken from `auth_tag`.
///
/// # Errors
///
/// Only for malformed parameters (see [`encrypt_aes128_ccm`]). A tag that
/// does not verify yields `Ok` with `auth_ok == false`.
pub fn decrypt_aes128_ccm(
    ciphertext: &[u8],
    key: &[u8],
    iv: &[u8],
    additional_data: &[u8],
    auth_tag: &[u8],
) -> Result<CcmDecrypted, CryptoError> {
    let params = CcmParams::new(key, iv, auth_tag.len(), ciphertext.len())?;

    let plaintext = params.ctr(ciphertext);
    let tag = params.cbc_mac(additional_data, &plaintext);

    let s0 = params.keystream_block(0);
    let expected: Vec<u8> =
        tag.iter().zip(&s0).take(auth_tag.len()).map(|(t, s)| t ^ s).collect();
    let auth_ok = bool::from(expected.ct_eq(auth_tag));

    Ok(CcmDecrypted { plaintext, auth_ok })
}

/// Validated CCM parameters with the expanded key.
struct CcmParams<'a> {
    cipher: Aes128,
    nonce: &'a [u8],
    tag_len: usize,
    /// Size of the length field (L)
    length_field: usize,
}

impl<'a> CcmParams<'a> {
    fn new(
        key: &[u8],
        nonce: &'a [u8],
        tag_len: usize,
        message_len: usize,
    ) -> Result<Self, CryptoError> {
        let cipher = aes128(key)?;

        if !(MIN_NONCE_SIZE..=MAX_NONCE_SIZE).contains(&nonce.len()) {
            return Err(CryptoError::InvalidNonceLength { expected: "7..=13", actual: nonce.len() });
        }
        if !(4..=16).contains(&tag_len) || tag_len % 2 != 0 {
            return Err(CryptoError::InvalidAuthTagLength(tag_len));
        }

        let length_field = 15 - nonce.len();
        if length_field < 8 && (message_len as u64) >> (8 * length_field) != 0 {
            return Err(CryptoError::MessageTooLong { length_field, actual: message_len });
        }

        Ok(Self { cipher, nonce, tag_len, length_field })
    }

    /// Counter block A_i
    fn counter_block(&self, counter: u64) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = (self.length_field - 1) as u8;
        block[1..=self.nonce.len()].copy_from_slice(self.nonce);
        let counter = counter.to_be_bytes();
        block[BLOCK_SIZE - self.length_field..].copy_from_slice(&counter[8 - self.length_field..]);
        block
    }

    fn keystream_block(&self, counter: u64) -> Block {
        encrypt_with(&self.cipher, &self.counter_block(counter))
    }

    /// Counter mode starting at A_1
    fn ctr(&self, input: &[u8]) -> Vec<u8> {
        let mut output = input.to_vec();
        for (i, chunk) in output.chunks_mut(BLOCK_SIZE).enumerate() {
            let keystream = self.keystream_block(i as u64 + 1);
            for (byte, k) in chunk.iter_mut().zip(&keystream) {
                *byte ^= k;
            }
        }
        output
    }

    /// Unencrypted tag T over B_0, the encoded AAD and the payload
    fn cbc_mac(&self, additional_data: &[u8], payload: &[u8]) -> Block {
        let mut b0 = [0u8; BLOCK_SIZE];
        let adata_flag = if additional_data.is_empty() { 0 } else { 0x40 };
        b0[0] = adata_flag | ((((self.tag_len - 2) / 2) as u8) << 3) | (self.length_field - 1) as u8;
        b0[1..=self.nonce.len()].copy_from_slice(self.nonce);
        let length = (payload.len() as u64).to_be_bytes();
        b0[BLOCK_SIZE - self.length_field..].copy_from_slice(&length[8 - self.length_field..]);

        let mut state = encrypt_with(&self.cipher, &b0);

        if !additional_data.is_empty() {
            let mut encoded = encode_aad_length(additional_data.len());
            encoded.extend_from_slice(additional_data);
            self.absorb(&mut state, &encoded);
        }
        self.absorb(&mut state, payload);

        state
    }

    /// CBC-MAC over `data`, zero-padded to whole blocks
    fn absorb(&self, state: &mut Block, data: &[u8]) {
        for chunk in data.chunks(BLOCK_SIZE) {
            xor_block(state, chunk);
            *state = encrypt_with(&self.cipher, state);
        }
    }
}

/// Length prefix for the associated data
fn encode_aad_length(len: usize) -> Vec<u8> {
    let len = len as u64;
    if len < 0xff00 {
        (len as u16).to_be_bytes().to_vec()
    } else if len <= u64::from(u32::MAX) {
        let mut out = vec![0xff, 0xfe];
        out.extend_from_slice(&(len as u32).to_be_bytes());
        out
    } else {
        let mut out = vec![0xff, 0xff];
        out.extend_from_slice(&len.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 16] {
        let mut key = [0u8; 16];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = 0x40 + i as u8;
        }
        key
    }

    // RFC 3610 / SP 800-38C example 1
    #[test]
    fn sp800_38c_example_1() {
        let nonce = hex::decode("10111213141516").unwrap();
        let aad = hex::decode("0001020304050607").unwrap();
        let plaintext = hex::decode("20212223").unwrap();

        let out = encrypt_aes128_ccm(&plaintext, &key(), &nonce, &aad, 4).unwrap();
        assert_eq!(hex::encode(&out.ciphertext), "7162015b");
        assert_eq!(hex::encode(&out.auth_tag), "4dac255d");
    }

    // SP 800-38C example 2
    #[test]
    fn sp800_38c_example_2() {
        let nonce = hex::decode("1011121314151617").unwrap();
        let aad = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let plaintext = hex::decode("202122232425262728292a2b2c2d2e2f").unwrap();

        let out = encrypt_aes128_ccm(&plaintext, &key(), &nonce, &aad, 6).unwrap();
        assert_eq!(hex::encode(&out.ciphertext), "d2a1f0e051ea5f62081a7792073d593d");
        assert_eq!(hex::encode(&out.auth_tag), "1fc64fbfaccd");
    }

    #[test]
    fn roundtrip_s2_parameters() {
        let nonce = [0x11u8; S2_NONCE_SIZE];
        let plaintext = b"switch binary set";
        let aad = [0x01, 0x02, 0x03];

        let out = encrypt_aes128_ccm(plaintext, &key(), &nonce, &aad, S2_AUTH_TAG_SIZE).unwrap();
        assert_eq!(out.auth_tag.len(), S2_AUTH_TAG_SIZE);

        let decrypted =
            decrypt_aes128_ccm(&out.ciphertext, &key(), &nonce, &aad, &out.auth_tag).unwrap();
        assert!(decrypted.auth_ok);
        assert_eq!(decrypted.plaintext, plaintext);
    }

    #[test]
    fn wrong_tag_reports_failure_without_error() {
        let nonce = [0x22u8; S2_NONCE_SIZE];
        let out = encrypt_aes128_ccm(b"payload", &key(), &nonce, &[], 8).unwrap();

        let mut tag = out.auth_tag.clone();
        tag[0] ^= 0x01;
        let decrypted = decrypt_aes128_ccm(&out.ciphertext, &key(), &nonce, &[], &tag).unwrap();
        assert!(!decrypted.auth_ok);
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let nonce = [0u8; S2_NONCE_SIZE];
        let out = encrypt_aes128_ccm(&[], &key(), &nonce, b"header", 8).unwrap();
        assert!(out.ciphertext.is_empty());

        let decrypted = decrypt_aes128_ccm(&[], &key(), &nonce, b"header", &out.auth_tag).unwrap();
        assert!(decrypted.auth_ok);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(matches!(
            encrypt_aes128_ccm(b"x", &key(), &[0u8; 6], &[], 8),
            Err(CryptoError::InvalidNonceLength { actual: 6, .. })
        ));
        assert!(matches!(
            encrypt_aes128_ccm(b"x", &key(), &[0u8; 13], &[], 5),
            Err(CryptoError::InvalidAuthTagLength(5))
        ));
        assert!(matches!(
            encrypt_aes128_ccm(b"x", &key(), &[0u8; 13], &[], 18),
            Err(CryptoError::InvalidAuthTagLength(18))
        ));
        assert!(matches!(
            decrypt_aes128_ccm(b"x", &[0u8; 15], &[0u8; 13], &[], &[0u8; 8]),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn rejects_message_longer_than_length_field() {
        // 13-byte nonce leaves a 2-byte length field
        let plaintext = vec![0u8; 0x1_0000];
        assert!(matches!(
            encrypt_aes128_ccm(&plaintext, &key(), &[0u8; 13], &[], 8),
            Err(CryptoError::MessageTooLong { length_field: 2, .. })
        ));
    }

    #[test]
    fn aad_length_encoding() {
        assert_eq!(encode_aad_length(5), vec![0x00, 0x05]);
        assert_eq!(encode_aad_length(0xfeff), vec![0xfe, 0xff]);
        assert_eq!(encode_aad_length(0xff00), vec![0xff, 0xfe, 0x00, 0x00, 0xff, 0x00]);
    }
}
