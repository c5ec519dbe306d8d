//! Fuzz target for AES-128-CCM decryption
//!
//! # Strategy
//!
//! - Arbitrary key, nonce, tag and AAD lengths (most invalid)
//! - Valid parameters with a frame sealed under the same key, then mutated
//!
//! # Invariants
//!
//! - Invalid parameters return an error, never panic
//! - A sealed frame opens with `auth_ok`
//! - A mutated frame NEVER opens with `auth_ok`

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use zwave_s2_crypto::{S2_AUTH_TAG_SIZE, decrypt_aes128_ccm, encrypt_aes128_ccm};

#[derive(Debug, Arbitrary)]
enum CcmInput {
    Raw { key: Vec<u8>, nonce: Vec<u8>, aad: Vec<u8>, ciphertext: Vec<u8>, tag: Vec<u8> },
    Sealed { key: [u8; 16], nonce: [u8; 13], aad: Vec<u8>, plaintext: Vec<u8>, flip: Option<u16> },
}

fuzz_target!(|input: CcmInput| {
    match input {
        CcmInput::Raw { key, nonce, aad, ciphertext, tag } => {
            let _ = decrypt_aes128_ccm(&ciphertext, &key, &nonce, &aad, &tag);
        }

        CcmInput::Sealed { key, nonce, aad, plaintext, flip } => {
            let sealed = encrypt_aes128_ccm(&plaintext, &key, &nonce, &aad, S2_AUTH_TAG_SIZE)
                .expect("valid parameters");
            let mut ciphertext = sealed.ciphertext;
            let mut tag = sealed.auth_tag;

            let Some(bit) = flip else {
                let opened = decrypt_aes128_ccm(&ciphertext, &key, &nonce, &aad, &tag)
                    .expect("valid parameters");
                assert!(opened.auth_ok);
                assert_eq!(opened.plaintext, plaintext);
                return;
            };

            let bit = usize::from(bit) % ((ciphertext.len() + tag.len()) * 8);
            let (byte, mask) = (bit / 8, 1u8 << (bit % 8));
            if byte < ciphertext.len() {
                ciphertext[byte] ^= mask;
            } else {
                tag[byte - ciphertext.len()] ^= mask;
            }

            let opened = decrypt_aes128_ccm(&ciphertext, &key, &nonce, &aad, &tag)
                .expect("valid parameters");
            assert!(!opened.auth_ok, "mutated frame authenticated");
        }
    }
});
