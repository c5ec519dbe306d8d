//! Z-Wave S2 Cryptographic Primitives
//!
//! Cryptographic building blocks for the Security 2 session engine. Pure
//! functions and self-contained state with deterministic outputs. Callers
//! provide entropy, so every construction can be replayed in tests.
//!
//! # Key Hierarchy
//!
//! ```text
//! Curve25519 ECDH (bootstrap)           Permanent Network Key (per class)
//!        │                                        │
//!        ▼ CMAC extract                           ▼ CMAC expand
//!       PRK ──► temp keyCCM, temp pers.     keyCCM, keyMPAN, pers.
//!                          │                      │
//!                          └──────────┬───────────┘
//!                                     ▼
//! senderEI ║ receiverEI ──► noncePRK ──► MEI ──► CTR-DRBG(MEI, pers.)
//!                                                 │
//!                                                 ▼
//!                                   13-byte SPAN ──► AES-128-CCM
//! ```
//!
//! # Security
//!
//! Nonce agreement:
//! - Both peers seed the CTR-DRBG from the same MEI and personalization
//!   string, and reach the same nonces without exchanging them
//! - The generator has no hidden entropy: output is a function of the seed
//!   material and call sequence only
//!
//! Authenticity:
//! - CCM decryption never returns an error for a bad tag; it returns
//!   `auth_ok == false` and the caller discards the plaintext
//! - Tag comparison is constant time
//!
//! Key hygiene:
//! - Derived key material and generator state are zeroized on drop
//! - Key lengths are validated at every slice boundary

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod bytes;
pub mod ctr_drbg;
pub mod ecdh;
pub mod error;
pub mod kdf;
pub mod provider;

pub use aead::{
    CcmDecrypted, CcmOutput, S2_AUTH_TAG_SIZE, S2_NONCE_SIZE, compute_cmac, compute_mac,
    decrypt_aes128_ccm, encrypt_aes128_ccm,
};
pub use ctr_drbg::CtrDrbg;
pub use ecdh::{DSK_SIZE, KeyPair, RawPublicKey};
pub use error::CryptoError;
pub use kdf::{
    ENTROPY_INPUT_SIZE, EntropyInput, NetworkKeyMaterial, TempKeyMaterial, compute_nonce_prk,
    compute_prk, derive_mei, derive_network_keys, derive_temp_keys,
};
pub use provider::{AsyncBlockCipher, BlockCipher, Key, SoftwareAes};
