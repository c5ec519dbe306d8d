//! AEAD codec: AES-128-CCM with CMAC, plus the legacy block modes.
//!
//! ```text
//! S2 frame  ──► CCM (13-byte SPAN/MPAN nonce, 8-byte tag)
//! S2 KDF    ──► CMAC
//! S2 MPAN   ──► ECB (one block)
//! S0 frame  ──► OFB + CBC-MAC
//! ```

pub mod ccm;
pub mod cmac;
pub mod modes;

pub use ccm::{
    CcmDecrypted, CcmOutput, S2_AUTH_TAG_SIZE, S2_NONCE_SIZE, decrypt_aes128_ccm,
    encrypt_aes128_ccm,
};
pub use cmac::{CmacSubkeys, compute_cmac, generate_cmac_subkeys};
pub use modes::{
    S0_MAC_SIZE, compute_mac, decrypt_aes128_ofb, encrypt_aes128_cbc, encrypt_aes128_ecb,
    encrypt_aes128_ofb,
};
