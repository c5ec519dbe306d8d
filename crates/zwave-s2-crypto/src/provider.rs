//! Block cipher providers.
//!
//! Every S2 construction in this crate (CCM, CMAC, CTR-DRBG, the legacy
//! block modes) is a composition of single AES-128 block encryptions. The
//! traits here are the seam to the platform: [`BlockCipher`] for providers
//! that answer synchronously and [`AsyncBlockCipher`] for providers that
//! may suspend (hardware engines, remote key stores). [`SoftwareAes`]
//! implements both on top of the `aes` crate.

use aes::{
    Aes128,
    cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray},
};
use async_trait::async_trait;

use crate::error::CryptoError;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// AES-128 key size in bytes
pub const KEY_SIZE: usize = 16;

/// One AES block
pub type Block = [u8; BLOCK_SIZE];

/// An AES-128 key
pub type Key = [u8; KEY_SIZE];

/// Synchronous single-block AES-128 encryption.
pub trait BlockCipher {
    /// Encrypt one block under `key`.
    fn encrypt_block(&self, key: &Key, block: &Block) -> Block;
}

/// Asynchronous single-block AES-128 encryption.
///
/// Implementations MUST produce the same output as a synchronous AES-128
/// for the same key and block.
#[async_trait]
pub trait AsyncBlockCipher: Send + Sync {
    /// Encrypt one block under `key`, possibly suspending.
    async fn encrypt_block_async(&self, key: &Key, block: &Block) -> Block;
}

/// Software AES-128 from the `aes` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareAes;

impl BlockCipher for SoftwareAes {
    fn encrypt_block(&self, key: &Key, block: &Block) -> Block {
        let cipher = Aes128::new(GenericArray::from_slice(key));
        encrypt_with(&cipher, block)
    }
}

#[async_trait]
impl AsyncBlockCipher for SoftwareAes {
    async fn encrypt_block_async(&self, key: &Key, block: &Block) -> Block {
        BlockCipher::encrypt_block(self, key, block)
    }
}

/// Expand an AES-128 key from a slice.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
pub(crate) fn aes128(key: &[u8]) -> Result<Aes128, CryptoError> {
    Aes128::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() })
}

/// Encrypt a single block with an expanded key.
pub(crate) fn encrypt_with(cipher: &Aes128, block: &Block) -> Block {
    let mut buffer = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buffer);

    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&buffer);
    out
}

/// Copy a slice into a fixed-size key.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
pub fn key_from_slice(key: &[u8]) -> Result<Key, CryptoError> {
    <Key>::try_from(key)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() })
}
