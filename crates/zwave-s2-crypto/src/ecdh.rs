//! Curve25519 key pairs for the S2 key exchange.
//!
//! Only raw 32-byte keys cross this API. Internally the private key is held
//! as an `x25519_dalek::StaticSecret`, which zeroizes itself on drop.

use rand::{CryptoRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{error::CryptoError, kdf::ECDH_KEY_SIZE};

/// Size of a device specific key (leading bytes of the public key)
pub const DSK_SIZE: usize = 16;

/// Number of leading public key bytes blanked during authenticated inclusion
pub const PIN_SIZE: usize = 2;

/// A raw Curve25519 public key
pub type RawPublicKey = [u8; ECDH_KEY_SIZE];

/// A Curve25519 key pair.
pub struct KeyPair {
    private_key: StaticSecret,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from a cryptographically secure RNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let private_key = StaticSecret::random_from_rng(rng);
        let public_key = PublicKey::from(&private_key);
        Self { private_key, public_key }
    }

    /// Import a key pair from a raw private key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidKeyLength` if `private_key` is not 32 bytes
    pub fn from_private_key(private_key: &[u8]) -> Result<Self, CryptoError> {
        let raw = raw_key(private_key)?;
        let private_key = StaticSecret::from(raw);
        let public_key = PublicKey::from(&private_key);
        Ok(Self { private_key, public_key })
    }

    /// Raw public key.
    pub fn public_key(&self) -> RawPublicKey {
        self.public_key.to_bytes()
    }

    /// Raw private key, for persisting the controller's long-term key.
    pub fn private_key(&self) -> [u8; ECDH_KEY_SIZE] {
        self.private_key.to_bytes()
    }

    /// Device specific key of this key pair.
    pub fn dsk(&self) -> [u8; DSK_SIZE] {
        extract_dsk_from_public_key(&self.public_key())
    }

    /// Compute the ECDH shared secret with a peer's raw public key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidKeyLength` if `peer_public_key` is not 32 bytes
    pub fn diffie_hellman(&self, peer_public_key: &[u8]) -> Result<[u8; ECDH_KEY_SIZE], CryptoError> {
        let peer = PublicKey::from(raw_key(peer_public_key)?);
        Ok(self.private_key.diffie_hellman(&peer).to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("public_key", &self.public_key.as_bytes()).finish_non_exhaustive()
    }
}

/// The DSK is the first 16 bytes of the public key.
pub fn extract_dsk_from_public_key(public_key: &RawPublicKey) -> [u8; DSK_SIZE] {
    let mut dsk = [0u8; DSK_SIZE];
    dsk.copy_from_slice(&public_key[..DSK_SIZE]);
    dsk
}

/// Restore a public key whose first two bytes were blanked for
/// authenticated inclusion, using the 5-digit PIN the user entered.
pub fn public_key_with_pin(blanked: &RawPublicKey, pin: u16) -> RawPublicKey {
    let mut public_key = *blanked;
    public_key[..PIN_SIZE].copy_from_slice(&pin.to_be_bytes());
    public_key
}

fn raw_key(bytes: &[u8]) -> Result<[u8; ECDH_KEY_SIZE], CryptoError> {
    <[u8; ECDH_KEY_SIZE]>::try_from(bytes)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: ECDH_KEY_SIZE, actual: bytes.len() })
}
