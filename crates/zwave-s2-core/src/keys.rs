//! Network and bootstrap key sets.
//!
//! Both are derived once and never mutated. Changing a network key replaces
//! the whole set.

use zeroize::Zeroize;
use zwave_s2_crypto::{
    KeyPair, compute_prk, derive_network_keys, derive_temp_keys, kdf::PERSONALIZATION_STRING_SIZE,
    provider::{KEY_SIZE, Key, key_from_slice},
};

use crate::{
    env::{Environment, EnvironmentRng},
    error::SecurityError,
};

/// Size of a permanent network key.
pub const PNK_SIZE: usize = KEY_SIZE;

/// Key material a SPAN generator and the CCM codec need.
pub trait SpanKeys {
    /// CCM key
    fn key_ccm(&self) -> &Key;

    /// Personalization string for the SPAN generator
    fn personalization_string(&self) -> &[u8; PERSONALIZATION_STRING_SIZE];
}

/// Keys derived from a permanent network key.
#[derive(Clone)]
pub struct NetworkKeys {
    pnk: Key,
    key_ccm: Key,
    key_mpan: Key,
    personalization_string: [u8; PERSONALIZATION_STRING_SIZE],
}

impl NetworkKeys {
    /// Derive the working keys for a 16-byte PNK.
    ///
    /// # Errors
    ///
    /// - `SecurityError::Crypto` if `pnk` is not 16 bytes
    pub fn derive(pnk: &[u8]) -> Result<Self, SecurityError> {
        let material = derive_network_keys(pnk)?;
        Ok(Self {
            pnk: key_from_slice(pnk)?,
            key_ccm: material.key_ccm,
            key_mpan: material.key_mpan,
            personalization_string: material.personalization_string,
        })
    }

    /// The permanent network key itself.
    pub fn pnk(&self) -> &Key {
        &self.pnk
    }

    /// Key for the multicast MPAN derivation.
    pub fn key_mpan(&self) -> &Key {
        &self.key_mpan
    }
}

impl SpanKeys for NetworkKeys {
    fn key_ccm(&self) -> &Key {
        &self.key_ccm
    }

    fn personalization_string(&self) -> &[u8; PERSONALIZATION_STRING_SIZE] {
        &self.personalization_string
    }
}

impl Drop for NetworkKeys {
    fn drop(&mut self) {
        self.pnk.zeroize();
        self.key_ccm.zeroize();
        self.key_mpan.zeroize();
        self.personalization_string.zeroize();
    }
}

impl std::fmt::Debug for NetworkKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkKeys").finish_non_exhaustive()
    }
}

/// Generate a Curve25519 key pair from the environment's entropy.
pub fn generate_key_pair<E: Environment>(env: &E) -> KeyPair {
    KeyPair::generate(&mut EnvironmentRng::new(env))
}

/// Which side of the key exchange we are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapRole {
    /// We are the including controller (public key A)
    Including,
    /// We are the joining node (public key B)
    Joining,
}

/// Temporary keys used only while a peer is bootstrapping.
#[derive(Clone)]
pub struct TempNetworkKeys {
    key_ccm: Key,
    personalization_string: [u8; PERSONALIZATION_STRING_SIZE],
}

impl TempNetworkKeys {
    /// Derive from an already extracted PRK.
    ///
    /// # Errors
    ///
    /// - `SecurityError::Crypto` if `prk` is not 16 bytes
    pub fn from_prk(prk: &[u8]) -> Result<Self, SecurityError> {
        let material = derive_temp_keys(prk)?;
        Ok(Self {
            key_ccm: material.key_ccm,
            personalization_string: material.personalization_string,
        })
    }

    /// Run ECDH with the peer and derive the temporary keys.
    ///
    /// Both sides derive identical keys as long as they agree on `role`.
    ///
    /// # Errors
    ///
    /// - `SecurityError::Crypto` if `peer_public_key` is not 32 bytes
    pub fn from_key_exchange(
        own: &KeyPair,
        peer_public_key: &[u8],
        role: BootstrapRole,
    ) -> Result<Self, SecurityError> {
        let mut shared_secret = own.diffie_hellman(peer_public_key)?;
        let own_public_key = own.public_key();

        let (pub_a, pub_b) = match role {
            BootstrapRole::Including => (&own_public_key[..], peer_public_key),
            BootstrapRole::Joining => (peer_public_key, &own_public_key[..]),
        };
        let prk = compute_prk(&shared_secret, pub_a, pub_b);
        shared_secret.zeroize();

        let mut prk = prk?;
        let keys = Self::from_prk(&prk);
        prk.zeroize();
        keys
    }
}

impl SpanKeys for TempNetworkKeys {
    fn key_ccm(&self) -> &Key {
        &self.key_ccm
    }

    fn personalization_string(&self) -> &[u8; PERSONALIZATION_STRING_SIZE] {
        &self.personalization_string
    }
}

impl Drop for TempNetworkKeys {
    fn drop(&mut self) {
        self.key_ccm.zeroize();
        self.personalization_string.zeroize();
    }
}

impl std::fmt::Debug for TempNetworkKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempNetworkKeys").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[test]
    fn network_keys_match_kdf() {
        let pnk: Vec<u8> = (0u8..16).collect();
        let keys = NetworkKeys::derive(&pnk).unwrap();

        assert_eq!(keys.pnk(), &pnk[..]);
        assert_eq!(hex::encode(keys.key_ccm()), "27f90dd6d74697cba54eb11a0ee80617");
        assert_eq!(hex::encode(keys.key_mpan()), "4a46b6e046c129bc72f737e57e9b5786");
    }

    #[test]
    fn rejects_short_pnk() {
        assert!(matches!(NetworkKeys::derive(&[0u8; 10]), Err(SecurityError::Crypto(_))));
    }

    #[test]
    fn both_roles_derive_the_same_temp_keys() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let controller = KeyPair::generate(&mut rng);
        let joining = KeyPair::generate(&mut rng);

        let a = TempNetworkKeys::from_key_exchange(
            &controller,
            &joining.public_key(),
            BootstrapRole::Including,
        )
        .unwrap();
        let b = TempNetworkKeys::from_key_exchange(
            &joining,
            &controller.public_key(),
            BootstrapRole::Joining,
        )
        .unwrap();

        assert_eq!(a.key_ccm(), b.key_ccm());
        assert_eq!(a.personalization_string(), b.personalization_string());
    }

    #[test]
    fn mismatched_roles_disagree() {
        let mut rng = ChaCha20Rng::seed_from_u64(43);
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);

        let x = TempNetworkKeys::from_key_exchange(&a, &b.public_key(), BootstrapRole::Including)
            .unwrap();
        let y = TempNetworkKeys::from_key_exchange(&b, &a.public_key(), BootstrapRole::Including)
            .unwrap();
        assert_ne!(x.key_ccm(), y.key_ccm());
    }

    #[test]
    fn debug_redacts_material() {
        let keys = NetworkKeys::derive(&[0xAB; PNK_SIZE]).unwrap();
        assert!(!format!("{keys:?}").to_lowercase().contains("ab"));
    }

    #[test]
    fn key_pairs_follow_the_environment() {
        use crate::env::test_utils::MockEnv;

        let a = generate_key_pair(&MockEnv::with_seed(9));
        let b = generate_key_pair(&MockEnv::with_seed(9));
        let c = generate_key_pair(&MockEnv::with_seed(10));
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }
}
