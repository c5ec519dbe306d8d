//! S2 key derivation.
//!
//! Every step is CMAC keyed either by a fixed protocol constant (extraction)
//! or by the extracted key (expansion over a counter-suffixed constant):
//!
//! ```text
//! ECDH secret ║ PubA ║ PubB ──CMAC(0x33..)──► PRK ──expand(0x88..)──► temp keyCCM, temp pers.
//! PNK ──expand(0x55..)──► keyCCM, personalization string, keyMPAN
//! senderEI ║ receiverEI ──CMAC(0x26..)──► noncePRK ──expand(0x88..)──► MEI
//! ```

use zeroize::Zeroize;

use crate::{
    aead::compute_cmac,
    error::CryptoError,
    provider::{KEY_SIZE, Key},
};

/// Size of an entropy input exchanged in nonce reports and SPAN extensions
pub const ENTROPY_INPUT_SIZE: usize = 16;

/// Size of a personalization string
pub const PERSONALIZATION_STRING_SIZE: usize = 32;

/// Size of the mixed entropy input fed to the SPAN generator
pub const MEI_SIZE: usize = 32;

/// Size of Curve25519 public keys and shared secrets
pub const ECDH_KEY_SIZE: usize = 32;

/// An S2 entropy input
pub type EntropyInput = [u8; ENTROPY_INPUT_SIZE];

const CONSTANT_PRK: Key = [0x33; KEY_SIZE];
const CONSTANT_TE: [u8; 15] = [0x88; 15];
const CONSTANT_NK: [u8; 15] = [0x55; 15];
const CONSTANT_NONCE: Key = [0x26; KEY_SIZE];
const CONSTANT_EI: [u8; 15] = [0x88; 15];

/// Working keys derived from a permanent network key.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkKeyMaterial {
    /// CCM key for singlecast and multicast frames
    pub key_ccm: Key,
    /// Key for the MPAN block derivation
    pub key_mpan: Key,
    /// Personalization string for SPAN generators
    pub personalization_string: [u8; PERSONALIZATION_STRING_SIZE],
}

impl Drop for NetworkKeyMaterial {
    fn drop(&mut self) {
        self.key_ccm.zeroize();
        self.key_mpan.zeroize();
        self.personalization_string.zeroize();
    }
}

/// Working keys derived from the bootstrap ECDH exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TempKeyMaterial {
    /// CCM key used while bootstrapping
    pub key_ccm: Key,
    /// Personalization string for the temporary SPAN generator
    pub personalization_string: [u8; PERSONALIZATION_STRING_SIZE],
}

impl Drop for TempKeyMaterial {
    fn drop(&mut self) {
        self.key_ccm.zeroize();
        self.personalization_string.zeroize();
    }
}

/// Extract the bootstrap PRK from the ECDH shared secret and both public keys.
///
/// `pub_key_a` belongs to the including node, `pub_key_b` to the joining node.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if any input is not 32 bytes
pub fn compute_prk(
    ecdh_shared_secret: &[u8],
    pub_key_a: &[u8],
    pub_key_b: &[u8],
) -> Result<Key, CryptoError> {
    for input in [ecdh_shared_secret, pub_key_a, pub_key_b] {
        if input.len() != ECDH_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength { expected: ECDH_KEY_SIZE, actual: input.len() });
        }
    }

    let mut message = Vec::with_capacity(3 * ECDH_KEY_SIZE);
    message.extend_from_slice(ecdh_shared_secret);
    message.extend_from_slice(pub_key_a);
    message.extend_from_slice(pub_key_b);

    let prk = compute_cmac(&message, &CONSTANT_PRK);
    message.zeroize();
    prk
}

/// Derive the temporary CCM key and personalization string from the PRK.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `prk` is not 16 bytes
pub fn derive_temp_keys(prk: &[u8]) -> Result<TempKeyMaterial, CryptoError> {
    let [t1, t2, t3] = expand::<3>(prk, &CONSTANT_TE)?;
    Ok(TempKeyMaterial { key_ccm: t1, personalization_string: concat(&t2, &t3) })
}

/// Derive the CCM key, MPAN key and personalization string from a PNK.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `pnk` is not 16 bytes
pub fn derive_network_keys(pnk: &[u8]) -> Result<NetworkKeyMaterial, CryptoError> {
    let [t1, t2, t3, t4] = expand::<4>(pnk, &CONSTANT_NK)?;
    Ok(NetworkKeyMaterial {
        key_ccm: t1,
        key_mpan: t4,
        personalization_string: concat(&t2, &t3),
    })
}

/// Extract the nonce PRK from both entropy inputs.
pub fn compute_nonce_prk(sender_ei: &EntropyInput, receiver_ei: &EntropyInput) -> Key {
    let mut message = [0u8; 2 * ENTROPY_INPUT_SIZE];
    message[..ENTROPY_INPUT_SIZE].copy_from_slice(sender_ei);
    message[ENTROPY_INPUT_SIZE..].copy_from_slice(receiver_ei);

    let Ok(prk) = compute_cmac(&message, &CONSTANT_NONCE) else {
        unreachable!("nonce PRK constant is a valid AES-128 key");
    };
    prk
}

/// Derive the mixed entropy input (MEI) from the nonce PRK.
pub fn derive_mei(nonce_prk: &Key) -> [u8; MEI_SIZE] {
    let mut first = Vec::with_capacity(2 * (CONSTANT_EI.len() + 1));
    first.extend_from_slice(&CONSTANT_EI);
    first.push(0x00);
    first.extend_from_slice(&CONSTANT_EI);
    first.push(0x01);

    let Ok(t1) = compute_cmac(&first, nonce_prk) else {
        unreachable!("nonce PRK is a 16-byte key");
    };

    let mut second = Vec::with_capacity(KEY_SIZE + CONSTANT_EI.len() + 1);
    second.extend_from_slice(&t1);
    second.extend_from_slice(&CONSTANT_EI);
    second.push(0x02);

    let Ok(t2) = compute_cmac(&second, nonce_prk) else {
        unreachable!("nonce PRK is a 16-byte key");
    };

    concat(&t1, &t2)
}

/// T_1 = CMAC(k, c ║ 1), T_i = CMAC(k, T_{i-1} ║ c ║ i)
fn expand<const N: usize>(key: &[u8], constant: &[u8; 15]) -> Result<[Key; N], CryptoError> {
    let mut out = [[0u8; KEY_SIZE]; N];
    let mut previous: Option<Key> = None;

    for (i, slot) in out.iter_mut().enumerate() {
        let mut message = Vec::with_capacity(KEY_SIZE + constant.len() + 1);
        if let Some(prev) = &previous {
            message.extend_from_slice(prev);
        }
        message.extend_from_slice(constant);
        message.push((i + 1) as u8);

        let t = compute_cmac(&message, key)?;
        *slot = t;
        previous = Some(t);
    }

    Ok(out)
}

fn concat(a: &Key, b: &Key) -> [u8; 2 * KEY_SIZE] {
    let mut out = [0u8; 2 * KEY_SIZE];
    out[..KEY_SIZE].copy_from_slice(a);
    out[KEY_SIZE..].copy_from_slice(b);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_keys_are_deterministic() {
        let pnk = [0x42u8; 16];
        let a = derive_network_keys(&pnk).unwrap();
        let b = derive_network_keys(&pnk).unwrap();
        assert!(a == b, "same PNK must yield the same keys");
    }

    #[test]
    fn network_key_parts_are_distinct() {
        let keys = derive_network_keys(&[0x01u8; 16]).unwrap();
        assert_ne!(keys.key_ccm, keys.key_mpan);
        assert_ne!(&keys.personalization_string[..16], &keys.key_ccm[..]);
        assert_ne!(&keys.personalization_string[16..], &keys.key_mpan[..]);
    }

    #[test]
    fn expansion_chains_previous_block() {
        let pnk = [0x07u8; 16];
        let keys = derive_network_keys(&pnk).unwrap();

        let mut message = CONSTANT_NK.to_vec();
        message.push(0x01);
        assert_eq!(keys.key_ccm, compute_cmac(&message, &pnk).unwrap());

        let mut message = keys.key_ccm.to_vec();
        message.extend_from_slice(&CONSTANT_NK);
        message.push(0x02);
        assert_eq!(&keys.personalization_string[..16], &compute_cmac(&message, &pnk).unwrap());
    }

    #[test]
    fn temp_keys_differ_from_network_keys() {
        let key = [0x99u8; 16];
        let temp = derive_temp_keys(&key).unwrap();
        let network = derive_network_keys(&key).unwrap();
        assert_ne!(temp.key_ccm, network.key_ccm);
    }

    #[test]
    fn wrong_length_keys_fail_fast() {
        assert!(matches!(
            derive_network_keys(&[0u8; 15]),
            Err(CryptoError::InvalidKeyLength { expected: 16, actual: 15 })
        ));
        assert!(matches!(
            derive_temp_keys(&[0u8; 32]),
            Err(CryptoError::InvalidKeyLength { expected: 16, actual: 32 })
        ));
        assert!(matches!(
            compute_prk(&[0u8; 32], &[0u8; 31], &[0u8; 32]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn nonce_prk_is_order_sensitive() {
        let a = [0x01u8; 16];
        let b = [0x02u8; 16];
        assert_ne!(compute_nonce_prk(&a, &b), compute_nonce_prk(&b, &a));
    }

    #[test]
    fn prk_is_order_sensitive() {
        let secret = [0x10u8; 32];
        let a = [0x20u8; 32];
        let b = [0x30u8; 32];
        assert_ne!(compute_prk(&secret, &a, &b).unwrap(), compute_prk(&secret, &b, &a).unwrap());
    }

    #[test]
    fn mei_is_32_bytes_and_deterministic() {
        let prk = compute_nonce_prk(&[0xAA; 16], &[0xBB; 16]);
        let mei = derive_mei(&prk);
        assert_eq!(mei.len(), MEI_SIZE);
        assert_eq!(mei, derive_mei(&prk));
        assert_ne!(&mei[..16], &mei[16..]);
    }
}
