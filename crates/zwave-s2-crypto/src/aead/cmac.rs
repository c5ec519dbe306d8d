//! AES-CMAC (RFC 4493)
//!
//! Used standalone as a MAC and as the building block of every S2 key
//! derivation step.

use aes::Aes128;

use crate::{
    bytes::{left_shift1, zero_pad},
    error::CryptoError,
    provider::{BLOCK_SIZE, Block, aes128, encrypt_with},
};

/// Constant for subkey generation (Rb for a 128-bit block)
const RB: u8 = 0x87;

/// CMAC subkeys K1 and K2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmacSubkeys {
    /// Subkey for messages ending in a complete block
    pub k1: Block,
    /// Subkey for messages ending in a padded block
    pub k2: Block,
}

/// Derive the CMAC subkeys for `key`.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
pub fn generate_cmac_subkeys(key: &[u8]) -> Result<CmacSubkeys, CryptoError> {
    let cipher = aes128(key)?;
    Ok(subkeys(&cipher))
}

fn subkeys(cipher: &Aes128) -> CmacSubkeys {
    let l = encrypt_with(cipher, &[0u8; BLOCK_SIZE]);
    let k1 = double(&l);
    let k2 = double(&k1);
    CmacSubkeys { k1, k2 }
}

/// Multiply by x in GF(2^128).
fn double(block: &Block) -> Block {
    let shifted = left_shift1(block);
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&shifted);
    // Constant-time conditional reduction
    out[BLOCK_SIZE - 1] ^= RB & 0u8.wrapping_sub(block[0] >> 7);
    out
}

/// Compute the 16-byte AES-CMAC of `message` under `key`.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
pub fn compute_cmac(message: &[u8], key: &[u8]) -> Result<Block, CryptoError> {
    let cipher = aes128(key)?;
    let CmacSubkeys { k1, k2 } = subkeys(&cipher);

    let num_blocks = message.len().div_ceil(BLOCK_SIZE).max(1);
    let last_block_complete = !message.is_empty() && message.len() % BLOCK_SIZE == 0;

    let last_start = (num_blocks - 1) * BLOCK_SIZE;
    let mut last = [0u8; BLOCK_SIZE];
    if last_block_complete {
        last.copy_from_slice(&message[last_start..]);
        xor_block(&mut last, &k1);
    } else {
        // Append the 0x80 marker, then pad with zeros
        let mut tail = message[last_start..].to_vec();
        tail.push(0x80);
        last.copy_from_slice(&zero_pad(&tail, BLOCK_SIZE).output);
        xor_block(&mut last, &k2);
    }

    let mut state = [0u8; BLOCK_SIZE];
    for chunk in message[..last_start].chunks_exact(BLOCK_SIZE) {
        xor_block(&mut state, chunk);
        state = encrypt_with(&cipher, &state);
    }
    xor_block(&mut state, &last);
    Ok(encrypt_with(&cipher, &state))
}

pub(crate) fn xor_block(target: &mut Block, other: &[u8]) {
    for (t, o) in target.iter_mut().zip(other) {
        *t ^= o;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_KEY: [u8; 16] = [
        0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f,
        0x3c,
    ];

    fn hex16(s: &str) -> Block {
        let mut out = [0u8; 16];
        out.copy_from_slice(&hex::decode(s).unwrap());
        out
    }

    #[test]
    fn subkeys_match_rfc_4493() {
        let keys = generate_cmac_subkeys(&RFC_KEY).unwrap();
        assert_eq!(keys.k1, hex16("fbeed618357133667c85e08f7236a8de"));
        assert_eq!(keys.k2, hex16("f7ddac306ae266ccf90bc11ee46d513b"));
    }

    #[test]
    fn empty_message() {
        let mac = compute_cmac(&[], &RFC_KEY).unwrap();
        assert_eq!(mac, hex16("bb1d6929e95937287fa37d129b756746"));
    }

    #[test]
    fn single_block_message() {
        let message = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let mac = compute_cmac(&message, &RFC_KEY).unwrap();
        assert_eq!(mac, hex16("070a16b46b4d4144f79bdd9dd04a287c"));
    }

    #[test]
    fn partial_last_block() {
        let message = hex::decode(
            "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e5130c81c46a35ce411",
        )
        .unwrap();
        let mac = compute_cmac(&message, &RFC_KEY).unwrap();
        assert_eq!(mac, hex16("dfa66747de9ae63030ca32611497c827"));
    }

    #[test]
    fn four_block_message() {
        let message = hex::decode(concat!(
            "6bc1bee22e409f96e93d7e117393172a",
            "ae2d8a571e03ac9c9eb76fac45af8e51",
            "30c81c46a35ce411e5fbc1191a0a52ef",
            "f69f2445df4f9b17ad2b417be66c3710"
        ))
        .unwrap();
        let mac = compute_cmac(&message, &RFC_KEY).unwrap();
        assert_eq!(mac, hex16("51f0bebf7e3b9d92fc49741779363cfe"));
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(matches!(
            compute_cmac(b"abc", &[0u8; 8]),
            Err(CryptoError::InvalidKeyLength { expected: 16, actual: 8 })
        ));
    }
}
