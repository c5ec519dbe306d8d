//! CTR_DRBG (NIST SP 800-90A) over AES-128 without derivation function.
//!
//! The generator is the root of nonce agreement in S2: both ends of a
//! singlecast session seed one instance from the same mixed entropy input
//! and personalization string and must then produce identical byte streams.
//! Output therefore depends only on the seed material and the call
//! sequence, never on hidden randomness.
//!
//! Two execution paths share the state and the algorithm:
//!
//! - [`CtrDrbg::generate`] and friends use [`SoftwareAes`] (or any
//!   [`BlockCipher`] via the `*_with` variants)
//! - [`CtrDrbg::generate_async`] and friends await an [`AsyncBlockCipher`]
//!
//! Only the block encryption loop differs between them; seed construction,
//! state absorption and counters are shared helpers, so the same inputs
//! yield the same bytes through either path.

use zeroize::Zeroize;

use crate::{
    bytes::increment,
    error::CryptoError,
    provider::{AsyncBlockCipher, BLOCK_SIZE, Block, BlockCipher, KEY_SIZE, Key, SoftwareAes},
};

/// Seed length (key length + block length) in bytes
pub const SEED_LENGTH: usize = KEY_SIZE + BLOCK_SIZE;

/// Maximum number of bytes per `generate` call (2^19 bits)
pub const MAX_REQUEST_BYTES: usize = 1 << 16;

/// Number of `generate` calls allowed before a reseed is required
pub const RESEED_INTERVAL: u64 = 1 << 48;

type Seed = [u8; SEED_LENGTH];

/// Deterministic random bit generator.
///
/// Constructed seeded: there is no way to obtain an instance that has not
/// gone through instantiation, so "generate before init" cannot happen.
pub struct CtrDrbg {
    /// Current cipher key
    key: Key,
    /// Counter block
    v: Block,
    /// Requests served since the last (re)seed
    reseed_counter: u64,
}

impl CtrDrbg {
    /// Instantiate from entropy and an optional personalization string.
    ///
    /// Both inputs are at most [`SEED_LENGTH`] bytes; shorter inputs are
    /// zero-padded.
    ///
    /// # Errors
    ///
    /// - `CryptoError::EntropyTooLong` / `PersonalizationTooLong`
    pub fn new(entropy: &[u8], personalization: Option<&[u8]>) -> Result<Self, CryptoError> {
        let mut drbg = Self::unseeded();
        drbg.init(entropy, personalization)?;
        Ok(drbg)
    }

    /// Instantiate through an asynchronous cipher provider.
    ///
    /// # Errors
    ///
    /// - `CryptoError::EntropyTooLong` / `PersonalizationTooLong`
    pub async fn new_async<A: AsyncBlockCipher>(
        cipher: &A,
        entropy: &[u8],
        personalization: Option<&[u8]>,
    ) -> Result<Self, CryptoError> {
        let mut drbg = Self::unseeded();
        drbg.init_async(cipher, entropy, personalization).await?;
        Ok(drbg)
    }

    fn unseeded() -> Self {
        Self { key: [0u8; KEY_SIZE], v: [0u8; BLOCK_SIZE], reseed_counter: 0 }
    }

    /// (Re-)instantiate the generator, discarding all previous state.
    ///
    /// # Errors
    ///
    /// - `CryptoError::EntropyTooLong` / `PersonalizationTooLong`
    pub fn init(
        &mut self,
        entropy: &[u8],
        personalization: Option<&[u8]>,
    ) -> Result<(), CryptoError> {
        let seed = instantiate_seed(entropy, personalization)?;
        self.reset_state();
        self.update(&SoftwareAes, &seed);
        self.reseed_counter = 1;
        Ok(())
    }

    /// Asynchronous counterpart of [`Self::init`].
    ///
    /// # Errors
    ///
    /// - `CryptoError::EntropyTooLong` / `PersonalizationTooLong`
    pub async fn init_async<A: AsyncBlockCipher>(
        &mut self,
        cipher: &A,
        entropy: &[u8],
        personalization: Option<&[u8]>,
    ) -> Result<(), CryptoError> {
        let seed = instantiate_seed(entropy, personalization)?;
        self.reset_state();
        self.update_async(cipher, &seed).await;
        self.reseed_counter = 1;
        Ok(())
    }

    /// Mix fresh entropy into the state.
    ///
    /// # Errors
    ///
    /// - `CryptoError::EntropyTooLong` / `AdditionalInputTooLong`
    pub fn reseed(&mut self, entropy: &[u8], additional: Option<&[u8]>) -> Result<(), CryptoError> {
        let seed = reseed_seed(entropy, additional)?;
        self.update(&SoftwareAes, &seed);
        self.reseed_counter = 1;
        Ok(())
    }

    /// Asynchronous counterpart of [`Self::reseed`].
    ///
    /// # Errors
    ///
    /// - `CryptoError::EntropyTooLong` / `AdditionalInputTooLong`
    pub async fn reseed_async<A: AsyncBlockCipher>(
        &mut self,
        cipher: &A,
        entropy: &[u8],
        additional: Option<&[u8]>,
    ) -> Result<(), CryptoError> {
        let seed = reseed_seed(entropy, additional)?;
        self.update_async(cipher, &seed).await;
        self.reseed_counter = 1;
        Ok(())
    }

    /// Produce `len` pseudorandom bytes with the software cipher.
    ///
    /// # Errors
    ///
    /// - `CryptoError::RequestTooLarge` if `len` exceeds [`MAX_REQUEST_BYTES`]
    /// - `CryptoError::AdditionalInputTooLong`
    /// - `CryptoError::ReseedRequired` once the reseed interval is reached
    pub fn generate(&mut self, len: usize, additional: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
        self.generate_with(&SoftwareAes, len, additional)
    }

    /// Produce `len` pseudorandom bytes with a caller-supplied cipher.
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub fn generate_with<C: BlockCipher>(
        &mut self,
        cipher: &C,
        len: usize,
        additional: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        let additional = self.check_request(len, additional)?;
        if let Some(input) = &additional {
            self.update(cipher, input);
        }

        let mut out = vec![0u8; len];
        for chunk in out.chunks_mut(BLOCK_SIZE) {
            increment(&mut self.v);
            let block = cipher.encrypt_block(&self.key, &self.v);
            chunk.copy_from_slice(&block[..chunk.len()]);
        }

        self.update(cipher, &additional.unwrap_or([0u8; SEED_LENGTH]));
        self.reseed_counter += 1;
        Ok(out)
    }

    /// Asynchronous counterpart of [`Self::generate_with`].
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub async fn generate_async<A: AsyncBlockCipher>(
        &mut self,
        cipher: &A,
        len: usize,
        additional: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        let additional = self.check_request(len, additional)?;
        if let Some(input) = &additional {
            self.update_async(cipher, input).await;
        }

        let mut out = vec![0u8; len];
        for chunk in out.chunks_mut(BLOCK_SIZE) {
            increment(&mut self.v);
            let block = cipher.encrypt_block_async(&self.key, &self.v).await;
            chunk.copy_from_slice(&block[..chunk.len()]);
        }

        self.update_async(cipher, &additional.unwrap_or([0u8; SEED_LENGTH])).await;
        self.reseed_counter += 1;
        Ok(out)
    }

    /// Fill `buffer` with pseudorandom bytes.
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub fn generate_into(&mut self, buffer: &mut [u8]) -> Result<(), CryptoError> {
        let bytes = self.generate(buffer.len(), None)?;
        buffer.copy_from_slice(&bytes);
        Ok(())
    }

    /// Number of requests served since the last (re)seed.
    pub fn reseed_counter(&self) -> u64 {
        self.reseed_counter
    }

    /// Validate a generate request and pad its additional input.
    fn check_request(
        &self,
        len: usize,
        additional: Option<&[u8]>,
    ) -> Result<Option<Seed>, CryptoError> {
        if self.reseed_counter > RESEED_INTERVAL {
            return Err(CryptoError::ReseedRequired { generated: self.reseed_counter });
        }
        if len > MAX_REQUEST_BYTES {
            return Err(CryptoError::RequestTooLarge { max: MAX_REQUEST_BYTES, requested: len });
        }

        match additional {
            Some(input) if !input.is_empty() => {
                Ok(Some(pad_seed(input).ok_or(CryptoError::AdditionalInputTooLong {
                    max: SEED_LENGTH,
                    actual: input.len(),
                })?))
            },
            _ => Ok(None),
        }
    }

    /// CTR_DRBG_Update with a synchronous cipher.
    fn update<C: BlockCipher>(&mut self, cipher: &C, provided: &Seed) {
        let mut temp = [0u8; SEED_LENGTH];
        for chunk in temp.chunks_exact_mut(BLOCK_SIZE) {
            increment(&mut self.v);
            chunk.copy_from_slice(&cipher.encrypt_block(&self.key, &self.v));
        }
        self.absorb(&mut temp, provided);
    }

    /// CTR_DRBG_Update with an asynchronous cipher.
    async fn update_async<A: AsyncBlockCipher>(&mut self, cipher: &A, provided: &Seed) {
        let mut temp = [0u8; SEED_LENGTH];
        for chunk in temp.chunks_exact_mut(BLOCK_SIZE) {
            increment(&mut self.v);
            chunk.copy_from_slice(&cipher.encrypt_block_async(&self.key, &self.v).await);
        }
        self.absorb(&mut temp, provided);
    }

    /// XOR the provided data into the keystream and split it into key || V.
    fn absorb(&mut self, temp: &mut Seed, provided: &Seed) {
        for (t, p) in temp.iter_mut().zip(provided) {
            *t ^= p;
        }
        self.key.copy_from_slice(&temp[..KEY_SIZE]);
        self.v.copy_from_slice(&temp[KEY_SIZE..]);
        temp.zeroize();
    }

    fn reset_state(&mut self) {
        self.key.zeroize();
        self.v.zeroize();
        self.reseed_counter = 0;
    }
}

impl Drop for CtrDrbg {
    fn drop(&mut self) {
        self.key.zeroize();
        self.v.zeroize();
    }
}

impl std::fmt::Debug for CtrDrbg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtrDrbg").field("reseed_counter", &self.reseed_counter).finish_non_exhaustive()
    }
}

/// Zero-pad `input` to the seed length. `None` if it is too long.
fn pad_seed(input: &[u8]) -> Option<Seed> {
    if input.len() > SEED_LENGTH {
        return None;
    }
    let mut seed = [0u8; SEED_LENGTH];
    seed[..input.len()].copy_from_slice(input);
    Some(seed)
}

/// Seed material for instantiation: entropy XOR personalization string.
fn instantiate_seed(entropy: &[u8], personalization: Option<&[u8]>) -> Result<Seed, CryptoError> {
    let mut seed = pad_seed(entropy)
        .ok_or(CryptoError::EntropyTooLong { max: SEED_LENGTH, actual: entropy.len() })?;

    if let Some(pers) = personalization {
        if pers.len() > SEED_LENGTH {
            return Err(CryptoError::PersonalizationTooLong {
                max: SEED_LENGTH,
                actual: pers.len(),
            });
        }
        for (s, p) in seed.iter_mut().zip(pers) {
            *s ^= p;
        }
    }
    Ok(seed)
}

/// Seed material for reseeding: entropy XOR additional input.
fn reseed_seed(entropy: &[u8], additional: Option<&[u8]>) -> Result<Seed, CryptoError> {
    let mut seed = pad_seed(entropy)
        .ok_or(CryptoError::EntropyTooLong { max: SEED_LENGTH, actual: entropy.len() })?;

    if let Some(add) = additional {
        if add.len() > SEED_LENGTH {
            return Err(CryptoError::AdditionalInputTooLong {
                max: SEED_LENGTH,
                actual: add.len(),
            });
        }
        for (s, a) in seed.iter_mut().zip(add) {
            *s ^= a;
        }
    }
    Ok(seed)
}
