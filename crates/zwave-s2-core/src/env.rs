//! Environment abstraction for deterministic testing.
//!
//! Decouples the session engine from system resources (time, randomness).
//! Production drivers plug in the OS clock and RNG, tests plug in a seeded
//! RNG and a clock they advance by hand.

use std::time::Duration;

use rand::{CryptoRng, RngCore};

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code sleeps. State machines take `now` as an argument.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Adapts an [`Environment`] to `rand`'s RNG traits.
///
/// Used to generate Curve25519 key pairs from the environment's entropy.
pub struct EnvironmentRng<'a, E>(&'a E);

impl<'a, E: Environment> EnvironmentRng<'a, E> {
    /// Wrap an environment.
    pub fn new(env: &'a E) -> Self {
        Self(env)
    }
}

impl<E: Environment> RngCore for EnvironmentRng<'_, E> {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.0.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        self.0.random_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.random_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.random_bytes(dest);
        Ok(())
    }
}

// Environments are required to supply cryptographically secure entropy.
impl<E: Environment> CryptoRng for EnvironmentRng<'_, E> {}

/// Deterministic environment for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use std::{
        sync::{Arc, Mutex, PoisonError},
        time::{Duration, Instant},
    };

    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::Environment;

    const DEFAULT_SEED: u64 = 0x5332_5332;

    /// Seeded ChaCha20 RNG and a virtual clock that only moves on
    /// [`MockEnv::advance`] or [`Environment::sleep`].
    ///
    /// Clones share the clock and RNG stream.
    #[derive(Clone)]
    pub struct MockEnv {
        inner: Arc<Mutex<MockState>>,
    }

    struct MockState {
        origin: Instant,
        elapsed: Duration,
        rng: ChaCha20Rng,
    }

    impl MockEnv {
        /// Environment with the default seed.
        pub fn new() -> Self {
            Self::with_seed(DEFAULT_SEED)
        }

        /// Environment with an explicit seed.
        #[allow(clippy::disallowed_methods)]
        pub fn with_seed(seed: u64) -> Self {
            Self {
                inner: Arc::new(Mutex::new(MockState {
                    origin: Instant::now(),
                    elapsed: Duration::ZERO,
                    rng: ChaCha20Rng::seed_from_u64(seed),
                })),
            }
        }

        /// Move the virtual clock forward.
        pub fn advance(&self, duration: Duration) {
            self.state().elapsed += duration;
        }

        fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Self::Instant {
            let state = self.state();
            state.origin + state.elapsed
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            self.advance(duration);
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.state().rng.fill_bytes(buffer);
        }
    }
}
