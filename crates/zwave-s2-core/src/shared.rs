//! Shared handle to a security manager.
//!
//! Several tasks in a driver (receive loop, send queue, inclusion flow) touch
//! the same session state. The handle serializes them behind an async mutex.
//! Clone shares the same underlying manager.

use std::{
    ops::Sub,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::{Mutex, MutexGuard};
use zwave_s2_crypto::EntropyInput;

use crate::{
    NodeId,
    error::SecurityError,
    manager::{DecryptOutcome, DecryptRequest, EncryptedPayload, SecurityManager},
    security_class::SecurityClass,
};

/// Clonable, task-safe [`SecurityManager`].
pub struct SharedSecurityManager<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    inner: Arc<Mutex<SecurityManager<I>>>,
}

impl<I> Clone for SharedSecurityManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<I> SharedSecurityManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Wrap a manager.
    pub fn new(manager: SecurityManager<I>) -> Self {
        Self { inner: Arc::new(Mutex::new(manager)) }
    }

    /// Exclusive access for multi-step operations.
    pub async fn lock(&self) -> MutexGuard<'_, SecurityManager<I>> {
        self.inner.lock().await
    }

    /// Run `f` with exclusive access.
    pub async fn with<R>(&self, f: impl FnOnce(&mut SecurityManager<I>) -> R) -> R {
        let mut manager = self.inner.lock().await;
        f(&mut manager)
    }

    /// See [`SecurityManager::generate_nonce`].
    pub async fn generate_nonce(&self, peer: NodeId) -> EntropyInput {
        self.inner.lock().await.generate_nonce(peer)
    }

    /// See [`SecurityManager::encrypt_for_peer`].
    ///
    /// # Errors
    ///
    /// As [`SecurityManager::encrypt_for_peer`].
    pub async fn encrypt_for_peer(
        &self,
        peer: NodeId,
        plaintext: &[u8],
        aad: &[u8],
        class: SecurityClass,
        now: I,
    ) -> Result<EncryptedPayload, SecurityError> {
        self.inner.lock().await.encrypt_for_peer(peer, plaintext, aad, class, now)
    }

    /// See [`SecurityManager::decrypt_from_peer`].
    ///
    /// # Errors
    ///
    /// As [`SecurityManager::decrypt_from_peer`].
    pub async fn decrypt_from_peer(
        &self,
        peer: NodeId,
        request: &DecryptRequest<'_>,
        now: I,
    ) -> Result<DecryptOutcome, SecurityError> {
        self.inner.lock().await.decrypt_from_peer(peer, request, now)
    }
}
