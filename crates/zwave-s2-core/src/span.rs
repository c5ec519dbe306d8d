//! Singlecast nonce (SPAN) table.
//!
//! One entry per peer. Both sides seed a CTR-DRBG from the mixed entropy of
//! a sender EI and a receiver EI and then draw identical nonces in lockstep.
//!
//! # State Machine
//!
//! ```text
//!            store_local_ei (we sent Nonce Report)
//!     ┌──────────────────────────────────────────┐
//!     │                                          ▼
//! ┌──────┐  store_remote_ei   ┌──────────┐   ┌─────────┐
//! │ None │───────────────────>│ RemoteEI │   │ LocalEI │
//! └──────┘                    └──────────┘   └─────────┘
//!     ▲                             │             │
//!     │ reset / remove              │ initialize_span (sender EI known)
//!     │                             ▼             ▼
//!     │                          ┌──────────────────┐
//!     └──────────────────────────│       Span       │
//!                                └──────────────────┘
//! ```
//!
//! Any state may be overwritten by a later EI or `initialize_span`.

use std::{
    collections::HashMap,
    ops::Sub,
    time::{Duration, Instant},
};

use zwave_s2_crypto::{
    CtrDrbg, EntropyInput, S2_NONCE_SIZE, compute_nonce_prk, derive_mei, provider::BLOCK_SIZE,
};

use crate::{NodeId, error::SecurityError, keys::SpanKeys, security_class::SecurityClass};

/// A 13-byte singlecast or multicast nonce
pub type Nonce = [u8; S2_NONCE_SIZE];

/// Observable state of a peer's SPAN entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanState {
    /// No entry
    None,
    /// Peer's receiver EI arrived, our sender EI not yet sent
    RemoteEI {
        /// Peer's receiver EI
        receiver_ei: EntropyInput,
    },
    /// We sent our receiver EI and wait for the peer's sender EI
    LocalEI {
        /// Our receiver EI
        receiver_ei: EntropyInput,
    },
    /// Nonce generator established
    Span {
        /// Class whose keys seeded the generator
        security_class: SecurityClass,
    },
}

/// The nonce last used for sending, kept briefly for collisions.
#[derive(Debug, Clone, Copy)]
struct CurrentSpan<I> {
    nonce: Nonce,
    created_at: I,
}

enum SpanEntry<I> {
    RemoteEI { receiver_ei: EntropyInput },
    LocalEI { receiver_ei: EntropyInput },
    Span { security_class: SecurityClass, rng: CtrDrbg, current_span: Option<CurrentSpan<I>> },
}

/// Per-peer SPAN entries.
///
/// # Invariants
///
/// - A nonce is handed out at most once
/// - An expired current SPAN is discarded, never returned
pub struct SpanTable<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    entries: HashMap<NodeId, SpanEntry<I>>,
}

impl<I> SpanTable<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Empty table
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// State of the peer's entry.
    pub fn state(&self, peer: NodeId) -> SpanState {
        match self.entries.get(&peer) {
            None => SpanState::None,
            Some(SpanEntry::RemoteEI { receiver_ei }) => {
                SpanState::RemoteEI { receiver_ei: *receiver_ei }
            },
            Some(SpanEntry::LocalEI { receiver_ei }) => {
                SpanState::LocalEI { receiver_ei: *receiver_ei }
            },
            Some(SpanEntry::Span { security_class, .. }) => {
                SpanState::Span { security_class: *security_class }
            },
        }
    }

    /// Record the receiver EI from a peer's Nonce Report.
    pub fn store_remote_ei(&mut self, peer: NodeId, receiver_ei: EntropyInput) {
        self.entries.insert(peer, SpanEntry::RemoteEI { receiver_ei });
    }

    /// Record the receiver EI we sent to the peer.
    pub fn store_local_ei(&mut self, peer: NodeId, receiver_ei: EntropyInput) {
        self.entries.insert(peer, SpanEntry::LocalEI { receiver_ei });
    }

    /// Seed the peer's nonce generator from both entropy inputs.
    ///
    /// # Errors
    ///
    /// - `SecurityError::Crypto` if the personalization string is rejected
    pub fn initialize_span(
        &mut self,
        peer: NodeId,
        security_class: SecurityClass,
        sender_ei: &EntropyInput,
        receiver_ei: &EntropyInput,
        keys: &dyn SpanKeys,
    ) -> Result<(), SecurityError> {
        let nonce_prk = compute_nonce_prk(sender_ei, receiver_ei);
        let mei = derive_mei(&nonce_prk);
        let rng = CtrDrbg::new(&mei, Some(keys.personalization_string()))?;

        self.entries.insert(peer, SpanEntry::Span { security_class, rng, current_span: None });
        Ok(())
    }

    /// Draw the next nonce for the peer.
    ///
    /// With `store`, the nonce is remembered as the current SPAN so a frame
    /// the peer encrypted at the same moment can still be decrypted.
    ///
    /// # Errors
    ///
    /// - `SecurityError::NoSecureSession` if the peer has no SPAN
    pub fn next_nonce(&mut self, peer: NodeId, store: bool, now: I) -> Result<Nonce, SecurityError> {
        let Some(SpanEntry::Span { rng, current_span, .. }) = self.entries.get_mut(&peer) else {
            return Err(SecurityError::NoSecureSession { peer });
        };

        let mut block = [0u8; BLOCK_SIZE];
        rng.generate_into(&mut block)?;

        let mut nonce = [0u8; S2_NONCE_SIZE];
        nonce.copy_from_slice(&block[..S2_NONCE_SIZE]);

        *current_span = store.then_some(CurrentSpan { nonce, created_at: now });
        Ok(nonce)
    }

    /// Take the stored current SPAN if it is younger than `window`.
    ///
    /// The stored nonce is cleared either way.
    pub fn take_current_span(&mut self, peer: NodeId, now: I, window: Duration) -> Option<Nonce> {
        let Some(SpanEntry::Span { current_span, .. }) = self.entries.get_mut(&peer) else {
            return None;
        };

        let current = current_span.take()?;
        (now - current.created_at < window).then_some(current.nonce)
    }

    /// Drop the peer's nonce state. The next exchange starts from None.
    pub fn reset(&mut self, peer: NodeId) {
        self.entries.remove(&peer);
    }

    /// Drop every SPAN seeded with `security_class`'s keys.
    pub fn reset_security_class(&mut self, security_class: SecurityClass) {
        self.entries.retain(|_, entry| {
            !matches!(entry, SpanEntry::Span { security_class: class, .. } if *class == security_class)
        });
    }

    /// Drop the peer's entry, returning whether it existed.
    pub fn remove(&mut self, peer: NodeId) -> bool {
        self.entries.remove(&peer).is_some()
    }

    /// Number of peers with an entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no peer has an entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<I> Default for SpanTable<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new()
    }
}
