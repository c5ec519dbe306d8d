//! Security manager.
//!
//! Owns every piece of S2 session state for one controller or node: network
//! keys, per-peer bootstrap keys, the SPAN and MPAN tables, multicast groups,
//! sequence numbers and granted classes. Like the other state machines in
//! this workspace it performs no I/O: time is passed in, and anything the
//! driver has to send comes back as a [`SecurityAction`].
//!
//! # Singlecast Nonce Exchange
//!
//! ```text
//! Sender                                      Receiver
//!   │ ── Nonce Get ─────────────────────────────> │
//!   │                                             │ generate_nonce: receiver EI
//!   │ <──────────────────── Nonce Report (EI) ─── │ (LocalEI)
//!   │ store_remote_ei (RemoteEI)                  │
//!   │ establish_span: sender EI (Span)            │
//!   │ encrypt_for_peer                            │
//!   │ ── Encapsulation + SPAN ext (sender EI) ──> │
//!   │                                             │ decrypt_from_peer seeds
//!   │                                             │ the SPAN (Span)
//! ```
//!
//! A failed decryption discards the SPAN and returns
//! [`SecurityAction::RequestNonceResync`] carrying a fresh receiver EI.

use std::{
    collections::{HashMap, VecDeque},
    ops::Sub,
    time::{Duration, Instant},
};

use tokio::sync::broadcast;
use tracing::{debug, warn};
use zeroize::Zeroize;
use zwave_s2_crypto::{
    CtrDrbg, EntropyInput, KeyPair, S2_AUTH_TAG_SIZE, decrypt_aes128_ccm, encrypt_aes128_ccm,
    error::CryptoError, provider::Key,
};

use crate::{
    NodeId,
    config::SecurityConfig,
    env::Environment,
    error::SecurityError,
    events::{EventBus, SecurityEvent},
    keys::{BootstrapRole, NetworkKeys, SpanKeys, TempNetworkKeys},
    mpan::{MpanInnerState, MpanState, MpanTable, MulticastGroup, MulticastGroupRegistry},
    security_class::{SECURITY_CLASS_ORDER, SecurityClass},
    span::{Nonce, SpanState, SpanTable},
};

/// Entropy drawn from the environment to seed the manager's generator
const MANAGER_ENTROPY_SIZE: usize = 32;

/// Actions the driver must carry out after a security operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityAction {
    /// Send a Nonce Report with this receiver EI so the peer re-seeds
    RequestNonceResync {
        /// Peer node
        peer: NodeId,
        /// Our fresh receiver EI
        receiver_ei: EntropyInput,
    },

    /// Tell the peer its multicast nonce for the group is out of sync
    ReportMpanOutOfSync {
        /// Peer node
        peer: NodeId,
        /// Peer's multicast group
        group: u8,
    },
}

/// CCM output of an encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Ciphertext, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// 8-byte authentication tag
    pub auth_tag: Vec<u8>,
}

/// A received singlecast frame.
#[derive(Debug, Clone, Copy)]
pub struct DecryptRequest<'a> {
    /// Encrypted payload
    pub ciphertext: &'a [u8],
    /// Authentication tag
    pub auth_tag: &'a [u8],
    /// Additional authenticated data (frame header and extensions)
    pub aad: &'a [u8],
    /// Sender EI from a SPAN extension, if present
    pub sender_ei: Option<EntropyInput>,
}

/// Result of a decryption attempt.
///
/// `auth_ok == false` is a normal outcome, not an error. The plaintext is
/// empty in that case and `actions` says how to recover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptOutcome {
    /// Decrypted payload (empty unless `auth_ok`)
    pub plaintext: Vec<u8>,
    /// Whether the frame authenticated
    pub auth_ok: bool,
    /// Class whose keys authenticated the frame
    pub security_class: Option<SecurityClass>,
    /// Follow-up actions for the driver
    pub actions: Vec<SecurityAction>,
}

impl DecryptOutcome {
    fn authenticated(plaintext: Vec<u8>, security_class: SecurityClass) -> Self {
        Self { plaintext, auth_ok: true, security_class: Some(security_class), actions: Vec::new() }
    }

    fn failed(action: SecurityAction) -> Self {
        Self { plaintext: Vec::new(), auth_ok: false, security_class: None, actions: vec![action] }
    }
}

/// Key and nonce for our next multicast to a group.
pub struct MulticastKeyAndIv {
    /// CCM key of the group's class
    pub key: Key,
    /// MPAN nonce
    pub iv: Nonce,
}

impl Drop for MulticastKeyAndIv {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Network keys per class and bootstrap keys per peer.
#[derive(Default)]
struct KeyStore {
    network: HashMap<SecurityClass, NetworkKeys>,
    temporary: HashMap<NodeId, TempNetworkKeys>,
}

impl KeyStore {
    fn network(&self, class: SecurityClass) -> Result<&NetworkKeys, SecurityError> {
        if !class.has_network_key() {
            return Err(SecurityError::InvalidSecurityClass { class, operation: "network key lookup" });
        }
        self.network.get(&class).ok_or(SecurityError::NetworkKeyMissing(class))
    }

    fn for_peer(&self, peer: NodeId, class: SecurityClass) -> Result<&dyn SpanKeys, SecurityError> {
        if class == SecurityClass::Temporary {
            return self
                .temporary
                .get(&peer)
                .map(|keys| keys as &dyn SpanKeys)
                .ok_or(SecurityError::BootstrapNotStarted { peer });
        }
        self.network(class).map(|keys| keys as &dyn SpanKeys)
    }
}

/// The S2 security manager.
///
/// Generic over `Instant` so tests can drive it with a virtual clock.
///
/// # Invariants
///
/// - Every nonce is used for at most one successful encryption or decryption
/// - A failed singlecast decryption yields exactly one resync action
/// - Temporary keys exist only between `begin_bootstrap` and
///   `complete_bootstrap` / `abort_bootstrap`
pub struct SecurityManager<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    config: SecurityConfig,
    rng: CtrDrbg,
    keys: KeyStore,
    span: SpanTable<I>,
    mpan: MpanTable,
    groups: MulticastGroupRegistry,
    security_classes: HashMap<NodeId, HashMap<SecurityClass, bool>>,
    own_sequence_numbers: HashMap<NodeId, u8>,
    peer_sequence_numbers: HashMap<NodeId, VecDeque<u8>>,
    events: EventBus<SecurityEvent>,
}

impl<I> SecurityManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a manager whose generator is seeded from the environment.
    pub fn new<E: Environment>(env: &E, config: SecurityConfig) -> Self {
        let mut entropy = [0u8; MANAGER_ENTROPY_SIZE];
        env.random_bytes(&mut entropy);

        let personalization = [0u8; MANAGER_ENTROPY_SIZE];
        let Ok(rng) = CtrDrbg::new(&entropy, Some(&personalization)) else {
            unreachable!("32-byte entropy and personalization fit the seed length");
        };
        entropy.zeroize();

        Self {
            groups: MulticastGroupRegistry::new(config.max_multicast_group_id),
            config,
            rng,
            keys: KeyStore::default(),
            span: SpanTable::new(),
            mpan: MpanTable::new(),
            security_classes: HashMap::new(),
            own_sequence_numbers: HashMap::new(),
            peer_sequence_numbers: HashMap::new(),
            events: EventBus::default(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Subscribe to security events.
    pub fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.events.subscribe()
    }

    // Keys

    /// Set (or replace) the permanent network key of a class.
    ///
    /// SPANs seeded with the old key are discarded.
    ///
    /// # Errors
    ///
    /// - `SecurityError::InvalidSecurityClass` for `Temporary` and `None`
    /// - `SecurityError::Crypto` if `pnk` is not 16 bytes
    pub fn set_network_key(&mut self, class: SecurityClass, pnk: &[u8]) -> Result<(), SecurityError> {
        if !class.has_network_key() {
            return Err(SecurityError::InvalidSecurityClass { class, operation: "set_network_key" });
        }

        let keys = NetworkKeys::derive(pnk)?;
        if self.keys.network.insert(class, keys).is_some() {
            self.span.reset_security_class(class);
        }
        debug!(security_class = %class, "network key set");
        Ok(())
    }

    /// Derived keys of a class.
    ///
    /// # Errors
    ///
    /// - `SecurityError::NetworkKeyMissing` if no key is set
    /// - `SecurityError::InvalidSecurityClass` for `Temporary` and `None`
    pub fn keys_for_security_class(&self, class: SecurityClass) -> Result<&NetworkKeys, SecurityError> {
        self.keys.network(class)
    }

    // SPAN

    /// SPAN state of a peer.
    pub fn span_state(&self, peer: NodeId) -> SpanState {
        self.span.state(peer)
    }

    /// Answer a Nonce Get: generate a receiver EI and wait for the peer's
    /// sender EI.
    pub fn generate_nonce(&mut self, peer: NodeId) -> EntropyInput {
        let receiver_ei = draw(&mut self.rng);
        self.span.store_local_ei(peer, receiver_ei);
        debug!(peer, "generated receiver EI");
        receiver_ei
    }

    /// Record the receiver EI from a peer's Nonce Report.
    ///
    /// # Errors
    ///
    /// - `SecurityError::InvalidEntropyInput` if `receiver_ei` is not 16 bytes
    pub fn store_remote_ei(&mut self, peer: NodeId, receiver_ei: &[u8]) -> Result<(), SecurityError> {
        let receiver_ei = EntropyInput::try_from(receiver_ei)
            .map_err(|_| SecurityError::InvalidEntropyInput { actual: receiver_ei.len() })?;
        self.span.store_remote_ei(peer, receiver_ei);
        Ok(())
    }

    /// Seed a SPAN from the peer's receiver EI and a fresh sender EI.
    ///
    /// Returns the sender EI to put in the SPAN extension of the next frame.
    ///
    /// # Errors
    ///
    /// - `SecurityError::NoSecureSession` unless the peer is in `RemoteEI`
    /// - `SecurityError::NetworkKeyMissing` / `BootstrapNotStarted` if the
    ///   class has no keys
    pub fn establish_span(
        &mut self,
        peer: NodeId,
        class: SecurityClass,
    ) -> Result<EntropyInput, SecurityError> {
        let SpanState::RemoteEI { receiver_ei } = self.span.state(peer) else {
            return Err(SecurityError::NoSecureSession { peer });
        };

        let keys = self.keys.for_peer(peer, class)?;
        let sender_ei = draw(&mut self.rng);
        self.span.initialize_span(peer, class, &sender_ei, &receiver_ei, keys)?;

        self.events.publish(SecurityEvent::SpanEstablished { peer, security_class: class });
        debug!(peer, security_class = %class, "SPAN established from remote EI");
        Ok(sender_ei)
    }

    /// Encrypt a singlecast payload for the peer.
    ///
    /// The nonce is kept as the current SPAN for the collision window.
    ///
    /// # Errors
    ///
    /// - `SecurityError::NoSecureSession` unless the peer has a SPAN of `class`
    pub fn encrypt_for_peer(
        &mut self,
        peer: NodeId,
        plaintext: &[u8],
        aad: &[u8],
        class: SecurityClass,
        now: I,
    ) -> Result<EncryptedPayload, SecurityError> {
        match self.span.state(peer) {
            SpanState::Span { security_class } if security_class == class => {},
            _ => return Err(SecurityError::NoSecureSession { peer }),
        }

        let keys = self.keys.for_peer(peer, class)?;
        let nonce = self.span.next_nonce(peer, true, now)?;
        let sealed = encrypt_aes128_ccm(plaintext, keys.key_ccm(), &nonce, aad, S2_AUTH_TAG_SIZE)?;

        Ok(EncryptedPayload { ciphertext: sealed.ciphertext, auth_tag: sealed.auth_tag })
    }

    /// Decrypt a singlecast frame from the peer.
    ///
    /// With a sender EI and a pending local EI the SPAN is seeded first,
    /// trying the peer's possible classes from highest to lowest. Otherwise
    /// the established SPAN is used, preferring a fresh current SPAN.
    ///
    /// # Errors
    ///
    /// - `SecurityError::NoSecureSession` without a SPAN or sender EI
    /// - `SecurityError::Crypto` if the tag has the wrong length
    pub fn decrypt_from_peer(
        &mut self,
        peer: NodeId,
        request: &DecryptRequest<'_>,
        now: I,
    ) -> Result<DecryptOutcome, SecurityError> {
        if request.auth_tag.len() != S2_AUTH_TAG_SIZE {
            return Err(CryptoError::InvalidAuthTagLength(request.auth_tag.len()).into());
        }

        if let Some(sender_ei) = request.sender_ei {
            return self.decrypt_with_sender_ei(peer, request, &sender_ei, now);
        }

        let SpanState::Span { security_class } = self.span.state(peer) else {
            return Err(SecurityError::NoSecureSession { peer });
        };
        let keys = self.keys.for_peer(peer, security_class)?;

        let window = self.config.span_collision_window;
        if let Some(nonce) = self.span.take_current_span(peer, now, window) {
            if let Some(plaintext) = open(request, keys.key_ccm(), &nonce)? {
                debug!(peer, "decrypted with current SPAN");
                return Ok(DecryptOutcome::authenticated(plaintext, security_class));
            }
        }

        let nonce = self.span.next_nonce(peer, false, now)?;
        if let Some(plaintext) = open(request, keys.key_ccm(), &nonce)? {
            return Ok(DecryptOutcome::authenticated(plaintext, security_class));
        }

        Ok(self.resync(peer))
    }

    fn decrypt_with_sender_ei(
        &mut self,
        peer: NodeId,
        request: &DecryptRequest<'_>,
        sender_ei: &EntropyInput,
        now: I,
    ) -> Result<DecryptOutcome, SecurityError> {
        let SpanState::LocalEI { receiver_ei } = self.span.state(peer) else {
            warn!(peer, "SPAN extension without a pending receiver EI");
            return Ok(self.resync(peer));
        };

        for class in self.candidate_classes(peer) {
            let Ok(keys) = self.keys.for_peer(peer, class) else {
                continue;
            };

            self.span.initialize_span(peer, class, sender_ei, &receiver_ei, keys)?;
            let nonce = self.span.next_nonce(peer, false, now)?;

            if let Some(plaintext) = open(request, keys.key_ccm(), &nonce)? {
                self.events.publish(SecurityEvent::SpanEstablished { peer, security_class: class });
                debug!(peer, security_class = %class, "SPAN established from sender EI");
                return Ok(DecryptOutcome::authenticated(plaintext, class));
            }
        }

        Ok(self.resync(peer))
    }

    /// Classes a peer may be using, strongest first.
    fn candidate_classes(&self, peer: NodeId) -> Vec<SecurityClass> {
        let temporary = self.keys.temporary.contains_key(&peer).then_some(SecurityClass::Temporary);

        temporary
            .into_iter()
            .chain(
                SECURITY_CLASS_ORDER
                    .into_iter()
                    .filter(|class| class.is_s2())
                    .filter(|&class| self.has_security_class(peer, class) != Some(false)),
            )
            .collect()
    }

    /// Discard the SPAN and hand out a new receiver EI.
    fn resync(&mut self, peer: NodeId) -> DecryptOutcome {
        self.span.reset(peer);
        let receiver_ei = self.generate_nonce(peer);

        self.events.publish(SecurityEvent::SpanReset { peer });
        warn!(peer, "singlecast decryption failed, requesting nonce resync");
        DecryptOutcome::failed(SecurityAction::RequestNonceResync { peer, receiver_ei })
    }

    // Granted classes

    /// Record whether a class was granted to the peer.
    pub fn set_security_class(&mut self, peer: NodeId, class: SecurityClass, granted: bool) {
        self.security_classes.entry(peer).or_default().insert(class, granted);
    }

    /// Whether the class is granted. `None` if unknown.
    pub fn has_security_class(&self, peer: NodeId, class: SecurityClass) -> Option<bool> {
        self.security_classes.get(&peer)?.get(&class).copied()
    }

    /// Highest granted class.
    ///
    /// Returns `Some(SecurityClass::None)` when every class is known to be
    /// missing, and `None` while any class is still unknown.
    pub fn get_highest_security_class(&self, peer: NodeId) -> Option<SecurityClass> {
        let classes = self.security_classes.get(&peer)?;

        let mut unknown = false;
        for class in SECURITY_CLASS_ORDER {
            match classes.get(&class) {
                Some(true) => return Some(class),
                Some(false) => {},
                None => unknown = true,
            }
        }
        (!unknown).then_some(SecurityClass::None)
    }

    // Bootstrap

    /// Derive the temporary keys for a peer being bootstrapped.
    ///
    /// # Errors
    ///
    /// - `SecurityError::Crypto` if `peer_public_key` is not 32 bytes
    pub fn begin_bootstrap(
        &mut self,
        peer: NodeId,
        own_key_pair: &KeyPair,
        peer_public_key: &[u8],
        role: BootstrapRole,
    ) -> Result<(), SecurityError> {
        let keys = TempNetworkKeys::from_key_exchange(own_key_pair, peer_public_key, role)?;
        self.keys.temporary.insert(peer, keys);
        self.span.reset(peer);

        self.events.publish(SecurityEvent::BootstrapStarted { peer });
        debug!(peer, ?role, "bootstrap started");
        Ok(())
    }

    /// True while temporary keys exist for the peer.
    pub fn is_bootstrapping(&self, peer: NodeId) -> bool {
        self.keys.temporary.contains_key(&peer)
    }

    /// Finish bootstrapping: drop the temporary keys and record grants.
    ///
    /// # Errors
    ///
    /// - `SecurityError::BootstrapNotStarted` if no bootstrap is running
    pub fn complete_bootstrap(
        &mut self,
        peer: NodeId,
        granted: &[SecurityClass],
    ) -> Result<(), SecurityError> {
        if self.keys.temporary.remove(&peer).is_none() {
            return Err(SecurityError::BootstrapNotStarted { peer });
        }
        self.span.reset(peer);

        for class in SECURITY_CLASS_ORDER {
            self.set_security_class(peer, class, granted.contains(&class));
        }

        self.events.publish(SecurityEvent::BootstrapCompleted { peer, granted: granted.to_vec() });
        debug!(peer, ?granted, "bootstrap completed");
        Ok(())
    }

    /// Abort bootstrapping. Returns whether one was running.
    pub fn abort_bootstrap(&mut self, peer: NodeId) -> bool {
        let was_running = self.keys.temporary.remove(&peer).is_some();
        self.span.reset(peer);

        if was_running {
            self.events.publish(SecurityEvent::BootstrapAborted { peer });
            warn!(peer, "bootstrap aborted");
        }
        was_running
    }

    // Multicast

    /// Group id for these nodes and class, creating one if needed.
    ///
    /// # Errors
    ///
    /// - `SecurityError::InvalidSecurityClass` unless `class` is an S2 class
    pub fn create_multicast_group(
        &mut self,
        node_ids: &[NodeId],
        class: SecurityClass,
    ) -> Result<u8, SecurityError> {
        if !class.is_s2() {
            return Err(SecurityError::InvalidSecurityClass {
                class,
                operation: "create_multicast_group",
            });
        }

        let [initial_sequence_number] = draw(&mut self.rng);
        let assignment = self.groups.create_or_reuse(node_ids, class, initial_sequence_number);

        if assignment.created {
            self.mpan.reset_own(assignment.group);
            let node_ids = self
                .groups
                .get(assignment.group)
                .map(|group| group.node_ids().to_vec())
                .unwrap_or_default();

            debug!(group = assignment.group, security_class = %class, "multicast group created");
            self.events.publish(SecurityEvent::MulticastGroupCreated {
                group: assignment.group,
                node_ids,
                security_class: class,
            });
        }
        Ok(assignment.group)
    }

    /// Look up a multicast group.
    pub fn multicast_group(&self, group: u8) -> Option<&MulticastGroup> {
        self.groups.get(group)
    }

    /// Advance the group's multicast sequence number.
    ///
    /// # Errors
    ///
    /// - `SecurityError::UnknownMulticastGroup` if the id is unassigned
    pub fn next_multicast_sequence_number(&mut self, group: u8) -> Result<u8, SecurityError> {
        self.groups.next_sequence_number(group)
    }

    /// Key and nonce for our next multicast to `group`.
    ///
    /// The group's inner MPAN state is drawn from the manager's generator on
    /// first use.
    ///
    /// # Errors
    ///
    /// - `SecurityError::UnknownMulticastGroup` if the id is unassigned
    /// - `SecurityError::NetworkKeyMissing` if the group's class has no key
    pub fn multicast_key_and_iv(&mut self, group: u8) -> Result<MulticastKeyAndIv, SecurityError> {
        let class = self
            .groups
            .get(group)
            .ok_or(SecurityError::UnknownMulticastGroup(group))?
            .security_class();
        let keys = self.keys.network(class)?;

        let iv = self.mpan.next_own_mpan(group, keys.key_mpan(), || draw(&mut self.rng))?;
        Ok(MulticastKeyAndIv { key: *keys.key_ccm(), iv })
    }

    /// Our inner MPAN state for `group`, to send in an MPAN extension.
    ///
    /// # Errors
    ///
    /// - `SecurityError::UnknownMulticastGroup` if the id is unassigned
    pub fn inner_mpan_state(&mut self, group: u8) -> Result<MpanInnerState, SecurityError> {
        if self.groups.get(group).is_none() {
            return Err(SecurityError::UnknownMulticastGroup(group));
        }
        if let Some(state) = self.mpan.own_state(group) {
            return Ok(*state);
        }

        let state = draw(&mut self.rng);
        self.mpan.init_own(group, state);
        Ok(state)
    }

    /// Encrypt a multicast payload for `group`.
    ///
    /// # Errors
    ///
    /// See [`Self::multicast_key_and_iv`].
    pub fn encrypt_multicast(
        &mut self,
        group: u8,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<EncryptedPayload, SecurityError> {
        let key_and_iv = self.multicast_key_and_iv(group)?;
        let sealed =
            encrypt_aes128_ccm(plaintext, &key_and_iv.key, &key_and_iv.iv, aad, S2_AUTH_TAG_SIZE)?;
        Ok(EncryptedPayload { ciphertext: sealed.ciphertext, auth_tag: sealed.auth_tag })
    }

    /// Record a peer's MPAN state (from an MPAN extension or after a failure).
    pub fn store_peer_mpan(&mut self, peer: NodeId, group: u8, state: MpanState) {
        self.mpan.store_peer_mpan(group, peer, state);
    }

    /// A peer's MPAN state for a group.
    pub fn peer_mpan_state(&self, peer: NodeId, group: u8) -> Option<MpanState> {
        self.mpan.peer_state(group, peer)
    }

    /// Nonce for the next multicast from `peer` in `group`.
    ///
    /// # Errors
    ///
    /// - `SecurityError::NoMulticastSession` if the MPAN is unknown or out of
    ///   sync
    /// - `SecurityError::NoSecureSession` if no class is known for the peer
    pub fn next_peer_mpan(&mut self, peer: NodeId, group: u8) -> Result<Nonce, SecurityError> {
        let class = self.peer_key_class(peer)?;
        let keys = self.keys.network(class)?;
        self.mpan.next_peer_mpan(group, peer, keys.key_mpan())
    }

    /// Decrypt a multicast frame from the peer.
    ///
    /// On failure the peer's MPAN is marked out of sync and a
    /// [`SecurityAction::ReportMpanOutOfSync`] is returned.
    ///
    /// # Errors
    ///
    /// See [`Self::next_peer_mpan`].
    pub fn decrypt_multicast_from_peer(
        &mut self,
        peer: NodeId,
        group: u8,
        ciphertext: &[u8],
        auth_tag: &[u8],
        aad: &[u8],
    ) -> Result<DecryptOutcome, SecurityError> {
        let class = self.peer_key_class(peer)?;
        let keys = self.keys.network(class)?;
        let nonce = self.mpan.next_peer_mpan(group, peer, keys.key_mpan())?;

        let opened = decrypt_aes128_ccm(ciphertext, keys.key_ccm(), &nonce, aad, auth_tag)?;
        if opened.auth_ok {
            return Ok(DecryptOutcome::authenticated(opened.plaintext, class));
        }

        self.mpan.store_peer_mpan(group, peer, MpanState::OutOfSync);
        warn!(peer, group, "multicast decryption failed, MPAN out of sync");
        Ok(DecryptOutcome::failed(SecurityAction::ReportMpanOutOfSync { peer, group }))
    }

    /// Class whose network keys protect multicast traffic from the peer.
    fn peer_key_class(&self, peer: NodeId) -> Result<SecurityClass, SecurityError> {
        if let SpanState::Span { security_class } = self.span.state(peer) {
            if security_class.is_s2() {
                return Ok(security_class);
            }
        }

        SECURITY_CLASS_ORDER
            .into_iter()
            .filter(|class| class.is_s2())
            .find(|&class| self.has_security_class(peer, class) == Some(true))
            .ok_or(SecurityError::NoSecureSession { peer })
    }

    // Sequence numbers

    /// Sequence number for our next singlecast to the peer.
    ///
    /// Starts at a random value and wraps.
    pub fn next_sequence_number(&mut self, peer: NodeId) -> u8 {
        let next = match self.own_sequence_numbers.get(&peer) {
            Some(last) => last.wrapping_add(1),
            None => {
                let [initial] = draw(&mut self.rng);
                initial
            },
        };
        self.own_sequence_numbers.insert(peer, next);
        next
    }

    /// True if the sequence number was seen recently from the peer.
    pub fn is_duplicate_singlecast(&self, peer: NodeId, sequence_number: u8) -> bool {
        self.peer_sequence_numbers.get(&peer).is_some_and(|seen| seen.contains(&sequence_number))
    }

    /// Remember a received sequence number.
    pub fn store_sequence_number(&mut self, peer: NodeId, sequence_number: u8) {
        let limit = self.config.max_stored_sequence_numbers;
        let seen = self.peer_sequence_numbers.entry(peer).or_default();

        seen.push_back(sequence_number);
        while seen.len() > limit {
            seen.pop_front();
        }
    }

    /// Forget everything about a peer.
    pub fn remove_peer(&mut self, peer: NodeId) {
        self.span.remove(peer);
        self.keys.temporary.remove(&peer);
        self.mpan.remove_peer(peer);
        self.security_classes.remove(&peer);
        self.own_sequence_numbers.remove(&peer);
        self.peer_sequence_numbers.remove(&peer);
        debug!(peer, "peer removed");
    }
}

/// Fixed-size output from the manager's generator.
fn draw<const N: usize>(rng: &mut CtrDrbg) -> [u8; N] {
    let mut out = [0u8; N];
    let Ok(()) = rng.generate_into(&mut out) else {
        unreachable!("small requests never exceed the generator limits");
    };
    out
}

/// CCM-decrypt a request, `None` if it does not authenticate.
fn open(
    request: &DecryptRequest<'_>,
    key_ccm: &Key,
    nonce: &Nonce,
) -> Result<Option<Vec<u8>>, SecurityError> {
    let opened =
        decrypt_aes128_ccm(request.ciphertext, key_ccm, nonce, request.aad, request.auth_tag)?;
    Ok(opened.auth_ok.then_some(opened.plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::test_utils::MockEnv;

    const PNK: [u8; 16] = [0x42; 16];
    const A: NodeId = 1;
    const B: NodeId = 2;

    fn manager(seed: u64) -> (MockEnv, SecurityManager) {
        let env = MockEnv::with_seed(seed);
        let mut manager = SecurityManager::new(&env, SecurityConfig::default());
        manager.set_network_key(SecurityClass::S2Authenticated, &PNK).unwrap();
        (env, manager)
    }

    /// A sends to B after a nonce exchange. Returns (A, B, env).
    fn paired() -> (SecurityManager, SecurityManager, MockEnv) {
        let (env, mut a) = manager(1);
        let (_, mut b) = manager(2);

        let receiver_ei = b.generate_nonce(A);
        a.store_remote_ei(B, &receiver_ei).unwrap();
        let sender_ei = a.establish_span(B, SecurityClass::S2Authenticated).unwrap();

        let now = env.now();
        let sealed = a.encrypt_for_peer(B, b"hello", b"aad", SecurityClass::S2Authenticated, now).unwrap();
        let outcome = b
            .decrypt_from_peer(
                A,
                &DecryptRequest {
                    ciphertext: &sealed.ciphertext,
                    auth_tag: &sealed.auth_tag,
                    aad: b"aad",
                    sender_ei: Some(sender_ei),
                },
                now,
            )
            .unwrap();
        assert!(outcome.auth_ok);
        (a, b, env)
    }

    fn request<'a>(payload: &'a EncryptedPayload, aad: &'a [u8]) -> DecryptRequest<'a> {
        DecryptRequest { ciphertext: &payload.ciphertext, auth_tag: &payload.auth_tag, aad, sender_ei: None }
    }

    #[test]
    fn rejects_keys_for_pseudo_classes() {
        let (_, mut m) = manager(3);
        assert!(matches!(
            m.set_network_key(SecurityClass::Temporary, &PNK),
            Err(SecurityError::InvalidSecurityClass { .. })
        ));
        assert_eq!(
            m.keys_for_security_class(SecurityClass::S2AccessControl).map(|_| ()),
            Err(SecurityError::NetworkKeyMissing(SecurityClass::S2AccessControl))
        );
    }

    #[test]
    fn encrypt_requires_matching_span() {
        let (env, mut m) = manager(4);
        assert_eq!(
            m.encrypt_for_peer(B, b"x", b"", SecurityClass::S2Authenticated, env.now()),
            Err(SecurityError::NoSecureSession { peer: B })
        );

        m.store_remote_ei(B, &[7; 16]).unwrap();
        m.establish_span(B, SecurityClass::S2Authenticated).unwrap();
        assert_eq!(
            m.encrypt_for_peer(B, b"x", b"", SecurityClass::S2Unauthenticated, env.now()),
            Err(SecurityError::NoSecureSession { peer: B })
        );
    }

    #[test]
    fn store_remote_ei_checks_length() {
        let (_, mut m) = manager(5);
        assert_eq!(m.store_remote_ei(B, &[0; 15]), Err(SecurityError::InvalidEntropyInput { actual: 15 }));
        assert_eq!(m.span_state(B), SpanState::None);
    }

    #[test]
    fn both_sides_stay_in_lockstep() {
        let (mut a, mut b, env) = paired();
        let now = env.now();

        for i in 0u8..5 {
            let sealed = b.encrypt_for_peer(A, &[i], b"", SecurityClass::S2Authenticated, now).unwrap();
            let outcome = a.decrypt_from_peer(B, &request(&sealed, b""), now).unwrap();
            assert!(outcome.auth_ok);
            assert_eq!(outcome.plaintext, vec![i]);
            assert_eq!(outcome.security_class, Some(SecurityClass::S2Authenticated));
        }
    }

    #[test]
    fn tampered_frame_requests_resync() {
        let (mut a, mut b, env) = paired();
        let now = env.now();

        let mut sealed = a.encrypt_for_peer(B, b"data", b"", SecurityClass::S2Authenticated, now).unwrap();
        sealed.ciphertext[0] ^= 0x01;

        let outcome = b.decrypt_from_peer(A, &request(&sealed, b""), now).unwrap();
        assert!(!outcome.auth_ok);
        assert!(outcome.plaintext.is_empty());

        let [SecurityAction::RequestNonceResync { peer, receiver_ei }] = outcome.actions[..] else {
            panic!("expected one resync action, got {:?}", outcome.actions);
        };
        assert_eq!(peer, A);
        assert_eq!(b.span_state(A), SpanState::LocalEI { receiver_ei });
    }

    #[test]
    fn decrypt_without_span_or_sender_ei_fails() {
        let (env, mut m) = manager(6);
        let payload = EncryptedPayload { ciphertext: vec![1, 2, 3], auth_tag: vec![0; 8] };
        let err = m.decrypt_from_peer(A, &request(&payload, b""), env.now()).unwrap_err();
        assert!(err.requires_resync());
    }

    #[test]
    fn wrong_tag_length_is_an_error() {
        let (_, mut b, env) = paired();
        let payload = EncryptedPayload { ciphertext: vec![1], auth_tag: vec![0; 4] };
        assert!(matches!(
            b.decrypt_from_peer(A, &request(&payload, b""), env.now()),
            Err(SecurityError::Crypto(CryptoError::InvalidAuthTagLength(4)))
        ));
        assert_eq!(b.span_state(A), SpanState::Span { security_class: SecurityClass::S2Authenticated });
    }

    #[test]
    fn highest_class_needs_complete_information() {
        let (_, mut m) = manager(7);
        assert_eq!(m.get_highest_security_class(B), None);

        m.set_security_class(B, SecurityClass::S2Unauthenticated, true);
        assert_eq!(m.get_highest_security_class(B), Some(SecurityClass::S2Unauthenticated));

        m.set_security_class(B, SecurityClass::S2AccessControl, true);
        assert_eq!(m.get_highest_security_class(B), Some(SecurityClass::S2AccessControl));

        let (_, mut m) = manager(8);
        for class in SECURITY_CLASS_ORDER {
            m.set_security_class(B, class, false);
        }
        assert_eq!(m.get_highest_security_class(B), Some(SecurityClass::None));
        assert_eq!(m.has_security_class(B, SecurityClass::S0Legacy), Some(false));
    }

    #[test]
    fn sequence_numbers_wrap_and_detect_duplicates() {
        let (_, mut m) = manager(9);
        let first = m.next_sequence_number(B);
        assert_eq!(m.next_sequence_number(B), first.wrapping_add(1));

        for seq in 0..12u8 {
            m.store_sequence_number(A, seq);
        }
        assert!(!m.is_duplicate_singlecast(A, 0));
        assert!(!m.is_duplicate_singlecast(A, 1));
        assert!(m.is_duplicate_singlecast(A, 2));
        assert!(m.is_duplicate_singlecast(A, 11));
        assert!(!m.is_duplicate_singlecast(B, 11));
    }

    #[test]
    fn replacing_a_key_drops_its_spans() {
        let (mut a, _, _) = paired();
        a.set_network_key(SecurityClass::S2Authenticated, &[0x43; 16]).unwrap();
        assert_eq!(a.span_state(B), SpanState::None);
    }

    #[test]
    fn remove_peer_forgets_everything() {
        let (mut a, _, _) = paired();
        a.set_security_class(B, SecurityClass::S2Authenticated, true);
        a.store_sequence_number(B, 3);

        a.remove_peer(B);
        assert_eq!(a.span_state(B), SpanState::None);
        assert_eq!(a.has_security_class(B, SecurityClass::S2Authenticated), None);
        assert!(!a.is_duplicate_singlecast(B, 3));
    }

    #[test]
    fn multicast_groups_require_s2() {
        let (_, mut m) = manager(10);
        assert!(matches!(
            m.create_multicast_group(&[2, 3], SecurityClass::S0Legacy),
            Err(SecurityError::InvalidSecurityClass { .. })
        ));
        assert!(matches!(m.multicast_key_and_iv(1), Err(SecurityError::UnknownMulticastGroup(1))));
    }

    #[test]
    fn events_follow_the_lifecycle() {
        let (env, mut m) = manager(11);
        let mut events = m.subscribe();

        m.store_remote_ei(B, &[9; 16]).unwrap();
        m.establish_span(B, SecurityClass::S2Authenticated).unwrap();
        let group = m.create_multicast_group(&[3, 2], SecurityClass::S2Authenticated).unwrap();
        let payload = EncryptedPayload { ciphertext: vec![0; 4], auth_tag: vec![0; 8] };
        m.decrypt_from_peer(B, &request(&payload, b""), env.now()).unwrap();

        assert_eq!(
            events.try_recv(),
            Ok(SecurityEvent::SpanEstablished { peer: B, security_class: SecurityClass::S2Authenticated })
        );
        assert_eq!(
            events.try_recv(),
            Ok(SecurityEvent::MulticastGroupCreated {
                group,
                node_ids: vec![2, 3],
                security_class: SecurityClass::S2Authenticated
            })
        );
        assert_eq!(events.try_recv(), Ok(SecurityEvent::SpanReset { peer: B }));
    }
}
