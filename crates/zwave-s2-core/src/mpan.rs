//! Multicast nonce (MPAN) state and multicast groups.
//!
//! An MPAN is a 16-byte inner state. Each nonce is the first 13 bytes of
//! `AES-ECB(keyMPAN, state)`, after which the state is incremented. We keep
//! our own state per group we send to, and one state per (group, peer) for
//! multicasts we receive.

use std::collections::HashMap;

use zwave_s2_crypto::{
    S2_NONCE_SIZE, aead::encrypt_aes128_ecb, bytes::increment, provider::BLOCK_SIZE,
};

use crate::{NodeId, error::SecurityError, security_class::SecurityClass, span::Nonce};

/// Inner MPAN state
pub type MpanInnerState = [u8; BLOCK_SIZE];

/// A peer's MPAN state for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpanState {
    /// Last multicast from the peer failed to decrypt
    OutOfSync,
    /// Synchronized inner state
    Mpan {
        /// Inner state for the next multicast
        current_mpan: MpanInnerState,
    },
}

/// Derive the nonce for `state` and advance it.
///
/// # Errors
///
/// - `SecurityError::Crypto` if `key_mpan` is not 16 bytes
pub fn advance_mpan(state: &mut MpanInnerState, key_mpan: &[u8]) -> Result<Nonce, SecurityError> {
    let block = encrypt_aes128_ecb(&state[..], key_mpan)?;
    let mut nonce = [0u8; S2_NONCE_SIZE];
    nonce.copy_from_slice(&block[..S2_NONCE_SIZE]);
    increment(state);
    Ok(nonce)
}

/// Own and peer MPAN states.
#[derive(Debug, Default)]
pub struct MpanTable {
    peers: HashMap<(u8, NodeId), MpanState>,
    own: HashMap<u8, MpanInnerState>,
}

impl MpanTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the peer's MPAN state for a group.
    pub fn store_peer_mpan(&mut self, group: u8, peer: NodeId, state: MpanState) {
        self.peers.insert((group, peer), state);
    }

    /// The peer's MPAN state for a group, if any.
    pub fn peer_state(&self, group: u8, peer: NodeId) -> Option<MpanState> {
        self.peers.get(&(group, peer)).copied()
    }

    /// Nonce for the next multicast from `peer` in `group`.
    ///
    /// # Errors
    ///
    /// - `SecurityError::NoMulticastSession` if the state is absent or out of
    ///   sync
    pub fn next_peer_mpan(
        &mut self,
        group: u8,
        peer: NodeId,
        key_mpan: &[u8],
    ) -> Result<Nonce, SecurityError> {
        let Some(MpanState::Mpan { current_mpan }) = self.peers.get_mut(&(group, peer)) else {
            return Err(SecurityError::NoMulticastSession { peer, group });
        };
        advance_mpan(current_mpan, key_mpan)
    }

    /// Our inner state for a group, if initialised.
    pub fn own_state(&self, group: u8) -> Option<&MpanInnerState> {
        self.own.get(&group)
    }

    /// Nonce for our next multicast to `group`, initialising the inner state
    /// with `init` on first use.
    ///
    /// # Errors
    ///
    /// - `SecurityError::Crypto` if `key_mpan` is not 16 bytes
    pub fn next_own_mpan(
        &mut self,
        group: u8,
        key_mpan: &[u8],
        init: impl FnOnce() -> MpanInnerState,
    ) -> Result<Nonce, SecurityError> {
        let state = self.own.entry(group).or_insert_with(init);
        advance_mpan(state, key_mpan)
    }

    /// Set our inner state for a group unless one exists.
    pub fn init_own(&mut self, group: u8, state: MpanInnerState) {
        self.own.entry(group).or_insert(state);
    }

    /// Forget our state for a group (the group was reassigned).
    pub fn reset_own(&mut self, group: u8) {
        self.own.remove(&group);
    }

    /// Drop every state involving the peer.
    pub fn remove_peer(&mut self, peer: NodeId) {
        self.peers.retain(|&(_, node), _| node != peer);
    }
}

/// A multicast group we send to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastGroup {
    node_ids: Vec<NodeId>,
    security_class: SecurityClass,
    sequence_number: u8,
}

impl MulticastGroup {
    /// Members, sorted and deduplicated.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    /// Class whose keys encrypt the group's traffic.
    pub fn security_class(&self) -> SecurityClass {
        self.security_class
    }

    /// Last sequence number handed out.
    pub fn sequence_number(&self) -> u8 {
        self.sequence_number
    }
}

/// Outcome of [`MulticastGroupRegistry::create_or_reuse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupAssignment {
    /// Group id
    pub group: u8,
    /// False if an identical group already existed
    pub created: bool,
}

/// Multicast group ids in `1..=max_group_id`, handed out round robin.
///
/// # Invariants
///
/// - At most one group per (node set, security class)
/// - A reused id forgets the group that held it before
#[derive(Debug)]
pub struct MulticastGroupRegistry {
    groups: HashMap<u8, MulticastGroup>,
    next_id: u8,
    max_group_id: u8,
}

impl MulticastGroupRegistry {
    /// Registry handing out ids up to `max_group_id` (clamped to at least 1).
    pub fn new(max_group_id: u8) -> Self {
        Self { groups: HashMap::new(), next_id: 1, max_group_id: max_group_id.max(1) }
    }

    /// Find the group for this node set and class, or assign the next id.
    ///
    /// `initial_sequence_number` seeds a newly created group.
    pub fn create_or_reuse(
        &mut self,
        node_ids: &[NodeId],
        security_class: SecurityClass,
        initial_sequence_number: u8,
    ) -> GroupAssignment {
        let mut node_ids = node_ids.to_vec();
        node_ids.sort_unstable();
        node_ids.dedup();

        if let Some((&group, _)) = self
            .groups
            .iter()
            .find(|(_, g)| g.security_class == security_class && g.node_ids == node_ids)
        {
            return GroupAssignment { group, created: false };
        }

        let group = self.next_id;
        self.next_id = if group >= self.max_group_id { 1 } else { group + 1 };

        self.groups.insert(
            group,
            MulticastGroup { node_ids, security_class, sequence_number: initial_sequence_number },
        );
        GroupAssignment { group, created: true }
    }

    /// Look up a group.
    pub fn get(&self, group: u8) -> Option<&MulticastGroup> {
        self.groups.get(&group)
    }

    /// Advance and return the group's sequence number.
    ///
    /// # Errors
    ///
    /// - `SecurityError::UnknownMulticastGroup` if the id is unassigned
    pub fn next_sequence_number(&mut self, group: u8) -> Result<u8, SecurityError> {
        let entry = self.groups.get_mut(&group).ok_or(SecurityError::UnknownMulticastGroup(group))?;
        entry.sequence_number = entry.sequence_number.wrapping_add(1);
        Ok(entry.sequence_number)
    }

    /// Number of assigned groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True if no group is assigned.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_MPAN: [u8; 16] = [0x4a; 16];

    #[test]
    fn mpan_nonce_is_ecb_prefix_then_increment() {
        let mut state = [0u8; 16];
        state[15] = 0xff;

        let expected = encrypt_aes128_ecb(&state, &KEY_MPAN).unwrap();
        let nonce = advance_mpan(&mut state, &KEY_MPAN).unwrap();

        assert_eq!(&nonce[..], &expected[..S2_NONCE_SIZE]);
        let mut next = [0u8; 16];
        next[14] = 0x01;
        assert_eq!(state, next);
    }

    #[test]
    fn out_of_sync_peer_has_no_nonce() {
        let mut table = MpanTable::new();
        assert_eq!(
            table.next_peer_mpan(1, 9, &KEY_MPAN),
            Err(SecurityError::NoMulticastSession { peer: 9, group: 1 })
        );

        table.store_peer_mpan(1, 9, MpanState::OutOfSync);
        assert!(table.next_peer_mpan(1, 9, &KEY_MPAN).is_err());
    }

    #[test]
    fn peer_and_own_states_agree() {
        let mut table = MpanTable::new();
        let inner = [0x10; 16];
        table.store_peer_mpan(3, 2, MpanState::Mpan { current_mpan: inner });

        let own = table.next_own_mpan(3, &KEY_MPAN, || inner).unwrap();
        let peer = table.next_peer_mpan(3, 2, &KEY_MPAN).unwrap();
        assert_eq!(own, peer);

        let own = table.next_own_mpan(3, &KEY_MPAN, || [0; 16]).unwrap();
        let peer = table.next_peer_mpan(3, 2, &KEY_MPAN).unwrap();
        assert_eq!(own, peer, "init only runs on first use");
    }

    #[test]
    fn remove_peer_keeps_other_peers() {
        let mut table = MpanTable::new();
        table.store_peer_mpan(1, 2, MpanState::OutOfSync);
        table.store_peer_mpan(1, 3, MpanState::OutOfSync);

        table.remove_peer(2);
        assert_eq!(table.peer_state(1, 2), None);
        assert_eq!(table.peer_state(1, 3), Some(MpanState::OutOfSync));
    }

    #[test]
    fn groups_are_reused_for_same_members() {
        let mut registry = MulticastGroupRegistry::new(255);

        let a = registry.create_or_reuse(&[5, 3, 3, 4], SecurityClass::S2Authenticated, 0);
        let b = registry.create_or_reuse(&[3, 4, 5], SecurityClass::S2Authenticated, 0);
        let c = registry.create_or_reuse(&[3, 4, 5], SecurityClass::S2AccessControl, 0);

        assert_eq!(a, GroupAssignment { group: 1, created: true });
        assert_eq!(b, GroupAssignment { group: 1, created: false });
        assert_eq!(c, GroupAssignment { group: 2, created: true });
        assert_eq!(registry.get(1).map(MulticastGroup::node_ids), Some(&[3, 4, 5][..]));
    }

    #[test]
    fn group_ids_wrap_and_evict() {
        let mut registry = MulticastGroupRegistry::new(2);

        registry.create_or_reuse(&[1], SecurityClass::S2Unauthenticated, 0);
        registry.create_or_reuse(&[2], SecurityClass::S2Unauthenticated, 0);
        let third = registry.create_or_reuse(&[3], SecurityClass::S2Unauthenticated, 0);

        assert_eq!(third.group, 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).map(MulticastGroup::node_ids), Some(&[3][..]));
    }

    #[test]
    fn sequence_numbers_wrap() {
        let mut registry = MulticastGroupRegistry::new(255);
        let group = registry.create_or_reuse(&[1, 2], SecurityClass::S2Authenticated, 254).group;

        assert_eq!(registry.next_sequence_number(group), Ok(255));
        assert_eq!(registry.next_sequence_number(group), Ok(0));
        assert_eq!(registry.next_sequence_number(9), Err(SecurityError::UnknownMulticastGroup(9)));
    }
}
