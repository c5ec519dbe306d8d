//! Multicast groups and MPAN synchronization.

use zwave_s2_core::{
    MpanState, NodeId, SecurityAction, SecurityClass, SecurityConfig, SecurityError,
    SecurityManager, SpanKeys, env::test_utils::MockEnv,
};

const CONTROLLER: NodeId = 1;
const CLASS: SecurityClass = SecurityClass::S2Authenticated;
const PNK: [u8; 16] = [0x77; 16];

fn manager(env: &MockEnv) -> SecurityManager {
    let mut manager = SecurityManager::new(env, SecurityConfig::default());
    manager.set_network_key(CLASS, &PNK).unwrap();
    manager
}

/// Node that knows the controller was granted `CLASS`.
fn node(env: &MockEnv) -> SecurityManager {
    let mut node = manager(env);
    node.set_security_class(CONTROLLER, CLASS, true);
    node
}

#[test]
fn groups_are_reused_per_node_set_and_class() {
    let env = MockEnv::new();
    let mut controller = manager(&env);

    let group = controller.create_multicast_group(&[5, 3, 4, 3], CLASS).unwrap();
    assert_eq!(controller.create_multicast_group(&[3, 4, 5], CLASS).unwrap(), group);
    assert_ne!(
        controller.create_multicast_group(&[3, 4, 5], SecurityClass::S2Unauthenticated).unwrap(),
        group
    );

    let info = controller.multicast_group(group).unwrap();
    assert_eq!(info.node_ids(), &[3, 4, 5]);
    assert_eq!(info.security_class(), CLASS);

    let first = controller.next_multicast_sequence_number(group).unwrap();
    assert_eq!(controller.next_multicast_sequence_number(group).unwrap(), first.wrapping_add(1));
}

#[test]
fn synchronized_nodes_decrypt_multicast() {
    let env = MockEnv::new();
    let mut controller = manager(&env);
    let mut nodes = [node(&env), node(&env)];

    let group = controller.create_multicast_group(&[2, 3], CLASS).unwrap();
    let state = controller.inner_mpan_state(group).unwrap();
    for node in &mut nodes {
        node.store_peer_mpan(CONTROLLER, group, MpanState::Mpan { current_mpan: state });
    }

    for payload in [b"on".as_slice(), b"off".as_slice(), b"dim 50".as_slice()] {
        let sealed = controller.encrypt_multicast(group, payload, b"mgrp").unwrap();
        for node in &mut nodes {
            let outcome = node
                .decrypt_multicast_from_peer(
                    CONTROLLER,
                    group,
                    &sealed.ciphertext,
                    &sealed.auth_tag,
                    b"mgrp",
                )
                .unwrap();
            assert!(outcome.auth_ok);
            assert_eq!(outcome.plaintext, payload);
            assert_eq!(outcome.security_class, Some(CLASS));
        }
    }
}

#[test]
fn key_and_iv_match_the_receiver_nonce() {
    let env = MockEnv::new();
    let mut controller = manager(&env);
    let mut receiver = node(&env);

    let group = controller.create_multicast_group(&[2], CLASS).unwrap();
    let state = controller.inner_mpan_state(group).unwrap();
    receiver.store_peer_mpan(CONTROLLER, group, MpanState::Mpan { current_mpan: state });

    let first = controller.multicast_key_and_iv(group).unwrap();
    let second = controller.multicast_key_and_iv(group).unwrap();
    assert_ne!(first.iv, second.iv);
    assert_eq!(&first.key, receiver.keys_for_security_class(CLASS).unwrap().key_ccm());

    assert_eq!(receiver.next_peer_mpan(CONTROLLER, group).unwrap(), first.iv);
    assert_eq!(receiver.next_peer_mpan(CONTROLLER, group).unwrap(), second.iv);
}

#[test]
fn failed_multicast_marks_mpan_out_of_sync() {
    let env = MockEnv::new();
    let mut controller = manager(&env);
    let mut receiver = node(&env);

    let group = controller.create_multicast_group(&[2], CLASS).unwrap();
    let state = controller.inner_mpan_state(group).unwrap();
    receiver.store_peer_mpan(CONTROLLER, group, MpanState::Mpan { current_mpan: state });

    let mut sealed = controller.encrypt_multicast(group, b"on", b"").unwrap();
    sealed.ciphertext[0] ^= 0x01;

    let outcome = receiver
        .decrypt_multicast_from_peer(CONTROLLER, group, &sealed.ciphertext, &sealed.auth_tag, b"")
        .unwrap();
    assert!(!outcome.auth_ok);
    assert_eq!(outcome.actions, vec![SecurityAction::ReportMpanOutOfSync { peer: CONTROLLER, group }]);
    assert_eq!(receiver.peer_mpan_state(CONTROLLER, group), Some(MpanState::OutOfSync));

    let next = controller.encrypt_multicast(group, b"off", b"").unwrap();
    assert_eq!(
        receiver.decrypt_multicast_from_peer(CONTROLLER, group, &next.ciphertext, &next.auth_tag, b""),
        Err(SecurityError::NoMulticastSession { peer: CONTROLLER, group })
    );

    // The MPAN extension of the next singlecast resynchronizes
    let state = controller.inner_mpan_state(group).unwrap();
    receiver.store_peer_mpan(CONTROLLER, group, MpanState::Mpan { current_mpan: state });
    let again = controller.encrypt_multicast(group, b"on", b"").unwrap();
    assert!(
        receiver
            .decrypt_multicast_from_peer(CONTROLLER, group, &again.ciphertext, &again.auth_tag, b"")
            .unwrap()
            .auth_ok
    );
}

#[test]
fn multicast_needs_a_known_group_and_key() {
    let env = MockEnv::new();
    let mut controller: SecurityManager = SecurityManager::new(&env, SecurityConfig::default());

    assert_eq!(controller.inner_mpan_state(9), Err(SecurityError::UnknownMulticastGroup(9)));

    let group = controller.create_multicast_group(&[2, 3], SecurityClass::S2AccessControl).unwrap();
    assert!(matches!(
        controller.encrypt_multicast(group, b"x", b""),
        Err(SecurityError::NetworkKeyMissing(SecurityClass::S2AccessControl))
    ));

    let mut stranger = manager(&env);
    assert_eq!(
        stranger.next_peer_mpan(CONTROLLER, group),
        Err(SecurityError::NoSecureSession { peer: CONTROLLER })
    );
}
