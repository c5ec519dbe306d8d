//! Fuzz target for the SPAN state machine
//!
//! Drives two security managers with an arbitrary interleaving of nonce
//! exchange, encryption, delivery and clock steps.
//!
//! # Invariants
//!
//! - NEVER panic, whatever the order of operations
//! - A delivered frame either authenticates with its own plaintext or
//!   yields exactly one resync request
//! - A failed decryption leaves the receiver waiting for a sender EI

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use zwave_s2_core::{
    DecryptRequest, EncryptedPayload, NodeId, SecurityAction, SecurityClass, SecurityConfig,
    SecurityManager, SpanState,
    env::{Environment, test_utils::MockEnv},
};

const CLASS: SecurityClass = SecurityClass::S2Authenticated;

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Side {
    A,
    B,
}

#[derive(Debug, Clone, Arbitrary)]
enum SpanOp {
    NonceGet { from: Side },
    Establish { from: Side },
    Send { from: Side, payload: Vec<u8>, with_sender_ei: bool },
    Deliver { index: u8, tamper: bool },
    Advance { millis: u16 },
}

struct Frame {
    to: Side,
    payload: Vec<u8>,
    sealed: EncryptedPayload,
    sender_ei: Option<[u8; 16]>,
}

fn id(side: Side) -> NodeId {
    match side {
        Side::A => 1,
        Side::B => 2,
    }
}

fn other(side: Side) -> Side {
    match side {
        Side::A => Side::B,
        Side::B => Side::A,
    }
}

fuzz_target!(|input: (u64, Vec<SpanOp>)| {
    let (seed, ops) = input;
    let env = MockEnv::with_seed(seed);
    let mut managers = [
        SecurityManager::new(&env, SecurityConfig::default()),
        SecurityManager::new(&env, SecurityConfig::default()),
    ];
    for manager in &mut managers {
        manager.set_network_key(CLASS, &[0x33; 16]).expect("valid key");
    }

    let mut sender_eis: [Option<[u8; 16]>; 2] = [None, None];
    let mut in_flight: Vec<Frame> = Vec::new();

    for op in ops.into_iter().take(64) {
        match op {
            SpanOp::NonceGet { from } => {
                let receiver_ei = managers[other(from) as usize].generate_nonce(id(from));
                let _ = managers[from as usize].store_remote_ei(id(other(from)), &receiver_ei);
            }

            SpanOp::Establish { from } => {
                if let Ok(ei) = managers[from as usize].establish_span(id(other(from)), CLASS) {
                    sender_eis[from as usize] = Some(ei);
                }
            }

            SpanOp::Send { from, payload, with_sender_ei } => {
                let to = other(from);
                let sender = &mut managers[from as usize];
                if let Ok(sealed) = sender.encrypt_for_peer(id(to), &payload, &[], CLASS, env.now()) {
                    let sender_ei = if with_sender_ei { sender_eis[from as usize] } else { None };
                    in_flight.push(Frame { to, payload, sealed, sender_ei });
                }
            }

            SpanOp::Deliver { index, tamper } => {
                if in_flight.is_empty() {
                    continue;
                }
                let mut frame = in_flight.remove(usize::from(index) % in_flight.len());
                if tamper {
                    frame.sealed.auth_tag[0] ^= 0x01;
                }

                let from = id(other(frame.to));
                let receiver = &mut managers[frame.to as usize];
                let request = DecryptRequest {
                    ciphertext: &frame.sealed.ciphertext,
                    auth_tag: &frame.sealed.auth_tag,
                    aad: &[],
                    sender_ei: frame.sender_ei,
                };

                let Ok(outcome) = receiver.decrypt_from_peer(from, &request, env.now()) else {
                    continue;
                };
                if outcome.auth_ok {
                    assert!(!tamper, "tampered frame authenticated");
                    assert_eq!(outcome.plaintext, frame.payload);
                    assert!(outcome.actions.is_empty());
                } else {
                    let [SecurityAction::RequestNonceResync { peer, receiver_ei }] = outcome.actions[..]
                    else {
                        panic!("expected exactly one resync, got {:?}", outcome.actions);
                    };
                    assert_eq!(peer, from);
                    assert_eq!(receiver.span_state(from), SpanState::LocalEI { receiver_ei });
                }
            }

            SpanOp::Advance { millis } => env.advance(Duration::from_millis(u64::from(millis))),
        }
    }
});
