//! Z-Wave S2 Session Engine
//!
//! Security 2 session state for a Z-Wave controller or node. Tracks singlecast
//! (SPAN) and multicast (MPAN) nonce state per peer, holds network and
//! bootstrap keys, and encrypts and decrypts payloads. Also carries the
//! provisioning helpers a driver needs around inclusion: DSK strings, QR
//! codes and KEX parameter negotiation.
//!
//! The engine does no I/O. Time is passed in, randomness comes from an
//! [`Environment`], and anything the driver must send is returned as a
//! [`SecurityAction`].
//!
//! # Architecture
//!
//! ```text
//!                 ┌─────────────────────────────┐
//!  driver ──────> │       SecurityManager       │ ──> SecurityAction
//!  (frames, now)  │                             │ ──> SecurityEvent (bus)
//!                 │  KeyStore   SpanTable       │
//!                 │  MpanTable  GroupRegistry   │
//!                 └──────────────┬──────────────┘
//!                                │
//!                                ▼
//!                        zwave-s2-crypto
//!              (CCM, CMAC, CTR-DRBG, KDF, Curve25519)
//! ```
//!
//! # Invariants
//!
//! - A nonce protects at most one frame
//! - A failed singlecast decryption discards the SPAN and yields exactly one
//!   resync request
//! - Temporary keys never outlive the bootstrap they were derived for
//! - Key material is zeroized on drop and redacted from `Debug`

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod dsk;
pub mod env;
pub mod error;
pub mod events;
pub mod keys;
pub mod kex;
pub mod manager;
pub mod mpan;
pub mod qr;
pub mod security_class;
pub mod shared;
pub mod span;

pub use config::SecurityConfig;
pub use dsk::{dsk_from_string, dsk_to_string, is_valid_dsk, try_parse_dsk};
pub use env::{Environment, EnvironmentRng};
pub use error::{DskError, QrCodeError, SecurityError};
pub use events::{EventBus, SecurityEvent};
pub use keys::{BootstrapRole, NetworkKeys, SpanKeys, TempNetworkKeys, generate_key_pair};
pub use kex::{KexFailType, KexParameters, KexScheme};
pub use manager::{
    DecryptOutcome, DecryptRequest, EncryptedPayload, MulticastKeyAndIv, SecurityAction,
    SecurityManager,
};
pub use mpan::{MpanState, MulticastGroup};
pub use qr::{QrProvisioningInformation, parse_qr_code_string};
pub use security_class::SecurityClass;
pub use shared::SharedSecurityManager;
pub use span::{Nonce, SpanState};
/// Re-exported so drivers need only one dependency.
pub use zwave_s2_crypto as crypto;

/// Z-Wave node identifier (16 bits to cover Long Range).
pub type NodeId = u16;
