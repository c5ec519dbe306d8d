//! Key exchange (KEX) vocabulary for S2 bootstrapping.
//!
//! The bootstrap conversation itself is driven by the command class layer.
//! This module fixes the values both sides must agree on: schemes, curves,
//! failure codes, timeouts, and the checks applied to KEX parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security_class::{SecurityClass, security_classes_from_bitmask, security_classes_to_bitmask};

/// Key exchange scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KexScheme {
    /// KEX scheme 1
    Kex1 = 1,
}

impl KexScheme {
    /// Every scheme this crate understands.
    pub const ALL: [Self; 1] = [Self::Kex1];

    /// Decode a supported-schemes bitmask (bit 0 is reserved).
    pub fn from_bitmask(mask: u8) -> Vec<Self> {
        Self::ALL.into_iter().filter(|&scheme| mask & (1 << scheme as u8) != 0).collect()
    }

    /// Encode schemes as a bitmask.
    pub fn to_bitmask(schemes: &[Self]) -> u8 {
        schemes.iter().fold(0, |mask, &scheme| mask | (1 << scheme as u8))
    }
}

/// ECDH curve profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcdhProfile {
    /// Curve25519
    Curve25519 = 0,
}

impl EcdhProfile {
    /// Every profile this crate understands.
    pub const ALL: [Self; 1] = [Self::Curve25519];

    /// Decode a supported-profiles bitmask.
    pub fn from_bitmask(mask: u8) -> Vec<Self> {
        Self::ALL.into_iter().filter(|&profile| mask & (1 << profile as u8) != 0).collect()
    }

    /// Encode profiles as a bitmask.
    pub fn to_bitmask(profiles: &[Self]) -> u8 {
        profiles.iter().fold(0, |mask, &profile| mask | (1 << profile as u8))
    }
}

/// Reason carried in a KEX Fail command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KexFailType {
    /// No requested key is supported
    NoKeyMatch = 1,
    /// No supported KEX scheme
    NoSupportedScheme = 2,
    /// No supported ECDH profile
    NoSupportedCurve = 3,
    /// A bootstrapping frame failed to decrypt
    Decrypt = 5,
    /// The user or the controller canceled
    BootstrappingCanceled = 6,
    /// Frame arrived under the wrong security level
    WrongSecurityLevel = 7,
    /// A key was requested that was not granted
    KeyNotGranted = 8,
    /// Echoed KEX parameters did not match
    NoVerify = 9,
    /// A key report did not match the key that was sent
    DifferentKey = 10,
}

impl TryFrom<u8> for KexFailType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::NoKeyMatch),
            2 => Ok(Self::NoSupportedScheme),
            3 => Ok(Self::NoSupportedCurve),
            5 => Ok(Self::Decrypt),
            6 => Ok(Self::BootstrappingCanceled),
            7 => Ok(Self::WrongSecurityLevel),
            8 => Ok(Self::KeyNotGranted),
            9 => Ok(Self::NoVerify),
            10 => Ok(Self::DifferentKey),
            other => Err(other),
        }
    }
}

impl From<KexFailType> for u8 {
    fn from(value: KexFailType) -> Self {
        value as u8
    }
}

/// Including node: wait for KEX Report
pub const TA1: Duration = Duration::from_secs(10);
/// Including node: wait for Public Key Report
pub const TA2: Duration = Duration::from_secs(10);
/// Including node: wait for Network Key Get
pub const TA3: Duration = Duration::from_secs(10);
/// Including node: wait for Network Key Verify
pub const TA4: Duration = Duration::from_secs(10);
/// Including node: wait for Transfer End
pub const TA5: Duration = Duration::from_secs(10);
/// Including node: user input (PIN or DSK confirmation)
pub const TAI1: Duration = Duration::from_secs(240);
/// Including node: user grant confirmation
pub const TAI2: Duration = Duration::from_secs(240);
/// Joining node: wait for KEX Get
pub const TB1: Duration = Duration::from_secs(30);
/// Joining node: wait for KEX Set
pub const TB2: Duration = Duration::from_secs(240);
/// Joining node: wait for Public Key Report
pub const TB3: Duration = Duration::from_secs(10);
/// Joining node: wait for Network Key Report
pub const TB4: Duration = Duration::from_secs(10);
/// Joining node: wait for Transfer End
pub const TB5: Duration = Duration::from_secs(10);
/// Joining node: user input
pub const TBI1: Duration = Duration::from_secs(240);

/// Bootstrap timeouts, overridable for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InclusionTimeouts {
    /// See [`TA1`]
    pub ta1: Duration,
    /// See [`TA2`]
    pub ta2: Duration,
    /// See [`TA3`]
    pub ta3: Duration,
    /// See [`TA4`]
    pub ta4: Duration,
    /// See [`TA5`]
    pub ta5: Duration,
    /// See [`TAI1`]
    pub tai1: Duration,
    /// See [`TAI2`]
    pub tai2: Duration,
    /// See [`TB1`]
    pub tb1: Duration,
    /// See [`TB2`]
    pub tb2: Duration,
    /// See [`TB3`]
    pub tb3: Duration,
    /// See [`TB4`]
    pub tb4: Duration,
    /// See [`TB5`]
    pub tb5: Duration,
    /// See [`TBI1`]
    pub tbi1: Duration,
}

impl Default for InclusionTimeouts {
    fn default() -> Self {
        Self {
            ta1: TA1,
            ta2: TA2,
            ta3: TA3,
            ta4: TA4,
            ta5: TA5,
            tai1: TAI1,
            tai2: TAI2,
            tb1: TB1,
            tb2: TB2,
            tb3: TB3,
            tb4: TB4,
            tb5: TB5,
            tbi1: TBI1,
        }
    }
}

/// Contents of a KEX Report (supported) or KEX Set (chosen).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KexParameters {
    /// Requested or granted keys
    pub keys: Vec<SecurityClass>,
    /// Supported or chosen schemes
    pub schemes: Vec<KexScheme>,
    /// Supported or chosen curves
    pub ecdh_profiles: Vec<EcdhProfile>,
    /// Client-side authentication requested
    pub client_side_authentication: bool,
}

impl KexParameters {
    /// Build from the wire bitmasks.
    ///
    /// # Errors
    ///
    /// - `KexFailType::NoKeyMatch` if the keys bitmask has unknown bits
    pub fn from_bitmasks(
        keys: u8,
        schemes: u8,
        ecdh_profiles: u8,
        client_side_authentication: bool,
    ) -> Result<Self, KexFailType> {
        Ok(Self {
            keys: security_classes_from_bitmask(keys).map_err(|_| KexFailType::NoKeyMatch)?,
            schemes: KexScheme::from_bitmask(schemes),
            ecdh_profiles: EcdhProfile::from_bitmask(ecdh_profiles),
            client_side_authentication,
        })
    }

    /// Keys as a wire bitmask.
    pub fn keys_bitmask(&self) -> u8 {
        security_classes_to_bitmask(&self.keys)
    }

    /// Check a peer's KEX Report before choosing grants.
    ///
    /// # Errors
    ///
    /// The KEX Fail reason to send.
    pub fn validate(&self) -> Result<(), KexFailType> {
        if !self.schemes.contains(&KexScheme::Kex1) {
            return Err(KexFailType::NoSupportedScheme);
        }
        if !self.ecdh_profiles.contains(&EcdhProfile::Curve25519) {
            return Err(KexFailType::NoSupportedCurve);
        }
        if self.keys.is_empty() || !self.keys.iter().all(|class| class.has_network_key()) {
            return Err(KexFailType::NoKeyMatch);
        }
        Ok(())
    }

    /// Check a KEX Set (`grant`) against what we requested.
    ///
    /// # Errors
    ///
    /// The KEX Fail reason to send.
    pub fn validate_grant(&self, grant: &Self) -> Result<(), KexFailType> {
        if grant.schemes.len() != 1 || !self.schemes.contains(&grant.schemes[0]) {
            return Err(KexFailType::NoSupportedScheme);
        }
        if grant.ecdh_profiles.len() != 1 || !self.ecdh_profiles.contains(&grant.ecdh_profiles[0]) {
            return Err(KexFailType::NoSupportedCurve);
        }
        if grant.keys.is_empty() || !grant.keys.iter().all(|class| self.keys.contains(class)) {
            return Err(KexFailType::NoKeyMatch);
        }
        Ok(())
    }

    /// Check the encrypted echo of our own parameters.
    ///
    /// # Errors
    ///
    /// - `KexFailType::NoVerify` on any difference
    pub fn verify_echo(&self, echo: &Self) -> Result<(), KexFailType> {
        if self == echo { Ok(()) } else { Err(KexFailType::NoVerify) }
    }
}
