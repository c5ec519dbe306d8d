//! Security classes and their fixed precedence.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A Z-Wave security class.
///
/// `Temporary` keys exist only while a peer is bootstrapping. `None` is only
/// ever a query result (the peer is known to be insecure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityClass {
    /// Bootstrap keys derived from the ECDH exchange
    Temporary,
    /// No security
    None,
    /// S2 Unauthenticated
    S2Unauthenticated,
    /// S2 Authenticated
    S2Authenticated,
    /// S2 Access Control
    S2AccessControl,
    /// S0 Legacy
    S0Legacy,
}

/// Network key classes from highest to lowest.
pub const SECURITY_CLASS_ORDER: [SecurityClass; 4] = [
    SecurityClass::S2AccessControl,
    SecurityClass::S2Authenticated,
    SecurityClass::S2Unauthenticated,
    SecurityClass::S0Legacy,
];

impl SecurityClass {
    /// Wire ordinal (bit position in key bitmasks). `None` for the
    /// pseudo-classes.
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Self::S2Unauthenticated => Some(0),
            Self::S2Authenticated => Some(1),
            Self::S2AccessControl => Some(2),
            Self::S0Legacy => Some(7),
            Self::Temporary | Self::None => None,
        }
    }

    /// True for the three S2 classes.
    pub fn is_s2(self) -> bool {
        matches!(self, Self::S2Unauthenticated | Self::S2Authenticated | Self::S2AccessControl)
    }

    /// True if a network key can be configured for this class.
    pub fn has_network_key(self) -> bool {
        self.ordinal().is_some()
    }

    /// Position in [`SECURITY_CLASS_ORDER`], lower is stronger.
    fn rank(self) -> Option<usize> {
        SECURITY_CLASS_ORDER.iter().position(|&c| c == self)
    }

    /// True if `self` takes precedence over `other`. Pseudo-classes rank
    /// below every keyed class.
    pub fn is_higher_than(self, other: Self) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl TryFrom<u8> for SecurityClass {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::S2Unauthenticated),
            1 => Ok(Self::S2Authenticated),
            2 => Ok(Self::S2AccessControl),
            7 => Ok(Self::S0Legacy),
            other => Err(other),
        }
    }
}

impl fmt::Display for SecurityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Temporary => "Temporary",
            Self::None => "None",
            Self::S2Unauthenticated => "S2_Unauthenticated",
            Self::S2Authenticated => "S2_Authenticated",
            Self::S2AccessControl => "S2_AccessControl",
            Self::S0Legacy => "S0_Legacy",
        };
        f.write_str(name)
    }
}

/// Decode a granted/requested keys bitmask, highest class first.
///
/// Unknown bits are returned as the error.
pub fn security_classes_from_bitmask(mask: u8) -> Result<Vec<SecurityClass>, u8> {
    let known = security_classes_to_bitmask(&SECURITY_CLASS_ORDER);
    if mask & !known != 0 {
        return Err(mask & !known);
    }

    Ok(SECURITY_CLASS_ORDER
        .into_iter()
        .filter(|class| class.ordinal().is_some_and(|bit| mask & (1 << bit) != 0))
        .collect())
}

/// Encode classes as a keys bitmask. Pseudo-classes are ignored.
pub fn security_classes_to_bitmask(classes: &[SecurityClass]) -> u8 {
    classes.iter().filter_map(|class| class.ordinal()).fold(0, |mask, bit| mask | (1 << bit))
}
