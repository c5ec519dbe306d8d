//! Security manager configuration.

use std::time::Duration;

/// How long a nonce we used for sending stays valid for decrypting a
/// frame the peer encrypted concurrently with the same nonce.
pub const DEFAULT_SPAN_COLLISION_WINDOW: Duration = Duration::from_millis(500);

/// Number of received sequence numbers remembered per peer.
pub const DEFAULT_MAX_STORED_SEQUENCE_NUMBERS: usize = 10;

/// Highest multicast group id. Ids cycle through `1..=max`.
pub const DEFAULT_MAX_MULTICAST_GROUP_ID: u8 = 255;

/// Security manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    /// Validity window of the stored current SPAN
    pub span_collision_window: Duration,
    /// Duplicate detection depth per peer
    pub max_stored_sequence_numbers: usize,
    /// Highest multicast group id handed out (at least 1)
    pub max_multicast_group_id: u8,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            span_collision_window: DEFAULT_SPAN_COLLISION_WINDOW,
            max_stored_sequence_numbers: DEFAULT_MAX_STORED_SEQUENCE_NUMBERS,
            max_multicast_group_id: DEFAULT_MAX_MULTICAST_GROUP_ID,
        }
    }
}
