//! Policy configuration.

/// One week in milliseconds.
const WEEK_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Outbound session policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    /// Rotate after this many messages.
    pub rotation_period_messages: u32,
    /// Rotate once the session is this old (milliseconds).
    pub rotation_period_ms: u64,
    /// Maximum devices addressed by one key-distribution request.
    pub max_devices_per_batch: usize,
    /// Refuse to encrypt while the target set contains unknown devices.
    pub block_unknown_devices: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            rotation_period_messages: 100,
            rotation_period_ms: WEEK_MS,
            max_devices_per_batch: 100,
            block_unknown_devices: true,
        }
    }
}

/// Inbound decryption policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionConfig {
    /// Emit key requests when an event cannot be decrypted.
    pub request_keys: bool,
    /// Reject a ratchet index seen twice in one timeline.
    pub detect_replays: bool,
    /// Answer key requests from our own user's other devices.
    pub share_with_own_devices: bool,
}

impl Default for DecryptionConfig {
    fn default() -> Self {
        Self { request_keys: true, detect_replays: true, share_with_own_devices: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rotation_policy() {
        let config = EncryptionConfig::default();
        assert_eq!(config.rotation_period_messages, 100);
        assert_eq!(config.rotation_period_ms, 604_800_000);
        assert_eq!(config.max_devices_per_batch, 100);
    }
}
