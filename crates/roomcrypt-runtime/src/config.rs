use roomcrypt_core::{DecryptionConfig, EncryptionConfig};

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Capacity of each worker's command inbox
    pub command_capacity: usize,
    /// Outbound session policy
    pub encryption: EncryptionConfig,
    /// Inbound decryption policy
    pub decryption: DecryptionConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_capacity: 256,
            encryption: EncryptionConfig::default(),
            decryption: DecryptionConfig::default(),
        }
    }
}
