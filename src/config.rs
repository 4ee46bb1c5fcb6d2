/// Tunables for [`RatchetEngine`](crate::RatchetEngine).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Most message keys kept for out-of-order delivery within one chain.
    pub max_skipped_messages: u32,
    /// Context string mixed into every key derivation.
    pub protocol_info: Vec<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_skipped_messages: 1000,
            protocol_info: b"Parley-E2E-v1".to_vec(),
        }
    }
}
