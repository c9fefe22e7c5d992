use std::time::{SystemTime, UNIX_EPOCH};

/// Azureus-style client prefix: rs_leech 1.0.
const PEER_ID_PREFIX: &[u8; 8] = b"-RL0100-";

/// Per-session identity: the 20-byte peer id sent in handshakes and tracker
/// announces, and the port reported to the tracker.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub peer_id: [u8; 20],
    pub port: u16,
}

impl SessionConfig {
    /// Generates a fresh peer id for this session. The suffix only needs to
    /// distinguish concurrent sessions, not be unguessable, so a clock-seeded
    /// generator is enough and keeps the dependency set small.
    pub fn with_generated_peer_id(port: u16) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
        let mut state = nanos as u64 ^ (nanos >> 64) as u64;
        for slot in peer_id[8..].iter_mut() {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *slot = b'0' + ((state >> 33) % 10) as u8;
        }

        Self { peer_id, port }
    }
}
