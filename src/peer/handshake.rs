use crate::peer::{PSTR, PSTR_LEN};

pub const HANDSHAKE_LEN: usize = 68;

/// The fixed 68-byte exchange sent by both sides immediately after
/// connecting: protocol string length, protocol string, 8 reserved zero
/// bytes, info hash, peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PSTR_LEN;
        buf[1..20].copy_from_slice(PSTR.as_bytes());
        // 20..28 stay zero: no extension bits advertised
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Returns `None` unless `buf` is exactly 68 bytes advertising the
    /// BitTorrent protocol string. The reserved extension bytes are neither
    /// checked nor kept.
    pub fn deserialize(buf: &[u8]) -> Option<Self> {
        if buf.len() != HANDSHAKE_LEN {
            return None;
        }
        let (header, ids) = buf.split_at(28);
        if header[0] != PSTR_LEN || &header[1..20] != PSTR.as_bytes() {
            return None;
        }

        Some(Self {
            info_hash: ids[..20].try_into().ok()?,
            peer_id: ids[20..].try_into().ok()?,
        })
    }
}
