use thiserror::Error;
use tracing::warn;

const BITS_IN_BYTE: usize = 8;

/// A peer wire message, one variant per known id plus an escape hatch for
/// ids this crate does not understand.
///
/// Keep-alive frames (length 0) carry no id and therefore no variant here;
/// the connection layer reports them as "no message".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece_index: u32,
    },
    Bitfield(Bitfield),
    Request {
        index: u32,
        begin: u32,
        length: u32,
    },
    Piece {
        index: u32,
        begin: u32,
        block: Vec<u8>,
    },
    Cancel {
        index: u32,
        begin: u32,
        length: u32,
    },
    /// An id outside 0..=8, payload preserved verbatim.
    Unknown {
        id: u8,
        payload: Vec<u8>,
    },
}

/// Payload-shape violations. These are decode errors, never silent
/// truncation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("message id {id} requires a {expected}-byte payload, got {actual}")]
    FixedPayloadSize {
        id: u8,
        expected: usize,
        actual: usize,
    },
    #[error("piece payload is {0} bytes, shorter than its 8-byte header")]
    PiecePayloadTooShort(usize),
}

impl Message {
    /// Decodes a message from its id byte and payload, as carried by one
    /// length-prefixed frame.
    pub fn decode(id: u8, payload: &[u8]) -> Result<Message, MessageError> {
        match id {
            0..=3 => {
                if !payload.is_empty() {
                    // Tolerated for interoperability, but worth surfacing.
                    warn!(id, len = payload.len(), "control message carries an unexpected payload");
                }
                Ok(match id {
                    0 => Message::Choke,
                    1 => Message::Unchoke,
                    2 => Message::Interested,
                    _ => Message::NotInterested,
                })
            }
            4 => {
                if payload.len() != 4 {
                    return Err(MessageError::FixedPayloadSize {
                        id,
                        expected: 4,
                        actual: payload.len(),
                    });
                }
                Ok(Message::Have {
                    piece_index: be_u32(payload),
                })
            }
            5 => Ok(Message::Bitfield(Bitfield::new(payload.to_vec()))),
            6 | 8 => {
                if payload.len() != 12 {
                    return Err(MessageError::FixedPayloadSize {
                        id,
                        expected: 12,
                        actual: payload.len(),
                    });
                }
                let index = be_u32(&payload[0..4]);
                let begin = be_u32(&payload[4..8]);
                let length = be_u32(&payload[8..12]);
                if id == 6 {
                    Ok(Message::Request {
                        index,
                        begin,
                        length,
                    })
                } else {
                    Ok(Message::Cancel {
                        index,
                        begin,
                        length,
                    })
                }
            }
            7 => {
                if payload.len() < 8 {
                    return Err(MessageError::PiecePayloadTooShort(payload.len()));
                }
                Ok(Message::Piece {
                    index: be_u32(&payload[0..4]),
                    begin: be_u32(&payload[4..8]),
                    block: payload[8..].to_vec(),
                })
            }
            _ => Ok(Message::Unknown {
                id,
                payload: payload.to_vec(),
            }),
        }
    }

    /// Encodes the full frame: 4-byte big-endian length (id + payload),
    /// id byte, payload. The length field is always computed, never
    /// hand-supplied.
    pub fn encode(&self) -> Vec<u8> {
        let (id, payload) = self.id_and_payload();
        let total_len = 1 + payload.len();
        let mut buf = Vec::with_capacity(4 + total_len);

        buf.extend_from_slice(&(total_len as u32).to_be_bytes());
        buf.push(id);
        buf.extend_from_slice(&payload);

        buf
    }

    fn id_and_payload(&self) -> (u8, Vec<u8>) {
        match self {
            Message::Choke => (0, vec![]),
            Message::Unchoke => (1, vec![]),
            Message::Interested => (2, vec![]),
            Message::NotInterested => (3, vec![]),
            Message::Have { piece_index } => (4, piece_index.to_be_bytes().to_vec()),
            Message::Bitfield(bitfield) => (5, bitfield.bits.clone()),
            Message::Request {
                index,
                begin,
                length,
            } => (6, triple(*index, *begin, *length)),
            Message::Piece {
                index,
                begin,
                block,
            } => {
                let mut payload = Vec::with_capacity(8 + block.len());
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(block);
                (7, payload)
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => (8, triple(*index, *begin, *length)),
            Message::Unknown { id, payload } => (*id, payload.clone()),
        }
    }
}

fn triple(index: u32, begin: u32, length: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&index.to_be_bytes());
    payload.extend_from_slice(&begin.to_be_bytes());
    payload.extend_from_slice(&length.to_be_bytes());
    payload
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// A peer's advertised piece bitmap. Bit `8 * byte_index + bit_index`
/// (counting from the most-significant bit) marks piece availability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
}

impl Bitfield {
    pub fn new(bits: Vec<u8>) -> Self {
        Bitfield { bits }
    }

    pub fn from_piece_count(count: usize) -> Self {
        Bitfield {
            bits: vec![0; count.div_ceil(BITS_IN_BYTE)],
        }
    }

    pub fn has_piece(&self, index: usize) -> bool {
        let byte = index / BITS_IN_BYTE;
        let bit = BITS_IN_BYTE - 1 - (index % BITS_IN_BYTE); // MSB first
        if byte >= self.bits.len() {
            return false;
        }
        self.bits[byte] & (1 << bit) != 0
    }

    pub fn set_piece(&mut self, index: usize) {
        let byte = index / BITS_IN_BYTE;
        let bit = BITS_IN_BYTE - 1 - (index % BITS_IN_BYTE);
        if byte < self.bits.len() {
            self.bits[byte] |= 1 << bit;
        }
    }

    /// All piece indices this bitfield advertises, ascending.
    pub fn available_pieces(&self) -> Vec<usize> {
        let mut pieces = Vec::new();
        for (byte_index, byte) in self.bits.iter().enumerate() {
            for bit_index in 0..BITS_IN_BYTE {
                if (byte >> (BITS_IN_BYTE - 1 - bit_index)) & 1 == 1 {
                    pieces.push(BITS_IN_BYTE * byte_index + bit_index);
                }
            }
        }
        pieces
    }
}
