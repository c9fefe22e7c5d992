//! Bencode codec: the binary serialization grammar used by torrent metadata
//! and tracker responses.

pub mod encoder;
pub mod error;
pub mod parser;

pub use encoder::encode;
pub use error::BencodeError;
pub use parser::{Dictionary, Value, decode};
