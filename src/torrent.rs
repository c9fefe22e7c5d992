use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::bencode::{BencodeError, Dictionary, Value, decode};

/// Metadata extracted from a `.torrent` file, flattened to the fields a
/// download session needs.
///
/// `info_hash` is the SHA-1 digest of the raw `info` dictionary bytes as
/// they appeared in the file; the parser captures it during decoding, so no
/// re-encoding is involved.
#[derive(Debug, Clone)]
pub struct Torrent {
    pub announce: String,
    pub name: String,
    pub piece_length: u32,
    pub total_length: u64,
    pub pieces: Vec<[u8; 20]>,
    pub info_hash: [u8; 20],
}

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error(transparent)]
    Bencode(#[from] BencodeError),
    #[error("could not read torrent file: {0}")]
    Io(#[from] std::io::Error),
    #[error("torrent metadata is not a dictionary")]
    NotADictionary,
    #[error("torrent metadata is missing the `{0}` field")]
    MissingField(&'static str),
    #[error("torrent field `{0}` has the wrong type")]
    WrongType(&'static str),
    #[error("torrent field `{0}` has an out-of-range value")]
    InvalidValue(&'static str),
    #[error("`pieces` length {0} is not a multiple of 20")]
    MalformedPieces(usize),
    #[error("torrent declares neither `length` nor `files`")]
    UnknownSize,
}

impl Torrent {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TorrentError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TorrentError> {
        let (value, _) = decode(bytes)?;
        let Value::Dictionary(root) = value else {
            return Err(TorrentError::NotADictionary);
        };

        let announce = require_string(&root, "announce")?;
        let info = match root.get(b"info") {
            Some(Value::Dictionary(info)) => info,
            Some(_) => return Err(TorrentError::WrongType("info")),
            None => return Err(TorrentError::MissingField("info")),
        };

        let name = require_string(info, "name")?;
        let piece_length = u32::try_from(require_integer(info, "piece length")?)
            .map_err(|_| TorrentError::InvalidValue("piece length"))?;
        let total_length = total_length(info)?;
        let pieces = split_piece_hashes(info)?;

        let torrent = Torrent {
            announce,
            name,
            piece_length,
            total_length,
            pieces,
            info_hash: info.hash(),
        };
        debug!(
            name = %torrent.name,
            pieces = torrent.pieces.len(),
            total = torrent.total_length,
            "parsed torrent metadata"
        );
        Ok(torrent)
    }
}

/// Single-file torrents carry `length` directly; multi-file torrents carry a
/// `files` list whose entries each have their own `length`.
fn total_length(info: &Dictionary) -> Result<u64, TorrentError> {
    if let Some(value) = info.get(b"length") {
        let Value::Integer(length) = value else {
            return Err(TorrentError::WrongType("length"));
        };
        return u64::try_from(*length).map_err(|_| TorrentError::InvalidValue("length"));
    }

    let Some(value) = info.get(b"files") else {
        return Err(TorrentError::UnknownSize);
    };
    let Value::List(files) = value else {
        return Err(TorrentError::WrongType("files"));
    };

    let mut total = 0u64;
    for file in files {
        let Value::Dictionary(file) = file else {
            return Err(TorrentError::WrongType("files"));
        };
        match file.get(b"length") {
            Some(Value::Integer(length)) => {
                let length =
                    u64::try_from(*length).map_err(|_| TorrentError::InvalidValue("length"))?;
                total = total
                    .checked_add(length)
                    .ok_or(TorrentError::InvalidValue("length"))?;
            }
            Some(_) => return Err(TorrentError::WrongType("length")),
            None => return Err(TorrentError::MissingField("length")),
        }
    }
    Ok(total)
}

/// `pieces` is one concatenated blob of 20-byte SHA-1 digests.
fn split_piece_hashes(info: &Dictionary) -> Result<Vec<[u8; 20]>, TorrentError> {
    let blob = match info.get(b"pieces") {
        Some(Value::Bytes(blob)) => blob,
        Some(_) => return Err(TorrentError::WrongType("pieces")),
        None => return Err(TorrentError::MissingField("pieces")),
    };
    if blob.len() % 20 != 0 {
        return Err(TorrentError::MalformedPieces(blob.len()));
    }
    Ok(blob
        .chunks_exact(20)
        .map(|chunk| <[u8; 20]>::try_from(chunk).unwrap_or([0; 20]))
        .collect())
}

fn require_string(dict: &Dictionary, key: &'static str) -> Result<String, TorrentError> {
    match dict.get(key.as_bytes()) {
        Some(Value::Bytes(bytes)) => String::from_utf8(bytes.clone())
            .map_err(|_| TorrentError::WrongType(key)),
        Some(_) => Err(TorrentError::WrongType(key)),
        None => Err(TorrentError::MissingField(key)),
    }
}

fn require_integer(dict: &Dictionary, key: &'static str) -> Result<i64, TorrentError> {
    match dict.get(key.as_bytes()) {
        Some(Value::Integer(value)) => Ok(*value),
        Some(_) => Err(TorrentError::WrongType(key)),
        None => Err(TorrentError::MissingField(key)),
    }
}
