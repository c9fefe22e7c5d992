use std::net::Ipv4Addr;

use once_cell::sync::Lazy;
use percent_encoding::{NON_ALPHANUMERIC, percent_encode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::bencode::{BencodeError, Value, decode};
use crate::config::SessionConfig;
use crate::peer::Peer;
use crate::torrent::Torrent;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(concat!("rs_leech/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("default reqwest client configuration is valid")
});

/// Byte counters reported to the tracker with every announce.
#[derive(Debug, Clone, Copy)]
pub struct TransferCounters {
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

impl TransferCounters {
    /// Counters for a fresh session: nothing moved yet, everything left.
    pub fn starting(total_length: u64) -> Self {
        Self {
            uploaded: 0,
            downloaded: 0,
            left: total_length,
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid announce URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tracker answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("tracker response is not valid bencode: {0}")]
    Bencode(#[from] BencodeError),
    #[error("tracker response is not a dictionary")]
    NotADictionary,
    #[error("tracker rejected the announce: {0}")]
    Failure(String),
    #[error("tracker response is missing the `{0}` field")]
    MissingField(&'static str),
    #[error("compact peer list is {0} bytes, not a multiple of 6")]
    MalformedPeers(usize),
}

/// Announces to the torrent's tracker and returns the re-announce interval
/// in seconds together with the peer candidates it handed out.
pub async fn announce(
    torrent: &Torrent,
    config: &SessionConfig,
    counters: TransferCounters,
) -> Result<(i64, Vec<Peer>), TrackerError> {
    let url = build_announce_url(torrent, config, counters)?;
    debug!(%url, "announcing");

    let response = HTTP_CLIENT.get(url).send().await?;
    if !response.status().is_success() {
        return Err(TrackerError::Status(response.status()));
    }
    let bytes = response.bytes().await?;

    let (interval, peers) = parse_announce_response(&bytes)?;
    info!(peers = peers.len(), interval, "tracker announce succeeded");
    Ok((interval, peers))
}

fn encode_bytes(bytes: &[u8]) -> String {
    percent_encode(bytes, NON_ALPHANUMERIC).to_string()
}

fn build_announce_url(
    torrent: &Torrent,
    config: &SessionConfig,
    counters: TransferCounters,
) -> Result<String, TrackerError> {
    let mut base = Url::parse(&torrent.announce)?;

    // info_hash and peer_id are raw bytes, so they are percent-encoded by
    // hand and spliced into the query string rather than going through the
    // URL type's UTF-8 query API.
    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
        encode_bytes(&torrent.info_hash),
        encode_bytes(&config.peer_id),
        config.port,
        counters.uploaded,
        counters.downloaded,
        counters.left,
    );

    base.set_query(Some(&query));
    Ok(base.to_string())
}

fn parse_announce_response(bytes: &[u8]) -> Result<(i64, Vec<Peer>), TrackerError> {
    let (value, _) = decode(bytes)?;
    let Value::Dictionary(dict) = value else {
        return Err(TrackerError::NotADictionary);
    };

    if let Some(Value::Bytes(reason)) = dict.get(b"failure reason") {
        return Err(TrackerError::Failure(
            String::from_utf8_lossy(reason).into_owned(),
        ));
    }

    let interval = match dict.get(b"interval") {
        Some(Value::Integer(interval)) => *interval,
        _ => return Err(TrackerError::MissingField("interval")),
    };

    let peers = match dict.get(b"peers") {
        Some(Value::Bytes(blob)) => extract_peers(blob)?,
        _ => return Err(TrackerError::MissingField("peers")),
    };

    Ok((interval, peers))
}

/// Compact peer format: 6 bytes per peer, 4 for the IPv4 address and 2 for
/// the port, both big-endian.
fn extract_peers(bytes: &[u8]) -> Result<Vec<Peer>, TrackerError> {
    if bytes.len() % 6 != 0 {
        return Err(TrackerError::MalformedPeers(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(6)
        .map(|chunk| Peer {
            ip_addr: Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
            port: u16::from_be_bytes([chunk[4], chunk[5]]),
        })
        .collect())
}
