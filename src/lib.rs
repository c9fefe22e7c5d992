//! A minimal BitTorrent leeching core: bencode codec, `.torrent` metadata,
//! HTTP tracker announces, and a sequential single-peer piece downloader
//! with SHA-1 verification.

pub mod bencode;
pub mod config;
pub mod peer;
pub mod torrent;
pub mod tracker;

pub use config::SessionConfig;
pub use torrent::{Torrent, TorrentError};
