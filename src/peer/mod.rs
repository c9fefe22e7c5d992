use std::fmt;
use std::net::Ipv4Addr;

pub mod connection;
pub mod download;
pub mod error;
pub mod handshake;
pub mod message;

pub(crate) const PSTR: &str = "BitTorrent protocol";
pub(crate) const PSTR_LEN: u8 = PSTR.len() as u8; // always 19

/// A peer candidate as handed out by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub ip_addr: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_addr, self.port)
    }
}
