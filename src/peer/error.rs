use thiserror::Error;

use crate::peer::message::MessageError;

/// Everything that can end a peer session.
///
/// All four kinds are fatal to the session they occur in and unwind to the
/// caller untouched; none are downgraded or retried internally. The caller
/// may pick a different peer candidate on `Connection`, but that policy
/// lives outside this crate's core.
#[derive(Debug, Error)]
pub enum PeerError {
    /// A structurally malformed message payload.
    #[error("malformed peer message: {0}")]
    Parse(#[from] MessageError),
    /// A well-formed message arrived where the protocol forbids it.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The transport closed or failed mid-exchange.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
    /// The output sink failed while persisting a verified piece. Kept apart
    /// from `Connection` so a local disk failure is not blamed on the peer.
    #[error("piece sink error: {0}")]
    Sink(std::io::Error),
    /// An assembled piece did not match its expected SHA-1 digest.
    #[error("piece {piece} failed hash verification")]
    Integrity { piece: u32 },
}
