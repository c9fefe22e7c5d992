use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::peer::Peer;
use crate::peer::error::PeerError;
use crate::peer::handshake::{HANDSHAKE_LEN, Handshake};
use crate::peer::message::Message;

/// Upper bound on the length prefix of an incoming frame, checked before
/// the receive buffer is allocated. The largest legitimate frames are a
/// Piece carrying one 16 KiB block and the bitfield of a very large
/// torrent; 1 MiB leaves room for both.
const MAX_FRAME_LEN: usize = 1 << 20;

/// One established byte stream to a single remote peer.
///
/// The transport is exclusively owned; dropping the connection closes it on
/// every exit path, success or failure. Generic over the stream type so
/// tests can script a mock transport.
pub struct PeerConnection<T> {
    transport: T,
}

impl PeerConnection<TcpStream> {
    pub async fn connect(peer: &Peer) -> Result<Self, PeerError> {
        let addr = SocketAddr::from((peer.ip_addr, peer.port));
        let transport = TcpStream::connect(addr).await?;
        debug!(%peer, "connected");
        Ok(Self::new(transport))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> PeerConnection<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Writes our 68-byte handshake, then reads exactly 68 bytes back and
    /// validates them: the remote must speak the BitTorrent protocol and
    /// advertise the same info hash.
    pub async fn perform_handshake(
        &mut self,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<Handshake, PeerError> {
        let ours = Handshake { info_hash, peer_id };
        self.transport.write_all(&ours.serialize()).await?;

        let mut buf = [0u8; HANDSHAKE_LEN];
        self.read_full(&mut buf).await?;

        let theirs = Handshake::deserialize(&buf).ok_or_else(|| {
            PeerError::Protocol("remote handshake does not speak the BitTorrent protocol".into())
        })?;
        if theirs.info_hash != info_hash {
            return Err(PeerError::Protocol(
                "remote handshake advertises a different info hash".into(),
            ));
        }
        debug!(peer_id = ?theirs.peer_id, "handshake complete");
        Ok(theirs)
    }

    /// Reads one frame. `Ok(None)` is a keep-alive (zero length prefix),
    /// which is distinct from a closed connection: closure mid-read is a
    /// `Connection` error.
    pub async fn read_message(&mut self) -> Result<Option<Message>, PeerError> {
        let mut len_buf = [0u8; 4];
        self.read_full(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            trace!("keep-alive");
            return Ok(None);
        }
        if len > MAX_FRAME_LEN {
            return Err(PeerError::Protocol(format!(
                "declared frame length {len} exceeds the {MAX_FRAME_LEN}-byte cap"
            )));
        }

        let mut frame = vec![0u8; len];
        self.read_full(&mut frame).await?;
        let message = Message::decode(frame[0], &frame[1..])?;
        trace!(?message, "received");
        Ok(Some(message))
    }

    /// Encodes and writes the whole frame, retrying partial writes until it
    /// is fully transmitted.
    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        trace!(?message, "sending");
        self.transport.write_all(&message.encode()).await?;
        Ok(())
    }

    /// Fills `buf` completely, looping over however many short reads the
    /// transport yields. A zero-byte read before the buffer is full means
    /// the remote closed early.
    async fn read_full(&mut self, buf: &mut [u8]) -> Result<(), PeerError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.transport.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(PeerError::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("transport closed after {filled} of {} bytes", buf.len()),
                )));
            }
            filled += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn handshake_bytes(info_hash: [u8; 20], peer_id: [u8; 20]) -> [u8; HANDSHAKE_LEN] {
        Handshake { info_hash, peer_id }.serialize()
    }

    #[tokio::test]
    async fn handshake_exchanges_68_bytes_each_way() {
        let info_hash = [0x11; 20];
        let ours = handshake_bytes(info_hash, [0x22; 20]);
        let theirs = handshake_bytes(info_hash, [0x33; 20]);

        let transport = tokio_test::io::Builder::new()
            .write(&ours)
            .read(&theirs)
            .build();
        let mut connection = PeerConnection::new(transport);

        let remote = connection
            .perform_handshake(info_hash, [0x22; 20])
            .await
            .unwrap();
        assert_eq!(remote.peer_id, [0x33; 20]);
    }

    #[tokio::test]
    async fn handshake_reassembles_arbitrary_short_reads() {
        let info_hash = [0x11; 20];
        let ours = handshake_bytes(info_hash, [0x22; 20]);
        let theirs = handshake_bytes(info_hash, [0x33; 20]);

        let transport = tokio_test::io::Builder::new()
            .write(&ours)
            .read(&theirs[..1])
            .read(&theirs[1..20])
            .read(&theirs[20..45])
            .read(&theirs[45..])
            .build();
        let mut connection = PeerConnection::new(transport);

        let remote = connection
            .perform_handshake(info_hash, [0x22; 20])
            .await
            .unwrap();
        assert_eq!(remote.info_hash, info_hash);
    }

    #[tokio::test]
    async fn handshake_rejects_mismatched_info_hash() {
        let ours = handshake_bytes([0x11; 20], [0x22; 20]);
        let theirs = handshake_bytes([0x99; 20], [0x33; 20]);

        let transport = tokio_test::io::Builder::new()
            .write(&ours)
            .read(&theirs)
            .build();
        let mut connection = PeerConnection::new(transport);

        let result = connection.perform_handshake([0x11; 20], [0x22; 20]).await;
        assert_matches!(result, Err(PeerError::Protocol(_)));
    }

    #[tokio::test]
    async fn handshake_detects_early_close() {
        let ours = handshake_bytes([0x11; 20], [0x22; 20]);
        let theirs = handshake_bytes([0x11; 20], [0x33; 20]);

        // Transport dies after 10 of the 68 expected bytes.
        let transport = tokio_test::io::Builder::new()
            .write(&ours)
            .read(&theirs[..10])
            .build();
        let mut connection = PeerConnection::new(transport);

        let result = connection.perform_handshake([0x11; 20], [0x22; 20]).await;
        assert_matches!(result, Err(PeerError::Connection(_)));
    }

    #[tokio::test]
    async fn zero_length_prefix_is_a_keep_alive_not_a_message() {
        let transport = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 0])
            .build();
        let mut connection = PeerConnection::new(transport);

        assert_matches!(connection.read_message().await, Ok(None));
    }

    #[tokio::test]
    async fn reads_a_message_split_across_reads() {
        let frame = Message::Have { piece_index: 9 }.encode();
        let transport = tokio_test::io::Builder::new()
            .read(&frame[..2])
            .read(&frame[2..6])
            .read(&frame[6..])
            .build();
        let mut connection = PeerConnection::new(transport);

        let message = connection.read_message().await.unwrap();
        assert_eq!(message, Some(Message::Have { piece_index: 9 }));
    }

    #[tokio::test]
    async fn absurd_length_prefix_is_rejected_before_allocation() {
        let transport = tokio_test::io::Builder::new()
            .read(&[0xFF, 0xFF, 0xFF, 0xFF])
            .build();
        let mut connection = PeerConnection::new(transport);

        assert_matches!(
            connection.read_message().await,
            Err(PeerError::Protocol(_))
        );
    }

    #[tokio::test]
    async fn propagates_payload_shape_errors() {
        // Request with an 11-byte payload: length 12 on the wire.
        let mut frame = vec![0, 0, 0, 12, 6];
        frame.extend_from_slice(&[0; 11]);
        let transport = tokio_test::io::Builder::new().read(&frame).build();
        let mut connection = PeerConnection::new(transport);

        assert_matches!(
            connection.read_message().await,
            Err(PeerError::Parse(_))
        );
    }

    #[tokio::test]
    async fn send_message_writes_the_exact_frame() {
        let frame = Message::Interested.encode();
        let transport = tokio_test::io::Builder::new().write(&frame).build();
        let mut connection = PeerConnection::new(transport);

        connection.send_message(&Message::Interested).await.unwrap();
    }
}
