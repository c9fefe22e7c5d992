use std::collections::BTreeSet;
use std::path::Path;

use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::peer::connection::PeerConnection;
use crate::peer::error::PeerError;
use crate::peer::message::{Bitfield, Message};
use crate::torrent::Torrent;

/// Blocks are requested in fixed 16 KiB chunks; only the final block of the
/// transfer is shorter.
pub const PIECE_BLOCK_SIZE: usize = 16384;

/// Receives verified piece bytes, in ascending piece order. Nothing is ever
/// emitted for a piece that failed verification.
#[allow(async_fn_in_trait)]
pub trait PieceSink {
    async fn put(&mut self, index: u32, data: &[u8]) -> std::io::Result<()>;
}

/// Appends verified pieces to a destination file. Pieces arrive in order,
/// so a plain sequential write suffices.
pub struct FileSink {
    file: tokio::fs::File,
}

impl FileSink {
    pub async fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self { file })
    }

    pub async fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_all().await
    }
}

impl PieceSink for FileSink {
    async fn put(&mut self, _index: u32, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all(data).await
    }
}

/// Accumulator for one piece: the expected digest, the assembly buffer, and
/// the block offsets still outstanding. Exclusively owned by the downloader
/// and recreated for every piece.
#[derive(Debug)]
struct PieceAssembly {
    index: u32,
    expected_hash: [u8; 20],
    buf: Vec<u8>,
    outstanding: BTreeSet<usize>,
}

impl PieceAssembly {
    fn new(index: u32, expected_hash: [u8; 20], piece_size: usize) -> Self {
        Self {
            index,
            expected_hash,
            buf: vec![0; piece_size],
            outstanding: (0..piece_size).step_by(PIECE_BLOCK_SIZE).collect(),
        }
    }

    /// Lowest offset not yet received, or `None` once the piece is whole.
    fn next_outstanding(&self) -> Option<usize> {
        self.outstanding.first().copied()
    }

    fn block_length(&self, offset: usize) -> usize {
        (self.buf.len() - offset).min(PIECE_BLOCK_SIZE)
    }

    fn accept(&mut self, offset: usize, block: &[u8]) {
        self.buf[offset..offset + block.len()].copy_from_slice(block);
        self.outstanding.remove(&offset);
    }

    fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Consumes the assembly, yielding the piece bytes only if their SHA-1
    /// digest matches the expected hash from the metadata.
    fn verify(self) -> Option<Vec<u8>> {
        let digest: [u8; 20] = Sha1::digest(&self.buf).into();
        if digest == self.expected_hash {
            Some(self.buf)
        } else {
            None
        }
    }
}

/// Drives one download session against a single peer, strictly sequentially:
/// one piece, one in-flight block request at a time.
///
/// Session flow after the caller has performed the handshake: the first
/// message must be a Bitfield, then Interested is sent, messages are
/// consumed until an Unchoke arrives, and pieces are requested block by
/// block and verified before anything reaches the sink. Every error is
/// fatal to the session.
pub struct PieceDownloader<'a, T, S> {
    connection: PeerConnection<T>,
    pieces: Vec<[u8; 20]>,
    piece_length: u32,
    total_length: u64,
    sink: &'a mut S,
    remote_bitfield: Option<Bitfield>,
}

impl<'a, T, S> PieceDownloader<'a, T, S>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: PieceSink,
{
    pub fn new(connection: PeerConnection<T>, torrent: &Torrent, sink: &'a mut S) -> Self {
        Self {
            connection,
            pieces: torrent.pieces.clone(),
            piece_length: torrent.piece_length,
            total_length: torrent.total_length,
            sink,
            remote_bitfield: None,
        }
    }

    pub async fn run(mut self) -> Result<(), PeerError> {
        self.await_bitfield().await?;
        self.connection.send_message(&Message::Interested).await?;
        self.await_unchoke().await?;

        for index in 0..self.pieces.len() as u32 {
            let data = self.download_piece(index).await?;
            self.sink.put(index, &data).await.map_err(PeerError::Sink)?;
            info!(piece = index, total = self.pieces.len(), "piece verified");
        }
        Ok(())
    }

    /// The first real message after the handshake must be the peer's
    /// bitfield; keep-alives carry no message and are skipped.
    async fn await_bitfield(&mut self) -> Result<(), PeerError> {
        loop {
            match self.connection.read_message().await? {
                None => continue,
                Some(Message::Bitfield(bitfield)) => {
                    debug!(available = bitfield.available_pieces().len(), "got bitfield");
                    self.remote_bitfield = Some(bitfield);
                    return Ok(());
                }
                Some(other) => {
                    return Err(PeerError::Protocol(format!(
                        "expected bitfield as the first message, got {other:?}"
                    )));
                }
            }
        }
    }

    /// Consumes messages until the peer unchokes us. Anything else received
    /// while waiting (Choke, Have, ...) is deliberately ignored.
    async fn await_unchoke(&mut self) -> Result<(), PeerError> {
        loop {
            match self.connection.read_message().await? {
                Some(Message::Unchoke) => return Ok(()),
                None => continue,
                Some(other) => debug!(?other, "ignored while waiting for unchoke"),
            }
        }
    }

    async fn download_piece(&mut self, index: u32) -> Result<Vec<u8>, PeerError> {
        if let Some(bitfield) = &self.remote_bitfield
            && !bitfield.has_piece(index as usize)
        {
            warn!(piece = index, "peer did not advertise this piece, requesting anyway");
        }

        let mut assembly =
            PieceAssembly::new(index, self.pieces[index as usize], self.piece_size(index));

        while let Some(offset) = assembly.next_outstanding() {
            let length = assembly.block_length(offset);
            self.connection
                .send_message(&Message::Request {
                    index,
                    begin: offset as u32,
                    length: length as u32,
                })
                .await?;

            let (begin, block) = self.await_block(index).await?;
            if begin as usize != offset || block.len() != length {
                return Err(PeerError::Protocol(format!(
                    "requested piece {index} offset {offset} length {length}, \
                     peer answered offset {begin} with {} bytes",
                    block.len()
                )));
            }
            assembly.accept(offset, &block);
        }

        debug_assert!(assembly.is_complete());
        assembly
            .verify()
            .ok_or(PeerError::Integrity { piece: index })
    }

    /// Blocks until the Piece message answering the outstanding request
    /// arrives. Interleaved keep-alives and non-Piece messages are consumed
    /// and ignored; a Piece for a different index cannot happen with a
    /// single request in flight and is a protocol violation.
    async fn await_block(&mut self, index: u32) -> Result<(u32, Vec<u8>), PeerError> {
        loop {
            match self.connection.read_message().await? {
                None => continue,
                Some(Message::Piece {
                    index: got,
                    begin,
                    block,
                }) => {
                    if got != index {
                        return Err(PeerError::Protocol(format!(
                            "received a block for piece {got} while downloading piece {index}"
                        )));
                    }
                    return Ok((begin, block));
                }
                Some(other) => debug!(?other, "ignored while awaiting a block"),
            }
        }
    }

    /// The final piece covers only whatever remains of the transfer.
    fn piece_size(&self, index: u32) -> usize {
        let start = index as u64 * self.piece_length as u64;
        let remaining = self.total_length.saturating_sub(start);
        remaining.min(self.piece_length as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[derive(Default)]
    struct VecSink {
        pieces: Vec<(u32, Vec<u8>)>,
    }

    impl PieceSink for VecSink {
        async fn put(&mut self, index: u32, data: &[u8]) -> std::io::Result<()> {
            self.pieces.push((index, data.to_vec()));
            Ok(())
        }
    }

    fn test_torrent(piece_length: u32, total_length: u64, piece_data: &[&[u8]]) -> Torrent {
        Torrent {
            announce: "http://tracker.invalid/announce".to_string(),
            name: "test.bin".to_string(),
            piece_length,
            total_length,
            pieces: piece_data
                .iter()
                .map(|data| Sha1::digest(data).into())
                .collect(),
            info_hash: [0x42; 20],
        }
    }

    fn piece_frame(index: u32, begin: u32, block: &[u8]) -> Vec<u8> {
        Message::Piece {
            index,
            begin,
            block: block.to_vec(),
        }
        .encode()
    }

    fn request_frame(index: u32, begin: u32, length: u32) -> Vec<u8> {
        Message::Request {
            index,
            begin,
            length,
        }
        .encode()
    }

    #[test]
    fn assembly_splits_a_piece_into_fixed_blocks() {
        let assembly = PieceAssembly::new(0, [0; 20], PIECE_BLOCK_SIZE + 100);
        assert_eq!(
            assembly.outstanding.iter().copied().collect::<Vec<_>>(),
            vec![0, PIECE_BLOCK_SIZE]
        );
        assert_eq!(assembly.block_length(0), PIECE_BLOCK_SIZE);
        assert_eq!(assembly.block_length(PIECE_BLOCK_SIZE), 100);
    }

    #[test]
    fn assembly_verifies_against_the_expected_digest() {
        let data = b"hello world";
        let expected: [u8; 20] = Sha1::digest(data).into();

        let mut good = PieceAssembly::new(0, expected, data.len());
        good.accept(0, data);
        assert!(good.is_complete());
        assert_eq!(good.verify(), Some(data.to_vec()));

        let mut bad = PieceAssembly::new(0, expected, data.len());
        let mut corrupted = data.to_vec();
        corrupted[3] ^= 0x01;
        bad.accept(0, &corrupted);
        assert_eq!(bad.verify(), None);
    }

    #[tokio::test]
    async fn downloads_and_verifies_two_pieces_in_order() {
        // Two pieces: one full 16 KiB piece, one truncated 100-byte piece.
        let block0: Vec<u8> = (0..PIECE_BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
        let block1 = vec![0xCD; 100];
        let torrent = test_torrent(
            PIECE_BLOCK_SIZE as u32,
            (PIECE_BLOCK_SIZE + 100) as u64,
            &[&block0, &block1],
        );

        let transport = tokio_test::io::Builder::new()
            .read(&Message::Bitfield(Bitfield::new(vec![0xC0])).encode())
            .write(&Message::Interested.encode())
            .read(&Message::Unchoke.encode())
            .write(&request_frame(0, 0, PIECE_BLOCK_SIZE as u32))
            // A keep-alive and a Have interleaved before the answer: both
            // must be consumed without disturbing the request cycle.
            .read(&[0, 0, 0, 0])
            .read(&Message::Have { piece_index: 5 }.encode())
            .read(&piece_frame(0, 0, &block0))
            .write(&request_frame(1, 0, 100))
            .read(&piece_frame(1, 0, &block1))
            .build();

        let mut sink = VecSink::default();
        let downloader =
            PieceDownloader::new(PeerConnection::new(transport), &torrent, &mut sink);
        downloader.run().await.unwrap();

        assert_eq!(sink.pieces.len(), 2);
        assert_eq!(sink.pieces[0], (0, block0));
        assert_eq!(sink.pieces[1], (1, block1));
    }

    #[tokio::test]
    async fn corrupted_block_fails_verification_and_emits_nothing() {
        let data = vec![0xAB; 100];
        let torrent = test_torrent(16384, 100, &[&data]);

        let mut corrupted = data.clone();
        corrupted[50] ^= 0x01;

        let transport = tokio_test::io::Builder::new()
            .read(&Message::Bitfield(Bitfield::new(vec![0x80])).encode())
            .write(&Message::Interested.encode())
            .read(&Message::Unchoke.encode())
            .write(&request_frame(0, 0, 100))
            .read(&piece_frame(0, 0, &corrupted))
            .build();

        let mut sink = VecSink::default();
        let downloader =
            PieceDownloader::new(PeerConnection::new(transport), &torrent, &mut sink);
        let result = downloader.run().await;

        assert_matches!(result, Err(PeerError::Integrity { piece: 0 }));
        assert!(sink.pieces.is_empty());
    }

    #[tokio::test]
    async fn first_message_must_be_a_bitfield() {
        let torrent = test_torrent(16384, 100, &[&[0u8; 100]]);

        let transport = tokio_test::io::Builder::new()
            .read(&Message::Unchoke.encode())
            .build();

        let mut sink = VecSink::default();
        let downloader =
            PieceDownloader::new(PeerConnection::new(transport), &torrent, &mut sink);
        let result = downloader.run().await;

        assert_matches!(result, Err(PeerError::Protocol(_)));
        assert!(sink.pieces.is_empty());
    }

    #[tokio::test]
    async fn mismatched_block_offset_is_a_protocol_error() {
        let data = vec![0xEF; 100];
        let torrent = test_torrent(16384, 100, &[&data]);

        let transport = tokio_test::io::Builder::new()
            .read(&Message::Bitfield(Bitfield::new(vec![0x80])).encode())
            .write(&Message::Interested.encode())
            .read(&Message::Unchoke.encode())
            .write(&request_frame(0, 0, 100))
            .read(&piece_frame(0, 64, &data[64..]))
            .build();

        let mut sink = VecSink::default();
        let downloader =
            PieceDownloader::new(PeerConnection::new(transport), &torrent, &mut sink);
        let result = downloader.run().await;

        assert_matches!(result, Err(PeerError::Protocol(_)));
        assert!(sink.pieces.is_empty());
    }

    struct FailingSink;

    impl PieceSink for FailingSink {
        async fn put(&mut self, _index: u32, _data: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
    }

    #[tokio::test]
    async fn sink_failure_is_reported_as_a_sink_error() {
        let data = vec![0x11; 100];
        let torrent = test_torrent(16384, 100, &[&data]);

        let transport = tokio_test::io::Builder::new()
            .read(&Message::Bitfield(Bitfield::new(vec![0x80])).encode())
            .write(&Message::Interested.encode())
            .read(&Message::Unchoke.encode())
            .write(&request_frame(0, 0, 100))
            .read(&piece_frame(0, 0, &data))
            .build();

        let mut sink = FailingSink;
        let downloader =
            PieceDownloader::new(PeerConnection::new(transport), &torrent, &mut sink);
        let result = downloader.run().await;

        assert_matches!(result, Err(PeerError::Sink(_)));
    }

    #[tokio::test]
    async fn connection_close_mid_session_is_fatal() {
        let data = vec![0x55; 100];
        let torrent = test_torrent(16384, 100, &[&data]);

        let transport = tokio_test::io::Builder::new()
            .read(&Message::Bitfield(Bitfield::new(vec![0x80])).encode())
            .write(&Message::Interested.encode())
            .read(&Message::Unchoke.encode())
            .write(&request_frame(0, 0, 100))
            // Transport ends here: the length-prefix read sees EOF.
            .build();

        let mut sink = VecSink::default();
        let downloader =
            PieceDownloader::new(PeerConnection::new(transport), &torrent, &mut sink);
        let result = downloader.run().await;

        assert_matches!(result, Err(PeerError::Connection(_)));
    }
}
