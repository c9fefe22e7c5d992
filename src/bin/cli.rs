use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rs_leech::SessionConfig;
use rs_leech::Torrent;
use rs_leech::peer::connection::PeerConnection;
use rs_leech::peer::download::{FileSink, PieceDownloader};
use rs_leech::tracker::{self, TransferCounters};

/// Download a single torrent from one peer, sequentially.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the .torrent file.
    torrent: PathBuf,

    /// Destination file; defaults to the name declared in the metadata.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Port reported to the tracker.
    #[arg(short, long, default_value_t = 6881)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let torrent = Torrent::from_file(&args.torrent)?;
    info!(
        name = %torrent.name,
        pieces = torrent.pieces.len(),
        bytes = torrent.total_length,
        "loaded torrent"
    );

    let config = SessionConfig::with_generated_peer_id(args.port);
    let (_, peers) = tracker::announce(
        &torrent,
        &config,
        TransferCounters::starting(torrent.total_length),
    )
    .await?;
    if peers.is_empty() {
        return Err("tracker returned no peers".into());
    }

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(&torrent.name));

    // Sequential single-peer strategy: try candidates in tracker order and
    // run the whole download against the first one that completes a
    // handshake.
    for peer in &peers {
        let mut connection = match PeerConnection::connect(peer).await {
            Ok(connection) => connection,
            Err(error) => {
                warn!(%peer, %error, "could not connect");
                continue;
            }
        };
        if let Err(error) = connection
            .perform_handshake(torrent.info_hash, config.peer_id)
            .await
        {
            warn!(%peer, %error, "handshake failed");
            continue;
        }
        info!(%peer, "starting download");

        let mut sink = FileSink::create(&output).await?;
        PieceDownloader::new(connection, &torrent, &mut sink)
            .run()
            .await?;
        sink.sync().await?;

        info!(path = %output.display(), "download complete");
        return Ok(());
    }

    Err("no peer accepted a connection".into())
}
