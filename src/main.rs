use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use torrent::metainfo::Metainfo;
use torrent::session::Session;

pub mod bencode;
pub mod cli;
pub mod error;
pub mod torrent;
pub mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = cli::Args::parse();

    let bytes = std::fs::read(&args.torrent)
        .with_context(|| format!("failed to read {}", args.torrent.display()))?;
    let metainfo = Metainfo::from_bytes(&bytes)
        .with_context(|| format!("failed to parse {}", args.torrent.display()))?;

    if args.parse {
        print!("{}", metainfo);
        return Ok(());
    }

    let session = Session::new(args.port, args.output);
    let cancel = CancellationToken::new();

    // Ctrl-C takes the same shutdown path as completion.
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    session
        .download(&metainfo, cancel)
        .await
        .context("download failed")?;
    Ok(())
}
