use std::path::PathBuf;

use clap::Parser;

/// Command line arguments for the downloader.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Path to the metainfo (.torrent) file
    pub torrent: PathBuf,

    /// Print the parsed metainfo and exit without downloading
    #[arg(long)]
    pub parse: bool,

    /// Directory to materialize the downloaded files into
    #[arg(long, default_value = ".")]
    pub output: PathBuf,

    /// Port reported to trackers (this client does not accept incoming
    /// connections)
    #[arg(long, default_value_t = 6881)]
    pub port: u16,
}

impl Args {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
