//! The peer binary: a thin entry point around `localsync::peer::run`,
//! mirroring `bin/tracker.rs`'s shape (init logging, build config,
//! construct and run, report errors via `tracing::error!`).

use clap::Parser;

use localsync::config::PeerConfig;

#[derive(Parser, Debug)]
#[command(name = "localsync-peer", about = "LocalSync peer: watches a directory and syncs it against a tracker")]
struct Args {
    /// Host (or IP) the tracker's handshake port is listening on.
    tracker_host: String,

    /// Local directory to watch and keep in sync; created if missing.
    watch_dir: std::path::PathBuf,

    /// Number of parallel byte-range streams to open per source peer
    /// when downloading a file, in [1, 50] (spec §6).
    streams: u8,
}

#[tokio::main]
async fn main() {
    ignore_sigpipe();

    let format = tracing_subscriber::fmt::format();
    let sub = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .event_format(format)
        .finish();
    tracing::subscriber::set_global_default(sub).unwrap();

    let args = Args::parse();
    let config = PeerConfig::new(args.tracker_host, args.watch_dir, args.streams);

    if let Err(e) = localsync::peer::run(config).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
