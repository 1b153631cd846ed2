//! The tracker binary: a thin entry point around `localsync::tracker::run`,
//! generalizing `bittorrent/src/main.rs`'s shape (init logging, build
//! config, construct and run, report errors via `tracing::error!`).

use clap::Parser;

use localsync::config::TrackerConfig;

/// Takes no arguments (spec §6); still wired through clap so `--help`/`-V`
/// work for free.
#[derive(Parser, Debug)]
#[command(name = "localsync-tracker", about = "LocalSync tracker: the authoritative index of a LAN directory sync")]
struct Args;

#[tokio::main]
async fn main() {
    ignore_sigpipe();

    let format = tracing_subscriber::fmt::format();
    let sub = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .event_format(format)
        .finish();
    tracing::subscriber::set_global_default(sub).unwrap();

    Args::parse();
    let config = TrackerConfig::default();

    if let Err(e) = localsync::tracker::run(config).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
