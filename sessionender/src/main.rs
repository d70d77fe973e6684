use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cloudnode_lib::{
    idle::IdleWatcher,
    keepalive::{default_socket_dir, KeepAlive},
    teardown::SelfTeardown,
    who::WhoCommand,
};
use log::*;
use tokio::sync::mpsc;

#[derive(Parser)]
#[clap(author, version, about = "End this node's session once nobody is using it")]
struct Opts {
    #[clap(
        long,
        default_value_t = 60 * 15,
        value_parser = clap::value_parser!(u64).range(1..),
        value_name = "SECONDS",
        help = "Time in seconds before indicating idleness"
    )]
    delay: u64,
    #[clap(short = 'n', help = "log copiously and don't actually shut down")]
    dry_run: bool,
    #[clap(
        long,
        env = "SESSIONENDER_SOCKET_DIR",
        value_name = "DIR",
        help = "directory for the keep-alive socket [default: /tmp/ns.$USER.:0]"
    )]
    socket_dir: Option<PathBuf>,
}

fn user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    if opts.dry_run && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let threshold = Duration::from_secs(opts.delay);
    let terminator = SelfTeardown::new().context("can't reach the metadata server")?;
    let mut watcher = IdleWatcher::new(WhoCommand, terminator, threshold).dry_run(opts.dry_run);
    watcher.prime().await;

    let (tx, rx) = mpsc::unbounded_channel();
    let dir = opts.socket_dir.unwrap_or_else(|| default_socket_dir(&user()));
    match KeepAlive::bind(&dir) {
        Ok(keepalive) => {
            keepalive.spawn(tx);
        }
        // Without the socket we still end idle sessions, just with less notice.
        Err(e) => error!("can't set up keep-alive socket in {}: {}", dir.display(), e),
    }

    watcher.run(rx).await;
    Ok(())
}
