//! wsfs binary: mount a filesystem whose backend is a WebSocket peer.
//!
//! ```bash
//! wsfs /mnt/ws                          # listen on 127.0.0.1:9000
//! wsfs /mnt/ws --listen 0.0.0.0:9000    # accept a remote peer
//! RUST_LOG=debug wsfs /mnt/ws           # trace every operation
//! ```
//!
//! The process stays in the foreground until the mount is torn down.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wsfs_bridge::{run_receive_loop, Correlator};
use wsfs_channel::server;
use wsfs_fuse::{MountConfig, WsFilesystem};

#[derive(Parser, Debug)]
#[command(name = "wsfs", about = "Mount a filesystem served by a WebSocket peer")]
struct Cli {
    /// Directory to mount on.
    mount_point: PathBuf,

    /// Address to listen on for the backend peer.
    #[arg(long, default_value = "127.0.0.1:9000")]
    listen: SocketAddr,

    /// Per-operation timeout in seconds.
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Allow other users to access the mount.
    #[arg(long)]
    allow_other: bool,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    let (channel, endpoint) = wsfs_channel::channel();
    let channel = Arc::new(channel);
    let correlator = Arc::new(Correlator::new(
        Arc::clone(&channel),
        Duration::from_secs(cli.timeout),
    ));

    let listener = runtime
        .block_on(tokio::net::TcpListener::bind(cli.listen))
        .with_context(|| format!("binding {}", cli.listen))?;

    runtime.spawn(async move {
        if let Err(e) = server::serve(listener, endpoint).await {
            error!(error = %e, "peer server exited");
        }
    });
    runtime.spawn(run_receive_loop(
        Arc::clone(&channel),
        Arc::clone(&correlator),
    ));

    info!(listen = %cli.listen, "waiting for backend peer");
    runtime
        .block_on(channel.wait_ready())
        .context("waiting for the backend peer")?;
    info!(mount_point = %cli.mount_point.display(), "peer connected; mounting");

    let filesystem = WsFilesystem::new(correlator, runtime.handle().clone());
    let config = MountConfig { allow_other: cli.allow_other };
    wsfs_fuse::mount(filesystem, &cli.mount_point, &config).context("mount failed")?;

    info!("unmounted; exiting");
    Ok(())
}
