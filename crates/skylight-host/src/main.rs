//! Skylight render host binary.
//!
//! Launched by the control process with the endpoint names on the command
//! line. Serves one connection and exits when it ends.

use anyhow::Result;
use clap::Parser;
use skylight_host::{HostConfig, RenderHost};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for better memory efficiency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "skylight-host", about = "Skylight widget render host")]
struct Args {
    /// Control channel endpoint name
    #[arg(long = "named-pipe", default_value = "SkylightRenderPipe")]
    named_pipe: String,

    /// Bulk channel endpoint name
    #[arg(long = "shared-memory", default_value = "SkylightRenderSharedMemory")]
    shared_memory: String,

    /// Directory holding the endpoint sockets (defaults to the runtime dir)
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `skylight_host=debug`
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Interval between performance reports; 0 disables them
    #[arg(long, default_value_t = 1000)]
    metrics_interval_ms: u64,

    /// How long to wait for the control process to connect
    #[arg(long, default_value_t = 30_000)]
    accept_timeout_ms: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Skylight render host v{}", env!("CARGO_PKG_VERSION"));
    run(args)
}

#[cfg(unix)]
fn run(args: Args) -> Result<()> {
    use skylight_ipc::{EndpointNames, TransportListener, UnixEndpoints};

    let endpoints = match &args.socket_dir {
        Some(dir) => UnixEndpoints::new(dir),
        None => UnixEndpoints::runtime_dir(),
    };
    let names = EndpointNames::new(args.named_pipe, args.shared_memory);
    let config = HostConfig {
        metrics_interval_ms: args.metrics_interval_ms,
        ..HostConfig::default()
    };

    let listener = TransportListener::bind(&endpoints, &names, config.transport.clone())?;
    let host = RenderHost::new(config)?;

    let timeout = Duration::from_millis(args.accept_timeout_ms);
    if !host.accept(&listener, timeout)? {
        anyhow::bail!("no control process connected within {:?}", timeout);
    }

    if let Some(reason) = host.wait_for_disconnect(None) {
        info!("Control process disconnected: {}", reason);
    }
    let stats = host.stats();
    info!(
        "Executed {} command(s), {} panic(s), {} metrics report(s)",
        stats.commands_executed, stats.panics, stats.metrics_sent
    );
    host.shutdown();
    Ok(())
}

#[cfg(not(unix))]
fn run(_args: Args) -> Result<()> {
    anyhow::bail!("no endpoint implementation for this platform")
}
