// CLASSIFICATION: COMMUNITY
// Filename: flatfsd.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-08-26

//! Daemon entry point: parse the CLI, build the context, serve.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use flatfs::{LockPolicy, ServerContext, Supervisor};

/// Flat-namespace in-memory file service over a unix domain socket.
///
/// Listens until SIGINT or SIGTERM, then drains active clients and
/// writes one `name inumber` line per live entry to the snapshot file.
#[derive(Debug, Parser)]
#[command(name = "flatfsd", version)]
struct Opts {
    /// Unix socket path to listen on.
    socket: PathBuf,

    /// Snapshot file written at shutdown.
    snapshot: PathBuf,

    /// Number of namespace partitions (at least one).
    partitions: usize,

    /// Partition locking strategy.
    #[arg(long, default_value = "rwlock")]
    lock_policy: LockPolicy,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    anyhow::ensure!(opts.partitions >= 1, "at least one partition is required");

    let ctx = Arc::new(ServerContext::new(opts.partitions, opts.lock_policy));
    let supervisor = Supervisor::new(ctx, opts.socket, opts.snapshot);
    supervisor.run().context("flatfsd terminated abnormally")?;
    Ok(())
}
