use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use heapscope_config::ProbeConfig;
use heapscope_runtime::{fixtures, Heap};
use heapscope_server::{hardening, probe_from_config, snapshot_probe, ProbeServer};
use heapscope_sweep::StaticSeeds;

/// Live object-graph inspector.
///
/// Hosts a small demo object graph and serves it to remote viewers, or
/// writes a static snapshot of it.
#[derive(Debug, Parser)]
#[command(name = "heapscope", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `HEAPSCOPE_CONFIG` is used as a fallback. When neither is
    /// provided the built-in defaults apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Serve the graph over TCP until interrupted.
    Serve {
        /// Override `server.host`.
        #[arg(long)]
        host: Option<String>,
        /// Override `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Write a self-contained HTML snapshot of everything reachable.
    Snapshot {
        /// Output file; stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    hardening::init(&config);

    let heap = Heap::new();
    let seeds = fixtures::demo_app(&heap).context("failed to build the demo object graph")?;

    match cli.command {
        Cmd::Serve { host, port } => {
            let mut server_config = config.server.clone();
            if let Some(host) = host {
                server_config.host = host;
            }
            if let Some(port) = port {
                server_config.port = port;
            }
            let probe = probe_from_config(heap, StaticSeeds(seeds), &config.sweep)
                .context("invalid sweep exclusion pattern")?;
            let server = ProbeServer::bind(&server_config.bind_addr(), Arc::new(probe)).await?;

            let shutdown = server.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.cancel();
                }
            });
            server.run().await?;
        }
        Cmd::Snapshot { output } => {
            let probe = snapshot_probe(
                heap,
                StaticSeeds(seeds.clone()),
                &config.sweep,
                &config.snapshot,
            )
            .context("invalid snapshot exclusion pattern")?;
            let document = heapscope_sweep::snapshot(Arc::new(probe), &seeds);
            match output {
                Some(path) => tokio::fs::write(&path, document)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => print!("{document}"),
            }
        }
    }
    Ok(())
}

fn load_config(cli_path: Option<&std::path::Path>) -> ProbeConfig {
    match ProbeConfig::discover(cli_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("heapscope: {err}; continuing with defaults");
            ProbeConfig::default()
        }
    }
}
