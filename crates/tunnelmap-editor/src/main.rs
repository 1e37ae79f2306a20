//! TunnelMap editor: command-line entry point.
//!
//! Builds a tunnel graph from a topology description, shows the instances it
//! turns into grouped by master, and runs one submission cycle against the
//! masters' control APIs.
//!
//! # Usage
//!
//! ```text
//! tunnelmap --topology <PATH> [OPTIONS]
//!
//! Options:
//!   --config <PATH>           Editor configuration [default: platform config dir]
//!   --listen-master <ID>      Master watched for the handshake [default: first in plan]
//!   --expand <LABEL>          Load a container's existing instances first (repeatable)
//!   -y, --yes                 Do not ask for confirmation
//!   --dry-run                 Print the plan and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable              | Description                     |
//! |-----------------------|---------------------------------|
//! | `TUNNELMAP_CONFIG`    | Editor configuration file       |
//! | `TUNNELMAP_TOPOLOGY`  | Topology description file       |
//! | `RUST_LOG`            | `tracing` filter                |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tunnelmap_core::{GraphEvent, GraphStore, SubmissionState};
use tunnelmap_editor::application::build_topology::{build_topology, BuiltTopology};
use tunnelmap_editor::application::handshake::HandshakeOutcome;
use tunnelmap_editor::application::plan::enumerate_instances;
use tunnelmap_editor::application::submit::{SubmissionOrchestrator, SubmitError};
use tunnelmap_editor::infrastructure::control_api::{ControlApi, HttpControlApi};
use tunnelmap_editor::infrastructure::prompt::{render_plan, TerminalConfirmer};
use tunnelmap_editor::infrastructure::storage::config::load_config;
use tunnelmap_editor::infrastructure::storage::topology::load_topology;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Tunnel topology editor.
#[derive(Debug, Parser)]
#[command(
    name = "tunnelmap",
    about = "Builds a tunnel relay graph and submits it to remote control APIs",
    version
)]
struct Cli {
    /// Editor configuration file (masters, timeouts).
    #[arg(long, env = "TUNNELMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Topology description to build and submit.
    #[arg(long, env = "TUNNELMAP_TOPOLOGY")]
    topology: PathBuf,

    /// Master whose event stream is watched for the handshake.
    #[arg(long)]
    listen_master: Option<String>,

    /// Label of a container whose existing instances are loaded before planning.
    #[arg(long = "expand", value_name = "LABEL")]
    expand: Vec<String>,

    /// Accept the plan without prompting.
    #[arg(short, long)]
    yes: bool,

    /// Print the plan without creating anything.
    #[arg(long)]
    dry_run: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("failed to load editor configuration")?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.editor.log_level)),
        )
        .init();

    info!("TunnelMap editor starting");

    let description = load_topology(&cli.topology)
        .with_context(|| format!("failed to load topology {}", cli.topology.display()))?;
    let BuiltTopology {
        mut store,
        labels,
        rejected,
    } = build_topology(&description, config.master_configs()).context("failed to build topology")?;

    for link in &rejected {
        println!("rejected link {} -> {}: {}", link.from, link.to, link.reason);
    }
    report_graph_events(&mut store);

    let api: Arc<dyn ControlApi> = Arc::new(HttpControlApi::new().context("failed to create HTTP client")?);

    for label in &cli.expand {
        let container = labels
            .get(label)
            .with_context(|| format!("--expand: no node labelled '{label}'"))?;
        let master = store
            .container_master(container)
            .cloned()
            .with_context(|| format!("--expand: '{label}' has no configured master"))?;
        let records = api
            .list_instances(&master)
            .await
            .with_context(|| format!("failed to list instances of {}", master.id))?;
        let created = store.expand_master(
            container,
            records.iter().map(|r| (r.id.as_str(), r.url.as_str())),
        )?;
        println!("loaded {} existing instance(s) into {label}", created.len());
    }

    if cli.dry_run {
        let plan = enumerate_instances(&store);
        let listen = cli
            .listen_master
            .as_deref()
            .or_else(|| plan.master_ids().next())
            .unwrap_or_default();
        print!("{}", render_plan(&plan, listen));
        for (node, remote_id) in &plan.existing {
            println!("running {node}: instance {remote_id}");
        }
        for (node, reason) in &plan.excluded {
            println!("excluded {node}: {reason}");
        }
        return Ok(());
    }

    let mut orchestrator = SubmissionOrchestrator::new(
        Arc::clone(&api),
        Box::new(TerminalConfirmer::new(cli.yes)),
        config.editor.submit_settings(),
    );

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let shutdown = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let result = orchestrator
        .run_cycle(&mut store, cli.listen_master.as_deref())
        .await;
    print_statuses(&store);

    match result {
        Ok(report) => {
            match &report.handshake {
                HandshakeOutcome::Confirmed(h) => match &h.instance_id {
                    Some(id) => println!("handshake confirmed in {} ms (instance {id})", h.latency_ms),
                    None => println!("handshake confirmed in {} ms", h.latency_ms),
                },
                HandshakeOutcome::TimedOut => {
                    println!("no handshake observed before the deadline; instances may still come up")
                }
                HandshakeOutcome::Cancelled => println!("handshake listener cancelled"),
                HandshakeOutcome::Unavailable(reason) => println!("handshake listener unavailable: {reason}"),
            }
            info!(
                "cycle {} finished: {} created, {} failed",
                report.cycle_id,
                report.created.len(),
                report.failed.len()
            );
            Ok(())
        }
        Err(SubmitError::Declined) => {
            println!("nothing created");
            Ok(())
        }
        Err(e) => Err(e).context("submission failed"),
    }
}

/// Prints the address warnings the graph raised while it was built.
fn report_graph_events(store: &mut GraphStore) {
    for event in store.drain_events() {
        match event {
            GraphEvent::ClientAddressUnresolved { client, raw } => {
                warn!("client {client}: could not infer a reachable address from '{raw}'");
                println!("warning: set the tunnel address of {client} manually (got '{raw}')");
            }
            GraphEvent::ClientAddressResolved { client, address } => {
                info!("client {client} will dial {address}");
            }
            _ => {}
        }
    }
}

fn print_statuses(store: &GraphStore) {
    for node in store.nodes() {
        let status = &node.data.submission;
        let state = match status.state {
            SubmissionState::None => continue,
            SubmissionState::Pending => "pending",
            SubmissionState::Success => "ok",
            SubmissionState::Error => "error",
        };
        let message = status.message.as_deref().unwrap_or_default();
        println!("{state:>7}  {}  {message}", node.data.label);
    }
}
