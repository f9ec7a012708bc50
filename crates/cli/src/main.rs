use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bpmndt_engine::{activity_links, graph_from_document, load_workflow_document, plan_test_cases, resolve};
use bpmndt_util::{ExecutionDataStore, RunDigest, TelemetryListener, TelemetrySettings};
use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};

const DEFAULT_LISTENER_HOST: &str = "127.0.0.1";
const DEFAULT_LISTENER_PORT: u16 = 8001;

/// Resolve, plan and observe path-driven workflow tests.
#[derive(Parser, Debug)]
#[command(name = "bpmndt", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the path between two flow nodes of a workflow document
    Resolve {
        /// Path to the workflow document (YAML, or JSON by extension)
        #[arg(long, short)]
        file: PathBuf,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        /// Print one line per activity with its neighbours instead of JSON
        #[arg(long)]
        links: bool,
    },
    /// Resolve every test case declared in a workflow document
    Plan {
        #[arg(long, short)]
        file: PathBuf,
    },
    /// Collect run telemetry and print one digest per run
    Listen {
        /// Defaults to the configured listener host
        #[arg(long)]
        host: Option<String>,
        /// Defaults to the configured listener port
        #[arg(long)]
        port: Option<u16>,
        /// Stop after this many runs
        #[arg(long)]
        max_runs: Option<usize>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    match Cli::parse().command {
        Command::Resolve { file, start, end, links } => run_resolve(file, &start, &end, links),
        Command::Plan { file } => run_plan(file),
        Command::Listen { host, port, max_runs } => run_listen(host, port, max_runs),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_resolve(file: PathBuf, start: &str, end: &str, links: bool) -> Result<()> {
    let document = load_workflow_document(&file)?;
    let graph = graph_from_document(&document)?;
    let path = resolve(&graph, start, end);

    if let Some(error) = path.error() {
        bail!("cannot resolve {start} -> {end} in {}: {error}", file.display());
    }

    if links {
        for link in activity_links(path.activities().unwrap_or_default()) {
            println!(
                "{}{} (prev: {}, next: {})",
                "  ".repeat(link.depth),
                link.id,
                link.prev.unwrap_or("-"),
                link.next.unwrap_or("-")
            );
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&path)?);
    }
    Ok(())
}

fn run_plan(file: PathBuf) -> Result<()> {
    let document = load_workflow_document(&file)?;
    let graph = graph_from_document(&document)?;
    let plans = plan_test_cases(&graph, &document.test_cases);

    for plan in plans.iter().filter(|plan| !plan.is_runnable()) {
        if let Some(error) = plan.path.error() {
            warn!(target_name = %plan.target_name, error = %error, "test case cannot be run");
        }
    }
    println!("{}", serde_json::to_string_pretty(&plans)?);
    Ok(())
}

fn run_listen(host: Option<String>, port: Option<u16>, max_runs: Option<usize>) -> Result<()> {
    let settings = TelemetrySettings::load()?;
    let host = host
        .or(settings.listener_host)
        .unwrap_or_else(|| DEFAULT_LISTENER_HOST.to_string());
    let port = port.or(settings.listener_port).unwrap_or(DEFAULT_LISTENER_PORT);

    let listener =
        TelemetryListener::bind((host.as_str(), port)).with_context(|| format!("failed to bind telemetry listener on {host}:{port}"))?;
    info!(address = %listener.local_addr()?, "listening for telemetry");

    let mut store = ExecutionDataStore::new();
    let handled = listener.serve(max_runs, |stream| {
        let records = match stream.decode() {
            Ok(records) => records,
            Err(error) => {
                warn!(peer = %stream.peer, error = %error, "discarding undecodable telemetry");
                return;
            }
        };
        match RunDigest::from_records(&records) {
            Ok(digest) => {
                match serde_json::to_string(&digest) {
                    Ok(line) => println!("{line}"),
                    Err(error) => warn!(error = %error, "failed to render run digest"),
                }
                if store.add(digest) {
                    info!(session = ?store.session_epoch_ms(), "telemetry session started");
                }
            }
            Err(error) => warn!(peer = %stream.peer, error = %error, "discarding malformed run"),
        }
    })?;

    for (case_id, activities) in store.coverage() {
        info!(case_id = %case_id, covered = activities.len(), "coverage");
    }
    info!(runs = handled, "telemetry listener stopped");
    Ok(())
}
