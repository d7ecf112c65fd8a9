use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use metrics::counter;
use tokio::signal;
use tracing::{info, warn};
use vtshard_controller::{shard_labels, ControllerConfig, ShardReconciler};
use vtshard_core::VitessShard;
use vtshard_kubehub::{KubeStore, MemoryStore, ObjectStore};
use vtshard_tablet::{pod_name, tablet_specs};
use vtshard_topo::StaticTopo;

#[derive(Parser, Debug)]
#[command(name = "vtshardctl", version, about = "Compile and reconcile a shard's tablets")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the tablets a shard compiles to
    Plan {
        /// Shard manifest (YAML)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Run a reconciliation pass and print the resulting status
    Reconcile {
        /// Shard manifest (YAML)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Shard records snapshot (YAML list of keyspace/shard/primaryAlias)
        #[arg(long = "topo-file")]
        topo_file: Option<PathBuf>,
        /// Reconcile against an in-memory store instead of the cluster
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
        /// Keep reconciling until Ctrl-C
        #[arg(long = "loop", action = ArgAction::SetTrue)]
        repeat: bool,
        /// Delay between passes when a pass asks for no earlier recheck
        #[arg(long = "interval-secs", default_value_t = 30)]
        interval_secs: u64,
        /// Pass deadline; the primary lookup gets at most a quarter of it
        #[arg(long = "reconcile-timeout-secs", env = "VTSHARD_RECONCILE_TIMEOUT_SECS")]
        reconcile_timeout_secs: Option<u64>,
        /// Upper bound for one topology lookup
        #[arg(long = "topo-timeout-ms", env = "VTSHARD_TOPO_TIMEOUT_MS")]
        topo_timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { file } => {
            let shard = load_shard(&file)?;
            plan(&shard, cli.output)?;
        }
        Commands::Reconcile { file, topo_file, dry_run, repeat, interval_secs, reconcile_timeout_secs, topo_timeout_ms } => {
            let shard = load_shard(&file)?;
            let topo = match &topo_file {
                Some(path) => {
                    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
                    StaticTopo::from_yaml(&raw).with_context(|| format!("parsing {}", path.display()))?
                }
                None => StaticTopo::new(),
            };
            let mut config = ControllerConfig::from_env();
            if let Some(s) = reconcile_timeout_secs {
                config.reconcile_timeout = Duration::from_secs(s);
            }
            if let Some(ms) = topo_timeout_ms {
                config.topo_timeout = Duration::from_millis(ms);
            }
            let run = RunOpts { repeat, interval: Duration::from_secs(interval_secs), output: cli.output };
            info!(file = %file.display(), dry_run, repeat, "reconcile invoked");
            if dry_run {
                run_passes(ShardReconciler::new(MemoryStore::new(), topo, config), shard, run).await?;
            } else {
                let store = KubeStore::try_default().await.context("connecting to the cluster")?;
                run_passes(ShardReconciler::new(store, topo, config), shard, run).await?;
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    let env = std::env::var("VTSHARD_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VTSHARD_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid VTSHARD_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_shard(path: &Path) -> Result<VitessShard> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing shard manifest {}", path.display()))
}

fn plan(shard: &VitessShard, output: Output) -> Result<()> {
    let tablets = tablet_specs(shard, &shard_labels(shard));
    match output {
        Output::Human => {
            println!("{:<22} {:<16} {:>5}  {:<44} {}", "ALIAS", "TYPE", "INDEX", "NAME", "CLAIM");
            for t in &tablets {
                let claim = if t.data_volume_pvc_spec.is_some() { "yes" } else { "-" };
                println!(
                    "{:<22} {:<16} {:>5}  {:<44} {}",
                    t.alias_str,
                    t.pool_type.as_str(),
                    t.index,
                    pod_name(shard.cluster_name(), &t.alias),
                    claim
                );
            }
        }
        Output::Json => {
            let items: Vec<_> = tablets
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "alias": t.alias_str,
                        "type": t.pool_type.as_str(),
                        "index": t.index,
                        "name": pod_name(shard.cluster_name(), &t.alias),
                        "zone": t.zone,
                        "labels": t.labels,
                        "annotations": t.annotations,
                        "extraFlags": t.extra_flags,
                        "dataVolume": t.data_volume_pvc_spec.is_some(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
    }
    Ok(())
}

struct RunOpts {
    repeat: bool,
    interval: Duration,
    output: Output,
}

async fn run_passes<S: ObjectStore>(r: ShardReconciler<S, StaticTopo>, mut shard: VitessShard, opts: RunOpts) -> Result<()> {
    loop {
        let result = r.reconcile(&mut shard).await;
        counter!("vtshardctl_passes_total", 1u64, "ok" => if result.is_ok() { "true" } else { "false" });
        print_status(&shard, opts.output)?;
        if let Some(e) = &result.error {
            warn!(error = %e, "pass finished with errors");
            if !opts.repeat {
                return Err(anyhow::anyhow!("reconcile failed: {}", e));
            }
        }
        if !opts.repeat {
            return Ok(());
        }
        let wait = result.requeue_after.map(|d| d.min(opts.interval)).unwrap_or(opts.interval);
        info!(wait_ms = wait.as_millis() as u64, "next pass scheduled");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = signal::ctrl_c() => {
                info!("Ctrl-C received; stopping reconcile loop");
                return Ok(());
            }
        }
    }
}

fn print_status(shard: &VitessShard, output: Output) -> Result<()> {
    let st = &shard.status;
    match output {
        Output::Human => {
            println!("cells: {}", st.cells.join(","));
            println!("lowest pod generation: {}", st.lowest_pod_generation);
            println!("{:<22} {:<16} {:>5}  {:<8} {:<8} {:<9} {:<8} {}", "ALIAS", "TYPE", "INDEX", "RUNNING", "READY", "AVAILABLE", "BOUND", "PENDING");
            for (alias, t) in &st.tablets {
                println!(
                    "{:<22} {:<16} {:>5}  {:<8} {:<8} {:<9} {:<8} {}",
                    alias,
                    t.pool_type.as_str(),
                    t.index,
                    format!("{:?}", t.running),
                    format!("{:?}", t.ready),
                    format!("{:?}", t.available),
                    format!("{:?}", t.data_volume_bound),
                    if t.pending_changes.is_empty() { "-" } else { t.pending_changes.as_str() },
                );
                if let Some(err) = &t.last_error {
                    println!("  error: {}", err);
                }
            }
            for (alias, o) in &st.orphaned_tablets {
                println!("orphan {:<22} {:<16} {}", alias, o.reason, o.message);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(st)?),
    }
    Ok(())
}
