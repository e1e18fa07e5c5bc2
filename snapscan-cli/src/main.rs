use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapscan_provider::{
    Asset, AssetInfo, DiscoverScope, ExternalProvider, GrpcProviderClient, Provider,
    ReconcileTimings, ScanJobConfig, Tag,
};
use tabled::{Table, Tabled};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod driver;

use driver::{Progress, RetryPolicy, drive, step_once};

#[derive(Parser)]
#[command(name = "snapscan")]
#[command(about = "Drive a snapscan provider plugin", long_about = None)]
struct Cli {
    /// Provider plugin gRPC address
    #[arg(short, long, default_value = "http://[::1]:24230")]
    endpoint: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "60")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List scannable assets
    Discover {
        /// Only assets in this location (repeatable)
        #[arg(short, long)]
        location: Vec<String>,

        /// Only assets carrying this tag, as key=value (repeatable)
        #[arg(long, value_parser = parse_tag)]
        include_tag: Vec<Tag>,

        /// Skip assets carrying this tag, as key=value (repeatable)
        #[arg(long, value_parser = parse_tag)]
        exclude_tag: Vec<Tag>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Provision scan infrastructure for a scan job
    RunScan {
        /// Scan job config (JSON)
        config: PathBuf,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Tear down scan infrastructure for a scan job
    RemoveScan {
        /// Scan job config (JSON)
        config: PathBuf,

        #[command(flatten)]
        wait: WaitArgs,
    },
}

#[derive(clap::Args)]
struct WaitArgs {
    /// Keep calling until done instead of making one call
    #[arg(short, long)]
    wait: bool,

    /// Calls before giving up (with --wait)
    #[arg(long, default_value = "60")]
    max_attempts: u32,

    /// Longest single wait in seconds (with --wait)
    #[arg(long, default_value = "300")]
    max_delay: u64,
}

impl WaitArgs {
    /// `None` means a single call.
    fn policy(&self) -> Option<RetryPolicy> {
        self.wait.then(|| RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            max_delay: Duration::from_secs(self.max_delay),
        })
    }
}

/// Make one call or keep calling per `wait`. A single call that is still
/// pending is not a failure.
async fn reconcile<F, Fut>(what: &str, wait: &WaitArgs, step: F) -> Result<Progress>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = snapscan_provider::Result<()>>,
{
    match wait.policy() {
        Some(policy) => {
            drive(what, policy, step).await?;
            Ok(Progress::Done)
        }
        None => step_once(what, step).await,
    }
}

fn parse_tag(s: &str) -> Result<Tag, String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err("tag key must not be empty".to_string());
    }
    Ok(Tag::new(key, value))
}

#[derive(Tabled)]
struct AssetRow {
    #[tabled(rename = "TYPE")]
    kind: &'static str,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "LOCATION")]
    location: String,
    #[tabled(rename = "DETAILS")]
    details: String,
    #[tabled(rename = "LAUNCHED")]
    launched: String,
}

impl From<&Asset> for AssetRow {
    fn from(asset: &Asset) -> Self {
        let dash = || "-".to_string();
        match &asset.asset_info {
            Some(AssetInfo::Vm(vm)) => Self {
                kind: "VMInfo",
                id: vm.instance_id.clone(),
                location: vm.location.clone(),
                details: format!("{} {}", vm.instance_type, vm.platform),
                launched: vm.launch_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            },
            Some(AssetInfo::Dir(dir)) => Self {
                kind: "DirInfo",
                id: dir.dir_name.clone().unwrap_or_else(dash),
                location: dir.location.clone().unwrap_or_else(dash),
                details: dash(),
                launched: dash(),
            },
            Some(AssetInfo::Pod(pod)) => Self {
                kind: "PodInfo",
                id: pod.pod_name.clone().unwrap_or_else(dash),
                location: pod.location.clone().unwrap_or_else(dash),
                details: dash(),
                launched: dash(),
            },
            None => Self {
                kind: "unknown",
                id: asset.id.clone().unwrap_or_else(dash),
                location: dash(),
                details: dash(),
                launched: dash(),
            },
        }
    }
}

async fn load_scan_job(path: &Path) -> Result<ScanJobConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading scan job config {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing scan job config {}", path.display()))
}

async fn run(cli: Cli) -> Result<()> {
    let timeout = Duration::from_secs(cli.timeout);
    let client = GrpcProviderClient::connect_lazy(cli.endpoint.clone(), timeout)?;
    let timings = ReconcileTimings {
        request_timeout: timeout,
        ..Default::default()
    };
    let provider = ExternalProvider::new(client, timings);
    debug!(endpoint = %cli.endpoint, kind = %provider.kind(), "Using provider");

    match cli.command {
        Commands::Discover {
            location,
            include_tag,
            exclude_tag,
            json,
        } => {
            let scope = DiscoverScope {
                locations: location,
                include_tags: include_tag,
                exclude_tags: exclude_tag,
            };
            let assets = provider.discover_assets(&scope).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&assets)?);
            } else if assets.is_empty() {
                println!("No assets found");
            } else {
                let rows: Vec<AssetRow> = assets.iter().map(AssetRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
        Commands::RunScan { config, wait } => {
            let config = load_scan_job(&config).await?;
            info!(asset_scan_id = %config.asset_scan_id(), "Provisioning scan infrastructure");
            let progress = reconcile("scan infrastructure setup", &wait, || {
                provider.ensure_scan_infrastructure(&config)
            })
            .await?;
            match progress {
                Progress::Done => {
                    println!("Scan infrastructure ready for {}", config.asset_scan_id())
                }
                Progress::Pending(after) => println!("not done yet, retry in {:?}", after),
            }
        }
        Commands::RemoveScan { config, wait } => {
            let config = load_scan_job(&config).await?;
            info!(asset_scan_id = %config.asset_scan_id(), "Removing scan infrastructure");
            let progress = reconcile("scan infrastructure teardown", &wait, || {
                provider.ensure_scan_infrastructure_deleted(&config)
            })
            .await?;
            match progress {
                Progress::Done => {
                    println!("Scan infrastructure removed for {}", config.asset_scan_id())
                }
                Progress::Pending(after) => println!("not done yet, retry in {:?}", after),
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("snapscan=info".parse()?)
                .add_directive("snapscan_provider=info".parse()?)
                .add_directive("tonic=warn".parse()?)
                .add_directive("tower=warn".parse()?)
                .add_directive("hyper=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; remote operations already started keep running");
            std::process::exit(130);
        }
    }
}
