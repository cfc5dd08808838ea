use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use printwatch_core::{
    load_devices, require_secret, CacheConfig, ConnectivityDiagnostic, Device, FallbackProber,
    PollerConfig, ProberConfig, SnmpSettings, SnmpVersion, SweepConfig, TcpReachability,
    UdpSnmpClient,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod agent;
mod check;
mod cloud;
mod viewer;
#[cfg(test)]
mod agent_tests;

#[derive(Debug, Parser)]
#[command(name = "printwatchd")]
#[command(about = "Printer fleet status: field agent and cloud service")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Overrides RUST_LOG, e.g. "debug" or "printwatch_core=trace".
    #[arg(long, global = true, env = "PRINTWATCH_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the fleet on an interval and push snapshots to the cloud.
    Agent(AgentArgs),
    /// Run the cloud ingest and status API.
    Serve(ServeArgs),
    /// Poll the fleet once and print the snapshot.
    Once {
        #[arg(long, env = "PRINTWATCH_TARGETS")]
        targets: PathBuf,
        #[command(flatten)]
        snmp: SnmpArgs,
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// TCP reachability sweep over a device registry.
    Sweep {
        #[arg(long, env = "PRINTWATCH_REGISTRY")]
        registry: PathBuf,
        #[arg(long, env = "PRINTWATCH_SWEEP_TIMEOUT_MS", default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Explain why one device does or does not answer SNMP.
    Diagnose {
        #[arg(long)]
        ip: String,
        #[command(flatten)]
        snmp: SnmpArgs,
        #[arg(long, env = "PRINTWATCH_CLOUD_HOSTED", default_value_t = false)]
        cloud_hosted: bool,
    },
    /// Check the cloud endpoint, the shared secret and a few devices.
    Check {
        #[arg(long, env = "PRINTWATCH_CLOUD_URL")]
        cloud_url: String,
        #[arg(long, env = "PRINTWATCH_SECRET", hide_env_values = true)]
        secret: Option<String>,
        #[command(flatten)]
        snmp: SnmpArgs,
    },
    /// Live terminal view of the fleet.
    View {
        #[arg(long, env = "PRINTWATCH_TARGETS")]
        targets: PathBuf,
        #[command(flatten)]
        snmp: SnmpArgs,
        #[arg(long, env = "PRINTWATCH_INTERVAL_SECS", default_value_t = 30)]
        interval_secs: u64,
        #[arg(long, default_value_t = 1800.0)]
        window_sec: f64,
    },
}

#[derive(Debug, Args)]
struct AgentArgs {
    /// Device registry file. Fetched from the cloud every cycle when omitted.
    #[arg(long, env = "PRINTWATCH_TARGETS")]
    targets: Option<PathBuf>,
    #[arg(long, env = "PRINTWATCH_INTERVAL_SECS", default_value_t = 30)]
    interval_secs: u64,
    #[arg(long, env = "PRINTWATCH_MAX_CONCURRENCY", default_value_t = 16)]
    max_concurrency: usize,
    #[command(flatten)]
    snmp: SnmpArgs,
    #[arg(long, env = "PRINTWATCH_CLOUD_URL")]
    cloud_url: String,
    #[arg(long, env = "PRINTWATCH_SECRET", hide_env_values = true)]
    secret: Option<String>,
    #[arg(long, env = "PRINTWATCH_LOCAL_PORT", default_value_t = 3001)]
    local_port: u16,
    #[arg(long, env = "PRINTWATCH_LOCATION", default_value = "local-network")]
    location: String,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, env = "PRINTWATCH_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
    #[arg(long, env = "PRINTWATCH_SECRET", hide_env_values = true)]
    secret: Option<String>,
    #[arg(long, env = "PRINTWATCH_TTL_SECS", default_value_t = 300)]
    ttl_secs: u64,
    #[arg(long, env = "PRINTWATCH_REGISTRY")]
    registry: PathBuf,
    #[arg(long, env = "PRINTWATCH_PROBE_CEILING_SECS", default_value_t = 15)]
    probe_ceiling_secs: u64,
    #[command(flatten)]
    snmp: SnmpArgs,
    #[arg(long, env = "PRINTWATCH_SWEEP_TIMEOUT_MS", default_value_t = 1000)]
    sweep_timeout_ms: u64,
    #[arg(long, env = "PRINTWATCH_CLOUD_HOSTED", default_value_t = true, action = clap::ArgAction::Set)]
    cloud_hosted: bool,
}

#[derive(Debug, Args)]
struct SnmpArgs {
    #[arg(long, env = "PRINTWATCH_COMMUNITY")]
    community: Option<String>,
    #[arg(long, env = "PRINTWATCH_SNMP_VERSION", value_enum)]
    snmp_version: Option<VersionArg>,
    #[arg(long, env = "PRINTWATCH_SNMP_PORT")]
    snmp_port: Option<u16>,
    #[arg(long, env = "PRINTWATCH_SNMP_TIMEOUT_MS")]
    snmp_timeout_ms: Option<u64>,
    #[arg(long, env = "PRINTWATCH_SNMP_RETRIES")]
    snmp_retries: Option<u32>,
}

impl SnmpArgs {
    /// Layers the flags that were given over a role's defaults.
    fn apply(&self, base: SnmpSettings) -> SnmpSettings {
        SnmpSettings {
            community: self.community.clone().unwrap_or(base.community),
            version: self.snmp_version.map(SnmpVersion::from).unwrap_or(base.version),
            port: self.snmp_port.unwrap_or(base.port),
            timeout: self
                .snmp_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.timeout),
            retries: self.snmp_retries.unwrap_or(base.retries),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VersionArg {
    V1,
    V2c,
}

impl From<VersionArg> for SnmpVersion {
    fn from(arg: VersionArg) -> Self {
        match arg {
            VersionArg::V1 => SnmpVersion::V1,
            VersionArg::V2c => SnmpVersion::V2c,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Command::Agent(args) => run_agent(args).await?,
        Command::Serve(args) => run_serve(args).await?,
        Command::Once {
            targets,
            snmp,
            format,
        } => {
            let devices = load_devices(&targets)?;
            let config = PollerConfig {
                snmp: snmp.apply(SnmpSettings::default()),
                ..PollerConfig::default()
            };
            config.validate()?;
            let mut poller = printwatch_core::Poller::new(UdpSnmpClient::new(config.snmp.clone()), config);
            let fleet = poller.poll_fleet(&devices).await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&fleet)?),
                OutputFormat::Human => print_fleet(&fleet),
            }
        }
        Command::Sweep {
            registry,
            timeout_ms,
        } => {
            let devices = load_devices(&registry)?;
            let config = SweepConfig {
                probe_timeout: Duration::from_millis(timeout_ms),
                ..SweepConfig::default()
            };
            let diagnostic = ConnectivityDiagnostic::new(Arc::new(TcpReachability::new(&config)), &config);
            let report = diagnostic.sweep(&devices).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Diagnose {
            ip,
            snmp,
            cloud_hosted,
        } => {
            let config = ProberConfig {
                snmp: snmp.apply(ProberConfig::default().snmp),
                cloud_hosted,
                ..ProberConfig::default()
            };
            let prober = build_prober(config, SweepConfig::default());
            let report = prober.diagnose(&ip).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Check {
            cloud_url,
            secret,
            snmp,
        } => {
            let secret = require_secret(secret.as_deref())?;
            let settings = snmp.apply(SnmpSettings {
                timeout: Duration::from_millis(3000),
                retries: 1,
                ..SnmpSettings::default()
            });
            check::run_check(&cloud_url, &secret, settings).await?;
        }
        Command::View {
            targets,
            snmp,
            interval_secs,
            window_sec,
        } => {
            let devices = load_devices(&targets)?;
            let config = PollerConfig {
                snmp: snmp.apply(SnmpSettings::default()),
                interval: Duration::from_secs(interval_secs),
                ..PollerConfig::default()
            };
            config.validate()?;
            let mut poller = printwatch_core::Poller::new(UdpSnmpClient::new(config.snmp.clone()), config);
            viewer::run_viewer(&mut poller, &devices, window_sec).await?;
        }
    }

    Ok(())
}

async fn run_agent(args: AgentArgs) -> Result<()> {
    let secret = require_secret(args.secret.as_deref())?;
    let config = PollerConfig {
        snmp: args.snmp.apply(SnmpSettings::default()),
        interval: Duration::from_secs(args.interval_secs),
        max_concurrency: args.max_concurrency,
        location: args.location.clone(),
    };
    config.validate()?;

    let uplink = printwatch_core::Uplink::new(&args.cloud_url, secret, Duration::from_secs(15))
        .context("cannot build the cloud client")?;
    let devices: Vec<Device> = match &args.targets {
        Some(path) => load_devices(path)?,
        None => {
            let devices = uplink
                .fetch_registry()
                .await
                .context("no --targets given and the cloud registry is unavailable")?;
            printwatch_core::validate_devices(&devices)?;
            devices
        }
    };

    info!(
        devices = devices.len(),
        interval_secs = args.interval_secs,
        cloud = %uplink.base_url(),
        local_port = args.local_port,
        "starting agent"
    );
    agent::run(agent::AgentSettings {
        devices,
        refresh_registry: args.targets.is_none(),
        poller: config,
        uplink,
        local_port: args.local_port,
    })
    .await
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let secret = require_secret(args.secret.as_deref())?;
    let registry = load_devices(&args.registry)?;
    let prober_config = ProberConfig {
        snmp: args.snmp.apply(ProberConfig::default().snmp),
        ceiling: Duration::from_secs(args.probe_ceiling_secs),
        cloud_hosted: args.cloud_hosted,
    };
    let sweep_config = SweepConfig {
        probe_timeout: Duration::from_millis(args.sweep_timeout_ms),
        ..SweepConfig::default()
    };
    let cache_config = CacheConfig {
        ttl: Duration::from_secs(args.ttl_secs),
    };

    let state = cloud::AppState::build(
        &secret,
        cache_config,
        registry,
        build_prober(prober_config, sweep_config.clone()),
        ConnectivityDiagnostic::new(Arc::new(TcpReachability::new(&sweep_config)), &sweep_config),
    );
    cloud::serve(args.bind, state).await
}

fn build_prober(config: ProberConfig, sweep: SweepConfig) -> FallbackProber {
    let connectivity = ConnectivityDiagnostic::new(Arc::new(TcpReachability::new(&sweep)), &sweep);
    FallbackProber::new(Arc::new(UdpSnmpClient::new(config.snmp.clone())), connectivity, config)
}

fn print_fleet(fleet: &printwatch_core::FleetSnapshot) {
    println!("=== Printer Fleet ===");
    println!("Time:       {}", fleet.timestamp.to_rfc3339());
    println!(
        "Devices:    total={} online={} with_issues={} critical={}",
        fleet.total,
        fleet.online_count(),
        fleet.with_issues,
        fleet.critical_count()
    );
    for printer in &fleet.printers {
        let toner = printer
            .toner_level
            .map(|t| format!("{t}%"))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "  {:<16} {:<15} {:<9} toner={:<5} state={}",
            printer.sigla, printer.ip, printer.status, toner, printer.error_state
        );
        for detail in &printer.error_details {
            println!("      [{:?}] {}: {}", detail.severity, detail.error, detail.action);
        }
    }
}
