use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pbx_net::discovery::SysfsDiscovery;
use pbx_net::exec::SystemExecutor;
use pbx_net::firewall::HookFirewall;
use pbx_net::lease::{DeconfigEvent, LeaseEvent};
use pbx_net::store::SqliteStore;
use pbx_net::{ModeSelection, NetworkEngine, Settings, integration};

/// Default database path.
const DB_PATH: &str = "/var/lib/pbx/net.db";

#[derive(Parser)]
#[command(name = "pbx-net")]
#[command(about = "LAN interface reconciliation for the PBX appliance")]
struct Args {
    /// SQLite database holding the interface records
    #[arg(long, global = true, default_value = DB_PATH)]
    db: PathBuf,

    /// How interfaces are configured on this host
    #[arg(long, global = true, value_enum, default_value_t = ModeSelection::Auto)]
    mode: ModeSelection,

    /// Write every configuration file below this directory
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Scratch directory for the pdnsd cache
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,

    /// Verbose logging and a single route flush attempt
    #[arg(long, global = true)]
    debug: bool,

    /// Script re-applying firewall rules after a reconciliation
    #[arg(long, global = true)]
    firewall_hook: Option<PathBuf>,

    /// Script adjusting the MTU of configured devices
    #[arg(long, global = true)]
    mtu_hook: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile interface records with the devices and configure them
    Reconcile,

    /// DHCP lease bound or renewed (lease data from the environment)
    DhcpBound,

    /// DHCP lease lost (interface from the environment)
    DhcpDeconfig,

    /// Dispatch a udhcpc script action
    DhcpEvent {
        #[arg(value_enum)]
        action: DhcpAction,
    },

    /// Regenerate resolver and pdnsd configuration from the uplink
    Resolv,

    /// Show visible devices and enabled interface records
    Interfaces,

    /// Show live status of one or all devices
    Status {
        /// Device name (all devices when omitted)
        device: Option<String>,
    },

    /// Configure the loopback device
    Loopback,
}

/// Actions udhcpc passes to its script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DhcpAction {
    Bound,
    Renew,
    Deconfig,
    Leasefail,
    Nak,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let directive = if args.debug { "pbx_net=debug" } else { "pbx_net=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let settings = Arc::new(build_settings(&args));
    let engine = build_engine(&args, settings)?;

    match args.command {
        Command::Reconcile => {
            let report = engine.reconcile_and_apply().await?;
            print_json(&report)?;
        }
        Command::DhcpBound => lease_bound(&engine).await?,
        Command::DhcpDeconfig => deconfig(&engine).await?,
        Command::DhcpEvent { action } => match action {
            DhcpAction::Bound | DhcpAction::Renew => lease_bound(&engine).await?,
            DhcpAction::Deconfig => deconfig(&engine).await?,
            DhcpAction::Leasefail | DhcpAction::Nak => {
                info!(action = ?action, "DHCP event ignored");
            }
        },
        Command::Resolv => engine.resolv_conf_generate().await?,
        Command::Interfaces => {
            print_json(&serde_json::json!({
                "mode": engine.mode(),
                "devices": engine.interface_names(),
                "enabled": engine.enabled_interfaces()?,
            }))?;
        }
        Command::Status { device: Some(device) } => {
            print_json(&engine.interface_status(&device).await?)?;
        }
        Command::Status { device: None } => print_json(&engine.interfaces_status().await)?,
        Command::Loopback => engine.configure_loopback().await?,
    }

    Ok(())
}

fn build_settings(args: &Args) -> Settings {
    let mut settings = Settings {
        debug: args.debug,
        ..Default::default()
    };
    if let Some(root) = &args.root {
        settings = settings.with_root(root);
    }
    if let Some(temp_dir) = &args.temp_dir {
        settings.temp_dir = temp_dir.clone();
    }
    if args.mtu_hook.is_some() {
        settings.mtu_hook = args.mtu_hook.clone();
    }
    if args.firewall_hook.is_some() {
        settings.firewall_hook = args.firewall_hook.clone();
    }
    settings
}

fn build_engine(args: &Args, settings: Arc<Settings>) -> anyhow::Result<NetworkEngine> {
    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = Arc::new(
        SqliteStore::new(&args.db).with_context(|| format!("opening {}", args.db.display()))?,
    );

    let exec = Arc::new(SystemExecutor::new());
    let mode = args.mode.resolve(&*exec);
    info!(mode = ?mode, db = %args.db.display(), "Initializing pbx-net");

    let firewall = Arc::new(HookFirewall::new(exec.clone(), settings.firewall_hook.clone()));
    let integration = integration::for_mode(mode, exec.clone(), settings.clone());

    Ok(NetworkEngine::new(
        store,
        exec,
        Arc::new(SysfsDiscovery::default()),
        firewall,
        integration,
        settings,
    ))
}

async fn lease_bound(engine: &NetworkEngine) -> anyhow::Result<()> {
    let lease = LeaseEvent::from_process_env(engine.lease_keys())?;
    engine.on_lease_bound(&lease).await?;
    Ok(())
}

async fn deconfig(engine: &NetworkEngine) -> anyhow::Result<()> {
    let event = DeconfigEvent::from_process_env(engine.lease_keys())?;
    engine.on_deconfig(&event).await?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
