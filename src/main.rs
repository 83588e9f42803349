//! portward command-line interface
//!
//! Every subcommand maps 1:1 to a core operation: `allow`/`disallow` mutate
//! the store and reconcile, `reload` reconciles as-is, `list` shows the
//! store, `stop` opens everything up, `upnp` manages the periodic
//! resynchronization schedule, and `hook` dispatches extension scripts.
//!
//! ```bash
//! portward allow tcp 8080            # open 8080/TCP (IPv4)
//! portward allow both 443 --upnp    # open 443 TCP+UDP and forward it
//! portward disallow tcp 8080
//! portward list --json
//! portward reload --upnp
//! portward upnp install
//! portward stop
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use portward::core::error::{Error, Result};
use portward::core::iptables::IptablesFilter;
use portward::core::reconcile::ReloadOutcome;
use portward::core::ruleset::{Family, FirewallStore, Protocol, ProtocolSelection};
use portward::core::upnp::{GatewayDiscovery, IgdDiscovery};
use portward::core::{ops, schedule};
use portward::{audit, hooks, utils, validators};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProtocolChoice {
    Tcp,
    Udp,
    Both,
}

impl From<ProtocolChoice> for ProtocolSelection {
    fn from(choice: ProtocolChoice) -> Self {
        match choice {
            ProtocolChoice::Tcp => ProtocolSelection::Tcp,
            ProtocolChoice::Udp => ProtocolSelection::Udp,
            ProtocolChoice::Both => ProtocolSelection::Both,
        }
    }
}

#[derive(Parser)]
#[command(name = "portward")]
#[command(version)]
#[command(about = "Firewall rule store and reconciler for self-hosted servers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a port and reconcile the live filter state
    Allow {
        /// Protocol to open
        #[arg(value_enum, ignore_case = true)]
        protocol: ProtocolChoice,
        /// Port number (1-65535)
        port: u32,
        /// Apply to the IPv6 rule set instead of IPv4
        #[arg(long)]
        ipv6: bool,
        /// Also forward the port through the UPnP gateway (IPv4 only)
        #[arg(long)]
        upnp: bool,
    },
    /// Close a port and reconcile the live filter state
    Disallow {
        /// Protocol to close
        #[arg(value_enum, ignore_case = true)]
        protocol: ProtocolChoice,
        /// Port number (1-65535)
        port: u32,
        /// Apply to the IPv6 rule set instead of IPv4
        #[arg(long)]
        ipv6: bool,
        /// Only drop the port's UPnP forwarding, keep it open
        #[arg(long)]
        upnp: bool,
    },
    /// Show the persisted rule store
    List {
        /// Print the raw store document
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the live filter state from the store
    Reload {
        /// Also resynchronize UPnP gateway mappings
        #[arg(short, long)]
        upnp: bool,
    },
    /// Open everything up and stop managing the filter
    Stop,
    /// Manage periodic UPnP resynchronization
    Upnp {
        #[command(subcommand)]
        action: UpnpCommands,
    },
    /// Manage extension hooks
    Hook {
        #[command(subcommand)]
        action: HookCommands,
    },
}

#[derive(Subcommand)]
enum UpnpCommands {
    /// Schedule periodic resynchronization of gateway mappings
    Install,
    /// Remove the resynchronization schedule
    Remove,
    /// Report whether resynchronization is scheduled
    Check,
}

#[derive(Subcommand)]
enum HookCommands {
    /// Install a script for an action
    Add { action: String, script: PathBuf },
    /// List the scripts bound to an action
    List { action: String },
    /// Run every script bound to an action
    Callback { action: String },
    /// Run a single hook script with arguments
    Exec {
        script: PathBuf,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match handle_cli(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to the state directory; the terminal stays reserved for the
/// operation's own output.
fn init_logging() {
    let mut log_path = utils::state_dir();
    if std::fs::create_dir_all(&log_path).is_ok() {
        log_path.push("portward.log");
        if let Ok(file) = std::fs::File::options()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            tracing_subscriber::fmt()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
            return;
        }
    }
    tracing_subscriber::fmt::init();
}

fn handle_cli(command: Commands) -> Result<()> {
    let config_dir = utils::config_dir();

    match command {
        Commands::Allow {
            protocol,
            port,
            ipv6,
            upnp,
        } => {
            let port = validators::validate_port(port)?;
            let family = if ipv6 { Family::V6 } else { Family::V4 };
            let discovery = IgdDiscovery::new();
            let mut filter = IptablesFilter::new();

            let result = ops::allow(
                &config_dir,
                protocol.into(),
                port,
                family,
                upnp,
                &mut filter,
                Some(&discovery as &dyn GatewayDiscovery),
            );
            audit::record(
                audit::EventType::AllowPort,
                result.is_ok(),
                serde_json::json!({
                    "port": port,
                    "protocol": ProtocolSelection::from(protocol).to_string(),
                    "family": family.to_string(),
                    "upnp": upnp,
                }),
                result.as_ref().err().map(ToString::to_string),
            );
            let outcome = result?;
            println!("Port {port} successfully opened");
            report_reconciliation(&outcome)
        }
        Commands::Disallow {
            protocol,
            port,
            ipv6,
            upnp,
        } => {
            let port = validators::validate_port(port)?;
            let family = if ipv6 { Family::V6 } else { Family::V4 };
            let discovery = IgdDiscovery::new();
            let mut filter = IptablesFilter::new();

            let result = ops::disallow(
                &config_dir,
                protocol.into(),
                port,
                family,
                upnp,
                &mut filter,
                Some(&discovery as &dyn GatewayDiscovery),
            );
            audit::record(
                audit::EventType::DisallowPort,
                result.is_ok(),
                serde_json::json!({
                    "port": port,
                    "protocol": ProtocolSelection::from(protocol).to_string(),
                    "family": family.to_string(),
                    "upnp": upnp,
                }),
                result.as_ref().err().map(ToString::to_string),
            );
            let outcome = result?;
            println!("Port {port} successfully closed");
            report_reconciliation(&outcome)
        }
        Commands::List { json } => {
            let store = ops::list(&config_dir)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&store)?);
            } else {
                print_store(&store);
            }
            Ok(())
        }
        Commands::Reload { upnp } => {
            let discovery = IgdDiscovery::new();
            let mut filter = IptablesFilter::new();
            let result = ops::reload(
                &config_dir,
                &mut filter,
                upnp.then_some(&discovery as &dyn GatewayDiscovery),
            );
            audit::record(
                audit::EventType::Reload,
                result.is_ok(),
                serde_json::json!({ "upnp": upnp }),
                result.as_ref().err().map(ToString::to_string),
            );
            let outcome = result?;
            println!(
                "Firewall reloaded: {} rule(s), {} UPnP mapping(s)",
                outcome.rules_applied, outcome.upnp_synced
            );
            report_reconciliation(&outcome)
        }
        Commands::Stop => {
            let mut filter = IptablesFilter::new();
            let result = ops::stop(&config_dir, &utils::cron_file(), &mut filter);
            audit::record(
                audit::EventType::Stop,
                result.is_ok(),
                serde_json::json!({}),
                result.as_ref().err().map(ToString::to_string),
            );
            let outcome = result?;
            println!("Firewall stopped: all traffic accepted");
            report_reconciliation(&outcome)
        }
        Commands::Upnp { action } => handle_upnp(&config_dir, action),
        Commands::Hook { action } => handle_hook(action),
    }
}

fn handle_upnp(config_dir: &std::path::Path, action: UpnpCommands) -> Result<()> {
    match action {
        UpnpCommands::Install => {
            let result = schedule::install(config_dir, &utils::cron_file());
            audit::record(
                audit::EventType::ScheduleInstalled,
                result.is_ok(),
                serde_json::json!({}),
                result.as_ref().err().map(ToString::to_string),
            );
            result?;
            println!("UPnP resynchronization scheduled");
            Ok(())
        }
        UpnpCommands::Remove => {
            let result = schedule::remove(config_dir, &utils::cron_file());
            audit::record(
                audit::EventType::ScheduleRemoved,
                result.is_ok(),
                serde_json::json!({}),
                result.as_ref().err().map(ToString::to_string),
            );
            result?;
            println!("UPnP resynchronization unscheduled");
            Ok(())
        }
        UpnpCommands::Check => {
            schedule::check(config_dir)?;
            println!("UPnP resynchronization is active");
            Ok(())
        }
    }
}

fn handle_hook(action: HookCommands) -> Result<()> {
    let hooks_dir = utils::hooks_dir();
    match action {
        HookCommands::Add { action, script } => {
            let installed = hooks::add(&hooks_dir, &action, &script)?;
            println!("Hook installed: {}", installed.display());
            Ok(())
        }
        HookCommands::List { action } => {
            for script in hooks::list(&hooks_dir, &action)? {
                println!("{script}");
            }
            Ok(())
        }
        HookCommands::Callback { action } => {
            let outcome = hooks::callback(&hooks_dir, &action)?;
            audit::record(
                audit::EventType::HookCallback,
                outcome.failures.is_empty(),
                serde_json::json!({
                    "action": action,
                    "executed": outcome.executed,
                }),
                (!outcome.failures.is_empty()).then(|| outcome.failures.join("; ")),
            );
            println!("{} hook(s) executed", outcome.executed);
            if outcome.failures.is_empty() {
                Ok(())
            } else {
                Err(Error::Internal(format!(
                    "{} hook(s) failed: {}",
                    outcome.failures.len(),
                    outcome.failures.join("; ")
                )))
            }
        }
        HookCommands::Exec { script, args } => hooks::exec_script(&script, &args),
    }
}

/// Best-effort reconciliation still reports its failures as one error so
/// they cannot pass unnoticed.
fn report_reconciliation(outcome: &ReloadOutcome) -> Result<()> {
    if outcome.failures.is_empty() {
        return Ok(());
    }
    Err(Error::Filter {
        message: format!(
            "{} command(s) failed during reconciliation: {}",
            outcome.failures.len(),
            outcome.failures.join("; ")
        ),
        stderr: None,
        exit_code: None,
    })
}

fn print_store(store: &FirewallStore) {
    for (label, table) in [("IPv4", &store.ipv4), ("IPv6", &store.ipv6)] {
        println!("{label}:");
        for protocol in [Protocol::Tcp, Protocol::Udp] {
            println!("  {protocol}: {}", format_ports(table.ports(protocol)));
        }
    }
    println!("UPnP forwards:");
    for protocol in [Protocol::Tcp, Protocol::Udp] {
        println!(
            "  {protocol}: {}",
            format_ports(store.upnp.ports.ports(protocol))
        );
    }
    println!(
        "  resync scheduled: {}",
        if store.upnp.cron { "yes" } else { "no" }
    );
}

fn format_ports(ports: &[u16]) -> String {
    if ports.is_empty() {
        "-".to_string()
    } else {
        ports
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
