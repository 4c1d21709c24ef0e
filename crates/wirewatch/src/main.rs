//! Wirewatch - command-line harness
//!
//! Lists bus devices, prints the declared topology, binds roles to devices,
//! and watches the bus for devices coming and going.

mod config;
mod fixture;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use wirewatch_core::{
    BusDirectory, Cluster, ClusterChild, SwitchFilter, TopologyModel, TopologyParser,
};
use wirewatch_monitor::{LogListener, PresenceMonitor};

use crate::config::Config;
use crate::fixture::FileBus;

#[derive(Parser, Debug)]
#[command(name = "wirewatch")]
#[command(about = "1-Wire device topology and presence harness")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "wirewatch.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List devices currently on the bus
    Devices,
    /// Print the cluster tree of the topology document
    Topology {
        /// Emit the model as JSON
        #[arg(long)]
        json: bool,
    },
    /// List switch devices, checked against the bus
    Switches,
    /// Resolve logical role names (e.g. "LED1") to devices
    Bind {
        #[arg(required = true)]
        roles: Vec<String>,
    },
    /// Watch the bus and log arrivals, departures, and faults
    Watch {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The config file may name a log level, so read it before logging is up
    let config = config::load_config(&args.config)?;

    let level = parse_level(args.log_level.as_deref().unwrap_or(&config.log.level));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Wirewatch v{}", env!("CARGO_PKG_VERSION"));

    let bus: Arc<dyn BusDirectory> = Arc::new(FileBus::new(&config.bus.fixture));

    match args.command {
        Command::Devices => list_devices(bus.as_ref()),
        Command::Topology { json } => print_topology(&config, json),
        Command::Switches => list_switches(&config, bus),
        Command::Bind { roles } => bind_roles(&config, bus, &roles),
        Command::Watch { duration_secs } => watch(&config, bus, duration_secs).await,
    }
}

fn list_devices(bus: &dyn BusDirectory) -> Result<()> {
    let devices = bus.list_devices()?;
    println!("{} devices on the bus:", devices.len());
    for device in devices {
        let capabilities: Vec<&str> = device.capabilities.iter().map(String::as_str).collect();
        println!("  - {} {}", device.address, device.description);
        println!("    Family: {:02X}", device.address.family());
        if !capabilities.is_empty() {
            println!("    Capabilities: {}", capabilities.join(", "));
        }
    }
    Ok(())
}

fn load_topology(config: &Config, parser: &TopologyParser) -> Result<TopologyModel> {
    parser
        .parse_file(&config.topology.path)
        .with_context(|| format!("loading topology {}", config.topology.path.display()))
}

fn print_topology(config: &Config, json: bool) -> Result<()> {
    let model = load_topology(config, &TopologyParser::new())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&model)?);
    } else {
        print_cluster(&model, model.root(), 0);
    }
    for warning in model.warnings() {
        println!("warning: {}", warning);
    }
    Ok(())
}

fn print_cluster(model: &TopologyModel, cluster: &Cluster, depth: usize) {
    let indent = "  ".repeat(depth);
    if cluster.description.is_empty() {
        println!("{}{}", indent, cluster.name);
    } else {
        println!("{}{} ({})", indent, cluster.name, cluster.description);
    }
    for child in &cluster.children {
        match child {
            ClusterChild::Cluster(id) => {
                if let Some(sub) = model.cluster(*id) {
                    print_cluster(model, sub, depth + 1);
                }
            }
            ClusterChild::Device(id) => {
                if let Some(device) = model.device(*id) {
                    let channel = device
                        .channel
                        .map(|c| format!(" ch{}", c))
                        .unwrap_or_default();
                    println!(
                        "{}  * {} [{}{}]",
                        indent, device.description, device.device_type, channel
                    );
                }
            }
        }
    }
}

fn list_switches(config: &Config, bus: Arc<dyn BusDirectory>) -> Result<()> {
    let model = load_topology(config, &TopologyParser::with_bus(bus))?;
    for device in model.devices_matching(&SwitchFilter) {
        let address = device
            .address
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<5} {:<16} {}",
            device.description,
            channel_label(device.channel),
            address,
            model.path_of(model.cluster_of(device))
        );
    }
    Ok(())
}

fn channel_label(channel: Option<u8>) -> String {
    channel
        .map(|c| format!("ch{}", c))
        .unwrap_or_else(|| "-".to_string())
}

fn bind_roles(config: &Config, bus: Arc<dyn BusDirectory>, roles: &[String]) -> Result<()> {
    let model = load_topology(config, &TopologyParser::with_bus(bus))?;
    let bound = model.bind_roles(roles)?;
    for (role, device) in roles.iter().zip(bound) {
        println!(
            "{} -> {} {}",
            role,
            device.device_type,
            model.path_of(model.cluster_of(device))
        );
    }
    Ok(())
}

async fn watch(config: &Config, bus: Arc<dyn BusDirectory>, duration_secs: Option<u64>) -> Result<()> {
    let monitor = PresenceMonitor::new(bus, &config.monitor);
    monitor.add_listener(Arc::new(LogListener)).await?;
    monitor.start().await?;

    match duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    let stats = monitor.stop().await?;
    println!(
        "{} polls, {} arrivals, {} departures, {} faults",
        stats.polls, stats.arrivals, stats.departures, stats.faults
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("chatty"), Level::INFO);
    }

    #[test]
    fn test_channel_label() {
        assert_eq!(channel_label(Some(0)), "ch0");
        assert_eq!(channel_label(Some(7)), "ch7");
        assert_eq!(channel_label(None), "-");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["wirewatch", "-l", "debug", "bind", "LED1", "LED2"]).unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        match args.command {
            Command::Bind { roles } => assert_eq!(roles, vec!["LED1", "LED2"]),
            other => panic!("unexpected command {:?}", other),
        }

        let args = Args::try_parse_from(["wirewatch", "watch", "--duration-secs", "3"]).unwrap();
        assert!(matches!(args.command, Command::Watch { duration_secs: Some(3) }));

        assert!(Args::try_parse_from(["wirewatch", "bind"]).is_err());
    }

    #[test]
    fn test_demo_files_resolve() {
        let bus = wirewatch_core::StaticBus::from_toml(include_str!("../../../demos/bus.toml")).unwrap();
        let parser = TopologyParser::with_bus(Arc::new(bus));
        let model = parser.parse(include_str!("../../../demos/panel.xml")).unwrap();

        let bound = model
            .bind_roles(&["LED1", "LED2", "Push-Button 1", "Push-Button 2"])
            .unwrap();
        assert_eq!(bound.len(), 4);
        assert_eq!(model.devices_matching(&SwitchFilter).count(), 2);
        assert!(model.warnings().is_empty());

        let config: Config = toml::from_str(include_str!("../../../demos/wirewatch.toml")).unwrap();
        assert_eq!(config.topology.path, PathBuf::from("demos/panel.xml"));
    }
}
