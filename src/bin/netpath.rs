//! `netpath`: a thin CLI wrapping `netpath_core::Facade`.
//!
//! This binary carries no diagnostic algorithms of its own — it parses
//! arguments, builds a `Facade`, calls one of its operations, and renders
//! the result as a table or as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use netpath_core::config::{FacadeConfig, MultipathOverride, PingOverride, TraceOverride};
use netpath_core::types::{ClassifiedTrace, FlowIdentifier, NetworkTopology, PingResult};
use netpath_core::{Facade, VpnHint};
use std::net::Ipv4Addr;
use std::time::Duration;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::Resolver;

#[derive(Parser, Debug)]
#[command(name = "netpath", version, about = "User-space IPv4 network-path diagnostics")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Render output as JSON instead of a table.
    #[arg(long, global = true)]
    json: bool,

    /// Emit diagnostic logging to stderr (respects RUST_LOG).
    #[arg(long, global = true)]
    enable_logging: bool,

    /// Bind to this network interface by name.
    #[arg(long, global = true)]
    interface: Option<String>,

    /// Bind to this source IPv4 address.
    #[arg(long, global = true)]
    source_ip: Option<Ipv4Addr>,

    /// Override public-IP discovery with an explicit address.
    #[arg(long, global = true)]
    public_ip: Option<Ipv4Addr>,

    /// Disable reverse-DNS lookups in classified output.
    #[arg(long, global = true)]
    no_reverse_dns: bool,

    /// Path to a local MaxMind-format ASN database (`.mmdb`); falls back
    /// to Team Cymru DNS lookups when absent.
    #[arg(long, global = true)]
    asn_db: Option<std::path::PathBuf>,

    /// Path to a TOML config file; defaults to the platform config
    /// directory's `netpath/config.toml` if present.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a traceroute and classify each hop.
    Trace {
        destination: String,
        #[arg(long, default_value = "30")]
        max_hops: u8,
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
        #[arg(long, default_value = "56")]
        payload_size: u16,
    },
    /// Send a bounded burst of ICMP echoes and report loss/RTT statistics.
    Ping {
        target: String,
        #[arg(long, default_value = "4")]
        count: u32,
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
    /// Enumerate ECMP paths toward a destination.
    DiscoverPaths {
        destination: String,
        #[arg(long, default_value = "20")]
        flow_variations: u32,
        #[arg(long, default_value = "8")]
        max_paths: usize,
    },
    /// Print this host's public IPv4 address.
    PublicIp,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.enable_logging {
        env_logger::init();
    }

    let resolver = Resolver::new(ResolverConfig::default(), ResolverOpts::default())
        .context("failed to construct the DNS resolver")?;
    let local_asn = args
        .asn_db
        .as_ref()
        .map(|path| {
            netpath_core::asn::LocalAsnResolver::open(path)
                .with_context(|| format!("failed to load ASN database at {}", path.display()))
        })
        .transpose()?;

    let mut config = match &args.config {
        Some(path) => FacadeConfig::load_from_file(path).with_context(|| format!("failed to load config file {}", path.display()))?,
        None => FacadeConfig::load_default().context("failed to load default config file")?,
    };
    if args.interface.is_some() {
        config.interface = args.interface.clone();
    }
    if args.source_ip.is_some() {
        config.source_ip = args.source_ip;
    }
    if args.public_ip.is_some() {
        config.public_ip = args.public_ip;
    }
    if args.no_reverse_dns {
        config.no_reverse_dns = true;
    }
    let facade = Facade::new(config, resolver, local_asn).context("invalid configuration")?;

    match args.command {
        Command::Trace {
            destination,
            max_hops,
            timeout,
            payload_size,
        } => {
            let over = TraceOverride {
                max_hops: Some(max_hops),
                timeout,
                payload_size: Some(payload_size),
                payload_pattern: None,
                interface: args.interface,
                source_ip: args.source_ip,
            };
            let flow_id = FlowIdentifier::base(rand::random());
            let trace = facade
                .trace_classified(&destination, flow_id, &over, VpnHint::default())
                .with_context(|| format!("traceroute to {destination} failed"))?;
            render_trace(&trace, args.json)?;
        }
        Command::Ping {
            target,
            count,
            interval,
            timeout,
        } => {
            let over = PingOverride {
                count: Some(count),
                interval,
                timeout,
                payload_size: None,
                payload_pattern: None,
                interface: args.interface,
                source_ip: args.source_ip,
            };
            let result = facade
                .ping(&target, &over)
                .with_context(|| format!("ping to {target} failed"))?;
            render_ping(&result, args.json)?;
        }
        Command::DiscoverPaths {
            destination,
            flow_variations,
            max_paths,
        } => {
            let over = MultipathOverride {
                flow_variations: Some(flow_variations),
                max_paths: Some(max_paths),
                early_stop_threshold: None,
                timeout: None,
                max_hops: None,
                interface: args.interface,
                source_ip: args.source_ip,
            };
            let topology = facade
                .discover_paths(&destination, &over, VpnHint::default())
                .with_context(|| format!("path discovery to {destination} failed"))?;
            render_topology(&topology, args.json)?;
        }
        Command::PublicIp => {
            let ip = facade.public_ip().context("could not determine public IP")?;
            if args.json {
                println!("{}", serde_json::json!({ "public_ip": ip.to_string() }));
            } else {
                println!("{ip}");
            }
        }
    }
    Ok(())
}

fn render_trace(trace: &ClassifiedTrace, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(trace)?);
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["TTL", "Host", "ASN", "Category", "RTT"]);
    for hop in &trace.hops {
        let host = hop
            .hop
            .ip
            .map(|ip| hop.hop.hostname.clone().unwrap_or_else(|| ip.to_string()))
            .unwrap_or_else(|| "*".to_string());
        let asn = hop.asn.map(|a| format!("AS{a}")).unwrap_or_default();
        let rtt = hop
            .hop
            .rtt
            .map(|d| format!("{:.1}ms", d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "*".to_string());
        table.add_row(vec![hop.hop.ttl.to_string(), host, asn, hop.category.to_string(), rtt]);
    }
    println!("{table}");
    Ok(())
}

fn render_ping(result: &PingResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["Seq", "RTT", "TTL"]);
    for response in &result.responses {
        let rtt = response
            .rtt
            .map(|d| format!("{:.1}ms", d.as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "*".to_string());
        let ttl = response.ttl_observed.map(|t| t.to_string()).unwrap_or_default();
        table.add_row(vec![response.sequence.to_string(), rtt, ttl]);
    }
    println!("{table}");
    println!(
        "{} sent, {} received, {:.0}% loss",
        result.statistics.sent,
        result.statistics.received,
        result.statistics.packet_loss * 100.0
    );
    Ok(())
}

fn render_topology(topology: &NetworkTopology, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(topology)?);
        return Ok(());
    }
    println!(
        "{} unique path(s) across {} probe(s)",
        topology.unique_path_count,
        topology.paths.len()
    );
    for path in &topology.paths {
        if path.is_unique {
            println!("  {} ({})", path.fingerprint, path.flow_id);
        }
    }
    Ok(())
}
