//! nodefleet CLI - manage validator node containers across hosts

use clap::{Parser, Subcommand};
use futures::StreamExt;
use nodefleet::models::*;
use nodefleet::runtime::{DockerRuntime, LogOptions, LogTail};
use nodefleet::{Error, Manager, ManagerConfig, Reconciler, Result, Store};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
#[command(name = "nodefleet")]
#[command(about = "Lifecycle manager for container-backed validator nodes")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "NODEFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true, env = "NODEFLEET_DB")]
    db: Option<PathBuf>,

    /// Deadline for a single runtime call, in seconds
    #[arg(long, global = true, env = "NODEFLEET_RUNTIME_TIMEOUT")]
    runtime_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover interrupted nodes and run the reconciler until Ctrl-C
    Serve {
        /// Seconds between reconcile passes
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Host management
    Host {
        #[command(subcommand)]
        action: HostAction,
    },
    /// Node lifecycle
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Show recent events, newest first
    Events {
        /// Number of events (non-numeric or non-positive falls back to the default)
        #[arg(short, long)]
        limit: Option<String>,
        /// Only events of this node
        #[arg(long)]
        node: Option<i64>,
    },
    /// Table counts and node summaries
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum HostAction {
    /// Register a host
    Add {
        /// Host name
        #[arg(short, long)]
        name: String,
        /// Runtime endpoint: local, unix:///path or tcp://addr:port
        #[arg(short, long, default_value = "local")]
        endpoint: String,
        /// Maximum active nodes
        #[arg(long)]
        max_nodes: Option<u32>,
    },
    /// List hosts
    List,
    /// Remove a host without active nodes
    Remove {
        /// Host id
        id: i64,
    },
}

#[derive(Subcommand)]
enum NodeAction {
    /// Register a node (does not start it)
    Create {
        /// Node name
        #[arg(short, long)]
        name: String,
        /// Container image
        #[arg(short, long)]
        image: String,
        /// Host port for the staking port
        #[arg(short = 'p', long)]
        staking_port: u16,
        /// Host id (optional when exactly one host is registered)
        #[arg(long)]
        host: Option<i64>,
        /// L1 network ids to bind
        #[arg(long = "l1")]
        l1s: Vec<String>,
    },
    /// List nodes
    List {
        /// Include deleted nodes
        #[arg(short, long)]
        all: bool,
    },
    /// Show a node
    Get {
        id: i64,
    },
    /// Start a node
    Start {
        id: i64,
    },
    /// Stop a node
    Stop {
        id: i64,
    },
    /// Delete a node
    Delete {
        id: i64,
        /// Also remove the node's data volume
        #[arg(long)]
        remove_volumes: bool,
    },
    /// Print container logs
    Logs {
        id: i64,
        /// Number of trailing lines (default all)
        #[arg(long)]
        tail: Option<String>,
        /// Keep streaming until Ctrl-C
        #[arg(short, long)]
        follow: bool,
    },
    /// Bind an L1 network to a node
    Bind {
        id: i64,
        /// Network id
        network: String,
    },
    /// Record the identity reported by the node
    Identity {
        id: i64,
        /// NodeID reported by the workload
        node_id: String,
    },
}

#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Max")]
    max_nodes: String,
    #[tabled(rename = "Active")]
    active: u64,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "NodeID")]
    node_id: String,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl From<&Node> for NodeRow {
    fn from(n: &Node) -> Self {
        NodeRow {
            id: n.id,
            name: n.name.clone(),
            status: n.status.to_string(),
            image: n.image.clone(),
            port: n.staking_port,
            host: n.host_id.map(|h| h.to_string()).unwrap_or_else(|| "-".into()),
            node_id: n.node_id.clone().unwrap_or_else(|| "-".into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nodefleet=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = Store::open(&config.db_path)?;
    let manager = Manager::new(store, config);
    attach_runtimes(&manager)?;

    match cli.command {
        Commands::Serve { interval } => serve(&manager, interval).await?,
        Commands::Host { action } => handle_host(&manager, action)?,
        Commands::Node { action } => handle_node(&manager, action).await?,
        Commands::Events { limit, node } => {
            let limit = manager.event_limit(limit.as_deref());
            let events = match node {
                Some(id) => manager.list_node_events(id, limit)?,
                None => manager.list_events(limit)?,
            };
            if events.is_empty() {
                println!("No events.");
                return Ok(());
            }
            let rows: Vec<EventRow> = events
                .iter()
                .map(|e| EventRow {
                    id: e.id,
                    time: e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    node: e.node_id.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
                    kind: e.kind.to_string(),
                    detail: e.detail.clone(),
                })
                .collect();
            println!("{}", Table::new(rows));
        }
        Commands::Status { json } => {
            let report = manager.status_report()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("nodefleet {}", report.version);
                println!("  Hosts:  {}", report.counts.hosts);
                println!("  Nodes:  {}", report.counts.nodes);
                println!("  L1s:    {}", report.counts.l1s);
                println!("  Events: {}", report.counts.events);
                if !report.nodes.is_empty() {
                    let nodes = manager.list_nodes()?;
                    let rows: Vec<NodeRow> = nodes.iter().map(NodeRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<ManagerConfig> {
    let base = match &cli.config {
        Some(path) => ManagerConfig::from_json_file(path)?,
        None => ManagerConfig::default(),
    };
    let mut builder = nodefleet::config::ManagerConfigBuilder::from(base);
    if let Some(db) = &cli.db {
        builder = builder.db_path(db);
    }
    if let Some(secs) = cli.runtime_timeout {
        builder = builder.runtime_timeout_secs(secs);
    }
    builder.build_validated()
}

/// Connect a Docker runtime for every registered host
fn attach_runtimes(manager: &Manager) -> Result<()> {
    for host in manager.list_hosts()? {
        match DockerRuntime::connect(&host.endpoint) {
            Ok(runtime) => manager.attach_runtime(host.id, Arc::new(runtime))?,
            Err(e) => {
                tracing::warn!(host = host.id, endpoint = %host.endpoint, error = %e, "Could not connect to host runtime")
            }
        }
    }
    Ok(())
}

async fn serve(manager: &Manager, interval: Option<u64>) -> Result<()> {
    let recovered = manager.recover_interrupted()?;
    if recovered > 0 {
        println!("Recovered {} interrupted node(s).", recovered);
    }

    let interval = interval
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| manager.config().reconcile_interval());
    let reconciler = Reconciler::new(manager.clone(), interval).spawn();
    println!(
        "Reconciling every {}s. Press Ctrl-C to stop.",
        interval.as_secs()
    );

    tokio::signal::ctrl_c().await?;
    println!("Shutting down...");
    reconciler.shutdown().await;
    Ok(())
}

fn handle_host(manager: &Manager, action: HostAction) -> Result<()> {
    match action {
        HostAction::Add {
            name,
            endpoint,
            max_nodes,
        } => {
            let runtime = DockerRuntime::connect(&endpoint)?;
            let mut host = NewHost::new(&name, &endpoint);
            if let Some(max) = max_nodes {
                host = host.with_max_nodes(max);
            }
            let host = manager.add_host(host, Arc::new(runtime))?;
            println!("Host registered: {} ({})", host.name, host.id);
        }
        HostAction::List => {
            let hosts = manager.list_hosts()?;
            if hosts.is_empty() {
                println!("No hosts registered.");
                return Ok(());
            }
            let mut rows = Vec::with_capacity(hosts.len());
            for h in &hosts {
                rows.push(HostRow {
                    id: h.id,
                    name: h.name.clone(),
                    endpoint: h.endpoint.clone(),
                    max_nodes: h
                        .max_nodes
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "-".into()),
                    active: manager.store().count_active_nodes_on_host(h.id)?,
                });
            }
            println!("{}", Table::new(rows));
        }
        HostAction::Remove { id } => {
            manager.remove_host(id)?;
            println!("Host removed: {}", id);
        }
    }
    Ok(())
}

async fn handle_node(manager: &Manager, action: NodeAction) -> Result<()> {
    match action {
        NodeAction::Create {
            name,
            image,
            staking_port,
            host,
            l1s,
        } => {
            let mut req = CreateNodeRequest::new(&name, &image, staking_port);
            if let Some(host) = host {
                req = req.on_host(host);
            }
            for network in l1s {
                req = req.with_l1(L1Request::new(network));
            }
            let node = manager.create_node(req)?;
            println!("Node created: {} ({})", node.name, node.id);
        }
        NodeAction::List { all } => {
            let nodes = if all {
                manager.list_all_nodes()?
            } else {
                manager.list_nodes()?
            };
            if nodes.is_empty() {
                println!("No nodes found.");
                return Ok(());
            }
            let rows: Vec<NodeRow> = nodes.iter().map(NodeRow::from).collect();
            println!("{}", Table::new(rows));
        }
        NodeAction::Get { id } => {
            let node = manager.get_node(id)?;
            println!("Node: {}", node.name);
            println!("  ID:        {}", node.id);
            println!("  Status:    {}", node.status);
            println!("  Image:     {}", node.image);
            println!("  Port:      {}", node.staking_port);
            println!(
                "  Host:      {}",
                node.host_id.map(|h| h.to_string()).unwrap_or_else(|| "-".into())
            );
            println!("  Container: {}", node.container_id.as_deref().unwrap_or("-"));
            println!("  NodeID:    {}", node.node_id.as_deref().unwrap_or("-"));
            if let Some(msg) = &node.error_message {
                println!("  Error:     {}", msg);
            }
            println!("  Created:   {}", node.created_at);
            println!("  Updated:   {}", node.updated_at);
            let bindings = manager.list_l1_bindings(id)?;
            if !bindings.is_empty() {
                println!("  L1s:");
                for b in bindings {
                    println!("    - {}", b.network_id);
                }
            }
        }
        NodeAction::Start { id } => {
            println!("Starting node {}...", id);
            let node = manager.start_node(id).await?;
            println!("Node {} is {}.", node.name, node.status);
        }
        NodeAction::Stop { id } => {
            println!("Stopping node {}...", id);
            let node = manager.stop_node(id).await?;
            println!("Node {} is {}.", node.name, node.status);
        }
        NodeAction::Delete { id, remove_volumes } => {
            let node = manager.delete_node(id, remove_volumes).await?;
            println!("Node deleted: {}", node.name);
        }
        NodeAction::Logs { id, tail, follow } => {
            let options = LogOptions::default()
                .tail(tail.as_deref().map(LogTail::parse).unwrap_or_default())
                .follow(follow);
            let mut stream = manager.node_logs(id, options).await?;
            let mut stdout = tokio::io::stdout();
            loop {
                tokio::select! {
                    chunk = stream.next() => match chunk {
                        Some(chunk) => {
                            let bytes = chunk.map_err(Error::from)?;
                            stdout.write_all(&bytes).await?;
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            stdout.flush().await?;
        }
        NodeAction::Bind { id, network } => {
            let binding = manager.bind_l1(id, L1Request::new(network)).await?;
            println!("Bound {} to node {}", binding.network_id, id);
        }
        NodeAction::Identity { id, node_id } => {
            let node = manager.set_node_identity(id, &node_id).await?;
            println!(
                "Node {} identity: {}",
                node.name,
                node.node_id.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
