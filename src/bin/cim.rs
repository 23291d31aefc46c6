//! cim - CI messenger command line.
//!
//! One binary covering the whole surface: point-to-point sends,
//! team-chat broadcast, wrapping external tools as endpoints, registry
//! inspection and sweeping, and inbox queue operations.
//!
//! # Usage
//!
//! ```text
//! cim send numa "status?"                # send, print the response
//! cim broadcast "standup in 5"          # fan out to every active endpoint
//! cim ci-tool -n sage -- my-tool --flag # bridge a tool until it exits
//! cim list --status active              # directory listing
//! cim inbox new pop                     # drain your own inbox
//! ```

use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cim_bridge::{BridgeSpec, ProcessBridge};
use cim_core::{
    CiName, CommsConfig, CommsError, CommsResult, Delimiter, EndpointKind, EndpointStatus,
};
use cim_inbox::{Category, InboxEntry, InboxStore};
use cim_registry::{spawn_registry, ListFilter};
use cim_router::Router;

/// Per-crate log directives used when `RUST_LOG` is unset.
const DEFAULT_LOG_DIRECTIVES: &str =
    "cim=info,cim_core=info,cim_registry=info,cim_inbox=info,cim_bridge=info,cim_router=info";

// ============================================================================
// CLI Arguments
// ============================================================================

/// cim - messaging between CI endpoints
#[derive(Parser, Debug)]
#[command(name = "cim")]
#[command(about = "Send, broadcast, bridge tools and manage CI inboxes")]
#[command(version)]
struct Args {
    /// Act as this endpoint (sender identity and inbox owner).
    /// Falls back to $CIM_SENDER, then "terminal".
    #[arg(long = "as", global = true, value_name = "NAME")]
    identity: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message to one endpoint and print its response
    Send {
        /// Target endpoint name
        name: String,
        /// Message body
        message: String,
        /// Response window in milliseconds (default: response timeout)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Fan a message out and print every outcome
    Broadcast {
        /// Message body
        message: String,
        /// Explicit targets; without any, every active endpoint
        #[arg(long = "target", value_name = "NAME")]
        targets: Vec<String>,
        /// Per-target window in milliseconds (default: team-chat timeout)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Wrap a command as a socket endpoint until it exits
    #[command(name = "ci-tool")]
    CiTool {
        /// Name to register the bridge under
        #[arg(short, long)]
        name: String,
        /// Framing delimiter in escaped notation (default: \n)
        #[arg(short, long, value_parser = parse_delimiter)]
        delimiter: Option<Delimiter>,
        /// Command and arguments to bridge
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show one endpoint's registry record
    Status {
        /// Endpoint name
        name: String,
    },

    /// List live endpoints
    List {
        /// Keep only this kind (specialist, tool-bridge, terminal)
        #[arg(long, value_parser = parse_kind)]
        kind: Option<EndpointKind>,
        /// Keep only this status (registered, active, unreachable)
        #[arg(long, value_parser = parse_status)]
        status: Option<EndpointStatus>,
    },

    /// Evict endpoints whose heartbeat is past the retention window
    Sweep,

    /// Operate on one of your inbox queues
    Inbox {
        /// Queue to operate on (new or keep)
        #[arg(value_parser = parse_category)]
        category: Category,
        #[command(subcommand)]
        op: InboxOp,
    },
}

#[derive(Subcommand, Debug)]
enum InboxOp {
    /// Remove and print the oldest entry
    Pop,
    /// Append an entry
    Push {
        /// Message body
        message: String,
        /// Sender to record (default: your identity)
        #[arg(long)]
        from: Option<String>,
    },
    /// Append an entry and print its id
    Write {
        /// Message body
        message: String,
        /// Sender to record (default: your identity)
        #[arg(long)]
        from: Option<String>,
    },
    /// Print the most recent entry
    Read {
        /// Also remove the printed entry
        #[arg(long)]
        remove: bool,
    },
    /// Print all entries, oldest first
    List,
    /// Print the number of entries
    Count,
    /// Remove all entries, printing how many
    Clear,
}

fn parse_delimiter(s: &str) -> Result<Delimiter, String> {
    Delimiter::parse(s).ok_or_else(|| "delimiter must not be empty".to_string())
}

fn parse_kind(s: &str) -> Result<EndpointKind, String> {
    EndpointKind::parse(s)
        .ok_or_else(|| format!("unknown kind {s:?} (specialist, tool-bridge, terminal)"))
}

fn parse_status(s: &str) -> Result<EndpointStatus, String> {
    EndpointStatus::parse(s)
        .ok_or_else(|| format!("unknown status {s:?} (registered, active, unreachable, evicted)"))
}

fn parse_category(s: &str) -> Result<Category, String> {
    Category::parse(s).ok_or_else(|| format!("unknown category {s:?} (new, keep)"))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    if let Err(e) = run(args).await {
        eprintln!("{}", error_line(&e));
        std::process::exit(1);
    }
    Ok(())
}

/// One-line rendering: `error: <classification>: <target>`.
fn error_line(e: &CommsError) -> String {
    let target = match e {
        CommsError::RegistrationConflict { name, .. }
        | CommsError::ConnectionRefused { name, .. }
        | CommsError::Timeout { name, .. }
        | CommsError::DelimiterFraming { name, .. } => name.to_string(),
        CommsError::EndpointNotFound(name) => name.to_string(),
        CommsError::ProcessSpawn { command, .. } => command.clone(),
        CommsError::Io(e) => e.to_string(),
        CommsError::Persist(detail) => detail.clone(),
        CommsError::ChannelClosed => "registry".to_string(),
    };
    format!("error: {}: {}", e.kind(), target)
}

// ============================================================================
// Command Dispatch
// ============================================================================

async fn run(args: Args) -> CommsResult<()> {
    let config = CommsConfig::from_env();
    let identity = args
        .identity
        .or_else(|| std::env::var("CIM_SENDER").ok())
        .unwrap_or_else(|| "terminal".to_string());
    let identity = CiName::new(identity);
    let registry = spawn_registry(&config);

    match args.command {
        Command::Send {
            name,
            message,
            timeout_ms,
        } => {
            let router = Router::new(
                registry,
                InboxStore::new(config.inbox_root()),
                config.clone(),
                identity,
            );
            let response = router
                .send(
                    &CiName::new(name),
                    &message,
                    timeout_ms.map(Duration::from_millis),
                    None,
                )
                .await?;
            println!("{response}");
        }

        Command::Broadcast {
            message,
            targets,
            timeout_ms,
        } => {
            let router = Router::new(
                registry,
                InboxStore::new(config.inbox_root()),
                config.clone(),
                identity,
            );
            let window = timeout_ms.map(Duration::from_millis);
            let results = if targets.is_empty() {
                router.broadcast_active(&message, window).await
            } else {
                let targets: Vec<CiName> = targets.into_iter().map(CiName::new).collect();
                router.broadcast(&targets, &message, window).await
            };
            for (name, outcome) in results {
                match outcome {
                    Ok(response) => println!("{name}: {response}"),
                    Err(e) => println!("{name}: {}", error_line(&e)),
                }
            }
        }

        Command::CiTool {
            name,
            delimiter,
            command,
        } => {
            let name = CiName::parse(name.clone()).ok_or(CommsError::RegistrationConflict {
                name: CiName::new(name),
                reason: "invalid endpoint name".to_string(),
            })?;
            // clap guarantees at least one element via `required = true`
            let program = command.first().cloned().unwrap_or_default();
            let bridge_args = command.into_iter().skip(1).collect();

            let mut spec = BridgeSpec::new(name, program).with_args(bridge_args);
            if let Some(delimiter) = delimiter {
                spec = spec.with_delimiter(delimiter);
            }

            let mut bridge = ProcessBridge::spawn(spec, registry, &config).await?;
            let mut sigterm = signal(SignalKind::terminate())?;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, terminating bridge");
                    bridge.terminate().await?;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, terminating bridge");
                    bridge.terminate().await?;
                }
                result = bridge.wait() => result?,
            }
        }

        Command::Status { name } => {
            let endpoint = registry.discover(&CiName::new(name)).await?;
            println!("name:           {}", endpoint.name);
            println!("kind:           {}", endpoint.kind);
            println!("status:         {}", endpoint.status);
            println!("address:        {}:{}", endpoint.host, endpoint.port);
            if let Some(pid) = endpoint.pid {
                println!("pid:            {pid}");
            }
            if let Some(path) = &endpoint.socket_path {
                println!("socket:         {}", path.display());
            }
            println!("delimiter:      {}", endpoint.delimiter);
            println!("registered:     {}", endpoint.registered_at.to_rfc3339());
            println!("last heartbeat: {}", endpoint.last_heartbeat.to_rfc3339());
        }

        Command::List { kind, status } => {
            let endpoints = registry.list(ListFilter { kind, status }).await;
            for endpoint in endpoints {
                println!(
                    "{:<20} {:<12} {:<12} {}:{}",
                    endpoint.name, endpoint.kind, endpoint.status, endpoint.host, endpoint.port
                );
            }
        }

        Command::Sweep => {
            let evicted = registry.sweep(config.retention_window).await;
            println!("{evicted}");
        }

        Command::Inbox { category, op } => {
            let inbox = InboxStore::new(config.inbox_root());
            run_inbox_op(&inbox, &identity, category, op).await?;
        }
    }
    Ok(())
}

async fn run_inbox_op(
    inbox: &InboxStore,
    owner: &CiName,
    category: Category,
    op: InboxOp,
) -> CommsResult<()> {
    match op {
        InboxOp::Pop => match inbox.pop(owner, category).await? {
            Some(entry) => print_entry(&entry),
            None => println!("(empty)"),
        },
        InboxOp::Push { message, from } => {
            let from = from.map(CiName::new).unwrap_or_else(|| owner.clone());
            inbox
                .push(owner, category, InboxEntry::new(from, owner.clone(), message))
                .await?;
        }
        InboxOp::Write { message, from } => {
            let from = from.map(CiName::new).unwrap_or_else(|| owner.clone());
            let id = inbox
                .push(owner, category, InboxEntry::new(from, owner.clone(), message))
                .await?;
            println!("{id}");
        }
        InboxOp::Read { remove } => match inbox.read(owner, category, remove).await? {
            Some(entry) => print_entry(&entry),
            None => println!("(empty)"),
        },
        InboxOp::List => {
            for entry in inbox.list(owner, category).await? {
                print_entry(&entry);
            }
        }
        InboxOp::Count => println!("{}", inbox.count(owner, category).await?),
        InboxOp::Clear => println!("{}", inbox.clear(owner, category).await?),
    }
    Ok(())
}

fn print_entry(entry: &InboxEntry) {
    println!(
        "[{}] {}: {}",
        entry.timestamp.to_rfc3339(),
        entry.from,
        entry.body
    );
}
