//! nsgard - namespace guard
//!
//! Command-line front end for reconciling iptables chains inside a target
//! process's network namespace.
//!
//! # Usage
//!
//! ```bash
//! # Apply a chain intent document to a container's namespace
//! nsgard reconcile --pid 12345 chains.json
//!
//! # Same target, addressed by an explicit namespace handle
//! nsgard reconcile --netns /run/netns/blue chains.json
//!
//! # Preview the rendered rules without touching the system
//! nsgard render chains.json
//!
//! # Show the current umbrella chain state of a namespace
//! nsgard status --pid 12345
//! ```
//!
//! An intent document is a JSON array of chain intents:
//!
//! ```json
//! [
//!   {
//!     "name": "partition-a",
//!     "direction": "inbound",
//!     "target": "DROP",
//!     "protocol": "tcp",
//!     "source_ports": "--sport 80",
//!     "ipsets": ["peers-a", "peers-b"]
//!   }
//! ]
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

use nsgard::core::intent::{ChainIntent, Direction, render};
use nsgard::core::reconcile::Reconciler;
use nsgard::netns::NetnsPath;
use nsgard::{audit, validators};

#[derive(Parser)]
#[command(name = "nsgard", version, about = "Idempotent iptables chain reconciliation for network namespaces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a namespace's filter table against an intent document
    Reconcile {
        /// Target process whose network namespace is reconciled
        #[arg(long, conflicts_with = "netns")]
        pid: Option<u32>,

        /// Explicit namespace handle (e.g. /run/netns/<name>)
        #[arg(long)]
        netns: Option<PathBuf>,

        /// Intent document (JSON array of chains), or '-' for stdin
        file: PathBuf,
    },

    /// Render the iptables rules an intent document would produce
    Render {
        /// Intent document (JSON array of chains), or '-' for stdin
        file: PathBuf,
    },

    /// Show the current rules of the umbrella chains in a namespace
    Status {
        /// Target process whose network namespace is inspected
        #[arg(long, conflicts_with = "netns")]
        pid: Option<u32>,

        /// Explicit namespace handle (e.g. /run/netns/<name>)
        #[arg(long)]
        netns: Option<PathBuf>,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// iptables needs CAP_NET_ADMIN; refuse early with a clear message instead
/// of surfacing a permission error mid-reconciliation.
fn check_root() -> Result<(), String> {
    if std::env::var_os("NSGARD_TEST_NO_ROOT_CHECK").is_some() {
        return Ok(());
    }

    if nix::unistd::getuid().is_root() {
        Ok(())
    } else {
        Err("nsgard must run as root to mutate iptables state (try sudo)".to_string())
    }
}

fn resolve_namespace(pid: Option<u32>, netns: Option<PathBuf>) -> nsgard::Result<NetnsPath> {
    match (pid, netns) {
        (Some(pid), None) => NetnsPath::from_pid(pid),
        (None, Some(path)) => NetnsPath::from_path(path),
        _ => Err(nsgard::Error::IdentityResolution {
            target: "<cli>".to_string(),
            message: "exactly one of --pid or --netns is required".to_string(),
        }),
    }
}

fn load_intents(file: &PathBuf) -> nsgard::Result<Vec<ChainIntent>> {
    let contents = if file.as_os_str() == "-" {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file)?
    };

    let intents: Vec<ChainIntent> = serde_json::from_str(&contents)?;
    Ok(intents)
}

async fn cmd_reconcile(
    pid: Option<u32>,
    netns: Option<PathBuf>,
    file: &PathBuf,
) -> nsgard::Result<()> {
    check_root().map_err(|message| nsgard::Error::Validation {
        field: "privileges".to_string(),
        message,
    })?;

    let namespace = resolve_namespace(pid, netns)?;
    let intents = load_intents(file)?;

    let reconciler = Reconciler::for_namespace(namespace);
    let result = reconciler.reconcile(&intents).await;

    audit::log_reconcile(
        reconciler.namespace(),
        intents.len(),
        result.is_ok(),
        result.as_ref().err().map(ToString::to_string),
    )
    .await;

    result?;
    println!(
        "reconciled {} chain(s) in {}",
        intents.len(),
        reconciler.namespace()
    );
    Ok(())
}

fn cmd_render(file: &PathBuf) -> nsgard::Result<()> {
    let intents = load_intents(file)?;

    for intent in &intents {
        validators::validate_intent(intent).map_err(|(field, message)| {
            nsgard::Error::Validation { field, message }
        })?;
    }

    for intent in &intents {
        println!("# chain {} ({})", intent.name, intent.direction);
        for rule in render(intent) {
            println!("{rule}");
        }
        println!(
            "# hook: -A {} -j {}",
            intent.direction.umbrella_chain(),
            intent.name
        );
    }
    Ok(())
}

async fn cmd_status(pid: Option<u32>, netns: Option<PathBuf>) -> nsgard::Result<()> {
    check_root().map_err(|message| nsgard::Error::Validation {
        field: "privileges".to_string(),
        message,
    })?;

    let namespace = resolve_namespace(pid, netns)?;
    let reconciler = Reconciler::for_namespace(namespace);
    let prober = reconciler.mutator().prober();

    for direction in [Direction::Inbound, Direction::Outbound] {
        let umbrella = direction.umbrella_chain();
        match prober.list_rules(umbrella).await {
            Ok(listing) => {
                println!("{listing}");
            }
            Err(err) if err.is_not_found() => {
                println!("# {umbrella}: not bootstrapped");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Reconcile { pid, netns, file } => cmd_reconcile(pid, netns, &file).await,
        Commands::Render { file } => cmd_render(&file),
        Commands::Status { pid, netns } => cmd_status(pid, netns).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
