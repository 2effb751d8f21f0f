//! scriptletd — the scriptlet daemon.
//!
//! One binary for a cluster member:
//! - Member endpoint (resources + state for other members' placement runs)
//! - Membership bookkeeping in the local cluster store
//! - Program validation and one-shot placement runs
//!
//! # Usage
//!
//! ```text
//! scriptletd --config /etc/scriptlet/scriptlet.toml serve --listen 0.0.0.0:8443
//! scriptletd --config scriptlet.toml place --program policy.wasm --request c1.json
//! ```

mod place;
mod serve;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scriptlet_cluster::{JoinRequest, MembershipManager};
use scriptlet_core::ScriptletConfig;
use scriptlet_placement::{EngineConfig, PlacementEngine, PlacementProgram};
use scriptlet_state::{MemberVersion, NodeStore, StateStore};

const DEFAULT_LOG_FILTER: &str = "info,scriptletd=debug,scriptlet=debug";
const CLUSTER_DB: &str = "cluster.redb";
const NODE_DB: &str = "node.redb";

#[derive(Parser)]
#[command(name = "scriptletd", about = "Scriptlet placement daemon")]
struct Cli {
    /// Path to scriptlet.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config file.
    Init {
        /// Name of this member.
        #[arg(long)]
        server_name: String,

        #[arg(long, default_value = "scriptlet.toml")]
        output: PathBuf,
    },

    /// Serve this member's resources and state to the rest of the cluster.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8443")]
        listen: SocketAddr,
    },

    /// Register a member in the local cluster store.
    Join {
        #[arg(long)]
        name: String,

        /// host:port of the member's endpoint.
        #[arg(long)]
        address: String,

        #[arg(long, default_value = std::env::consts::ARCH)]
        architecture: String,

        /// Cluster group; repeat for several.
        #[arg(long = "group")]
        groups: Vec<String>,
    },

    /// Compile a placement program and check its imports.
    Validate {
        #[arg(long)]
        program: PathBuf,
    },

    /// Run a placement program against the local cluster store.
    Place(place::PlaceArgs),
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ScriptletConfig> {
    match path {
        Some(path) => {
            let config = ScriptletConfig::from_file(path)?;
            info!(path = %path.display(), "config loaded");
            Ok(config)
        }
        None => {
            warn!("no config file given, using defaults");
            Ok(ScriptletConfig::default())
        }
    }
}

/// Open the cluster and node stores under the configured data directory.
fn open_stores(config: &ScriptletConfig) -> anyhow::Result<(StateStore, NodeStore)> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let cluster_path = data_dir.join(CLUSTER_DB);
    let state = StateStore::open(&cluster_path)?;
    info!(path = ?cluster_path, "cluster store opened");

    let node_path = data_dir.join(NODE_DB);
    let node = NodeStore::open(&node_path)?;
    info!(path = ?node_path, "node store opened");

    Ok((state, node))
}

fn membership(config: &ScriptletConfig, state: StateStore) -> anyhow::Result<MembershipManager> {
    Ok(MembershipManager::new(state)
        .with_offline_threshold(config.offline_threshold()?)
        .with_leader_address(config.leader_address().map(str::to_string)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Init {
            server_name,
            output,
        } => {
            let scaffold = ScriptletConfig::scaffold(&server_name);
            std::fs::write(&output, scaffold.to_toml_string()?)?;
            info!(path = %output.display(), "config written");
            Ok(())
        }
        Command::Serve { listen } => serve::run(&config, listen).await,
        Command::Join {
            name,
            address,
            architecture,
            groups,
        } => {
            let (state, _) = open_stores(&config)?;
            let id = membership(&config, state)?.join(JoinRequest {
                name,
                address,
                architecture,
                groups,
                config: Default::default(),
                version: MemberVersion::default(),
            })?;
            println!("{id}");
            Ok(())
        }
        Command::Validate { program } => {
            let engine = PlacementEngine::new(EngineConfig::from_config(&config)?)?;
            let name = program_name(&program);
            let loaded = PlacementProgram::from_file(engine.engine(), &name, &program)?;
            println!(
                "{}: ok ({} builtin imports)",
                loaded.name(),
                loaded.module().imports().len()
            );
            Ok(())
        }
        Command::Place(args) => place::run(&config, args).await,
    }
}

/// Program name for logs: the file stem, or the whole path.
fn program_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
