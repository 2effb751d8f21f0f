//! Place mode — one placement run against the local stores.
//!
//! Candidates are the online, non-evacuated members of the cluster store,
//! optionally narrowed by group and architecture. Ctrl-C cancels the run.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use scriptlet_cluster::{CandidateFilter, ClientOptions, HostProbe};
use scriptlet_core::{PlacementRequest, ScriptletConfig};
use scriptlet_placement::{EngineConfig, PlacementEngine, PlacementHost, PlacementProgram};
use scriptlet_state::NodeInfo;

#[derive(Args)]
pub struct PlaceArgs {
    /// Compiled placement program (.wasm or .wat).
    #[arg(long)]
    pub program: PathBuf,

    /// JSON placement request.
    #[arg(long)]
    pub request: PathBuf,

    /// Only consider members of this group.
    #[arg(long)]
    pub group: Option<String>,

    /// Only consider members of these architectures.
    #[arg(long = "architecture")]
    pub architectures: Vec<String>,
}

pub async fn run(config: &ScriptletConfig, args: PlaceArgs) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling placement");
            on_signal.cancel();
        }
    });

    let selected = place(config, &args, &cancel).await;
    signal.abort();

    println!("{}", serde_json::to_string_pretty(&selected?)?);
    Ok(())
}

/// Run the program named by `args` and return the selected member.
pub async fn place(
    config: &ScriptletConfig,
    args: &PlaceArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<NodeInfo>> {
    let (state, node) = crate::open_stores(config)?;
    let membership = crate::membership(config, state)?;

    let local = Arc::new(HostProbe::new(config.server_name()).with_pools(config.storage_pools()));
    let host = PlacementHost::new(config.server_name(), membership.clone(), node, local)
        .with_client_options(ClientOptions {
            token: config.remote_token().map(str::to_string),
            connect_timeout: config.connect_timeout()?,
        });

    let engine = PlacementEngine::new(EngineConfig::from_config(config)?)?;
    let program = PlacementProgram::from_file(
        engine.engine(),
        &crate::program_name(&args.program),
        &args.program,
    )?;

    let request: PlacementRequest = serde_json::from_slice(&std::fs::read(&args.request)?)?;

    let nodes = membership.list_nodes()?;
    let candidates = membership.candidate_members(
        &nodes,
        &CandidateFilter {
            architectures: args.architectures.clone(),
            group: args.group.clone(),
        },
    );
    if candidates.is_empty() {
        anyhow::bail!("no candidate members for {:?}", request.name);
    }
    info!(
        instance = %request.name,
        candidates = candidates.len(),
        "placing instance"
    );

    let selected = engine
        .run(&program, &host, &request, &candidates, cancel)
        .await?;
    Ok(selected.cloned())
}
