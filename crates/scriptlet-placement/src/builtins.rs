//! The builtin catalogue and the host side of each builtin.
//!
//! [`Builtin::ALL`] is the single list that both the linker and program
//! validation are driven from.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scriptlet_cluster::{
    CandidateFilter, ClusterError, ClusterResult, LocalMember, MemberClient, candidate_members,
    epoch_secs,
};
use scriptlet_state::InstanceFilter;

use crate::args::{ArgsError, BoundArgs, CallArgs, Param};
use crate::error::{PlacementError, PlacementResult};
use crate::invocation::{InvocationContext, InvocationState, MemberRoute};
use crate::marshal::to_value;
use crate::resources;
use crate::value::Value;

/// Returned to the program when it names a member that is not a candidate.
pub const INVALID_MEMBER_NAME: &str = "Invalid member name";

static NO_PARAMS: &[Param] = &[];
static MEMBER_NAME: &[Param] = &[Param::required("member_name")];
static INSTANCE_FILTER: &[Param] = &[Param::optional("project"), Param::optional("location")];
static INSTANCE_COUNT: &[Param] = &[
    Param::optional("project"),
    Param::optional("location"),
    Param::optional("pending"),
];
static MEMBER_GROUP: &[Param] = &[Param::optional("group")];
static PROJECT_NAME: &[Param] = &[Param::required("name")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    LogInfo,
    LogWarn,
    LogError,
    SetTarget,
    GetClusterMemberResources,
    GetClusterMemberState,
    GetInstanceResources,
    GetInstances,
    GetInstancesCount,
    GetClusterMembers,
    GetProject,
}

impl Builtin {
    pub const ALL: [Builtin; 11] = [
        Builtin::LogInfo,
        Builtin::LogWarn,
        Builtin::LogError,
        Builtin::SetTarget,
        Builtin::GetClusterMemberResources,
        Builtin::GetClusterMemberState,
        Builtin::GetInstanceResources,
        Builtin::GetInstances,
        Builtin::GetInstancesCount,
        Builtin::GetClusterMembers,
        Builtin::GetProject,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::LogInfo => "log_info",
            Builtin::LogWarn => "log_warn",
            Builtin::LogError => "log_error",
            Builtin::SetTarget => "set_target",
            Builtin::GetClusterMemberResources => "get_cluster_member_resources",
            Builtin::GetClusterMemberState => "get_cluster_member_state",
            Builtin::GetInstanceResources => "get_instance_resources",
            Builtin::GetInstances => "get_instances",
            Builtin::GetInstancesCount => "get_instances_count",
            Builtin::GetClusterMembers => "get_cluster_members",
            Builtin::GetProject => "get_project",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Declared parameters. Log builtins are variadic and ignore these.
    pub fn params(self) -> &'static [Param] {
        match self {
            Builtin::LogInfo | Builtin::LogWarn | Builtin::LogError => NO_PARAMS,
            Builtin::SetTarget
            | Builtin::GetClusterMemberResources
            | Builtin::GetClusterMemberState => MEMBER_NAME,
            Builtin::GetInstanceResources => NO_PARAMS,
            Builtin::GetInstances => INSTANCE_FILTER,
            Builtin::GetInstancesCount => INSTANCE_COUNT,
            Builtin::GetClusterMembers => MEMBER_GROUP,
            Builtin::GetProject => PROJECT_NAME,
        }
    }

    pub fn is_variadic(self) -> bool {
        matches!(self, Builtin::LogInfo | Builtin::LogWarn | Builtin::LogError)
    }
}

fn invalid(builtin: Builtin) -> impl Fn(ArgsError) -> PlacementError {
    move |e| PlacementError::InvalidArguments {
        builtin: builtin.name(),
        reason: e.to_string(),
    }
}

/// Run `builtin` with raw `args` against the invocation.
pub async fn call(
    state: &mut InvocationState,
    builtin: Builtin,
    args: CallArgs,
) -> PlacementResult<Value> {
    let bad = invalid(builtin);
    let bind = |args: CallArgs| args.bind(builtin.params()).map_err(&bad);
    let ctx = state.context.clone();
    let stop = state.stop.clone();
    debug!(builtin = builtin.name(), "builtin called");

    match builtin {
        Builtin::LogInfo | Builtin::LogWarn | Builtin::LogError => Ok(log(builtin, args)),
        Builtin::SetTarget => {
            let args = bind(args)?;
            let name = args.required_string("member_name").map_err(&bad)?;
            Ok(set_target(state, name))
        }
        Builtin::GetClusterMemberResources => {
            let args = bind(args)?;
            let name = args.required_string("member_name").map_err(&bad)?;
            cancellable(&stop, member_resources(&ctx, name)).await
        }
        Builtin::GetClusterMemberState => {
            let args = bind(args)?;
            let name = args.required_string("member_name").map_err(&bad)?;
            cancellable(&stop, member_state(&ctx, name)).await
        }
        Builtin::GetInstanceResources => {
            bind(args)?;
            instance_resources(&ctx)
        }
        Builtin::GetInstances => {
            let filter = instance_filter(&bind(args)?).map_err(&bad)?;
            instances(&ctx, &filter)
        }
        Builtin::GetInstancesCount => {
            let args = bind(args)?;
            let filter = instance_filter(&args).map_err(&bad)?;
            let pending = args.bool("pending").map_err(&bad)?.unwrap_or(false);
            instances_count(&ctx, &filter, pending)
        }
        Builtin::GetClusterMembers => {
            let args = bind(args)?;
            let group = args.string("group").map_err(&bad)?;
            cluster_members(&ctx, group.filter(|g| !g.is_empty()))
        }
        Builtin::GetProject => {
            let args = bind(args)?;
            let name = args.required_string("name").map_err(&bad)?;
            project(&ctx, name)
        }
    }
}

/// Race a lookup against the run's stop token.
async fn cancellable(
    stop: &CancellationToken,
    lookup: impl Future<Output = PlacementResult<Value>>,
) -> PlacementResult<Value> {
    tokio::select! {
        biased;
        _ = stop.cancelled() => Err(PlacementError::Cancelled),
        result = lookup => result,
    }
}

fn instance_filter(args: &BoundArgs) -> Result<InstanceFilter, ArgsError> {
    let non_empty = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);
    Ok(InstanceFilter {
        project: non_empty(args.string("project")?),
        location: non_empty(args.string("location")?),
    })
}

// ── Logging ────────────────────────────────────────────────────────

macro_rules! script_log {
    ($level:ident, $message:expr, $fields:expr) => {
        if $fields.is_empty() {
            tracing::$level!(target: "scriptlet", scriptlet = "instance_placement", "{}", $message)
        } else {
            tracing::$level!(
                target: "scriptlet",
                scriptlet = "instance_placement",
                fields = %$fields,
                "{}",
                $message
            )
        }
    };
}

/// Positional parts are concatenated into the message; named arguments
/// become `key=value` fields.
pub fn log(builtin: Builtin, args: CallArgs) -> Value {
    let message: String = args
        .positional
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let fields = args
        .named
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");

    match builtin {
        Builtin::LogWarn => script_log!(warn, message, fields),
        Builtin::LogError => script_log!(error, message, fields),
        _ => script_log!(info, message, fields),
    }
    Value::None
}

// ── Target selection ───────────────────────────────────────────────

/// Select `name` as the placement target.
pub fn set_target(state: &mut InvocationState, name: &str) -> Value {
    match state.context.candidate_index(name) {
        Some(index) => {
            state.target.select(index);
            info!(member = %name, "placement target set");
            Value::None
        }
        None => {
            error!(member = %name, "placement program set invalid member target");
            state.target.reject(name);
            Value::from(INVALID_MEMBER_NAME)
        }
    }
}

// ── Member lookups ─────────────────────────────────────────────────

fn remote_err(member: &str) -> impl Fn(ClusterError) -> PlacementError + '_ {
    move |source| PlacementError::Remote {
        member: member.to_string(),
        source,
    }
}

fn local_err(member: &str) -> impl Fn(ClusterError) -> PlacementError + '_ {
    move |source| PlacementError::Local {
        member: member.to_string(),
        source,
    }
}

/// Run a local lookup on the blocking pool so a slow host read neither
/// stalls the runtime nor outlives cancellation of the run.
async fn local_lookup<T: Send + 'static>(
    ctx: &InvocationContext,
    member: &str,
    lookup: impl FnOnce(&dyn LocalMember) -> ClusterResult<T> + Send + 'static,
) -> PlacementResult<T> {
    let local = ctx.host.local();
    tokio::task::spawn_blocking(move || lookup(local.as_ref()))
        .await
        .map_err(|e| PlacementError::Local {
            member: member.to_string(),
            source: ClusterError::Probe(format!("local lookup task failed: {e}")),
        })?
        .map_err(local_err(member))
}

pub async fn member_resources(ctx: &InvocationContext, name: &str) -> PlacementResult<Value> {
    let resources = match ctx.route(name) {
        MemberRoute::Local => local_lookup(ctx, name, |local| local.resources()).await?,
        MemberRoute::Remote(node) => {
            let mut client = MemberClient::connect(&node.address, ctx.host.client_options())
                .await
                .map_err(remote_err(name))?;
            client.resources().await.map_err(remote_err(name))?
        }
        MemberRoute::Unknown => {
            warn!(member = %name, "resources requested for unknown member");
            return Ok(Value::from(INVALID_MEMBER_NAME));
        }
    };

    to_value(&resources)
        .map_err(|e| PlacementError::marshal(format!("cluster member resources for {name:?}"), e))
}

pub async fn member_state(ctx: &InvocationContext, name: &str) -> PlacementResult<Value> {
    let state = match ctx.route(name) {
        MemberRoute::Local => {
            let member = name.to_string();
            local_lookup(ctx, name, move |local| local.member_state(&member)).await?
        }
        MemberRoute::Remote(node) => {
            let mut client = MemberClient::connect(&node.address, ctx.host.client_options())
                .await
                .map_err(remote_err(name))?;
            client.member_state(name).await.map_err(remote_err(name))?
        }
        MemberRoute::Unknown => {
            warn!(member = %name, "state requested for unknown member");
            return Ok(Value::from(INVALID_MEMBER_NAME));
        }
    };

    to_value(&state)
        .map_err(|e| PlacementError::marshal(format!("cluster member state for {name:?}"), e))
}

// ── Request and store lookups ──────────────────────────────────────

pub fn instance_resources(ctx: &InvocationContext) -> PlacementResult<Value> {
    let res = resources::resolve(&ctx.request)?;
    to_value(&res).map_err(|e| PlacementError::marshal("instance resources", e))
}

pub fn instances(ctx: &InvocationContext, filter: &InstanceFilter) -> PlacementResult<Value> {
    let list = ctx
        .host
        .cluster()
        .read(|tx| tx.instances(filter))
        .map_err(|e| PlacementError::state("loading instances", e))?;
    to_value(&list).map_err(|e| PlacementError::marshal("instances", e))
}

pub fn instances_count(
    ctx: &InvocationContext,
    filter: &InstanceFilter,
    include_pending: bool,
) -> PlacementResult<Value> {
    let count = ctx
        .host
        .cluster()
        .read(|tx| tx.instances_count(filter, include_pending))
        .map_err(|e| PlacementError::state("counting instances", e))?;
    to_value(&count).map_err(|e| PlacementError::marshal("instance count", e))
}

pub fn cluster_members(ctx: &InvocationContext, group: Option<&str>) -> PlacementResult<Value> {
    let nodes = ctx
        .host
        .membership()
        .list_nodes()
        .map_err(|e| PlacementError::state("loading cluster members", e))?;

    let filter = CandidateFilter {
        architectures: Vec::new(),
        group: group.map(str::to_string),
    };
    let now = epoch_secs();
    let members = candidate_members(&nodes, &filter, ctx.snapshot.offline_threshold, now);
    let rendered = ctx.snapshot.render_all(&members, now);

    to_value(&rendered).map_err(|e| PlacementError::marshal("cluster members", e))
}

pub fn project(ctx: &InvocationContext, name: &str) -> PlacementResult<Value> {
    let project = ctx
        .host
        .cluster()
        .read(|tx| tx.project(name))
        .map_err(|e| PlacementError::state("loading project", e))?;
    to_value(&project).map_err(|e| PlacementError::marshal("project", e))
}
