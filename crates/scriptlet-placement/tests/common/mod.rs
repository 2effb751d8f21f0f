//! Shared fixtures for placement integration tests.
//!
//! Programs are generated as WAT: a bump allocator, one data segment per
//! builtin call holding its JSON arguments, and an `instance_placement`
//! entry that makes the calls in order.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use scriptlet_cluster::{
    ClusterError, ClusterResult, JoinRequest, LocalMember, MembershipManager, member_router,
};
use scriptlet_core::{
    ClusterMemberState, ConfigMap, DeviceMap, InstanceType, PlacementReason, PlacementRequest,
    Resources,
};
use scriptlet_placement::{EngineConfig, PlacementEngine, PlacementHost, PlacementProgram};
use scriptlet_state::{MemberVersion, NodeInfo, NodeStore, StateStore};

pub const SERVER_NAME: &str = "a";

/// Route engine logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Program builder ───────────────────────────────────────────────

/// One builtin call made by a generated program.
pub struct Call {
    builtin: &'static str,
    args: Option<String>,
}

impl Call {
    pub fn new(builtin: &'static str, args: serde_json::Value) -> Self {
        Self {
            builtin,
            args: Some(args.to_string()),
        }
    }

    /// Call with no argument document.
    pub fn bare(builtin: &'static str) -> Self {
        Self {
            builtin,
            args: None,
        }
    }

    /// Call with a literal argument document, which need not be valid JSON.
    pub fn raw(builtin: &'static str, args: &str) -> Self {
        Self {
            builtin,
            args: Some(args.to_string()),
        }
    }
}

/// What the generated entry point returns.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    Nothing,
    /// The packed result of the last call.
    LastResult,
    /// The packed arguments the entry point received.
    EntryArgs,
}

const DATA_BASE: usize = 1024;
const HEAP_BASE: usize = 65536;

fn escape(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "\\{b:02x}");
        out
    })
}

/// Memory, allocator and imports shared by every generated module.
fn prelude(builtins: &BTreeSet<&'static str>) -> String {
    let mut wat = String::from("(module\n");
    for name in builtins {
        let _ = writeln!(
            wat,
            "  (import \"scriptlet\" \"{name}\" (func ${name} (param i32 i32) (result i64)))"
        );
    }
    let _ = writeln!(
        wat,
        r#"  (memory (export "memory") 4)
  (global $heap (mut i32) (i32.const {HEAP_BASE}))
  (func (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    global.get $heap
    local.set $ptr
    global.get $heap
    local.get $len
    i32.add
    global.set $heap
    local.get $ptr)"#
    );
    wat
}

/// WAT for a program making `calls` in order.
pub fn program_wat(calls: &[Call], returns: Returns) -> String {
    let builtins: BTreeSet<_> = calls.iter().map(|c| c.builtin).collect();
    let mut wat = prelude(&builtins);

    let mut offset = DATA_BASE;
    let mut body = String::new();
    for call in calls {
        let (ptr, len) = match &call.args {
            Some(args) => {
                let _ = writeln!(
                    wat,
                    "  (data (i32.const {offset}) \"{}\")",
                    escape(args.as_bytes())
                );
                let range = (offset, args.len());
                offset += args.len().next_multiple_of(8);
                range
            }
            None => (0, 0),
        };
        let _ = writeln!(
            body,
            "    (local.set $r (call ${} (i32.const {ptr}) (i32.const {len})))",
            call.builtin
        );
    }
    assert!(offset < HEAP_BASE, "argument data overlaps the heap");

    let result = match returns {
        Returns::Nothing => "    (i64.const 0)".to_string(),
        Returns::LastResult => "    (local.get $r)".to_string(),
        Returns::EntryArgs => "    (i64.or\n      (i64.shl (i64.extend_i32_u (local.get 0)) (i64.const 32))\n      (i64.extend_i32_u (local.get 1)))".to_string(),
    };

    let _ = write!(
        wat,
        "  (func (export \"instance_placement\") (param i32 i32) (result i64)\n    (local $r i64)\n{body}{result})\n)\n"
    );
    wat
}

pub fn program_bytes(calls: &[Call], returns: Returns) -> Vec<u8> {
    wat::parse_str(program_wat(calls, returns)).unwrap()
}

/// A program whose entry point never returns.
pub fn spinning_program() -> Vec<u8> {
    let mut wat = prelude(&BTreeSet::new());
    wat.push_str(
        r#"  (func (export "instance_placement") (param i32 i32) (result i64)
    (loop $spin (br $spin))
    (i64.const 0))
)
"#,
    );
    wat::parse_str(wat).unwrap()
}

/// Looks up `member_name` and then spins, so only a stop can end it.
pub fn lookup_then_spin(builtin: &'static str, member: &str) -> Vec<u8> {
    let args = serde_json::json!({ "member_name": member }).to_string();
    let mut builtins = BTreeSet::new();
    builtins.insert(builtin);
    let mut wat = prelude(&builtins);
    let _ = write!(
        wat,
        r#"  (data (i32.const {DATA_BASE}) "{data}")
  (func (export "instance_placement") (param i32 i32) (result i64)
    (drop (call ${builtin} (i32.const {DATA_BASE}) (i32.const {len})))
    (loop $spin (br $spin))
    (i64.const 0))
)
"#,
        data = escape(args.as_bytes()),
        len = args.len(),
    );
    wat::parse_str(wat).unwrap()
}

// ── Host fixtures ─────────────────────────────────────────────────

/// Fixed answers for the local member.
pub struct FixedMember {
    pub name: String,
    pub cpus: u64,
}

impl LocalMember for FixedMember {
    fn resources(&self) -> ClusterResult<Resources> {
        let mut r = Resources::default();
        r.cpu.architecture = "x86_64".to_string();
        r.cpu.total = self.cpus;
        r.memory.total = 32 << 30;
        Ok(r)
    }

    fn member_state(&self, name: &str) -> ClusterResult<ClusterMemberState> {
        if name != self.name {
            return Err(ClusterError::UnknownMember(name.to_string()));
        }
        let mut s = ClusterMemberState::default();
        s.sysinfo.load_averages = vec![1.0, 0.5, 0.25];
        Ok(s)
    }
}

/// A local member whose host reads block for `delay` before answering.
pub struct SlowMember {
    pub inner: FixedMember,
    pub delay: Duration,
}

impl LocalMember for SlowMember {
    fn resources(&self) -> ClusterResult<Resources> {
        std::thread::sleep(self.delay);
        self.inner.resources()
    }

    fn member_state(&self, name: &str) -> ClusterResult<ClusterMemberState> {
        std::thread::sleep(self.delay);
        self.inner.member_state(name)
    }
}

pub struct Fixture {
    pub engine: PlacementEngine,
    pub host: PlacementHost,
    pub membership: MembershipManager,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let local = Arc::new(FixedMember {
            name: SERVER_NAME.to_string(),
            cpus: 8,
        });
        Self::with_local(config, local)
    }

    pub fn with_local(config: EngineConfig, local: Arc<dyn LocalMember>) -> Self {
        init_tracing();
        let state = StateStore::open_in_memory().unwrap();
        let node = NodeStore::open_in_memory().unwrap();
        let membership = MembershipManager::new(state);
        let host = PlacementHost::new(SERVER_NAME, membership.clone(), node, local);
        Self {
            engine: PlacementEngine::new(config).unwrap(),
            host,
            membership,
        }
    }

    pub fn state(&self) -> &StateStore {
        self.membership.state()
    }

    /// Join `name` at `address` and return its stored record.
    pub fn join(&self, name: &str, address: &str) -> NodeInfo {
        self.join_with_groups(name, address, &[])
    }

    pub fn join_with_groups(&self, name: &str, address: &str, groups: &[&str]) -> NodeInfo {
        self.membership
            .join(JoinRequest {
                name: name.to_string(),
                address: address.to_string(),
                architecture: "x86_64".to_string(),
                groups: groups.iter().map(|g| g.to_string()).collect(),
                config: ConfigMap::new(),
                version: MemberVersion {
                    schema: 1,
                    api_extensions: 1,
                },
            })
            .unwrap();
        self.membership
            .list_nodes()
            .unwrap()
            .into_iter()
            .find(|n| n.name == name)
            .unwrap()
    }

    /// Members `names`, joined at unroutable addresses.
    pub fn members(&self, names: &[&str]) -> Vec<NodeInfo> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| self.join(name, &format!("10.0.0.{}:8443", i + 1)))
            .collect()
    }

    pub fn program(&self, bytes: &[u8]) -> PlacementProgram {
        self.engine.load_program("test", bytes).unwrap()
    }
}

pub fn container(name: &str) -> PlacementRequest {
    PlacementRequest {
        name: name.to_string(),
        instance_type: InstanceType::Container,
        description: String::new(),
        config: ConfigMap::new(),
        devices: DeviceMap::new(),
        profiles: vec!["default".to_string()],
        project: "default".to_string(),
        reason: PlacementReason::New,
    }
}

pub fn virtual_machine(name: &str) -> PlacementRequest {
    PlacementRequest {
        instance_type: InstanceType::VirtualMachine,
        ..container(name)
    }
}

/// Serve the member endpoint for `local` on a loopback port.
pub async fn spawn_member_endpoint(local: FixedMember) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = member_router(Arc::new(local), None);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

/// A listener that accepts connections and never answers.
pub async fn spawn_silent_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            match listener.accept().await {
                Ok((stream, _)) => held.push(stream),
                Err(_) => return,
            }
        }
    });
    addr.to_string()
}

pub fn short_timeout() -> EngineConfig {
    EngineConfig {
        timeout: Some(Duration::from_millis(200)),
        ..EngineConfig::default()
    }
}
