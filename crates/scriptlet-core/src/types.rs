//! API types shared across scriptlet crates.
//!
//! These are the shapes a placement program sees after marshalling, so the
//! serde field names here are part of the scriptlet surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Flat `key → value` configuration map.
pub type ConfigMap = BTreeMap<String, String>;

/// Device name → device configuration.
pub type DeviceMap = BTreeMap<String, ConfigMap>;

/// Default CPU cores for a virtual machine without `limits.cpu`.
pub const VM_DEFAULT_CPU_CORES: u64 = 1;

/// Default memory for a virtual machine without `limits.memory`.
pub const VM_DEFAULT_MEMORY: &str = "1GiB";

/// Default root disk size for a virtual machine whose root disk has no `size`.
pub const VM_DEFAULT_ROOT_DISK_SIZE: &str = "10GiB";

// ── Placement request ─────────────────────────────────────────────

/// Kind of instance being placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstanceType {
    #[default]
    #[serde(rename = "container")]
    Container,
    #[serde(rename = "virtual-machine")]
    VirtualMachine,
}

/// Why a placement is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementReason {
    #[default]
    New,
    Evacuation,
    Relocation,
}

/// A pending instance placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub devices: DeviceMap,
    #[serde(default)]
    pub profiles: Vec<String>,
    pub project: String,
    #[serde(default)]
    pub reason: PlacementReason,
}

impl PlacementRequest {
    pub fn is_vm(&self) -> bool {
        self.instance_type == InstanceType::VirtualMachine
    }

    /// Non-empty configuration value for `key`.
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// The request's root disk device, if exactly one is defined.
    pub fn root_disk(&self) -> Option<(&str, &ConfigMap)> {
        let mut roots = self.devices.iter().filter(|(_, d)| is_root_disk(d));
        let (name, device) = roots.next()?;
        if roots.next().is_some() {
            return None;
        }
        Some((name.as_str(), device))
    }
}

/// A disk device mounted at `/` that is backed by a pool rather than a source path.
pub fn is_root_disk(device: &ConfigMap) -> bool {
    device.get("type").is_some_and(|t| t == "disk")
        && device.get("path").is_some_and(|p| p == "/")
        && device.get("source").is_none_or(|s| s.is_empty())
}

/// Resources a placed instance will need. `None` means unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceResources {
    pub cpu_cores: Option<u64>,
    pub memory_size: Option<u64>,
    pub root_disk_size: Option<u64>,
}

// ── Cluster members ───────────────────────────────────────────────

/// Externally-visible status of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    Online,
    Offline,
    Evacuated,
    Blocked,
}

/// A cluster member as rendered for API consumers and placement programs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub server_name: String,
    pub url: String,
    pub database: bool,
    pub status: MemberStatus,
    pub message: String,
    pub architecture: String,
    pub failure_domain: String,
    pub description: String,
    pub config: ConfigMap,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
}

// ── Resources ─────────────────────────────────────────────────────

/// Hardware resources of a cluster member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: CpuResources,
    pub memory: MemoryResources,
    pub storage: StorageResources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuResources {
    pub architecture: String,
    /// Physical cores.
    pub cores: u64,
    /// Logical threads.
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryResources {
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageResources {
    pub disks: Vec<DiskResources>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskResources {
    pub id: String,
    pub size: u64,
    pub available: u64,
}

// ── Member state ──────────────────────────────────────────────────

/// Health and load of a cluster member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMemberState {
    pub sysinfo: ClusterMemberSysInfo,
    pub storage_pools: BTreeMap<String, StoragePoolState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMemberSysInfo {
    /// Seconds since boot.
    pub uptime: i64,
    /// 1, 5 and 15 minute load averages.
    pub load_averages: Vec<f64>,
    pub total_ram: u64,
    pub free_ram: u64,
    pub shared_ram: u64,
    pub buffered_ram: u64,
    pub total_swap: u64,
    pub free_swap: u64,
    pub processes: u64,
    pub logical_cpus: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoragePoolState {
    pub space: StorageSpace,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSpace {
    pub used: u64,
    pub total: u64,
}

// ── Instances and projects ────────────────────────────────────────

/// An instance known to the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub project: String,
    /// Name of the member hosting the instance.
    pub location: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub status: String,
    pub architecture: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub devices: DeviceMap,
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Unix timestamp (seconds).
    pub created_at: u64,
}

/// A project definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub used_by: Vec<String>,
}
