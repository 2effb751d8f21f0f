//! scriptlet.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::units::{parse_byte_size, parse_duration};

const DEFAULT_OFFLINE_THRESHOLD: Duration = Duration::from_secs(20);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MEMORY_LIMIT: u64 = 64 * 1024 * 1024;
const DEFAULT_DATA_DIR: &str = "/var/lib/scriptlet";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptletConfig {
    pub cluster: Option<ClusterConfig>,
    pub placement: Option<PlacementConfig>,
    pub remote: Option<RemoteConfig>,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Name of the local cluster member.
    pub server_name: Option<String>,
    pub offline_threshold: Option<String>,
    pub leader_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Deadline for a single scriptlet run.
    pub timeout: Option<String>,
    /// Cap on guest linear memory, as a byte size.
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Bearer token presented to (and required by) member endpoints.
    pub token: Option<String>,
    pub connect_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
    /// Storage pool name → mount path, reported in member state.
    pub pools: Option<BTreeMap<String, PathBuf>>,
}

impl ScriptletConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScriptletConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal config for a member.
    pub fn scaffold(server_name: &str) -> Self {
        ScriptletConfig {
            cluster: Some(ClusterConfig {
                server_name: Some(server_name.to_string()),
                offline_threshold: Some("20s".to_string()),
                leader_address: None,
            }),
            placement: Some(PlacementConfig {
                timeout: Some("30s".to_string()),
                memory_limit: Some("64MiB".to_string()),
            }),
            remote: None,
            storage: Some(StorageConfig {
                data_dir: Some(PathBuf::from(DEFAULT_DATA_DIR)),
                pools: None,
            }),
        }
    }

    pub fn server_name(&self) -> &str {
        self.cluster
            .as_ref()
            .and_then(|c| c.server_name.as_deref())
            .unwrap_or("none")
    }

    pub fn offline_threshold(&self) -> anyhow::Result<Duration> {
        match self.cluster.as_ref().and_then(|c| c.offline_threshold.as_deref()) {
            Some(s) => Ok(parse_duration(s)?),
            None => Ok(DEFAULT_OFFLINE_THRESHOLD),
        }
    }

    pub fn leader_address(&self) -> Option<&str> {
        self.cluster.as_ref().and_then(|c| c.leader_address.as_deref())
    }

    /// Per-run deadline; `None` means runs are bounded only by the caller.
    pub fn placement_timeout(&self) -> anyhow::Result<Option<Duration>> {
        self.placement
            .as_ref()
            .and_then(|p| p.timeout.as_deref())
            .map(parse_duration)
            .transpose()
            .map_err(Into::into)
    }

    pub fn memory_limit(&self) -> anyhow::Result<u64> {
        match self.placement.as_ref().and_then(|p| p.memory_limit.as_deref()) {
            Some(s) => Ok(parse_byte_size(s)?),
            None => Ok(DEFAULT_MEMORY_LIMIT),
        }
    }

    pub fn remote_token(&self) -> Option<&str> {
        self.remote.as_ref().and_then(|r| r.token.as_deref())
    }

    pub fn connect_timeout(&self) -> anyhow::Result<Duration> {
        match self.remote.as_ref().and_then(|r| r.connect_timeout.as_deref()) {
            Some(s) => Ok(parse_duration(s)?),
            None => Ok(DEFAULT_CONNECT_TIMEOUT),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    pub fn storage_pools(&self) -> BTreeMap<String, PathBuf> {
        self.storage
            .as_ref()
            .and_then(|s| s.pools.clone())
            .unwrap_or_default()
    }
}
