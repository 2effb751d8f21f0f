//! Local resource and health probing.
//!
//! [`LocalMember`] is what the member endpoint serves and what placement uses
//! when the member being asked about is the one running the placement.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};

use tracing::debug;

use scriptlet_core::{
    ClusterMemberState, ClusterMemberSysInfo, CpuResources, DiskResources, MemoryResources,
    Resources, StoragePoolState, StorageResources, StorageSpace,
};

use crate::error::{ClusterError, ClusterResult};

/// Resource and health counters for the member this process runs on.
pub trait LocalMember: Send + Sync {
    fn resources(&self) -> ClusterResult<Resources>;

    /// State of the member named `name`, which must be this member.
    fn member_state(&self, name: &str) -> ClusterResult<ClusterMemberState>;
}

/// Reads counters from procfs and `statvfs`.
pub struct HostProbe {
    server_name: String,
    proc_root: PathBuf,
    pools: BTreeMap<String, PathBuf>,
}

impl HostProbe {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            proc_root: PathBuf::from("/proc"),
            pools: BTreeMap::new(),
        }
    }

    /// Storage pools to report, by name and mount path.
    pub fn with_pools(mut self, pools: BTreeMap<String, PathBuf>) -> Self {
        self.pools = pools;
        self
    }

    /// Read procfs files from somewhere other than `/proc`.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    fn read_proc(&self, file: &str) -> ClusterResult<String> {
        let path = self.proc_root.join(file);
        std::fs::read_to_string(&path)
            .map_err(|e| ClusterError::Probe(format!("reading {}: {e}", path.display())))
    }
}

impl LocalMember for HostProbe {
    fn resources(&self) -> ClusterResult<Resources> {
        let mem = parse_meminfo(&self.read_proc("meminfo")?);

        let mut disks = Vec::with_capacity(self.pools.len());
        for (name, path) in &self.pools {
            let space = statvfs(path)?;
            disks.push(DiskResources {
                id: name.clone(),
                size: space.total,
                available: space.total.saturating_sub(space.used),
            });
        }
        let total = disks.iter().map(|d| d.size).sum();

        Ok(Resources {
            cpu: CpuResources {
                architecture: std::env::consts::ARCH.to_string(),
                cores: num_cpus::get_physical() as u64,
                total: num_cpus::get() as u64,
            },
            memory: MemoryResources {
                used: mem.total.saturating_sub(mem.available),
                total: mem.total,
            },
            storage: StorageResources { disks, total },
        })
    }

    fn member_state(&self, name: &str) -> ClusterResult<ClusterMemberState> {
        if name != self.server_name {
            return Err(ClusterError::UnknownMember(name.to_string()));
        }

        let mem = parse_meminfo(&self.read_proc("meminfo")?);
        let load = parse_loadavg(&self.read_proc("loadavg")?)?;
        let uptime = parse_uptime(&self.read_proc("uptime")?)?;

        let mut storage_pools = BTreeMap::new();
        for (pool, path) in &self.pools {
            storage_pools.insert(pool.clone(), StoragePoolState { space: statvfs(path)? });
        }

        debug!(member = %name, pools = storage_pools.len(), "probed member state");

        Ok(ClusterMemberState {
            sysinfo: ClusterMemberSysInfo {
                uptime,
                load_averages: load.averages,
                total_ram: mem.total,
                free_ram: mem.free,
                shared_ram: mem.shared,
                buffered_ram: mem.buffers,
                total_swap: mem.swap_total,
                free_swap: mem.swap_free,
                processes: load.processes,
                logical_cpus: num_cpus::get() as u64,
            },
            storage_pools,
        })
    }
}

/// Byte counters from `/proc/meminfo`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub shared: u64,
    pub buffers: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// Parse `/proc/meminfo`. Unknown lines are ignored, values are in kB.
pub fn parse_meminfo(content: &str) -> MemInfo {
    let mut info = MemInfo::default();
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) else {
            continue;
        };
        let bytes = kb * 1024;
        match key {
            "MemTotal" => info.total = bytes,
            "MemFree" => info.free = bytes,
            "MemAvailable" => info.available = bytes,
            "Shmem" => info.shared = bytes,
            "Buffers" => info.buffers = bytes,
            "SwapTotal" => info.swap_total = bytes,
            "SwapFree" => info.swap_free = bytes,
            _ => {}
        }
    }
    info
}

#[derive(Debug, PartialEq)]
pub struct LoadAvg {
    pub averages: Vec<f64>,
    /// Total scheduling entities (the denominator of the fourth field).
    pub processes: u64,
}

/// Parse `/proc/loadavg`, e.g. `0.52 0.58 0.59 2/1234 56789`.
pub fn parse_loadavg(content: &str) -> ClusterResult<LoadAvg> {
    let invalid = || ClusterError::Probe(format!("invalid loadavg: {content:?}"));
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(invalid());
    }

    let averages = fields[..3]
        .iter()
        .map(|f| f.parse::<f64>().map_err(|_| invalid()))
        .collect::<ClusterResult<Vec<_>>>()?;
    let processes = fields[3]
        .split_once('/')
        .and_then(|(_, total)| total.parse().ok())
        .ok_or_else(invalid)?;

    Ok(LoadAvg { averages, processes })
}

/// Parse `/proc/uptime` into whole seconds.
pub fn parse_uptime(content: &str) -> ClusterResult<i64> {
    content
        .split_whitespace()
        .next()
        .and_then(|f| f.parse::<f64>().ok())
        .map(|secs| secs as i64)
        .ok_or_else(|| ClusterError::Probe(format!("invalid uptime: {content:?}")))
}

/// Filesystem usage of the mount holding `path`.
pub fn statvfs(path: &Path) -> ClusterResult<StorageSpace> {
    let cpath = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|e| ClusterError::Probe(format!("invalid path {}: {e}", path.display())))?;

    let mut stat = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `cpath` is NUL-terminated and `stat` is only read on success.
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return Err(ClusterError::Probe(format!(
            "statvfs {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }
    let stat = unsafe { stat.assume_init() };

    let block = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * block;
    let free = stat.f_bfree as u64 * block;
    Ok(StorageSpace {
        used: total.saturating_sub(free),
        total,
    })
}
