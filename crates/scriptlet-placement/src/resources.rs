//! Resource requirements of a placement request.

use scriptlet_core::{
    InstanceResources, PlacementRequest, VM_DEFAULT_CPU_CORES, VM_DEFAULT_MEMORY,
    UnitsError, VM_DEFAULT_ROOT_DISK_SIZE, parse_byte_size, parse_cpuset,
};

use crate::error::{PlacementError, PlacementResult};

/// Resolve CPU, memory and root disk requirements from `request`.
///
/// Containers without limits are unconstrained. Virtual machines fall back
/// to the VM defaults.
pub fn resolve(request: &PlacementRequest) -> PlacementResult<InstanceResources> {
    let is_vm = request.is_vm();
    let mut res = InstanceResources::default();

    res.cpu_cores = match request.config_value("limits.cpu") {
        Some(limit) => Some(cpu_cores(limit)?),
        None if is_vm => Some(VM_DEFAULT_CPU_CORES),
        None => None,
    };

    let memory = match request.config_value("limits.memory") {
        Some(limit) => Some(limit),
        None if is_vm => Some(VM_DEFAULT_MEMORY),
        None => None,
    };
    res.memory_size = memory
        .map(|m| parse_byte_size(m).map_err(|source| PlacementError::Parse {
            key: "limits.memory",
            source,
        }))
        .transpose()?;

    if let Some((_, root)) = request.root_disk() {
        let size = match root.get("size").map(String::as_str).filter(|s| !s.is_empty()) {
            Some(size) => Some(size),
            None if is_vm => Some(VM_DEFAULT_ROOT_DISK_SIZE),
            None => None,
        };
        res.root_disk_size = size
            .map(|s| parse_byte_size(s).map_err(|source| PlacementError::Parse {
                key: "root disk size",
                source,
            }))
            .transpose()?;
    }

    Ok(res)
}

/// `limits.cpu` is either a core count or a set of pinned CPUs. The count
/// must fit in an `i64`.
fn cpu_cores(limit: &str) -> PlacementResult<u64> {
    let parse_error = |source: UnitsError| PlacementError::Parse {
        key: "limits.cpu",
        source,
    };
    let count = match limit.parse::<u64>() {
        Ok(count) => count,
        Err(_) => parse_cpuset(limit).map_err(parse_error)?.len(),
    };
    if count > i64::MAX as u64 {
        return Err(parse_error(UnitsError::Overflow(limit.to_string())));
    }
    Ok(count)
}
