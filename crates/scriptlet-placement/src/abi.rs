//! Guest calling convention.
//!
//! A placement program is a core wasm module that exports its linear
//! `memory` and an `alloc(len) -> ptr` function. Builtins are imported from
//! the `scriptlet` module with the signature `(ptr, len) -> packed`, and the
//! entry point is exported with the same signature.
//!
//! `(ptr, len)` names a JSON-encoded [`Value`] in guest memory. `packed` is
//! `ptr << 32 | len` of a JSON [`Value`] the host wrote through `alloc`, or
//! `0` for `None`.

use thiserror::Error;
use wasmtime::{AsContext, AsContextMut, Caller, Extern, Instance, Memory, TypedFunc};

use crate::invocation::InvocationState;
use crate::value::Value;

pub const IMPORT_MODULE: &str = "scriptlet";
pub const ENTRY_POINT: &str = "instance_placement";
pub const MEMORY_EXPORT: &str = "memory";
pub const ALLOC_EXPORT: &str = "alloc";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("program does not export {0:?}")]
    MissingExport(&'static str),

    #[error("export {name:?} has the wrong type: {reason}")]
    BadExport { name: &'static str, reason: String },

    #[error("guest range {ptr:#x}+{len} is outside linear memory")]
    OutOfBounds { ptr: u32, len: u32 },

    #[error("guest passed malformed JSON: {0}")]
    InvalidJson(String),

    #[error("value of {0} bytes is too large for the guest")]
    TooLarge(usize),
}

/// Pack a guest range into a builtin return value.
pub fn pack(ptr: u32, len: u32) -> i64 {
    (((ptr as u64) << 32) | len as u64) as i64
}

pub fn unpack(packed: i64) -> (u32, u32) {
    let raw = packed as u64;
    ((raw >> 32) as u32, raw as u32)
}

/// Handles to the guest's memory and allocator.
#[derive(Clone)]
pub struct GuestMemory {
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
}

impl GuestMemory {
    /// Resolve from inside a host call.
    pub fn from_caller(caller: &mut Caller<'_, InvocationState>) -> Result<Self, AbiError> {
        let memory = caller
            .get_export(MEMORY_EXPORT)
            .and_then(Extern::into_memory)
            .ok_or(AbiError::MissingExport(MEMORY_EXPORT))?;
        let alloc = caller
            .get_export(ALLOC_EXPORT)
            .and_then(Extern::into_func)
            .ok_or(AbiError::MissingExport(ALLOC_EXPORT))?
            .typed::<i32, i32>(&caller)
            .map_err(|e| AbiError::BadExport {
                name: ALLOC_EXPORT,
                reason: e.to_string(),
            })?;
        Ok(Self { memory, alloc })
    }

    /// Resolve from an instantiated program.
    pub fn from_instance(
        instance: &Instance,
        mut store: impl AsContextMut<Data = InvocationState>,
    ) -> Result<Self, AbiError> {
        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or(AbiError::MissingExport(MEMORY_EXPORT))?;
        let alloc = instance
            .get_func(&mut store, ALLOC_EXPORT)
            .ok_or(AbiError::MissingExport(ALLOC_EXPORT))?
            .typed::<i32, i32>(&store)
            .map_err(|e| AbiError::BadExport {
                name: ALLOC_EXPORT,
                reason: e.to_string(),
            })?;
        Ok(Self { memory, alloc })
    }

    /// Copy `len` bytes at `ptr` out of guest memory.
    pub fn read(&self, store: impl AsContext, ptr: i32, len: i32) -> Result<Vec<u8>, AbiError> {
        let (ptr, len) = (ptr as u32, len as u32);
        let start = ptr as usize;
        let end = start
            .checked_add(len as usize)
            .ok_or(AbiError::OutOfBounds { ptr, len })?;
        self.memory
            .data(&store)
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(AbiError::OutOfBounds { ptr, len })
    }

    /// Decode the [`Value`] at `ptr`. An empty range is `None`.
    pub fn read_value(&self, store: impl AsContext, ptr: i32, len: i32) -> Result<Value, AbiError> {
        if len == 0 {
            return Ok(Value::None);
        }
        let bytes = self.read(store, ptr, len)?;
        Value::from_slice(&bytes).map_err(|e| AbiError::InvalidJson(e.to_string()))
    }

    /// Decode a packed return value.
    pub fn read_packed(&self, store: impl AsContext, packed: i64) -> Result<Value, AbiError> {
        if packed == 0 {
            return Ok(Value::None);
        }
        let (ptr, len) = unpack(packed);
        self.read_value(store, ptr as i32, len as i32)
    }

    /// Copy `bytes` into a fresh guest allocation, returning its pointer.
    pub async fn write_bytes(
        &self,
        mut store: impl AsContextMut<Data = InvocationState>,
        bytes: &[u8],
    ) -> anyhow::Result<(u32, u32)> {
        let len = u32::try_from(bytes.len())
            .ok()
            .filter(|l| *l <= i32::MAX as u32)
            .ok_or(AbiError::TooLarge(bytes.len()))?;
        let ptr = self.alloc.call_async(&mut store, len as i32).await? as u32;
        self.memory
            .write(&mut store, ptr as usize, bytes)
            .map_err(|_| AbiError::OutOfBounds { ptr, len })?;
        Ok((ptr, len))
    }

    /// Hand `value` to the guest, returning the packed range (`0` for `None`).
    pub async fn write_value(
        &self,
        store: impl AsContextMut<Data = InvocationState>,
        value: &Value,
    ) -> anyhow::Result<i64> {
        if value.is_none() {
            return Ok(0);
        }
        let (ptr, len) = self.write_bytes(store, &value.to_vec()).await?;
        Ok(pack(ptr, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_round_trip() {
        assert_eq!(unpack(pack(0x10000, 42)), (0x10000, 42));
        assert_eq!(unpack(pack(u32::MAX, u32::MAX)), (u32::MAX, u32::MAX));
        assert_eq!(pack(0, 0), 0);
    }
}
