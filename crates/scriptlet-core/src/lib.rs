//! scriptlet-core — shared types for the placement scriptlet crates.
//!
//! - **types**: the API shapes a placement program observes (requests,
//!   cluster members, resources, instances, projects)
//! - **units**: byte-size, CPU-set and duration grammars
//! - **config**: `scriptlet.toml` parsing

pub mod config;
pub mod types;
pub mod units;

pub use config::ScriptletConfig;
pub use types::*;
pub use units::{CpuSet, UnitsError, parse_byte_size, parse_cpuset, parse_duration};
