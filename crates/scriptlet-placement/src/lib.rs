//! scriptlet-placement — operator-supplied instance placement programs.
//!
//! A placement program is a WebAssembly module that picks a cluster member
//! for a new instance. It runs inside a wasmtime sandbox and can only reach
//! the outside world through the builtins in [`builtins::Builtin::ALL`].
//!
//! # Architecture
//!
//! ```text
//! PlacementEngine::run(program, host, request, candidates, cancel)
//!   ├── ClusterSnapshot::load()      cluster + node stores, one view per run
//!   ├── Store<InvocationState>       per-run limits, target, stop token
//!   ├── watcher task                 cancel / deadline → stop + epoch bump
//!   └── instance_placement(request, candidate_members)
//!         └── "scriptlet" imports → builtins::call()
//!               ├── set_target          → TargetState
//!               ├── member lookups      → LocalMember | MemberClient
//!               └── store lookups       → StateStore
//! ```
//!
//! # Guest ABI
//!
//! Every builtin and the entry point take `(ptr: i32, len: i32)` naming a
//! JSON document in guest memory and return an `i64` packing `ptr << 32 | len`
//! of a JSON result, or `0` for none. The program exports `memory` and
//! `alloc(len) -> ptr` so the host can hand it data.

pub mod abi;
pub mod args;
pub mod builtins;
pub mod engine;
pub mod error;
pub mod host;
pub mod invocation;
pub mod marshal;
pub mod program;
pub mod resources;
pub mod snapshot;
pub mod value;

pub use builtins::{Builtin, INVALID_MEMBER_NAME};
pub use engine::{EngineConfig, PlacementEngine};
pub use error::{PlacementError, PlacementResult};
pub use host::PlacementHost;
pub use program::PlacementProgram;
pub use snapshot::ClusterSnapshot;
pub use value::Value;
