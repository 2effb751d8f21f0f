//! PlacementProgram — a compiled, validated placement module.
//!
//! Programs are expensive to compile but cheap to instantiate. Compile once
//! per program revision and reuse the handle across runs.

use std::path::Path;

use wasmtime::{Engine, ExternType, FuncType, Module, ValType};

use crate::abi::IMPORT_MODULE;
use crate::builtins::Builtin;
use crate::error::{PlacementError, PlacementResult};

#[derive(Debug, Clone)]
pub struct PlacementProgram {
    module: Module,
    /// Human-readable name for logging.
    name: String,
}

impl PlacementProgram {
    /// Compile a program from wasm bytes.
    pub fn from_bytes(engine: &Engine, name: &str, bytes: &[u8]) -> PlacementResult<Self> {
        let module = Module::new(engine, bytes)
            .map_err(|e| PlacementError::InvalidProgram(format!("{e:#}")))?;
        validate_imports(&module)?;
        tracing::info!(%name, "compiled placement program");
        Ok(Self {
            module,
            name: name.to_string(),
        })
    }

    /// Compile a program from a file path.
    pub fn from_file(engine: &Engine, name: &str, path: &Path) -> PlacementResult<Self> {
        let module = Module::from_file(engine, path)
            .map_err(|e| PlacementError::InvalidProgram(format!("{}: {e:#}", path.display())))?;
        validate_imports(&module)?;
        tracing::info!(%name, path = %path.display(), "compiled placement program from file");
        Ok(Self {
            module,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Module {
        &self.module
    }
}

fn is_builtin_signature(ty: &FuncType) -> bool {
    let params: Vec<ValType> = ty.params().collect();
    let results: Vec<ValType> = ty.results().collect();
    matches!(params.as_slice(), [ValType::I32, ValType::I32])
        && matches!(results.as_slice(), [ValType::I64])
}

/// Every import must be a catalogue builtin with the builtin signature.
fn validate_imports(module: &Module) -> PlacementResult<()> {
    for import in module.imports() {
        let what = format!("{}.{}", import.module(), import.name());
        if import.module() != IMPORT_MODULE {
            return Err(PlacementError::InvalidProgram(format!(
                "import {what} is outside the {IMPORT_MODULE:?} module"
            )));
        }
        if Builtin::from_name(import.name()).is_none() {
            return Err(PlacementError::InvalidProgram(format!(
                "unknown builtin {:?}",
                import.name()
            )));
        }
        match import.ty() {
            ExternType::Func(ty) if is_builtin_signature(&ty) => {}
            ExternType::Func(ty) => {
                return Err(PlacementError::InvalidProgram(format!(
                    "builtin {what} imported with signature {ty:?}, want (i32, i32) -> i64"
                )));
            }
            _ => {
                return Err(PlacementError::InvalidProgram(format!(
                    "builtin {what} must be imported as a function"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::default()
    }

    fn compile(wat: &str) -> PlacementResult<PlacementProgram> {
        let bytes = wat::parse_str(wat).unwrap();
        PlacementProgram::from_bytes(&engine(), "test", &bytes)
    }

    #[test]
    fn accepts_catalogue_imports() {
        let program = compile(
            r#"(module
                (import "scriptlet" "set_target" (func (param i32 i32) (result i64)))
                (import "scriptlet" "log_info" (func (param i32 i32) (result i64))))"#,
        )
        .unwrap();
        assert_eq!(program.name(), "test");
    }

    #[test]
    fn rejects_unknown_builtin() {
        let err = compile(
            r#"(module (import "scriptlet" "exec" (func (param i32 i32) (result i64))))"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlacementError::InvalidProgram(ref m) if m.contains("exec")));
    }

    #[test]
    fn rejects_foreign_modules() {
        let err = compile(r#"(module (import "env" "abort" (func)))"#).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn rejects_wrong_signature() {
        let err = compile(
            r#"(module (import "scriptlet" "set_target" (func (param i32) (result i32))))"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlacementError::InvalidProgram(ref m) if m.contains("signature")));
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = PlacementProgram::from_bytes(&engine(), "junk", b"not wasm").unwrap_err();
        assert!(matches!(err, PlacementError::InvalidProgram(_)));
    }

    #[test]
    fn entry_point_is_not_required_at_load() {
        assert!(compile("(module)").is_ok());
    }
}
