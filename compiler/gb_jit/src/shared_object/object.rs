//! Object file emission for profiled modules.
//!
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌─────────────┐
//! │  LLVM IR    │───▶│ TargetMachine│───▶│ mod-<id>.o  │
//! │  (text)     │    │  (PIC, host) │    │             │
//! └─────────────┘    └──────────────┘    └─────────────┘
//! ```

use std::fmt;
use std::path::Path;

use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;
use inkwell::targets::{FileType, TargetMachine};

use super::target::{TargetConfig, TargetError};

/// Error type for object file emission.
#[derive(Debug, Clone)]
pub enum EmitError {
    /// Failed to create the target machine.
    TargetMachine(TargetError),
    /// The LLVM IR text could not be parsed.
    IrParse { module: String, message: String },
    /// Failed to emit the object file.
    ObjectEmission { path: String, message: String },
    /// Output path is not valid.
    InvalidPath { path: String, reason: String },
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetMachine(err) => {
                write!(f, "failed to create target machine: {err}")
            }
            Self::IrParse { module, message } => {
                write!(f, "failed to parse LLVM IR for '{module}': {message}")
            }
            Self::ObjectEmission { path, message } => {
                write!(f, "failed to emit object file '{path}': {message}")
            }
            Self::InvalidPath { path, reason } => {
                write!(f, "invalid output path '{path}': {reason}")
            }
        }
    }
}

impl std::error::Error for EmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TargetMachine(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TargetError> for EmitError {
    fn from(err: TargetError) -> Self {
        Self::TargetMachine(err)
    }
}

/// Validate that the parent directory exists for an output path.
fn validate_parent_exists(path: &Path) -> Result<(), EmitError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(EmitError::InvalidPath {
                path: path.to_string_lossy().into_owned(),
                reason: "parent directory does not exist".to_string(),
            });
        }
    }
    Ok(())
}

/// Parse LLVM IR text into a module owned by `context`.
pub fn parse_module<'ctx>(
    context: &'ctx Context,
    ir: &str,
    name: &str,
) -> Result<Module<'ctx>, EmitError> {
    let buffer = MemoryBuffer::create_from_memory_range_copy(ir.as_bytes(), name);
    context
        .create_module_from_ir(buffer)
        .map_err(|e| EmitError::IrParse {
            module: name.to_string(),
            message: e.to_string(),
        })
}

/// Emits host objects through one target machine.
pub struct ObjectEmitter {
    machine: TargetMachine,
    config: TargetConfig,
}

impl ObjectEmitter {
    /// # Errors
    ///
    /// Returns an error if the target machine cannot be created.
    pub fn new(config: &TargetConfig) -> Result<Self, EmitError> {
        let machine = config.create_target_machine()?;
        Ok(Self {
            machine,
            config: config.clone(),
        })
    }

    /// Set the module's triple and data layout to the emitter's target.
    pub fn configure_module(&self, module: &Module<'_>) {
        self.config.configure_module(module, &self.machine);
    }

    /// Emit `module` as a native object file at `path`.
    pub fn emit_object(&self, module: &Module<'_>, path: &Path) -> Result<(), EmitError> {
        validate_parent_exists(path)?;
        self.machine
            .write_to_file(module, FileType::Object, path)
            .map_err(|e| EmitError::ObjectEmission {
                path: path.to_string_lossy().into_owned(),
                message: e.to_string(),
            })
    }
}

impl fmt::Debug for ObjectEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectEmitter")
            .field("triple", &self.config.triple())
            .field("cpu", &self.config.cpu())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests panic on failure")]
mod tests {
    use super::*;
    use object::{Object, ObjectSymbol};

    const ANSWER_IR: &str = "define i64 @answer() {\nentry:\n  ret i64 42\n}\n";

    fn native_emitter() -> Option<ObjectEmitter> {
        let config = TargetConfig::native().ok()?;
        ObjectEmitter::new(&config).ok()
    }

    #[test]
    fn emitted_object_exports_the_function() {
        let Some(emitter) = native_emitter() else {
            return;
        };
        let context = Context::create();
        let module = parse_module(&context, ANSWER_IR, "answer").unwrap();
        emitter.configure_module(&module);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod-test.o");
        emitter.emit_object(&module, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        let names: Vec<_> = file
            .symbols()
            .filter_map(|s| s.name().ok())
            .map(|n| n.trim_start_matches('_').to_string())
            .collect();
        assert!(names.iter().any(|n| n == "answer"), "{names:?}");
    }

    #[test]
    fn emitting_into_a_missing_directory_fails() {
        let Some(emitter) = native_emitter() else {
            return;
        };
        let context = Context::create();
        let module = parse_module(&context, ANSWER_IR, "answer").unwrap();
        emitter.configure_module(&module);

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing").join("mod.o");
        let err = emitter.emit_object(&module, &missing).unwrap_err();
        assert!(matches!(err, EmitError::InvalidPath { .. }), "{err}");
    }

    #[test]
    fn malformed_ir_is_a_parse_error() {
        let context = Context::create();
        let err = parse_module(&context, "define i64 @broken( {", "broken").unwrap_err();
        assert!(matches!(err, EmitError::IrParse { .. }), "{err}");
    }
}
