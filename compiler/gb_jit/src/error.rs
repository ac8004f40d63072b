//! Engine error taxonomy.
//!
//! Toolchain rejections (`Lowering`, `Translation`) carry the tool's
//! diagnostic text. Contract violations at the call boundary
//! (`UnsupportedType`, `TypeMismatch`, `ArityMismatch`) are raised before any
//! native code runs. `Verification` and `NullAddress` indicate a bug in the
//! lowering pipeline or the bridge, not bad user input.

use std::path::PathBuf;

use thiserror::Error;

use crate::shared_object::{EmitError, LinkerError, TargetError};

/// The property of a value that disagreed with the compiled signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    /// Wrong kind of host value for the slot (e.g. a scalar for an array).
    Kind,
    ElementType,
    Rank,
    Shape,
    Sparsity,
    IndexWidth,
    PointerWidth,
}

impl std::fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Kind => "value kind",
            Self::ElementType => "element type",
            Self::Rank => "rank",
            Self::Shape => "shape",
            Self::Sparsity => "sparsity pattern",
            Self::IndexWidth => "index width",
            Self::PointerWidth => "pointer width",
        })
    }
}

#[derive(Debug, Error)]
pub enum JitError {
    #[error("lowering failed: {diagnostic}")]
    Lowering { diagnostic: String },

    #[error("translation to LLVM IR failed: {diagnostic}\n\ninput:\n{input}")]
    Translation { diagnostic: String, input: String },

    #[error("generated LLVM IR failed verification: {message}")]
    Verification { message: String },

    #[error("unsupported type '{ty}': {reason}")]
    UnsupportedType { ty: String, reason: String },

    #[error("{property} mismatch: {message}")]
    TypeMismatch {
        property: MismatchKind,
        message: String,
    },

    #[error("{name} expected {expected} args but got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("the function '{name}' is already defined")]
    DuplicateDefinition { name: String },

    #[error("wrapper '{wrapper}' for multi-result function '{name}' collides with an existing function")]
    WrapperNameCollision { name: String, wrapper: String },

    #[error("the address for the function '{name}' is the null pointer")]
    NullAddress { name: String },

    #[error("profiling is only supported on linux")]
    PlatformUnsupported,

    #[error("'{tool}' is required but could not be run: {message}")]
    ToolMissing { tool: String, message: String },

    #[error("permission denied: {message}")]
    PermissionError { message: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("failed to scan function signatures: {0}")]
    Parse(#[from] gb_ir::ParseError),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Link(#[from] LinkerError),

    #[error("failed to load runtime library '{path}': {message}")]
    RuntimeLibrary { path: PathBuf, message: String },

    #[error("result of '{name}' cannot be returned from a profiled call: {reason}")]
    ProfileTransfer { name: String, reason: String },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl JitError {
    pub(crate) fn mismatch(property: MismatchKind, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            property,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(ty: impl ToString, reason: impl Into<String>) -> Self {
        Self::UnsupportedType {
            ty: ty.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }
}

/// Result alias used throughout the crate.
pub type JitResult<T> = Result<T, JitError>;
