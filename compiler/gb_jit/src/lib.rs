//! JIT host for GraphBLAS IR.
//!
//! An [`Engine`] takes IR text with sparse-tensor types, drives it through
//! the external MLIR toolchain, loads the resulting LLVM IR into an MCJIT
//! execution engine, and hands back a [`Callable`] per public function.
//! Callables encode host [`Value`]s into the compiled function's native
//! arguments and decode its results, including functions with several
//! results (through synthesized wrappers) and sparse tensors (as opaque
//! runtime handles).
//!
//! # Environment Variables
//!
//! - `GB_MLIR_OPT`, `GB_MLIR_TRANSLATE`, `GB_RUNTIME_LIBS`: see
//!   [`EngineConfig::from_env`].
//! - `GB_DEBUG_LLVM`: print every LLVM module to stderr before it is loaded.
//! - `RUST_LOG=gb_jit=debug`: tracing output, once [`init_tracing`] ran.
//!
//! # Example
//!
//! ```no_run
//! use gb_jit::{AddOptions, Engine, EngineConfig, Value};
//!
//! let mut engine = Engine::new(EngineConfig::from_env())?;
//! engine.add(
//!     "func @add_one(%x: i64) -> i64 { ... }",
//!     &["--convert-func-to-llvm".to_string()],
//!     &AddOptions::new(),
//! )?;
//! if let Some(add_one) = engine.get("add_one") {
//!     let six = add_one.call(&[Value::from(5i64)])?;
//!     println!("{six:?}");
//! }
//! # Ok::<(), gb_jit::JitError>(())
//! ```

pub mod abi;
pub mod backend;
pub mod bridge;
pub mod call;
mod callable;
mod config;
pub mod engine;
mod error;
pub mod lowering;
pub mod profile;
pub mod shared_object;
pub mod value;

use std::sync::Once;

pub use callable::Callable;
pub use config::{AddOptions, EngineConfig, PointerStyle};
pub use engine::{AddOutcome, Engine};
pub use error::{JitError, JitResult, MismatchKind};
pub use lowering::{DebugResult, DebugStage};
pub use profile::ProfileReport;
pub use value::{DType, DenseArray, HostObject, Output, Scalar, SparseTensor, Value, VoidPtr};

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Does nothing unless `RUST_LOG` is set. Safe to call more than once.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}
