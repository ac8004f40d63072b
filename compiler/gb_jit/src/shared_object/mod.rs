//! Shared objects for profiled modules.
//!
//! A sampling profiler cannot symbolize code living in anonymous JIT memory,
//! so profiled modules take a detour:
//!
//! ```text
//! LLVM IR ──▶ mod-<id>.o ──▶ cc -shared ──▶ shared-<id>.so ──▶ dlopen
//!                               ▲
//!            runtime libraries ─┤
//!        previous shared-*.so ──┘
//! ```
//!
//! Each library links against the one produced before it so that wrapper
//! modules resolve the functions they call.

mod linker;
mod object;
mod target;

use std::path::{Path, PathBuf};

use inkwell::context::Context;
use libloading::Library;
use uuid::Uuid;

use crate::error::{JitError, JitResult};

pub use linker::{LinkInput, LinkerDriver, LinkerError};
pub use object::{parse_module, EmitError, ObjectEmitter};
pub use target::{initialize_native_target, opt_level_from, TargetConfig, TargetError};

/// A loaded profile library.
#[derive(Debug)]
pub struct SharedObject {
    path: PathBuf,
    library: Library,
}

impl SharedObject {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address of the exported symbol `name`, if present.
    pub fn symbol_address(&self, name: &str) -> Option<usize> {
        // SAFETY: the symbol is only read as an address, never called
        // through this signature.
        let symbol = unsafe { self.library.get::<*const ()>(name.as_bytes()) }.ok()?;
        let address = *symbol as usize;
        (address != 0).then_some(address)
    }
}

/// Build and load `shared-<id>.so` from verified LLVM IR.
///
/// `previous` is the library produced by the last profiled module, linked in
/// so this one can call into it.
pub fn build_shared_object(
    ir: &str,
    dir: &Path,
    runtime_libraries: &[PathBuf],
    previous: Option<&Path>,
    opt_level: u32,
) -> JitResult<SharedObject> {
    let id = Uuid::new_v4();
    let object_path = dir.join(format!("mod-{id}.o"));
    let library_path = dir.join(format!("shared-{id}.so"));

    let config = TargetConfig::native()?.with_opt_level(opt_level_from(opt_level));
    let emitter = ObjectEmitter::new(&config)?;
    let context = Context::create();
    let module = parse_module(&context, ir, &format!("mod-{id}"))?;
    emitter.configure_module(&module);
    emitter.emit_object(&module, &object_path)?;
    tracing::debug!(path = %object_path.display(), "emitted profile object");

    let mut libraries = runtime_libraries.to_vec();
    libraries.extend(previous.map(Path::to_path_buf));
    LinkerDriver::new().link(&LinkInput {
        objects: vec![object_path],
        libraries,
        output: library_path.clone(),
    })?;

    // SAFETY: the library was just produced from verified IR; its
    // initializers are the module's static constructors.
    let library = unsafe { Library::new(&library_path) }.map_err(|e| JitError::RuntimeLibrary {
        path: library_path.clone(),
        message: e.to_string(),
    })?;
    tracing::debug!(path = %library_path.display(), "loaded profile library");
    Ok(SharedObject {
        path: library_path,
        library,
    })
}
