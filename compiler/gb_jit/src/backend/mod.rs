//! MCJIT execution engine over the LLVM C API.
//!
//! One backend per engine. It starts from an empty root module; every
//! translated unit is parsed into the backend's context, verified, and added
//! as a module of its own. Symbols resolve across all added modules and the
//! process (runtime libraries are loaded permanently at construction).
//!
//! Static constructors run exactly once per added module. MCJIT only offers
//! "run the constructors of every module", so each module's
//! `llvm.global_ctors` list is taken over before the module is added: the
//! constructor functions get stable external names, the list is deleted,
//! and the backend calls them itself in priority order.
//!
//! Profiled modules never enter MCJIT. They are verified here, then built
//! into a shared object that the dynamic loader (and `perf`) can see.

use std::ffi::{c_char, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;

use llvm_sys::analysis::{LLVMVerifierFailureAction, LLVMVerifyModule};
use llvm_sys::core::{
    LLVMConstIntGetSExtValue, LLVMContextCreate, LLVMContextDispose,
    LLVMCreateMemoryBufferWithMemoryRangeCopy, LLVMDeleteGlobal, LLVMDisposeMessage,
    LLVMDisposeModule, LLVMGetInitializer, LLVMGetNamedGlobal, LLVMGetNumOperands,
    LLVMGetOperand, LLVMIsAFunction, LLVMModuleCreateWithNameInContext, LLVMSetLinkage,
    LLVMSetValueName2,
};
use llvm_sys::execution_engine::{
    LLVMAddModule, LLVMCreateMCJITCompilerForModule, LLVMDisposeExecutionEngine,
    LLVMExecutionEngineRef, LLVMGetFunctionAddress, LLVMInitializeMCJITCompilerOptions,
    LLVMLinkInMCJIT, LLVMMCJITCompilerOptions,
};
use llvm_sys::ir_reader::LLVMParseIRInContext;
use llvm_sys::prelude::{LLVMContextRef, LLVMModuleRef, LLVMValueRef};
use llvm_sys::support::LLVMLoadLibraryPermanently;
use llvm_sys::LLVMLinkage;

use crate::error::{JitError, JitResult};
use crate::shared_object::{build_shared_object, initialize_native_target, SharedObject};

/// Set to dump every module before it is loaded.
pub const DEBUG_LLVM_ENV: &str = "GB_DEBUG_LLVM";

/// Prefix given to constructors taken over from `llvm.global_ctors`.
const CTOR_PREFIX: &str = "__gb_ctor_";

/// The live JIT.
pub struct JitBackend {
    context: LLVMContextRef,
    engine: LLVMExecutionEngineRef,
    runtime_libraries: Vec<PathBuf>,
    opt_level: u32,
    modules: usize,
}

impl JitBackend {
    /// Create the execution engine and load `runtime_libraries` into the
    /// process.
    pub fn new(opt_level: u32, runtime_libraries: &[PathBuf]) -> JitResult<Self> {
        initialize_native_target()?;
        for path in runtime_libraries {
            load_library_permanently(path)?;
        }

        // SAFETY: every handle created here is owned by the returned
        // backend and released in `Drop`.
        unsafe {
            LLVMLinkInMCJIT();
            let context = LLVMContextCreate();
            let root = LLVMModuleCreateWithNameInContext(c"gb-jit-root".as_ptr(), context);

            let mut options: LLVMMCJITCompilerOptions = std::mem::zeroed();
            LLVMInitializeMCJITCompilerOptions(
                &mut options,
                std::mem::size_of::<LLVMMCJITCompilerOptions>(),
            );
            options.OptLevel = opt_level;

            let mut engine: LLVMExecutionEngineRef = ptr::null_mut();
            let mut error: *mut c_char = ptr::null_mut();
            let failed = LLVMCreateMCJITCompilerForModule(
                &mut engine,
                root,
                &mut options,
                std::mem::size_of::<LLVMMCJITCompilerOptions>(),
                &mut error,
            ) != 0;
            if failed {
                let message = take_message(error);
                LLVMDisposeModule(root);
                LLVMContextDispose(context);
                return Err(JitError::Verification {
                    message: format!("cannot create the execution engine: {message}"),
                });
            }

            tracing::debug!(opt_level, "created MCJIT execution engine");
            Ok(Self {
                context,
                engine,
                runtime_libraries: runtime_libraries.to_vec(),
                opt_level,
                modules: 0,
            })
        }
    }

    fn next_module_name(&mut self) -> String {
        let name = format!("gb-module-{}", self.modules);
        self.modules += 1;
        name
    }

    /// Parse, verify and add one unit of LLVM IR, then run its static
    /// constructors.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn load(&mut self, ir: &str) -> JitResult<()> {
        let name = self.next_module_name();
        dump_if_requested(ir, &name);
        let module = self.parse_and_verify(ir, &name)?;

        // SAFETY: `module` was parsed into this backend's context and is
        // not referenced elsewhere; after `LLVMAddModule` the engine owns it.
        let ctors = unsafe {
            let ctors = take_static_constructors(module, self.modules);
            LLVMAddModule(self.engine, module);
            ctors
        };
        tracing::debug!(module = %name, ctors = ctors.len(), "added module");

        for ctor in &ctors {
            let address = self.function_address(ctor)?;
            // SAFETY: global constructors take no arguments and return
            // nothing.
            let run: extern "C" fn() = unsafe { std::mem::transmute(address) };
            run();
        }
        Ok(())
    }

    /// Verify one unit of LLVM IR and build it into a loaded shared object
    /// under `dir`, linked against `previous` and the runtime libraries.
    #[tracing::instrument(level = "debug", skip_all, fields(dir = %dir.display()))]
    pub fn load_profiled(
        &mut self,
        ir: &str,
        dir: &Path,
        previous: Option<&Path>,
    ) -> JitResult<SharedObject> {
        let name = self.next_module_name();
        dump_if_requested(ir, &name);
        let module = self.parse_and_verify(ir, &name)?;
        // SAFETY: the module was only needed for verification.
        unsafe { LLVMDisposeModule(module) };
        build_shared_object(ir, dir, &self.runtime_libraries, previous, self.opt_level)
    }

    /// Entry address of `name` among the JIT modules.
    pub fn function_address(&self, name: &str) -> JitResult<usize> {
        let symbol = c_string(name)?;
        // SAFETY: the engine is live for `self`'s lifetime.
        let address = unsafe { LLVMGetFunctionAddress(self.engine, symbol.as_ptr()) };
        tracing::trace!(%name, address, "resolved JIT symbol");
        match usize::try_from(address) {
            Ok(address) if address != 0 => Ok(address),
            _ => Err(JitError::NullAddress {
                name: name.to_string(),
            }),
        }
    }

    fn parse_and_verify(&self, ir: &str, name: &str) -> JitResult<LLVMModuleRef> {
        let buffer_name = c_string(name)?;
        // SAFETY: the buffer is copied from `ir` and consumed by the parser;
        // the parsed module belongs to this backend's context.
        unsafe {
            let buffer = LLVMCreateMemoryBufferWithMemoryRangeCopy(
                ir.as_ptr().cast(),
                ir.len(),
                buffer_name.as_ptr(),
            );
            let mut module: LLVMModuleRef = ptr::null_mut();
            let mut error: *mut c_char = ptr::null_mut();
            if LLVMParseIRInContext(self.context, buffer, &mut module, &mut error) != 0 {
                return Err(JitError::Verification {
                    message: take_message(error),
                });
            }

            let mut error: *mut c_char = ptr::null_mut();
            let invalid = LLVMVerifyModule(
                module,
                LLVMVerifierFailureAction::LLVMReturnStatusAction,
                &mut error,
            ) != 0;
            let message = take_message(error);
            if invalid {
                LLVMDisposeModule(module);
                return Err(JitError::Verification { message });
            }
            Ok(module)
        }
    }
}

impl Drop for JitBackend {
    fn drop(&mut self) {
        // SAFETY: the engine owns every added module and must go before the
        // context they live in.
        unsafe {
            LLVMDisposeExecutionEngine(self.engine);
            LLVMContextDispose(self.context);
        }
    }
}

impl std::fmt::Debug for JitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitBackend")
            .field("modules", &self.modules)
            .field("opt_level", &self.opt_level)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Static constructors
// ---------------------------------------------------------------------------

/// Rename the functions listed in `llvm.global_ctors` to external
/// `__gb_ctor_<module>_<i>` symbols, delete the list, and return the new
/// names in execution order.
///
/// # Safety
///
/// `module` must be a valid module that has not been added to an engine.
unsafe fn take_static_constructors(module: LLVMModuleRef, module_index: usize) -> Vec<String> {
    // SAFETY: forwarded from the caller; every operand index is bounded by
    // `LLVMGetNumOperands`.
    unsafe {
        let list = LLVMGetNamedGlobal(module, c"llvm.global_ctors".as_ptr());
        if list.is_null() {
            return Vec::new();
        }
        let init = LLVMGetInitializer(list);
        let count = if init.is_null() {
            0
        } else {
            u32::try_from(LLVMGetNumOperands(init)).unwrap_or(0)
        };

        let mut entries: Vec<(i64, LLVMValueRef)> = Vec::new();
        for i in 0..count {
            let entry = LLVMGetOperand(init, i);
            if LLVMGetNumOperands(entry) < 2 {
                continue;
            }
            let priority = LLVMConstIntGetSExtValue(LLVMGetOperand(entry, 0));
            match as_function(LLVMGetOperand(entry, 1)) {
                Some(function) => entries.push((priority, function)),
                None => tracing::warn!(priority, "skipping a static constructor that is not a function"),
            }
        }
        entries.sort_by_key(|&(priority, _)| priority);

        let names = entries
            .iter()
            .enumerate()
            .map(|(i, &(_, function))| {
                let name = format!("{CTOR_PREFIX}{module_index}_{i}");
                LLVMSetValueName2(function, name.as_ptr().cast(), name.len());
                LLVMSetLinkage(function, LLVMLinkage::LLVMExternalLinkage);
                name
            })
            .collect();
        LLVMDeleteGlobal(list);
        names
    }
}

/// The function behind a constructor entry, looking through a cast.
unsafe fn as_function(value: LLVMValueRef) -> Option<LLVMValueRef> {
    // SAFETY: forwarded from the caller.
    unsafe {
        if !LLVMIsAFunction(value).is_null() {
            return Some(value);
        }
        if LLVMGetNumOperands(value) > 0 {
            let inner = LLVMGetOperand(value, 0);
            if !LLVMIsAFunction(inner).is_null() {
                return Some(inner);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_library_permanently(path: &Path) -> JitResult<()> {
    let failure = |message: String| JitError::RuntimeLibrary {
        path: path.to_path_buf(),
        message,
    };
    if !path.exists() {
        return Err(failure("no such file".to_string()));
    }
    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| failure("path contains a NUL byte".to_string()))?;
    // SAFETY: the loader copies the path; the library stays loaded for the
    // life of the process.
    if unsafe { LLVMLoadLibraryPermanently(c_path.as_ptr()) } != 0 {
        return Err(failure("the dynamic loader rejected the library".to_string()));
    }
    tracing::debug!(path = %path.display(), "loaded runtime library");
    Ok(())
}

fn dump_if_requested(ir: &str, name: &str) {
    if std::env::var_os(DEBUG_LLVM_ENV).is_some() {
        eprintln!("=== LLVM IR for {name} ===");
        eprintln!("{ir}");
        eprintln!("=== END IR ===");
    }
}

fn c_string(text: &str) -> JitResult<CString> {
    CString::new(text).map_err(|_| JitError::InvalidArgument {
        message: format!("'{}' contains a NUL byte", text.escape_debug()),
    })
}

/// Copy and free a message allocated by LLVM.
unsafe fn take_message(message: *mut c_char) -> String {
    if message.is_null() {
        return String::new();
    }
    // SAFETY: LLVM hands out NUL-terminated strings that the caller frees.
    unsafe {
        let text = CStr::from_ptr(message).to_string_lossy().trim_end().to_string();
        LLVMDisposeMessage(message);
        text
    }
}
