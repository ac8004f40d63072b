//! The engine: incremental compilation and the callable registry.
//!
//! # Adding IR
//!
//! ```text
//! IR text
//!   │ scan signatures, check names, compute ABIs
//!   ▼
//! lower + translate ──▶ load (JIT, or shared object when profiling)
//!   │
//!   ▼ functions with two or more results
//! wrapper unit ──▶ lower + translate ──▶ load
//!   │
//!   ▼
//! resolve entry addresses, register callables
//! ```
//!
//! Everything that can be rejected (duplicate names, wrapper collisions,
//! unsupported types, profiling preconditions) is checked before anything is
//! compiled. A failed [`Engine::add`] leaves the registry as it was; code
//! compiled before the failure stays loaded but unreachable.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gb_ir::FunctionSignature;
use rustc_hash::{FxHashMap, FxHashSet};
use tempfile::TempDir;

use crate::abi::{compute_function_abi, FunctionAbi};
use crate::backend::JitBackend;
use crate::bridge::{build_wrappers, check_wrapper_names, wrapper_name};
use crate::call::NativeFunction;
use crate::callable::{Callable, ProfileTarget};
use crate::config::{AddOptions, EngineConfig};
use crate::error::{JitError, JitResult};
use crate::lowering::{persist_profile_input, DebugResult, LoweringDriver};
use crate::profile::check_preconditions;
use crate::shared_object::SharedObject;

/// State shared by the engine and every callable it produced.
pub(crate) struct EngineState {
    backend: RefCell<JitBackend>,
    /// Profile libraries, oldest first.
    libraries: RefCell<Vec<SharedObject>>,
    profile_root: TempDir,
}

impl EngineState {
    /// The most recent profile library, linked into the next one.
    fn last_library(&self) -> Option<PathBuf> {
        self.libraries
            .borrow()
            .last()
            .map(|library| library.path().to_path_buf())
    }

    /// Resolve `name` in the profile libraries, newest first.
    fn library_address(&self, name: &str) -> JitResult<usize> {
        self.libraries
            .borrow()
            .iter()
            .rev()
            .find_map(|library| library.symbol_address(name))
            .ok_or_else(|| JitError::NullAddress {
                name: name.to_string(),
            })
    }
}

/// What [`Engine::add`] produced.
#[derive(Debug)]
pub enum AddOutcome {
    /// Names of the newly registered callables, in textual order.
    Defined(Vec<String>),
    /// Lowering failed in debug mode.
    Debug(DebugResult),
}

impl AddOutcome {
    pub fn names(&self) -> Option<&[String]> {
        match self {
            Self::Defined(names) => Some(names),
            Self::Debug(_) => None,
        }
    }

    pub fn into_debug(self) -> Option<DebugResult> {
        match self {
            Self::Debug(result) => Some(result),
            Self::Defined(_) => None,
        }
    }
}

/// A JIT compilation host.
///
/// Not thread-safe; serialize calls to [`Engine::add`].
pub struct Engine {
    config: EngineConfig,
    driver: LoweringDriver,
    state: Rc<EngineState>,
    callables: FxHashMap<String, Callable>,
    /// Registration order.
    order: Vec<String>,
    /// Loaded wrapper symbols and the function each one serves.
    wrappers: FxHashMap<String, String>,
}

/// One function accepted for registration.
struct Pending<'a> {
    sig: &'a FunctionSignature,
    abi: FunctionAbi,
}

impl Pending<'_> {
    /// The symbol callers enter through.
    fn entry(&self) -> String {
        if self.abi.uses_out_pointers() {
            wrapper_name(&self.sig.name)
        } else {
            self.sig.name.clone()
        }
    }
}

impl Engine {
    /// Create the execution engine and load the configured runtime
    /// libraries.
    pub fn new(config: EngineConfig) -> JitResult<Self> {
        let backend = JitBackend::new(config.opt_level(), config.runtime_libraries())?;
        let profile_root = tempfile::Builder::new()
            .prefix("gb-jit-")
            .tempdir()
            .map_err(JitError::io("creating the profile directory"))?;
        Ok(Self {
            driver: LoweringDriver::new(&config),
            config,
            state: Rc::new(EngineState {
                backend: RefCell::new(backend),
                libraries: RefCell::new(Vec::new()),
                profile_root,
            }),
            callables: FxHashMap::default(),
            order: Vec::new(),
            wrappers: FxHashMap::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.callables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callables.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Default directory for profile artifacts; removed with the engine.
    pub fn profile_root(&self) -> &Path {
        self.state.profile_root.path()
    }

    /// Compile `ir` with `passes` and register its public functions.
    #[tracing::instrument(level = "debug", skip_all, fields(passes = passes.len()))]
    pub fn add(&mut self, ir: &str, passes: &[String], options: &AddOptions) -> JitResult<AddOutcome> {
        if options.profile_dir.is_some() && !options.profile {
            return Err(JitError::InvalidArgument {
                message: "a profile directory was given without enabling profiling".to_string(),
            });
        }
        if options.profile {
            check_preconditions()?;
        }

        let module = gb_ir::parse_signatures(ir)?;
        let pending = self.accept(module.public_functions().filter(|f| f.has_body))?;
        let multi: Vec<&FunctionSignature> = pending
            .iter()
            .filter(|p| p.abi.uses_out_pointers())
            .map(|p| p.sig)
            .collect();
        check_wrapper_names(multi.iter().copied(), |name| {
            self.contains(name)
                || self.wrappers.contains_key(name)
                || module.function(name).is_some()
        })?;

        let profile_dir = options.profile.then(|| {
            options
                .profile_dir
                .clone()
                .unwrap_or_else(|| self.profile_root().to_path_buf())
        });

        let lowered = match &profile_dir {
            Some(dir) => {
                let input = persist_profile_input(dir, ir)?;
                self.driver.lower_file_and_translate(&input, passes)
            }
            None => self.driver.lower_and_translate(ir, passes),
        };
        let llvm_ir = match lowered {
            Ok(text) => text,
            Err(JitError::Lowering { diagnostic }) if options.debug => {
                tracing::debug!(%diagnostic, "lowering failed; replaying passes");
                return Ok(AddOutcome::Debug(self.driver.debug(ir, passes)));
            }
            Err(e) => return Err(e),
        };
        self.load(&llvm_ir, profile_dir.as_deref())?;

        if !multi.is_empty() {
            let unit = build_wrappers(
                &self.driver,
                &multi,
                passes,
                self.config.pointer_style(),
                module.keyword(),
            )?;
            tracing::trace!(%unit, "synthesized multi-result wrappers");
            let wrappers_ir = self.driver.lower_and_translate(&unit, passes)?;
            self.load(&wrappers_ir, profile_dir.as_deref())?;
            for sig in &multi {
                self.wrappers.insert(wrapper_name(&sig.name), sig.name.clone());
            }
        }

        let mut callables = Vec::with_capacity(pending.len());
        for p in pending {
            let entry = p.entry();
            let address = match &profile_dir {
                Some(_) => self.state.library_address(&entry)?,
                None => self.state.backend.borrow().function_address(&entry)?,
            };
            let profile = profile_dir.as_ref().map(|dir| ProfileTarget {
                dir: dir.clone(),
                symbol: p.sig.name.clone(),
            });
            let function = NativeFunction::new(p.sig.name.clone(), address, p.abi);
            callables.push(Callable::new(Rc::clone(&self.state), function, profile));
        }

        let names: Vec<String> = callables.iter().map(|c| c.name().to_string()).collect();
        for callable in callables {
            self.order.push(callable.name().to_string());
            self.callables.insert(callable.name().to_string(), callable);
        }
        tracing::debug!(?names, "registered callables");
        Ok(AddOutcome::Defined(names))
    }

    /// Check names and compute ABIs for the functions about to be
    /// registered.
    fn accept<'a>(
        &self,
        functions: impl Iterator<Item = &'a FunctionSignature>,
    ) -> JitResult<Vec<Pending<'a>>> {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let mut pending = Vec::new();
        for sig in functions {
            if let Some(owner) = self.wrappers.get(&sig.name) {
                return Err(JitError::WrapperNameCollision {
                    name: owner.clone(),
                    wrapper: sig.name.clone(),
                });
            }
            if self.contains(&sig.name) || !seen.insert(&sig.name) {
                return Err(JitError::DuplicateDefinition {
                    name: sig.name.clone(),
                });
            }
            let abi = compute_function_abi(sig)?;
            pending.push(Pending { sig, abi });
        }
        Ok(pending)
    }

    fn load(&self, llvm_ir: &str, profile_dir: Option<&Path>) -> JitResult<()> {
        let mut backend = self.state.backend.borrow_mut();
        match profile_dir {
            Some(dir) => {
                let previous = self.state.last_library();
                let library = backend.load_profiled(llvm_ir, dir, previous.as_deref())?;
                tracing::debug!(path = %library.path().display(), "loaded profile library");
                self.state.libraries.borrow_mut().push(library);
                Ok(())
            }
            None => backend.load(llvm_ir),
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("callables", &self.order)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests panic on failure")]
mod tests;
