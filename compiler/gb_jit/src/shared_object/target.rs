//! Native target configuration for profile objects.
//!
//! Profiled modules are re-emitted as position-independent objects for the
//! host, so only the native target is ever configured.

use std::fmt;
use std::sync::Once;

use inkwell::targets::{
    CodeModel, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};
use inkwell::OptimizationLevel;

/// Error type for target configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// Failed to initialize the native LLVM target.
    InitializationFailed(String),
    /// Failed to create a target machine.
    TargetMachineCreationFailed(String),
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => {
                write!(f, "failed to initialize LLVM target: {msg}")
            }
            Self::TargetMachineCreationFailed(msg) => {
                write!(f, "failed to create target machine: {msg}")
            }
        }
    }
}

impl std::error::Error for TargetError {}

/// Host target settings used to emit profile objects.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    triple: String,
    cpu: String,
    features: String,
    opt_level: OptimizationLevel,
    reloc_mode: RelocMode,
    code_model: CodeModel,
}

impl TargetConfig {
    /// The host target with position-independent code, ready for linking
    /// into a shared library.
    ///
    /// # Errors
    ///
    /// Returns an error if LLVM target initialization fails.
    pub fn native() -> Result<Self, TargetError> {
        initialize_native_target()?;

        let triple = TargetMachine::get_default_triple();
        Ok(Self {
            triple: triple.as_str().to_string_lossy().into_owned(),
            cpu: TargetMachine::get_host_cpu_name().to_string(),
            features: TargetMachine::get_host_cpu_features().to_string(),
            opt_level: OptimizationLevel::Default,
            reloc_mode: RelocMode::PIC,
            code_model: CodeModel::Default,
        })
    }

    #[must_use]
    pub fn with_opt_level(mut self, level: OptimizationLevel) -> Self {
        self.opt_level = level;
        self
    }

    #[must_use]
    pub fn triple(&self) -> &str {
        &self.triple
    }

    #[must_use]
    pub fn cpu(&self) -> &str {
        &self.cpu
    }

    #[must_use]
    pub fn reloc_mode(&self) -> RelocMode {
        self.reloc_mode
    }

    /// Create an LLVM `TargetMachine` for this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if LLVM cannot create a machine for the host
    /// triple, CPU and features.
    pub fn create_target_machine(&self) -> Result<TargetMachine, TargetError> {
        let target_triple = TargetTriple::create(&self.triple);

        let target = Target::from_triple(&target_triple).map_err(|e| {
            TargetError::TargetMachineCreationFailed(format!("failed to get target: {e}"))
        })?;

        target
            .create_target_machine(
                &target_triple,
                &self.cpu,
                &self.features,
                self.opt_level,
                self.reloc_mode,
                self.code_model,
            )
            .ok_or_else(|| {
                TargetError::TargetMachineCreationFailed(format!(
                    "LLVM returned None for target '{}' with CPU '{}'",
                    self.triple, self.cpu
                ))
            })
    }

    /// Set a module's triple and data layout to match `machine`.
    pub fn configure_module(&self, module: &inkwell::module::Module<'_>, machine: &TargetMachine) {
        module.set_triple(&TargetTriple::create(&self.triple));
        module.set_data_layout(&machine.get_target_data().get_data_layout());
    }
}

/// Map the engine's 0-3 optimization level onto LLVM's.
pub fn opt_level_from(level: u32) -> OptimizationLevel {
    match level {
        0 => OptimizationLevel::None,
        1 => OptimizationLevel::Less,
        2 => OptimizationLevel::Default,
        _ => OptimizationLevel::Aggressive,
    }
}

static NATIVE_TARGET_INIT: Once = Once::new();

/// Initialize the native LLVM target, its asm printer and asm parser.
///
/// Safe to call multiple times; initialization happens once. A failure is
/// reported to the first caller only; later callers see the target missing
/// when they create a machine.
pub fn initialize_native_target() -> Result<(), TargetError> {
    let mut result = Ok(());

    NATIVE_TARGET_INIT.call_once(|| {
        if let Err(e) = Target::initialize_native(&InitializationConfig::default()) {
            result = Err(TargetError::InitializationFailed(e));
        }
    });

    result
}
