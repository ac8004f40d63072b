//! Engine and per-call configuration.
//!
//! # Environment Variables
//!
//! - `GB_MLIR_OPT`: path to the pass-application tool (default `mlir-opt`).
//! - `GB_MLIR_TRANSLATE`: path to the translator (default `mlir-translate`).
//! - `GB_RUNTIME_LIBS`: platform path list of shared libraries compiled code
//!   links against (the sparse tensor runtime, for example).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable overriding the pass-application tool.
pub const MLIR_OPT_ENV: &str = "GB_MLIR_OPT";
/// Environment variable overriding the translator.
pub const MLIR_TRANSLATE_ENV: &str = "GB_MLIR_TRANSLATE";
/// Environment variable listing runtime libraries.
pub const RUNTIME_LIBS_ENV: &str = "GB_RUNTIME_LIBS";

/// How the multi-value bridge spells LLVM pointer types.
///
/// Toolchains built against LLVM 15 and later only accept untyped pointers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PointerStyle {
    /// `!llvm.ptr<T>`
    #[default]
    Typed,
    /// `!llvm.ptr`
    Opaque,
}

/// Engine-wide configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    mlir_opt: PathBuf,
    mlir_translate: PathBuf,
    opt_args: Vec<String>,
    translate_args: Vec<String>,
    runtime_libraries: Vec<PathBuf>,
    pointer_style: PointerStyle,
    opt_level: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mlir_opt: PathBuf::from("mlir-opt"),
            mlir_translate: PathBuf::from("mlir-translate"),
            opt_args: Vec::new(),
            translate_args: Vec::new(),
            runtime_libraries: Vec::new(),
            pointer_style: PointerStyle::default(),
            opt_level: 2,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by the `GB_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let mut config = Self::default();
        if let Some(path) = lookup(MLIR_OPT_ENV).filter(|v| !v.is_empty()) {
            config.mlir_opt = PathBuf::from(path);
        }
        if let Some(path) = lookup(MLIR_TRANSLATE_ENV).filter(|v| !v.is_empty()) {
            config.mlir_translate = PathBuf::from(path);
        }
        if let Some(list) = lookup(RUNTIME_LIBS_ENV) {
            config.runtime_libraries = std::env::split_paths(&list)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        config
    }

    #[must_use]
    pub fn with_mlir_opt(mut self, path: impl Into<PathBuf>) -> Self {
        self.mlir_opt = path.into();
        self
    }

    #[must_use]
    pub fn with_mlir_translate(mut self, path: impl Into<PathBuf>) -> Self {
        self.mlir_translate = path.into();
        self
    }

    /// Extra arguments passed to every pass-application run, before the passes.
    #[must_use]
    pub fn with_opt_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.opt_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Extra arguments passed to the translator, before `--mlir-to-llvmir`.
    #[must_use]
    pub fn with_translate_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.translate_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_runtime_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime_libraries.push(path.into());
        self
    }

    #[must_use]
    pub fn with_pointer_style(mut self, style: PointerStyle) -> Self {
        self.pointer_style = style;
        self
    }

    /// Code generation optimization level for the JIT (0-3).
    #[must_use]
    pub fn with_opt_level(mut self, level: u32) -> Self {
        self.opt_level = level.min(3);
        self
    }

    pub fn mlir_opt(&self) -> &Path {
        &self.mlir_opt
    }

    pub fn mlir_translate(&self) -> &Path {
        &self.mlir_translate
    }

    pub fn opt_args(&self) -> &[String] {
        &self.opt_args
    }

    pub fn translate_args(&self) -> &[String] {
        &self.translate_args
    }

    pub fn runtime_libraries(&self) -> &[PathBuf] {
        &self.runtime_libraries
    }

    pub fn pointer_style(&self) -> PointerStyle {
        self.pointer_style
    }

    pub fn opt_level(&self) -> u32 {
        self.opt_level
    }
}

/// Options for one `Engine::add` call.
#[derive(Clone, Debug, Default)]
pub struct AddOptions {
    pub(crate) debug: bool,
    pub(crate) profile: bool,
    pub(crate) profile_dir: Option<PathBuf>,
}

impl AddOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return lowering failures as a [`DebugResult`](crate::DebugResult)
    /// instead of an error.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Route calls through a sampling profiler.
    #[must_use]
    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    /// Write profile artifacts here instead of the engine's temporary
    /// directory. Requires profiling.
    #[must_use]
    pub fn with_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profile_dir = Some(dir.into());
        self
    }
}
