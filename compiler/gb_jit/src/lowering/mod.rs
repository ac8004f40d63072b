//! Lowering and translation through the external MLIR toolchain.
//!
//! ```text
//! IR text ──mlir-opt <passes>──▶ LLVM dialect ──mlir-translate──▶ LLVM IR
//! ```
//!
//! Inputs are handed to the tools as files so diagnostics and debug
//! locations can refer to them. A non-zero exit of `mlir-opt` is a
//! [`JitError::Lowering`]; of `mlir-translate`, a [`JitError::Translation`].

mod debug;

use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use gb_ir::{FuncKeyword, IrType};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{JitError, JitResult};

pub use debug::{DebugResult, DebugStage};

/// Prefix of the dummy declarations used to learn lowered type spellings.
const LOWERING_STUB: &str = "__gb_lower_";

/// Runs the external pass pipeline and translator.
#[derive(Debug, Clone)]
pub struct LoweringDriver {
    mlir_opt: PathBuf,
    mlir_translate: PathBuf,
    opt_args: Vec<String>,
    translate_args: Vec<String>,
}

impl LoweringDriver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            mlir_opt: config.mlir_opt().to_path_buf(),
            mlir_translate: config.mlir_translate().to_path_buf(),
            opt_args: config.opt_args().to_vec(),
            translate_args: config.translate_args().to_vec(),
        }
    }

    /// Apply `passes` to IR text.
    pub fn apply_passes(&self, ir: &str, passes: &[String]) -> JitResult<String> {
        let file = write_temp(ir)?;
        self.apply_passes_to_file(file.path(), passes)
    }

    /// Apply `passes` to an IR file.
    pub fn apply_passes_to_file(&self, input: &Path, passes: &[String]) -> JitResult<String> {
        tracing::debug!(input = %input.display(), ?passes, "applying passes");
        let output = run_tool(
            &self.mlir_opt,
            self.opt_args.iter().chain(passes).map(String::as_str),
            input,
        )?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(JitError::Lowering {
                diagnostic: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            })
        }
    }

    /// Translate LLVM-dialect text to LLVM IR.
    pub fn translate(&self, lowered: &str) -> JitResult<String> {
        let file = write_temp(lowered)?;
        tracing::debug!("translating to LLVM IR");
        let output = run_tool(
            &self.mlir_translate,
            self.translate_args
                .iter()
                .map(String::as_str)
                .chain(["--mlir-to-llvmir"]),
            file.path(),
        )?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(JitError::Translation {
                diagnostic: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
                input: lowered.to_string(),
            })
        }
    }

    /// Lower IR text and translate the result to LLVM IR.
    pub fn lower_and_translate(&self, ir: &str, passes: &[String]) -> JitResult<String> {
        let lowered = self.apply_passes(ir, passes)?;
        self.translate(&lowered)
    }

    /// Lower an IR file and translate the result to LLVM IR.
    pub fn lower_file_and_translate(&self, input: &Path, passes: &[String]) -> JitResult<String> {
        let lowered = self.apply_passes_to_file(input, passes)?;
        self.translate(&lowered)
    }

    /// Re-run the pipeline one pass at a time to locate a failure.
    pub fn debug(&self, ir: &str, passes: &[String]) -> DebugResult {
        debug::run(self, ir, passes)
    }

    /// Spell each of `types` the way the pipeline lowers it.
    ///
    /// Composite types (dense arrays in particular) change shape during
    /// lowering. Each distinct type becomes the result of a dummy private
    /// declaration; the lowered declarations are matched back by name.
    pub fn lower_types(
        &self,
        types: &[IrType],
        passes: &[String],
        keyword: FuncKeyword,
    ) -> JitResult<Vec<String>> {
        let mut distinct: Vec<String> = Vec::new();
        let mut index_of = Vec::with_capacity(types.len());
        for ty in types {
            let spelled = ty.to_string();
            let index = match distinct.iter().position(|d| *d == spelled) {
                Some(i) => i,
                None => {
                    distinct.push(spelled);
                    distinct.len() - 1
                }
            };
            index_of.push(index);
        }
        if distinct.is_empty() {
            return Ok(Vec::new());
        }

        let declarations = distinct
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{} private @{LOWERING_STUB}{i}() -> {ty}", keyword.as_str()))
            .collect::<Vec<_>>()
            .join("\n");
        let lowered_text = self.apply_passes(&declarations, passes)?;

        let mut lowered: Vec<Option<String>> = vec![None; distinct.len()];
        for (i, ty) in lowered_text.lines().filter_map(parse_stub) {
            if let Some(slot) = lowered.get_mut(i) {
                *slot = Some(ty);
            }
        }
        index_of
            .into_iter()
            .map(|i| {
                lowered[i].clone().ok_or_else(|| JitError::Lowering {
                    diagnostic: format!(
                        "type lowering produced no declaration for '{}':\n{lowered_text}",
                        distinct[i]
                    ),
                })
            })
            .collect()
    }
}

/// Extract `(index, lowered type)` from a lowered stub declaration such as
/// `llvm.func @__gb_lower_0() -> !llvm.struct<(...)> attributes {...}`.
fn parse_stub(line: &str) -> Option<(usize, String)> {
    let rest = line.trim().strip_prefix("llvm.func")?.trim_start();
    let rest = rest.strip_prefix("private").map_or(rest, str::trim_start);
    let rest = rest.strip_prefix('@')?.strip_prefix(LOWERING_STUB)?;
    let digits = rest.find(|c: char| !c.is_ascii_digit())?;
    let index = rest[..digits].parse().ok()?;
    let ty = rest[digits..].trim_start().strip_prefix("()")?.trim_start();
    let ty = ty.strip_prefix("->")?.trim();
    let ty = match ty.find(" attributes ") {
        Some(end) => &ty[..end],
        None => ty,
    };
    Some((index, ty.trim().to_string()))
}

/// Persist profiled input as `prof-<uuid>.mlir` so reports can point at it.
pub fn persist_profile_input(dir: &Path, ir: &str) -> JitResult<PathBuf> {
    let path = dir.join(format!("prof-{}.mlir", Uuid::new_v4()));
    std::fs::write(&path, ir).map_err(JitError::io(format!("writing {}", path.display())))?;
    Ok(path)
}

fn write_temp(text: &str) -> JitResult<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("gb-")
        .suffix(".mlir")
        .tempfile()
        .map_err(JitError::io("creating a temporary IR file"))?;
    file.write_all(text.as_bytes())
        .map_err(JitError::io("writing a temporary IR file"))?;
    Ok(file)
}

fn run_tool<I, S>(tool: &Path, args: I, input: &Path) -> JitResult<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(tool)
        .args(args)
        .arg(input)
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                JitError::ToolMissing {
                    tool: tool.display().to_string(),
                    message: e.to_string(),
                }
            } else {
                JitError::io(format!("running {}", tool.display()))(e)
            }
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests panic on failure")]
mod tests;
