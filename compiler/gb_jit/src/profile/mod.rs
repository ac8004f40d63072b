//! Sampling profiles of single calls.
//!
//! A profiled call runs in a forked child under `perf record`; the parent
//! collects the result over a socket, then annotates the function from the
//! sampling data. Linux only.

#[cfg(target_os = "linux")]
mod perf;
#[cfg(target_os = "linux")]
mod process;
#[cfg(target_os = "linux")]
mod transfer;

use std::path::{Path, PathBuf};

use crate::call::NativeFunction;
use crate::error::{JitError, JitResult};
#[cfg(target_os = "linux")]
use crate::shared_object::LinkerDriver;
use crate::value::{Output, Value};

#[cfg(target_os = "linux")]
pub use transfer::{TransferOutput, TransferValue};

/// Kernel knob that gates unprivileged sampling.
pub const PERF_PARANOID_PATH: &str = "/proc/sys/kernel/perf_event_paranoid";

/// Check everything a profiled call needs before any process is spawned.
#[cfg(target_os = "linux")]
pub fn check_preconditions() -> JitResult<()> {
    perf::check_available()?;
    check_linker(&LinkerDriver::new())?;
    let contents = std::fs::read_to_string(PERF_PARANOID_PATH)
        .map_err(JitError::io(format!("reading {PERF_PARANOID_PATH}")))?;
    check_paranoid(&contents)
}

/// Profiled modules are linked into shared objects.
#[cfg(target_os = "linux")]
fn check_linker(linker: &LinkerDriver) -> JitResult<()> {
    if linker.is_available() {
        Ok(())
    } else {
        Err(JitError::ToolMissing {
            tool: linker.program().display().to_string(),
            message: "needed to link profiled modules into shared objects".to_string(),
        })
    }
}

#[cfg(not(target_os = "linux"))]
pub fn check_preconditions() -> JitResult<()> {
    Err(JitError::PlatformUnsupported)
}

#[cfg(target_os = "linux")]
fn check_paranoid(contents: &str) -> JitResult<()> {
    match contents.trim() {
        "-1" => Ok(()),
        level => Err(JitError::PermissionError {
            message: format!(
                "{PERF_PARANOID_PATH} is {level}; sampling requires -1 \
                 (sudo sh -c 'echo -1 > {PERF_PARANOID_PATH}')"
            ),
        }),
    }
}

/// `Profile Results:` followed by the annotation, indented.
pub fn format_report(annotation: &str) -> String {
    let mut report = String::from("Profile Results:\n");
    for line in annotation.lines() {
        report.push_str("    ");
        report.push_str(line);
        report.push('\n');
    }
    report
}

/// The outcome of one profiled call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileReport {
    text: String,
    path: PathBuf,
    data: PathBuf,
}

impl ProfileReport {
    /// The formatted report.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Where the report was written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `perf` sampling data the report was made from.
    pub fn data(&self) -> &Path {
        &self.data
    }
}

/// Reject functions whose results cannot be copied out of a child process.
fn check_transferable(function: &NativeFunction) -> JitResult<()> {
    match function.abi().results.iter().find(|r| r.is_process_local()) {
        Some(result) => Err(JitError::ProfileTransfer {
            name: function.name().to_string(),
            reason: format!(
                "'{}' refers to memory of the profiled process",
                result.ty()
            ),
        }),
        None => Ok(()),
    }
}

/// Call `function` under the profiler.
///
/// `symbol` is the name `perf` sees for the function's code; artifacts go to
/// `dir`.
///
/// # Safety
///
/// As for [`NativeFunction::invoke`].
#[tracing::instrument(level = "debug", skip_all, fields(%symbol))]
pub unsafe fn profiled_call(
    function: &NativeFunction,
    symbol: &str,
    args: &[Value],
    dir: &Path,
) -> JitResult<(Output, ProfileReport)> {
    check_transferable(function)?;
    function.check_arguments(args)?;
    run(function, symbol, args, dir)
}

#[cfg(target_os = "linux")]
fn run(
    function: &NativeFunction,
    symbol: &str,
    args: &[Value],
    dir: &Path,
) -> JitResult<(Output, ProfileReport)> {
    let (output, data) = process::run::<perf::Recording>(function, symbol, args, dir)?;
    let text = format_report(&perf::annotate(symbol, &data)?);
    let path = dir.join(format!("report-{}.txt", uuid::Uuid::new_v4()));
    std::fs::write(&path, &text).map_err(JitError::io(format!("writing {}", path.display())))?;
    tracing::info!(report = %path.display(), "\n{text}");
    Ok((output, ProfileReport { text, path, data }))
}

#[cfg(not(target_os = "linux"))]
fn run(
    _function: &NativeFunction,
    _symbol: &str,
    _args: &[Value],
    _dir: &Path,
) -> JitResult<(Output, ProfileReport)> {
    Err(JitError::PlatformUnsupported)
}
