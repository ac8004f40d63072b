//! Shared library linking through the system C compiler driver.
//!
//! Profile objects are linked as `cc -shared -g -o <out> <objects...>
//! <libraries...>` so that symbols resolve through the dynamic loader and
//! `perf` can symbolize samples.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Error type for linker operations.
#[derive(Debug, Clone)]
pub enum LinkerError {
    /// Linker executable not found.
    LinkerNotFound { linker: String, message: String },
    /// Linker invocation failed.
    LinkFailed {
        linker: String,
        exit_code: Option<i32>,
        stderr: String,
        command: String,
    },
    /// Invalid linker input.
    InvalidConfig { message: String },
    /// I/O error during linking.
    IoError { message: String },
}

impl fmt::Display for LinkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkerNotFound { linker, message } => {
                write!(f, "linker '{linker}' not found: {message}")
            }
            Self::LinkFailed {
                linker,
                exit_code,
                stderr,
                command,
            } => {
                write!(f, "linking with '{linker}' failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {code})")?;
                }
                if !stderr.is_empty() {
                    write!(f, "\n\nLinker stderr:\n{stderr}")?;
                }
                write!(f, "\n\nCommand: {command}")
            }
            Self::InvalidConfig { message } => {
                write!(f, "invalid linker configuration: {message}")
            }
            Self::IoError { message } => {
                write!(f, "I/O error during linking: {message}")
            }
        }
    }
}

impl std::error::Error for LinkerError {}

/// Inputs of one shared library link.
#[derive(Debug, Clone, Default)]
pub struct LinkInput {
    /// Object files, in link order.
    pub objects: Vec<PathBuf>,
    /// Shared libraries the output depends on, by path.
    pub libraries: Vec<PathBuf>,
    /// Output shared library path.
    pub output: PathBuf,
}

/// Drives the C compiler to produce shared libraries.
#[derive(Debug, Clone)]
pub struct LinkerDriver {
    program: PathBuf,
}

impl Default for LinkerDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkerDriver {
    /// A driver using `cc` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("cc")
    }

    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The command `link` would run.
    pub fn command(&self, input: &LinkInput) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-shared").arg("-g").arg("-o").arg(&input.output);
        cmd.args(&input.objects);
        cmd.args(&input.libraries);
        cmd
    }

    /// Link `input` into a shared library.
    ///
    /// # Errors
    ///
    /// Returns an error if there is nothing to link, the compiler driver is
    /// missing, or linking fails.
    pub fn link(&self, input: &LinkInput) -> Result<(), LinkerError> {
        if input.objects.is_empty() {
            return Err(LinkerError::InvalidConfig {
                message: "no object files to link".to_string(),
            });
        }

        let cmd = self.command(input);
        tracing::debug!(command = ?cmd, "linking shared library");
        let output = Self::run_linker(&cmd)?;
        if output.status.success() {
            return Ok(());
        }

        Err(LinkerError::LinkFailed {
            linker: cmd.get_program().to_string_lossy().into(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            command: format!("{cmd:?}"),
        })
    }

    fn run_linker(cmd: &Command) -> Result<Output, LinkerError> {
        let program = cmd.get_program().to_owned();
        let args: Vec<OsString> = cmd.get_args().map(ToOwned::to_owned).collect();

        let mut exec_cmd = Command::new(program);
        exec_cmd.args(args);

        exec_cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LinkerError::LinkerNotFound {
                    linker: cmd.get_program().to_string_lossy().into(),
                    message: e.to_string(),
                }
            } else {
                LinkerError::IoError {
                    message: e.to_string(),
                }
            }
        })
    }

    /// Whether the compiler driver runs at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}
