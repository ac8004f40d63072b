//! Driving `perf record` and `perf annotate`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use crate::error::{JitError, JitResult};

pub const PERF: &str = "perf";

/// Wait between readiness checks while `perf` starts up.
const ACK_POLL: Duration = Duration::from_millis(100);

pub fn record_command(pid: u32, data: &Path, ctl: &Path, ack: &Path) -> Command {
    let mut cmd = Command::new(PERF);
    cmd.arg("record")
        .arg("-g")
        .arg("-p")
        .arg(pid.to_string())
        .arg(format!("--output={}", data.display()))
        .arg("--delay=-1")
        .arg(format!("--control=fifo:{},{}", ctl.display(), ack.display()));
    cmd
}

pub fn annotate_command(symbol: &str, data: &Path) -> Command {
    let mut cmd = Command::new(PERF);
    cmd.arg("annotate")
        .arg("--stdio")
        .arg("--symbol")
        .arg(symbol)
        .arg("-l")
        .arg(format!("--input={}", data.display()));
    cmd
}

fn spawn_error(e: std::io::Error) -> JitError {
    if e.kind() == std::io::ErrorKind::NotFound {
        JitError::ToolMissing {
            tool: PERF.to_string(),
            message: e.to_string(),
        }
    } else {
        JitError::io("starting perf")(e)
    }
}

/// Whether `perf --version` runs.
pub fn check_available() -> JitResult<()> {
    let output = Command::new(PERF)
        .arg("--version")
        .output()
        .map_err(spawn_error)?;
    if output.status.success() {
        Ok(())
    } else {
        Err(JitError::ToolMissing {
            tool: PERF.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        })
    }
}

fn make_fifo(path: &Path) -> JitResult<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| {
        JitError::InvalidArgument {
            message: format!("'{}' contains a NUL byte", path.display()),
        }
    })?;
    // SAFETY: `c_path` is a valid NUL-terminated path.
    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) } != 0 {
        return Err(JitError::io(format!("creating fifo {}", path.display()))(
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}

/// Open a fifo read-write so the open never blocks on the other end.
fn open_fifo(path: &Path) -> JitResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(JitError::io(format!("opening fifo {}", path.display())))
}

/// A `perf record` session attached to one process.
pub struct Recording {
    child: Child,
    data: PathBuf,
    ctl: File,
    ack: File,
    _fifos: tempfile::TempDir,
}

impl Recording {
    /// Start recording `pid` into `data`, paused until [`Recording::enable`].
    pub fn start(pid: u32, data: PathBuf) -> JitResult<Self> {
        let fifos = tempfile::tempdir().map_err(JitError::io("creating the perf control directory"))?;
        let ctl_path = fifos.path().join("ctl");
        let ack_path = fifos.path().join("ack");
        make_fifo(&ctl_path)?;
        make_fifo(&ack_path)?;
        let ctl = open_fifo(&ctl_path)?;
        let ack = open_fifo(&ack_path)?;

        let mut cmd = record_command(pid, &data, &ctl_path, &ack_path);
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
        tracing::debug!(command = ?cmd, "starting perf record");
        let child = cmd.spawn().map_err(spawn_error)?;
        Ok(Self {
            child,
            data,
            ctl,
            ack,
            _fifos: fifos,
        })
    }

    /// Turn sampling on and block until `perf` acknowledges.
    pub fn enable(&mut self) -> JitResult<()> {
        self.ctl
            .write_all(b"enable\n")
            .map_err(JitError::io("writing to the perf control fifo"))?;
        loop {
            if self.ack_ready()? {
                let mut buf = [0u8; 16];
                let n = self
                    .ack
                    .read(&mut buf)
                    .map_err(JitError::io("reading the perf ack fifo"))?;
                if buf[..n].starts_with(b"ack") {
                    tracing::debug!("perf acknowledged enable");
                    return Ok(());
                }
            }
            if let Some(status) = self
                .child
                .try_wait()
                .map_err(JitError::io("checking on perf record"))?
            {
                let mut stderr = String::new();
                if let Some(pipe) = self.child.stderr.as_mut() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Err(record_failure(status.code(), stderr.trim_end()));
            }
        }
    }

    /// Block up to one poll interval for the ack fifo to become readable.
    fn ack_ready(&self) -> JitResult<bool> {
        let mut fd = libc::pollfd {
            fd: self.ack.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = libc::c_int::try_from(ACK_POLL.as_millis()).unwrap_or(libc::c_int::MAX);
        // SAFETY: one valid pollfd.
        let ready = unsafe { libc::poll(&mut fd, 1, timeout) };
        if ready < 0 {
            return Err(JitError::io("waiting for perf")(std::io::Error::last_os_error()));
        }
        Ok(ready > 0 && fd.revents & libc::POLLIN != 0)
    }

    /// Wait for `perf` to exit (it stops when the target exits) and return
    /// the data file.
    pub fn finish(mut self) -> JitResult<PathBuf> {
        let status = self
            .child
            .wait()
            .map_err(JitError::io("waiting for perf record"))?;
        let mut stderr = String::new();
        if let Some(pipe) = self.child.stderr.as_mut() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        tracing::debug!(?status, data = %self.data.display(), "perf record finished");
        check_record_exit(status, stderr.trim_end())?;
        Ok(std::mem::take(&mut self.data))
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

pub fn check_record_exit(status: ExitStatus, stderr: &str) -> JitResult<()> {
    if status.success() {
        Ok(())
    } else {
        Err(record_failure(status.code(), stderr))
    }
}

fn record_failure(code: Option<i32>, stderr: &str) -> JitError {
    if stderr.contains("perf_event_paranoid") || stderr.contains("Permission denied") {
        JitError::PermissionError {
            message: stderr.to_string(),
        }
    } else {
        JitError::ToolMissing {
            tool: PERF.to_string(),
            message: format!("perf record failed ({code:?}): {stderr}"),
        }
    }
}

/// Annotated source and assembly for `symbol`.
pub fn annotate(symbol: &str, data: &Path) -> JitResult<String> {
    let mut cmd = annotate_command(symbol, data);
    tracing::debug!(command = ?cmd, "running perf annotate");
    let output = cmd.output().map_err(spawn_error)?;
    if !output.status.success() {
        tracing::warn!(%symbol, status = ?output.status, "perf annotate failed");
    }
    Ok(annotation_text(&output.stdout, &output.stderr))
}

/// `perf annotate` output with its diagnostics appended, so a failed
/// annotation still says why in the report.
pub fn annotation_text(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).into_owned();
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim_end();
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(stderr);
        text.push('\n');
    }
    text
}
