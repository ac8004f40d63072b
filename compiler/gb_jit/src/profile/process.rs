//! The profiled call in a forked child.
//!
//! ```text
//! parent                               child
//!   fork ───────────────────────────────▶ send Ready{pid}
//!   recv Ready ◀──────────────────────────
//!   sampler attaches (perf record -p pid, paused)
//!   enable, wait for ack
//!   send Start ──────────────────────────▶ recv Start
//!                                          call, capture result
//!   recv Finished ◀────────────────────── send Finished; _exit
//!   waitpid(child); sampler finishes
//! ```

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::perf::Recording;
use super::transfer::{recv, send, Message, TransferOutput};
use crate::call::NativeFunction;
use crate::error::{JitError, JitResult};
use crate::value::{Output, Value};

/// A forked child that is killed and reaped unless waited for.
struct ChildProcess {
    pid: libc::pid_t,
    reaped: bool,
}

impl ChildProcess {
    fn wait(&mut self) -> JitResult<i32> {
        let mut status = 0;
        // SAFETY: `pid` is our own unreaped child.
        let reaped = unsafe { libc::waitpid(self.pid, &mut status, 0) };
        if reaped < 0 {
            return Err(JitError::io("waiting for the profiled process")(
                std::io::Error::last_os_error(),
            ));
        }
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if !self.reaped {
            // SAFETY: `pid` is our own unreaped child.
            unsafe {
                libc::kill(self.pid, libc::SIGKILL);
                libc::waitpid(self.pid, std::ptr::null_mut(), 0);
            }
        }
    }
}

/// Something that samples the child between `Ready` and `Finished`.
pub trait Sampler: Sized {
    /// Attach to `pid`, writing samples to `data`; paused until enabled.
    fn attach(pid: u32, data: PathBuf) -> JitResult<Self>;
    fn enable(&mut self) -> JitResult<()>;
    /// Wait for sampling to end and return the data file.
    fn finish(self) -> JitResult<PathBuf>;
}

impl Sampler for Recording {
    fn attach(pid: u32, data: PathBuf) -> JitResult<Self> {
        Recording::start(pid, data)
    }

    fn enable(&mut self) -> JitResult<()> {
        Recording::enable(self)
    }

    fn finish(self) -> JitResult<PathBuf> {
        Recording::finish(self)
    }
}

/// Run `function(args)` in a child process under `S`. Returns the copied
/// result and the sampling data file.
pub fn run<S: Sampler>(
    function: &NativeFunction,
    symbol: &str,
    args: &[Value],
    dir: &Path,
) -> JitResult<(Output, PathBuf)> {
    let (mut parent_end, child_end) =
        UnixStream::pair().map_err(JitError::io("creating the profiling channel"))?;

    // SAFETY: the child only runs the call and talks over its socket before
    // `_exit`; it never returns into the caller's stack frames.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(JitError::io("forking the profiled process")(
            std::io::Error::last_os_error(),
        ));
    }
    if pid == 0 {
        drop(parent_end);
        child_main(function, symbol, args, child_end);
    }
    drop(child_end);
    let mut child = ChildProcess { pid, reaped: false };
    tracing::debug!(pid, %symbol, "forked profiled process");

    let Message::Ready { pid: reported } = recv(&mut parent_end, symbol)? else {
        return Err(protocol_error(symbol, "expected Ready"));
    };
    if i64::from(reported) != i64::from(pid) {
        return Err(protocol_error(symbol, "child reported a different pid"));
    }

    let data = dir.join(format!("perf-{}.data", Uuid::new_v4()));
    let mut sampler = S::attach(reported, data)?;
    sampler.enable()?;
    send(&mut parent_end, symbol, &Message::Start)?;

    let finished = recv(&mut parent_end, symbol)?;
    let status = child.wait()?;
    let data = sampler.finish()?;
    tracing::debug!(status, data = %data.display(), "profiled process exited");

    match finished {
        Message::Finished(Ok(output)) => Ok((output.restore()?, data)),
        Message::Finished(Err(reason)) => Err(JitError::ProfileTransfer {
            name: symbol.to_string(),
            reason,
        }),
        _ => Err(protocol_error(symbol, "expected Finished")),
    }
}

fn protocol_error(symbol: &str, what: &str) -> JitError {
    JitError::ProfileTransfer {
        name: symbol.to_string(),
        reason: format!("profiling handshake broke: {what}"),
    }
}

fn child_main(function: &NativeFunction, symbol: &str, args: &[Value], mut stream: UnixStream) -> ! {
    let code = match child_session(function, symbol, args, &mut stream) {
        Ok(()) => 0,
        Err(_) => 1,
    };
    // SAFETY: leave without running the parent's exit handlers.
    unsafe { libc::_exit(code) }
}

fn child_session(
    function: &NativeFunction,
    symbol: &str,
    args: &[Value],
    stream: &mut UnixStream,
) -> JitResult<()> {
    send(stream, symbol, &Message::Ready { pid: std::process::id() })?;
    let Message::Start = recv(stream, symbol)? else {
        return Err(protocol_error(symbol, "expected Start"));
    };
    // SAFETY: `function` was prepared from the compiled signature.
    let outcome = unsafe { function.invoke(args) }
        .map_err(|e| e.to_string())
        .and_then(|output| TransferOutput::capture(&output));
    send(stream, symbol, &Message::Finished(outcome))
}
