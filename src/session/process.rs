//! Child process supervision.
//!
//! A [`ProcessAdapter`] owns exactly one spawned child. Output is drained by
//! a blocking reader thread into an [`OutputStream`]; exit status is collected
//! by a waiter thread and published on a watch channel so any number of
//! tasks can await it without holding the child.

use std::ffi::{CStr, OsString};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::session::error::{Result, SessionError};
use crate::session::stdin::StdinChannel;

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Plain pipes; stdout and stderr share one pipe so their relative
    /// order is preserved.
    Pipe,
    /// A pseudo-terminal, so the child line-buffers, echoes input and
    /// flushes prompts as it would for a human.
    Pty,
}

/// What to run.
#[derive(Debug, Default)]
pub struct SpawnSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Scratch directory (build artifacts) that must outlive the process.
    pub workspace: Option<TempDir>,
}

impl SpawnSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn workspace(mut self, dir: TempDir) -> Self {
        self.workspace = Some(dir);
        self
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

/// How a session ended. Recorded once and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitInfo {
    /// The process returned from `main` or called `exit`.
    Exited { code: i32 },
    /// The process died from a signal it did not ask for.
    Signaled { signal: i32 },
    /// Terminated on request.
    Killed { signal: i32 },
    /// Output capture failed and the process was torn down.
    IoFailed { reason: String },
}

impl ExitInfo {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitInfo::Exited { code } => Some(*code),
            _ => None,
        }
    }

    /// Whether the process ended by itself rather than being torn down.
    pub fn is_natural(&self) -> bool {
        matches!(self, ExitInfo::Exited { .. } | ExitInfo::Signaled { .. })
    }
}

/// Result of one read from an [`OutputStream`].
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(Vec<u8>),
    /// Nothing arrived (yet); the stream is still open.
    Empty,
    /// The write side is gone; no more output will ever arrive.
    Closed,
}

/// Receiving end of the reader thread.
pub struct OutputStream {
    receiver: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
}

impl OutputStream {
    /// Non-blocking read of whatever has been produced so far.
    pub fn try_read(&mut self) -> io::Result<ReadOutcome> {
        let mut data = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(chunk) => data.extend(chunk?),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) if data.is_empty() => {
                    return Ok(ReadOutcome::Closed);
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }
        if data.is_empty() {
            Ok(ReadOutcome::Empty)
        } else {
            Ok(ReadOutcome::Data(data))
        }
    }

    /// Wait at most `wait` for the next chunk.
    pub async fn read(&mut self, wait: Duration) -> io::Result<ReadOutcome> {
        match tokio::time::timeout(wait, self.receiver.recv()).await {
            Ok(Some(chunk)) => chunk.map(ReadOutcome::Data),
            Ok(None) => Ok(ReadOutcome::Closed),
            Err(_) => Ok(ReadOutcome::Empty),
        }
    }
}

/// One supervised child process.
pub struct ProcessAdapter {
    pid: Option<u32>,
    io_mode: IoMode,
    stdin: StdinChannel,
    exit: watch::Receiver<Option<ExitInfo>>,
    // Keeps the pty alive for as long as the adapter exists.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
}

impl ProcessAdapter {
    /// Spawn `spec` with the given stream wiring.
    ///
    /// `chunk_size` bounds a single read from the child's output.
    pub fn spawn(
        spec: &SpawnSpec,
        io_mode: IoMode,
        chunk_size: usize,
    ) -> Result<(Self, OutputStream)> {
        match io_mode {
            IoMode::Pipe => spawn_piped(spec, chunk_size),
            IoMode::Pty => spawn_pty(spec, chunk_size),
        }
        .map_err(|reason| SessionError::Spawn {
            program: spec.program_name(),
            reason,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn io_mode(&self) -> IoMode {
        self.io_mode
    }

    /// Queue bytes for the child's input stream.
    pub fn write_stdin(&self, bytes: &[u8]) -> Result<()> {
        if self.has_exited() {
            return Err(SessionError::ClosedStream);
        }
        self.stdin.send(bytes.to_vec())
    }

    /// Close the child's input stream once queued input is written.
    pub fn close_stdin(&self) {
        self.stdin.close();
    }

    /// Exit status, if the child has already been reaped.
    pub fn try_exit(&self) -> Option<ExitInfo> {
        self.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Exit status of a child that has terminated but whose waiter thread
    /// has not published it yet. The child is left for the waiter to reap.
    pub fn peek_exit(&self) -> Option<ExitInfo> {
        let pid = self.pid?;
        // SAFETY: siginfo_t is plain data; waitid(2) fills it in.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: `info` is a valid, writable siginfo_t. WNOWAIT keeps the
        // child waitable.
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid,
                &mut info,
                libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
            )
        };
        if rc != 0 {
            // Already reaped by the waiter thread.
            return self.try_exit();
        }
        // SAFETY: waitid succeeded, so the SIGCHLD fields are initialised.
        let (child, status) = unsafe { (info.si_pid(), info.si_status()) };
        if child == 0 {
            return None;
        }
        match info.si_code {
            libc::CLD_EXITED => Some(ExitInfo::Exited { code: status }),
            libc::CLD_KILLED | libc::CLD_DUMPED => Some(ExitInfo::Signaled { signal: status }),
            _ => None,
        }
    }

    /// Wait for the child to exit. Only the calling task is suspended.
    pub async fn wait(&self) -> ExitInfo {
        let mut exit = self.exit.clone();
        let info = match exit.wait_for(Option::is_some).await {
            Ok(status) => status.clone(),
            Err(_) => None,
        };
        info.unwrap_or_else(|| ExitInfo::IoFailed {
            reason: "exit watcher stopped".into(),
        })
    }

    /// Request termination of the child's process group with `SIGKILL`.
    ///
    /// Returns without waiting for the process to die. Does nothing when the
    /// child has already been reaped, so a recycled pid is never signalled.
    pub fn kill(&self) -> bool {
        if self.has_exited() || self.peek_exit().is_some() {
            return false;
        }
        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return false;
        };
        // Children run as process-group leaders; fall back to the pid itself.
        // SAFETY: kill(2) has no memory-safety preconditions.
        let sent = unsafe { libc::kill(-pid, libc::SIGKILL) == 0 || libc::kill(pid, libc::SIGKILL) == 0 };
        debug!(pid, sent, "kill requested");
        sent
    }
}

impl Drop for ProcessAdapter {
    fn drop(&mut self) {
        self.kill();
        self.stdin.close();
        self.master.lock().take();
    }
}

fn spawn_piped(
    spec: &SpawnSpec,
    chunk_size: usize,
) -> std::result::Result<(ProcessAdapter, OutputStream), String> {
    let (output, write_end) = output_pipe().map_err(|e| e.to_string())?;
    let stderr_end = write_end.try_clone().map_err(|e| e.to_string())?;

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::piped())
        .stdout(Stdio::from(write_end))
        .stderr(Stdio::from(stderr_end))
        .process_group(0);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let spawned = command.spawn();
    // The command holds our copies of the write end; the reader only sees
    // EOF once every copy outside the child is gone.
    drop(command);
    let mut child = spawned.map_err(|e| e.to_string())?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| "child stdin was not captured".to_string())?;
    let pid = child.id();

    let (exit_tx, exit_rx) = watch::channel(None);
    thread::Builder::new()
        .name("runbox-wait".into())
        .spawn(move || {
            let info = match child.wait() {
                Ok(status) => match (status.code(), status.signal()) {
                    (Some(code), _) => ExitInfo::Exited { code },
                    (None, Some(signal)) => ExitInfo::Signaled { signal },
                    (None, None) => ExitInfo::IoFailed {
                        reason: format!("unrecognised exit status {status}"),
                    },
                },
                Err(err) => ExitInfo::IoFailed {
                    reason: err.to_string(),
                },
            };
            let _ = exit_tx.send(Some(info));
        })
        .map_err(|e| e.to_string())?;

    let stream = spawn_reader(Box::new(output), chunk_size, false).map_err(|e| e.to_string())?;
    debug!(pid, program = %spec.program_name(), "spawned piped process");

    Ok((
        ProcessAdapter {
            pid: Some(pid),
            io_mode: IoMode::Pipe,
            stdin: StdinChannel::start(Box::new(stdin)),
            exit: exit_rx,
            master: Mutex::new(None),
        },
        stream,
    ))
}

fn spawn_pty(
    spec: &SpawnSpec,
    chunk_size: usize,
) -> std::result::Result<(ProcessAdapter, OutputStream), String> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 120,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| e.to_string())?;

    disable_canonical(&*pair.master).map_err(|e| e.to_string())?;

    let mut cmd = CommandBuilder::new(&spec.program);
    cmd.args(&spec.args);
    cmd.env("TERM", "dumb");
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    match &spec.cwd {
        Some(cwd) => cmd.cwd(cwd),
        None => cmd.cwd(std::env::current_dir().map_err(|e| e.to_string())?),
    }

    let mut child = pair.slave.spawn_command(cmd).map_err(|e| e.to_string())?;
    drop(pair.slave);

    let pid = child.process_id();
    let reader = pair.master.try_clone_reader().map_err(|e| e.to_string())?;
    let writer = pair.master.take_writer().map_err(|e| e.to_string())?;

    let (exit_tx, exit_rx) = watch::channel(None);
    thread::Builder::new()
        .name("runbox-wait".into())
        .spawn(move || {
            let info = match child.wait() {
                Ok(status) => match status.signal() {
                    None => ExitInfo::Exited {
                        code: i32::try_from(status.exit_code()).unwrap_or(i32::MAX),
                    },
                    Some(name) => match signal_number(name) {
                        Some(signal) => ExitInfo::Signaled { signal },
                        None => ExitInfo::IoFailed {
                            reason: format!("terminated by unknown signal {name:?}"),
                        },
                    },
                },
                Err(err) => ExitInfo::IoFailed {
                    reason: err.to_string(),
                },
            };
            let _ = exit_tx.send(Some(info));
        })
        .map_err(|e| e.to_string())?;

    let stream = spawn_reader(reader, chunk_size, true).map_err(|e| e.to_string())?;
    debug!(?pid, program = %spec.program_name(), "spawned pty process");

    Ok((
        ProcessAdapter {
            pid,
            io_mode: IoMode::Pty,
            stdin: StdinChannel::start(writer),
            exit: exit_rx,
            master: Mutex::new(Some(pair.master)),
        },
        stream,
    ))
}

/// Turn off line editing on the pty so input lines longer than the kernel's
/// canonical buffer reach the child whole. Echo stays on.
fn disable_canonical(master: &(dyn MasterPty + Send)) -> io::Result<()> {
    let Some(fd) = master.as_raw_fd() else {
        return Ok(());
    };
    // SAFETY: termios is plain data; tcgetattr(3) fills it in.
    let mut termios: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is the open pty master and `termios` is writable.
    if unsafe { libc::tcgetattr(fd, &mut termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    termios.c_lflag &= !libc::ICANON;
    termios.c_cc[libc::VMIN] = 1;
    termios.c_cc[libc::VTIME] = 0;
    // SAFETY: as above; `termios` was initialised by tcgetattr.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Signal number for a description reported by the pty layer, which uses
/// `strsignal(3)` or `Signal <n>` when the libc has no description.
fn signal_number(description: &str) -> Option<i32> {
    if let Some(number) = description.strip_prefix("Signal ") {
        return number.trim().parse().ok();
    }
    (1..=64).find(|&signal| {
        // SAFETY: strsignal(3) returns null or a NUL-terminated string.
        let name = unsafe { libc::strsignal(signal) };
        // SAFETY: checked for null; the string is only read here.
        !name.is_null() && unsafe { CStr::from_ptr(name) }.to_bytes() == description.as_bytes()
    })
}

/// Start the thread that moves child output into an [`OutputStream`].
///
/// On Linux a pty master reports `EIO` once the last slave descriptor
/// closes; with `eio_is_eof` that is treated as end of stream.
fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    chunk_size: usize,
    eio_is_eof: bool,
) -> io::Result<OutputStream> {
    let (sender, receiver) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("runbox-output".into())
        .spawn(move || {
            let mut buffer = vec![0u8; chunk_size.max(1)];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(count) => {
                        if sender.send(Ok(buffer[..count].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) if eio_is_eof && err.raw_os_error() == Some(libc::EIO) => break,
                    Err(err) => {
                        warn!("output reader failed: {err}");
                        let _ = sender.send(Err(err));
                        break;
                    }
                }
            }
        })?;
    Ok(OutputStream { receiver })
}

/// A close-on-exec pipe: the read end as a file, the write end for the child.
fn output_pipe() -> io::Result<(File, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a valid, writable array of two descriptors.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by us.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in fds {
        // SAFETY: `fd` is one of the descriptors opened above.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok((File::from(read), write))
}
