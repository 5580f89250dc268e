//! Session execution engine.
//!
//! A [`Session`] binds one spawned process (optionally driven through a
//! [`DebugController`]) to its [`OutputBuffer`] and input channel. A single
//! background pump task per session drains process output into the buffer
//! and is the only writer of buffer, prompt state and command dispatch;
//! callers poll output by cursor and push input concurrently.

pub mod buffer;
pub mod controller;
pub mod error;
pub mod process;
pub mod registry;
pub mod state;
pub mod stdin;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use buffer::OutputBuffer;
pub use controller::{DebugController, PromptState};
pub use error::{Result, SessionError};
pub use process::{ExitInfo, IoMode, OutputStream, ProcessAdapter, ReadOutcome, SpawnSpec};
pub use registry::SessionRegistry;
pub use state::{SessionMode, SessionState};

use crate::config::SessionsConfig;
use crate::session::buffer::complete_utf8_len;
use crate::session::registry::SessionSlot;

pub type SessionId = u64;

/// Engine tunables, derived from the `[sessions]` config section.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_sessions: usize,
    /// How long a finished session stays addressable.
    pub grace_period: Duration,
    /// Output silence after which an interactive program is assumed to be
    /// waiting for input.
    pub input_grace: Duration,
    /// How long to keep draining output after the process has exited.
    pub exit_linger: Duration,
    pub read_chunk: usize,
    pub prompt_marker: String,
}

impl From<&SessionsConfig> for SessionSettings {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            grace_period: Duration::from_secs(config.grace_period_seconds),
            input_grace: Duration::from_millis(config.input_grace_ms),
            exit_linger: Duration::from_millis(config.exit_linger_ms),
            read_chunk: config.read_chunk_bytes,
            prompt_marker: config.prompt_marker.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionsConfig::default())
    }
}

/// Result of polling a session's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// New output (possibly empty) and the offset to continue from.
    Output { data: Vec<u8>, offset: usize },
    /// The session is terminal and every byte has been read.
    Finished,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub mode: SessionMode,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub output_len: usize,
    pub exit: Option<ExitInfo>,
}

pub struct Session {
    id: SessionId,
    mode: SessionMode,
    state: Mutex<SessionState>,
    exit_info: OnceLock<ExitInfo>,
    finished_at: Mutex<Option<Instant>>,
    done: watch::Sender<bool>,
    process: ProcessAdapter,
    controller: Option<Mutex<DebugController>>,
    buffer: OutputBuffer,
    cursor: Mutex<usize>,
    output_since_input: AtomicBool,
    slot: Mutex<Option<SessionSlot>>,
    // Dropped after the process so build artifacts outlive it.
    _workspace: Option<TempDir>,
}

impl Session {
    /// Spawn the process and start the output pump.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn start(
        id: SessionId,
        mode: SessionMode,
        mut spec: SpawnSpec,
        settings: &SessionSettings,
        slot: SessionSlot,
    ) -> Result<Arc<Self>> {
        debug!(session_id = id, %mode, state = ?SessionState::Starting, "spawning session process");
        let workspace = spec.workspace.take();
        let (process, stream) =
            ProcessAdapter::spawn(&spec, mode.io_mode(), settings.read_chunk).inspect_err(|err| {
                warn!(session_id = id, %mode, "spawn failed: {err}");
            })?;

        let controller = (mode == SessionMode::Debugger)
            .then(|| Mutex::new(DebugController::new(settings.prompt_marker.clone())));

        let session = Arc::new(Self {
            id,
            mode,
            state: Mutex::new(SessionState::Starting),
            exit_info: OnceLock::new(),
            finished_at: Mutex::new(None),
            done: watch::Sender::new(false),
            process,
            controller,
            buffer: OutputBuffer::new(),
            cursor: Mutex::new(0),
            output_since_input: AtomicBool::new(false),
            slot: Mutex::new(Some(slot)),
            _workspace: workspace,
        });
        session.transition(SessionState::Running);
        info!(session_id = id, %mode, pid = ?session.process.pid(), "session started");

        let timing = PumpTiming {
            input_grace: settings.input_grace,
            exit_linger: settings.exit_linger,
        };
        tokio::spawn(pump(Arc::clone(&session), stream, timing));
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit_info.get().cloned()
    }

    /// Debugger prompt state; `None` outside debugger mode.
    pub fn prompt_state(&self) -> Option<PromptState> {
        self.controller.as_ref().map(|c| c.lock().prompt_state())
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.buffer
    }

    /// When the pump sealed the buffer, if it has.
    pub fn finished_at(&self) -> Option<Instant> {
        *self.finished_at.lock()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            mode: self.mode,
            state: self.state(),
            pid: self.process.pid(),
            output_len: self.buffer.len(),
            exit: self.exit_info(),
        }
    }

    /// Raw bytes appended since `offset`.
    pub fn read_since(&self, offset: usize) -> Result<(Vec<u8>, usize)> {
        self.buffer.read_since(offset)
    }

    /// Poll with the session's own server-side cursor, advancing it.
    pub fn poll(&self) -> Result<PollResult> {
        let mut cursor = self.cursor.lock();
        let result = self.poll_from(*cursor)?;
        if let PollResult::Output { offset, .. } = &result {
            *cursor = *offset;
        }
        Ok(result)
    }

    /// Poll from a caller-held offset.
    ///
    /// While the process is live a truncated trailing UTF-8 sequence is held
    /// back until the rest of it arrives.
    pub fn poll_from(&self, offset: usize) -> Result<PollResult> {
        // Checked before reading: a sealed buffer cannot grow afterwards.
        let closed = self.buffer.is_closed();
        let (mut data, _) = self.buffer.read_since(offset)?;
        if data.is_empty() && closed {
            return Ok(PollResult::Finished);
        }
        if !closed {
            data.truncate(complete_utf8_len(&data));
        }
        let offset = offset + data.len();
        Ok(PollResult::Output { data, offset })
    }

    /// Deliver caller input according to the session mode: command lines
    /// for a debugger, a newline-terminated payload for everything else.
    pub fn submit_input(&self, payload: &str) -> Result<()> {
        if self.mode == SessionMode::Debugger {
            for line in payload.lines().filter(|line| !line.trim().is_empty()) {
                self.send_command(line)?;
            }
            return Ok(());
        }
        let mut bytes = payload.as_bytes().to_vec();
        if !payload.ends_with('\n') {
            bytes.push(b'\n');
        }
        self.write_stdin(&bytes)
    }

    /// Write raw bytes to the process, bypassing any debugger pacing.
    pub fn write_stdin(&self, bytes: &[u8]) -> Result<()> {
        if self.state().is_terminal() {
            return Err(SessionError::ClosedStream);
        }
        self.process.write_stdin(bytes)?;
        self.output_since_input.store(false, Ordering::SeqCst);
        self.transition(SessionState::Running);
        Ok(())
    }

    /// Queue a debugger command; it is written once the debugger prompts.
    /// Without a debugger the line goes to stdin as is.
    pub fn send_command(&self, line: &str) -> Result<()> {
        let Some(controller) = &self.controller else {
            let mut bytes = line.as_bytes().to_vec();
            bytes.push(b'\n');
            return self.write_stdin(&bytes);
        };
        let mut controller = controller.lock();
        if let Some(bytes) = controller.send_command(line)? {
            self.process.write_stdin(&bytes)?;
            self.transition(SessionState::Running);
        }
        Ok(())
    }

    /// Close the process's input stream after queued input is written.
    pub fn close_stdin(&self) {
        self.process.close_stdin();
    }

    /// Request termination. Safe in any state and idempotent: every call
    /// returns the same exit info. Does not wait for the process to die.
    pub fn kill(&self) -> ExitInfo {
        let recorded = self
            .exit_info
            .get_or_init(|| {
                // A child that already exited keeps its own status even if
                // the waiter thread has not published it yet.
                if let Some(exit) = self.process.try_exit().or_else(|| self.process.peek_exit()) {
                    return exit;
                }
                if !self.process.kill() {
                    if let Some(exit) = self.process.try_exit() {
                        return exit;
                    }
                }
                ExitInfo::Killed {
                    signal: libc::SIGKILL,
                }
            })
            .clone();
        if self.transition(terminal_state(&recorded)) {
            info!(session_id = self.id, exit = ?recorded, "session terminated on request");
        }
        recorded
    }

    /// Wait until the session is terminal and its output fully captured.
    pub async fn wait(&self) -> Option<ExitInfo> {
        let mut done = self.done.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = done.wait_for(|finished| *finished).await;
        self.exit_info()
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state == next || !state.can_transition_to(next) {
            return false;
        }
        debug!(session_id = self.id, from = ?*state, to = ?next, "state transition");
        *state = next;
        true
    }

    fn ingest(&self, chunk: &[u8]) {
        if !self.buffer.append(chunk) {
            return;
        }
        self.output_since_input.store(true, Ordering::SeqCst);

        let Some(controller) = &self.controller else {
            self.transition(SessionState::Running);
            return;
        };
        let mut controller = controller.lock();
        if let Some(command) = controller.observe(chunk) {
            if let Err(err) = self.process.write_stdin(&command) {
                debug!(session_id = self.id, "dropping debugger command: {err}");
            }
        }
        match controller.prompt_state() {
            PromptState::Idle => self.transition(SessionState::AwaitingInput),
            PromptState::Busy => self.transition(SessionState::Running),
        };
    }

    fn on_stall(&self) {
        if self.mode == SessionMode::Interactive
            && self.output_since_input.load(Ordering::SeqCst)
            && !self.process.has_exited()
        {
            self.transition(SessionState::AwaitingInput);
        }
    }

    fn finish(&self, exit: ExitInfo) {
        let recorded = self.exit_info.get_or_init(|| exit).clone();
        self.transition(terminal_state(&recorded));
        self.buffer.close();
        if let Some(controller) = &self.controller {
            let dropped = controller.lock().close();
            if dropped > 0 {
                debug!(session_id = self.id, dropped, "discarded queued debugger commands");
            }
        }
        self.process.close_stdin();
        self.slot.lock().take();
        *self.finished_at.lock() = Some(Instant::now());
        self.done.send_replace(true);
        info!(
            session_id = self.id,
            mode = %self.mode,
            exit = ?recorded,
            bytes = self.buffer.len(),
            "session finished"
        );
    }
}

fn terminal_state(exit: &ExitInfo) -> SessionState {
    if exit.is_natural() {
        SessionState::Exited
    } else {
        SessionState::Killed
    }
}

struct PumpTiming {
    input_grace: Duration,
    exit_linger: Duration,
}

/// Drain process output into the session until the process is gone.
async fn pump(session: Arc<Session>, mut stream: OutputStream, timing: PumpTiming) {
    let exit = loop {
        tokio::select! {
            biased;
            read = stream.read(timing.input_grace) => match read {
                Ok(ReadOutcome::Data(chunk)) => session.ingest(&chunk),
                Ok(ReadOutcome::Empty) => session.on_stall(),
                Ok(ReadOutcome::Closed) => break session.process.wait().await,
                Err(err) => {
                    warn!(session_id = session.id, "output capture failed: {err}");
                    session.process.kill();
                    break ExitInfo::IoFailed { reason: err.to_string() };
                }
            },
            // Exited while something else still holds the output stream open.
            exit = session.process.wait() => {
                linger(&session, &mut stream, timing.exit_linger).await;
                break exit;
            }
        }
    };
    session.finish(exit);
}

async fn linger(session: &Session, stream: &mut OutputStream, window: Duration) {
    while let Ok(ReadOutcome::Data(chunk)) = stream.read(window).await {
        session.ingest(&chunk);
    }
}
