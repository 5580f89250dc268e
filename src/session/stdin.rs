//! Ordered input delivery to a child's stdin.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::error::{Result, SessionError};

/// Single-writer conduit from callers to a process's input stream.
///
/// Payloads are queued without bound and written by a dedicated thread in
/// submission order, so a slow consumer never blocks a request handler.
pub struct StdinChannel {
    sender: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    open: Arc<AtomicBool>,
}

impl StdinChannel {
    /// Start the writer thread that owns `writer`.
    ///
    /// The writer is dropped (closing the stream) once the channel is
    /// closed and its queue drained, or after the first write error.
    pub fn start(writer: Box<dyn Write + Send>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Vec<u8>>();
        let open = Arc::new(AtomicBool::new(true));
        let open_flag = Arc::clone(&open);

        let spawned = thread::Builder::new()
            .name("runbox-stdin".into())
            .spawn(move || {
                let mut writer = writer;
                while let Some(payload) = receiver.blocking_recv() {
                    let written = writer.write_all(&payload).and_then(|()| writer.flush());
                    if let Err(err) = written {
                        debug!("stdin writer stopped: {err}");
                        break;
                    }
                }
                open_flag.store(false, Ordering::SeqCst);
            });

        if let Err(err) = spawned {
            debug!("failed to start stdin writer: {err}");
            open.store(false, Ordering::SeqCst);
        }

        Self {
            sender: Mutex::new(Some(sender)),
            open,
        }
    }

    /// Queue a payload for delivery.
    pub fn send(&self, payload: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(SessionError::ClosedStream);
        }
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(SessionError::ClosedStream);
        };
        sender.send(payload).map_err(|_| SessionError::ClosedStream)
    }

    /// Stop accepting payloads. Already queued payloads are still written
    /// before the stream is closed.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.sender.lock().is_some()
    }
}
