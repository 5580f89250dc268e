//! Prompt-paced command delivery for debugger front-ends.
//!
//! The debugger's REPL is treated as an unstructured transcript. The only
//! thing recognised in it is the prompt marker, which says the debugger is
//! blocked waiting for its next command. Commands submitted while it is busy
//! wait in a FIFO queue and are released one per prompt.

use std::collections::VecDeque;

use crate::session::error::{Result, SessionError};

/// Whether the debugger is blocked on a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    /// Working: starting up, or executing the last command.
    Busy,
    /// The prompt marker was seen and no command has been sent since.
    Idle,
}

#[derive(Debug)]
pub struct DebugController {
    marker: Vec<u8>,
    /// Unmatched output tail, so a marker split across reads is still found.
    tail: Vec<u8>,
    prompt_state: PromptState,
    queue: VecDeque<String>,
    closed: bool,
}

impl DebugController {
    /// A controller for a debugger that has not printed its first prompt.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into().into_bytes(),
            tail: Vec::new(),
            prompt_state: PromptState::Busy,
            queue: VecDeque::new(),
            closed: false,
        }
    }

    pub fn prompt_state(&self) -> PromptState {
        self.prompt_state
    }

    /// Commands waiting for a prompt.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queue `line`. Returns the bytes to write to the debugger right away
    /// when it is idle; otherwise the line waits for the next prompt.
    pub fn send_command(&mut self, line: &str) -> Result<Option<Vec<u8>>> {
        if self.closed {
            return Err(SessionError::ClosedStream);
        }
        self.queue.push_back(line.trim_end_matches(['\r', '\n']).to_string());
        Ok(self.dispatch())
    }

    /// Scan a chunk of debugger output for the prompt marker. Returns the
    /// next queued command if the prompt released one.
    pub fn observe(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        if self.closed || self.marker.is_empty() {
            return None;
        }

        let mut window = std::mem::take(&mut self.tail);
        window.extend_from_slice(chunk);

        let mut prompted = false;
        let mut consumed = 0;
        while let Some(pos) = find(&window[consumed..], &self.marker) {
            prompted = true;
            consumed += pos + self.marker.len();
        }

        let keep = self.marker.len() - 1;
        let start = window.len().saturating_sub(keep).max(consumed);
        self.tail = window.split_off(start);

        if !prompted {
            return None;
        }
        self.prompt_state = PromptState::Idle;
        self.dispatch()
    }

    /// Stop accepting commands; returns how many queued commands were
    /// discarded.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        self.prompt_state = PromptState::Busy;
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    fn dispatch(&mut self) -> Option<Vec<u8>> {
        if self.prompt_state != PromptState::Idle {
            return None;
        }
        let line = self.queue.pop_front()?;
        self.prompt_state = PromptState::Busy;
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        Some(bytes)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str = "(gdb) ";

    #[test]
    fn commands_wait_for_first_prompt() {
        let mut controller = DebugController::new(PROMPT);
        assert_eq!(controller.send_command("break main").unwrap(), None);
        assert_eq!(controller.pending(), 1);

        let released = controller.observe(b"GNU gdb\n(gdb) ");
        assert_eq!(released, Some(b"break main\n".to_vec()));
        assert_eq!(controller.prompt_state(), PromptState::Busy);
        assert_eq!(controller.pending(), 0);
    }

    #[test]
    fn idle_debugger_takes_command_immediately() {
        let mut controller = DebugController::new(PROMPT);
        assert_eq!(controller.observe(b"(gdb) "), None);
        assert_eq!(controller.prompt_state(), PromptState::Idle);
        assert_eq!(
            controller.send_command("run\n").unwrap(),
            Some(b"run\n".to_vec())
        );
    }

    #[test]
    fn one_command_per_prompt_in_fifo_order() {
        let mut controller = DebugController::new(PROMPT);
        for line in ["break main", "run", "next", "continue"] {
            controller.send_command(line).unwrap();
        }

        let mut delivered = Vec::new();
        let transcript: [&[u8]; 5] = [
            b"(gdb) ",
            b"Breakpoint 1 at 0x1149\n(gdb) ",
            b"Breakpoint 1, main () at main.c:4\n(gdb) ",
            b"5\t    return 0;\n",
            b"(gdb) ",
        ];
        for chunk in transcript {
            // output with no prompt must never release a command
            if let Some(bytes) = controller.observe(chunk) {
                delivered.push(String::from_utf8(bytes).unwrap());
            }
        }
        assert_eq!(delivered, ["break main\n", "run\n", "next\n", "continue\n"]);
    }

    #[test]
    fn marker_split_across_chunks_is_detected() {
        let mut controller = DebugController::new(PROMPT);
        controller.send_command("info locals").unwrap();
        assert_eq!(controller.observe(b"Starting program\n(g"), None);
        assert_eq!(controller.observe(b"db"), None);
        assert_eq!(
            controller.observe(b") "),
            Some(b"info locals\n".to_vec())
        );
    }

    #[test]
    fn consumed_marker_is_not_matched_twice() {
        let mut controller = DebugController::new(PROMPT);
        controller.observe(b"(gdb) ");
        controller.send_command("next").unwrap();
        controller.send_command("next").unwrap();
        // trailing bytes of the old prompt must not combine into a new one
        assert_eq!(controller.observe(b"6\t  x++;\n"), None);
        assert_eq!(controller.pending(), 1);
    }

    #[test]
    fn close_discards_queue_and_rejects_commands() {
        let mut controller = DebugController::new(PROMPT);
        controller.send_command("run").unwrap();
        controller.send_command("quit").unwrap();
        assert_eq!(controller.close(), 2);
        assert!(controller.is_closed());
        assert!(matches!(
            controller.send_command("bt"),
            Err(SessionError::ClosedStream)
        ));
        assert_eq!(controller.observe(b"(gdb) "), None);
    }
}
