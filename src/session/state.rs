use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::session::process::IoMode;

/// Execution mode, fixed when the session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// Batch run to completion.
    Text,
    /// The program reads stdin while it runs.
    Interactive,
    /// The program runs under a debugger driven by command lines.
    Debugger,
}

impl SessionMode {
    /// Name used in `/run/{mode}` routes.
    pub fn route_name(self) -> &'static str {
        match self {
            SessionMode::Text => "text-mode",
            SessionMode::Interactive => "interactive-mode",
            SessionMode::Debugger => "debugger",
        }
    }

    /// Interactive programs and debuggers only flush prompts and echo
    /// input properly on a terminal.
    pub fn io_mode(self) -> IoMode {
        match self {
            SessionMode::Text => IoMode::Pipe,
            SessionMode::Interactive | SessionMode::Debugger => IoMode::Pty,
        }
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text-mode" | "text" => Ok(SessionMode::Text),
            "interactive-mode" | "interactive" => Ok(SessionMode::Interactive),
            "debugger" | "debugger-mode" => Ok(SessionMode::Debugger),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route_name())
    }
}

/// Session lifecycle.
///
/// `Starting -> Running -> (AwaitingInput <-> Running) -> Exited | Killed`.
/// A failed spawn never leaves `Starting`: the session is not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Starting,
    Running,
    /// Best-effort hint that the process is blocked on input. Input is
    /// accepted in every non-terminal state regardless.
    AwaitingInput,
    Exited,
    Killed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Exited | SessionState::Killed)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Running, AwaitingInput)
                | (AwaitingInput, Running)
                | (Running | AwaitingInput, Exited | Killed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn mode_parses_route_names() {
        for mode in [
            SessionMode::Text,
            SessionMode::Interactive,
            SessionMode::Debugger,
        ] {
            assert_eq!(mode.route_name().parse::<SessionMode>(), Ok(mode));
        }
        assert_eq!("repl".parse::<SessionMode>(), Err("repl".to_string()));
    }

    #[test]
    fn terminal_modes_use_a_pty() {
        assert_eq!(SessionMode::Text.io_mode(), IoMode::Pipe);
        assert_eq!(SessionMode::Interactive.io_mode(), IoMode::Pty);
        assert_eq!(SessionMode::Debugger.io_mode(), IoMode::Pty);
    }

    #[test]
    fn lifecycle_transitions() {
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(AwaitingInput));
        assert!(AwaitingInput.can_transition_to(Running));
        assert!(AwaitingInput.can_transition_to(Exited));
        assert!(Running.can_transition_to(Killed));

        assert!(!Starting.can_transition_to(AwaitingInput));
        assert!(!Starting.can_transition_to(Killed));
        assert!(!Exited.can_transition_to(Running));
        assert!(!Killed.can_transition_to(Exited));
        assert!(!Exited.can_transition_to(Killed));
    }

    #[test]
    fn state_serializes_kebab_case() {
        let json = serde_json::to_string(&AwaitingInput).unwrap();
        assert_eq!(json, "\"awaiting-input\"");
    }
}
