use serde::{Deserialize, Serialize};

/// Lifecycle state shared by jobs and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl ExecutionState {
    pub const ALL: [ExecutionState; 4] = [
        ExecutionState::Pending,
        ExecutionState::Running,
        ExecutionState::Done,
        ExecutionState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Running => "running",
            ExecutionState::Done => "done",
            ExecutionState::Failed => "failed",
        }
    }

    /// `done` and `failed` admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Done | ExecutionState::Failed)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionState::Pending),
            "running" => Ok(ExecutionState::Running),
            "done" => Ok(ExecutionState::Done),
            "failed" => Ok(ExecutionState::Failed),
            _ => Err(format!("Invalid execution state: {}", s)),
        }
    }
}

/// The subset of [`ExecutionState`] that bulk retention deletes accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Done,
    Failed,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn state(&self) -> ExecutionState {
        match self {
            TerminalState::Done => ExecutionState::Done,
            TerminalState::Failed => ExecutionState::Failed,
        }
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TerminalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "done" | "completed" => Ok(TerminalState::Done),
            "failed" => Ok(TerminalState::Failed),
            _ => Err(format!("Not a terminal state: {}", s)),
        }
    }
}

impl TryFrom<ExecutionState> for TerminalState {
    type Error = String;

    fn try_from(state: ExecutionState) -> Result<Self, Self::Error> {
        match state {
            ExecutionState::Done => Ok(TerminalState::Done),
            ExecutionState::Failed => Ok(TerminalState::Failed),
            other => Err(format!("Not a terminal state: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_str() {
        for state in ExecutionState::ALL {
            assert_eq!(state.as_str().parse::<ExecutionState>(), Ok(state));
        }
        assert!("cancelled".parse::<ExecutionState>().is_err());
        assert!("DONE".parse::<ExecutionState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionState::Done.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
        assert!(!ExecutionState::Pending.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());

        assert_eq!(
            TerminalState::try_from(ExecutionState::Failed),
            Ok(TerminalState::Failed)
        );
        assert!(TerminalState::try_from(ExecutionState::Running).is_err());
        assert_eq!("completed".parse::<TerminalState>(), Ok(TerminalState::Done));
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ExecutionState::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&TerminalState::Done).unwrap(),
            "\"done\""
        );
    }
}
