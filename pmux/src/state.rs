// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// About to spawn an attempt.
    Starting,
    /// Child process is alive.
    Running,
    /// Attempt finished with this exit code (`-1` when there was none).
    Exited(i32),
    /// Sleeping before the next attempt.
    RestartWait(Duration),
    /// No further attempts. Terminal.
    Stopped,
}

impl SupervisorState {
    pub fn is_terminal(self) -> bool {
        self == SupervisorState::Stopped
    }

    pub(crate) fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Exited(_))
                | (Starting, Stopped)
                | (Running, Exited(_))
                | (Exited(_), RestartWait(_))
                | (Exited(_), Stopped)
                | (RestartWait(_), Starting)
                | (RestartWait(_), Stopped)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Exited(code) => write!(f, "exited({code})"),
            SupervisorState::RestartWait(wait) => write!(f, "restart-wait({wait:?})"),
            SupervisorState::Stopped => write!(f, "stopped"),
        }
    }
}
