// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::signal::SignalKind;
use std::io;
use std::process::ExitStatus;
use thiserror::Error;

/// Everything that can go wrong while running a supervised process. None of
/// these cross the supervisor boundary: they are written to the process's
/// system log view and then fed to the restart decision.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start: {0}")]
    SpawnFailure(#[source] io::Error),

    #[error("process exited: {0}")]
    AbnormalExit(ExitStatus),

    #[error("waiting for process: {0}")]
    WaitFailure(#[source] io::Error),

    #[error("process cancelled")]
    CancelledExit,

    #[error("reading {stream}: {source}")]
    OutputReadFailure {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("sending {signal} to process group {pgid}: {source}")]
    SignalDeliveryFailure {
        signal: SignalKind,
        pgid: u32,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::CancelledExit)
    }

    /// Non-zero exit or a failed wait. Spawn failures are reported separately
    /// but take the same path through the restart policy.
    pub fn is_abnormal_exit(&self) -> bool {
        matches!(
            self,
            ProcessError::AbnormalExit(_) | ProcessError::WaitFailure(_)
        )
    }
}
