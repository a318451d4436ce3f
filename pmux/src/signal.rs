// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Interrupt-then-kill escalation against a running child.
//!
//! On Unix, children lead their own process group and signals go to the
//! whole group, so descendants the child spawned are reached as well. On
//! other platforms only the tracked process itself can be killed, and
//! interrupts are not delivered at all.

use crate::error::ProcessError;
use crate::logging::LineSink;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Interrupt,
    Kill,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// Capability to signal a running child (and its group, where supported).
pub trait Signaller: Send + Sync {
    fn signal(&self, kind: SignalKind) -> io::Result<()>;

    /// Id the signal is addressed to, for log lines.
    fn target(&self) -> u32;
}

#[cfg(unix)]
pub use unix::ProcessGroup;

#[cfg(unix)]
mod unix {
    use super::{SignalKind, Signaller};
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    use std::io;

    /// Process group led by a child spawned with `process_group(0)`; its
    /// pgid equals the child's pid.
    #[derive(Debug, Clone, Copy)]
    pub struct ProcessGroup {
        pgid: u32,
    }

    impl ProcessGroup {
        pub fn new(pgid: u32) -> Self {
            Self { pgid }
        }
    }

    impl Signaller for ProcessGroup {
        fn signal(&self, kind: SignalKind) -> io::Result<()> {
            let sig = match kind {
                SignalKind::Interrupt => Signal::SIGINT,
                SignalKind::Kill => Signal::SIGKILL,
            };
            let pgid = i32::try_from(self.pgid)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pgid out of range"))?;
            killpg(Pid::from_raw(pgid), sig).map_err(io::Error::from)
        }

        fn target(&self) -> u32 {
            self.pgid
        }
    }
}

#[cfg(not(unix))]
pub use fallback::TrackedProcess;

#[cfg(not(unix))]
mod fallback {
    use super::{SignalKind, Signaller};
    use std::io;
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Without process groups the only thing we can do is ask the owner of
    /// the child handle to kill that one process.
    #[derive(Debug, Clone)]
    pub struct TrackedProcess {
        pid: u32,
        kill: Arc<Notify>,
    }

    impl TrackedProcess {
        pub fn new(pid: u32) -> Self {
            Self {
                pid,
                kill: Arc::new(Notify::new()),
            }
        }

        /// Resolves once a kill has been requested.
        pub async fn kill_requested(&self) {
            self.kill.notified().await
        }
    }

    impl Signaller for TrackedProcess {
        fn signal(&self, kind: SignalKind) -> io::Result<()> {
            match kind {
                SignalKind::Interrupt => Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "interrupt is not supported on this platform",
                )),
                SignalKind::Kill => {
                    self.kill.notify_one();
                    Ok(())
                }
            }
        }

        fn target(&self) -> u32 {
            self.pid
        }
    }
}

/// How far escalation went before the child was done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The child exited on its own; nothing was sent.
    NotNeeded,
    /// Cancellation fired and an interrupt was sent.
    Interrupted,
    /// The child outlived the grace period and was force-killed.
    Killed,
}

impl Escalation {
    pub fn signalled(self) -> bool {
        self != Escalation::NotNeeded
    }
}

fn send(signaller: &dyn Signaller, kind: SignalKind, sys: &dyn LineSink) {
    sys.println(&format!("sending {kind} signal"));
    if let Err(source) = signaller.signal(kind) {
        let err = ProcessError::SignalDeliveryFailure {
            signal: kind,
            pgid: signaller.target(),
            source,
        };
        sys.println(&err.to_string());
    }
}

/// Wait for `cancel`, interrupt, wait `sig_kill_wait`, kill. `done` must be
/// fired by the caller once the child has been reaped; it unblocks every
/// wait so this future always completes.
pub async fn escalate(
    signaller: &dyn Signaller,
    cancel: &CancellationToken,
    done: &CancellationToken,
    sig_kill_wait: Duration,
    sys: &dyn LineSink,
) -> Escalation {
    tokio::select! {
        biased;
        _ = done.cancelled() => return Escalation::NotNeeded,
        _ = cancel.cancelled() => send(signaller, SignalKind::Interrupt, sys),
    }

    tokio::select! {
        biased;
        _ = done.cancelled() => Escalation::Interrupted,
        _ = tokio::time::sleep(sig_kill_wait) => {
            sys.println("forcefully killing process");
            send(signaller, SignalKind::Kill, sys);
            Escalation::Killed
        }
    }
}
