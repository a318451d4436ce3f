// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! One execution attempt of a supervised process, start to exit.

use crate::error::ProcessError;
use crate::logging::{LineSink, LogSink, NullSink, SEP_SYS};
use crate::relay::spawn_relay;
use crate::signal::{Escalation, escalate};
use crate::spec::{NO_EXIT_CODE, ProcessSpec};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use crate::signal::ProcessGroup as PlatformSignaller;
#[cfg(not(unix))]
use crate::signal::TrackedProcess as PlatformSignaller;

/// Where one process's output and events go.
#[derive(Clone)]
pub struct ProcessSinks {
    pub stdout: Arc<dyn LineSink>,
    pub stderr: Arc<dyn LineSink>,
    pub sys: Arc<dyn LineSink>,
}

impl ProcessSinks {
    pub fn null() -> Self {
        Self {
            stdout: Arc::new(NullSink),
            stderr: Arc::new(NullSink),
            sys: Arc::new(NullSink),
        }
    }

    /// Views labeled `name`: stdout on `out`, stderr and system events on
    /// `err`.
    pub fn labeled(name: &str, out: &LogSink, err: &LogSink) -> Self {
        Self {
            stdout: Arc::new(out.view(name)),
            stderr: Arc::new(err.view(name)),
            sys: Arc::new(err.with_sep(SEP_SYS).view(name)),
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug)]
pub struct RunResult {
    code: Option<i32>,
    pub error: Option<ProcessError>,
}

impl RunResult {
    fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            error: None,
        }
    }

    fn failed(code: Option<i32>, error: ProcessError) -> Self {
        Self {
            code,
            error: Some(error),
        }
    }

    /// OS exit code, or `-1` when there is none.
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(NO_EXIT_CODE)
    }

    /// The exit code only if the OS actually reported one.
    pub fn os_exit_code(&self) -> Option<i32> {
        self.code
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.code == Some(0)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(ProcessError::is_cancelled)
    }
}

fn command(spec: &ProcessSpec) -> Command {
    let mut cmd = Command::new(&spec.cmd);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    if let Some(ref dir) = spec.dir {
        cmd.current_dir(dir);
    }

    // Own process group: signals sent to the supervisor never reach the
    // children, only the escalator does.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

/// Start `spec`, relay its output, and wait for it to exit. Cancelling
/// `cancel` interrupts the process group and later kills it.
///
/// Both relays are drained before the exit is reported, so no output from
/// this attempt is still in flight when the caller logs about it.
pub async fn run_once(
    spec: &ProcessSpec,
    cancel: &CancellationToken,
    sinks: &ProcessSinks,
) -> RunResult {
    run_attempt(spec, cancel, sinks, |_| {}).await
}

/// [`run_once`], calling `started` with the child's pid once it is running.
pub async fn run_attempt<F>(
    spec: &ProcessSpec,
    cancel: &CancellationToken,
    sinks: &ProcessSinks,
    started: F,
) -> RunResult
where
    F: FnOnce(u32),
{
    let mut child = match command(spec).spawn() {
        Ok(child) => child,
        Err(e) => return RunResult::failed(None, ProcessError::SpawnFailure(e)),
    };

    let (Some(stdout), Some(stderr), Some(pid)) =
        (child.stdout.take(), child.stderr.take(), child.id())
    else {
        let _ = child.start_kill();
        let _ = child.wait().await;
        return RunResult::failed(
            None,
            ProcessError::SpawnFailure(io::Error::other("child stdio was not captured")),
        );
    };
    sinks.sys.println(&format!("started (pid={pid})"));
    started(pid);

    let relays = [
        spawn_relay(stdout, "stdout", sinks.stdout.clone(), sinks.sys.clone()),
        spawn_relay(stderr, "stderr", sinks.stderr.clone(), sinks.sys.clone()),
    ];

    let signaller = PlatformSignaller::new(pid);
    let done = CancellationToken::new();
    let escalator = escalate(&signaller, cancel, &done, spec.sig_kill_wait, sinks.sys.as_ref());
    let exited = async {
        for relay in relays {
            if let Err(e) = relay.await {
                sinks.sys.println(&format!("output relay failed: {e}"));
            }
        }
        wait_child(&mut child, &signaller).await
    };
    tokio::pin!(escalator, exited);

    // The escalator is polled on this task only, so it cannot signal the
    // group once the child has been reaped.
    let mut reached = None;
    let waited = loop {
        tokio::select! {
            biased;
            waited = &mut exited => break waited,
            escalation = &mut escalator, if reached.is_none() => reached = Some(escalation),
        }
    };
    done.cancel();
    let escalation = match reached {
        Some(escalation) => escalation,
        None => escalator.await,
    };

    classify(waited, cancel.is_cancelled(), escalation)
}

#[cfg(unix)]
async fn wait_child(child: &mut Child, _signaller: &PlatformSignaller) -> io::Result<ExitStatus> {
    child.wait().await
}

#[cfg(not(unix))]
async fn wait_child(child: &mut Child, signaller: &PlatformSignaller) -> io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        _ = signaller.kill_requested() => {
            child.start_kill()?;
            child.wait().await
        }
    }
}

/// Whether `status` looks like the result of our interrupt or kill: death by
/// signal, or the shell convention of exiting `128 + signo`.
#[cfg(unix)]
fn signal_exit(status: &ExitStatus) -> bool {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    status.signal().is_some()
        || [Signal::SIGINT, Signal::SIGKILL]
            .iter()
            .any(|sig| status.code() == Some(128 + *sig as i32))
}

#[cfg(not(unix))]
fn signal_exit(status: &ExitStatus) -> bool {
    !status.success()
}

fn classify(waited: io::Result<ExitStatus>, cancelled: bool, escalation: Escalation) -> RunResult {
    match waited {
        Ok(status) if cancelled && escalation.signalled() && signal_exit(&status) => {
            RunResult::failed(None, ProcessError::CancelledExit)
        }
        Ok(status) if status.success() => RunResult::exited(0),
        Ok(status) => RunResult::failed(status.code(), ProcessError::AbnormalExit(status)),
        Err(e) => RunResult::failed(None, ProcessError::WaitFailure(e)),
    }
}
