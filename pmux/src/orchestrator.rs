// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::logging::{LineSink, LogSink, LogView, SEP_SYS, SYSTEM_LABEL};
use crate::process::ProcessSinks;
use crate::spec::ProcessSpec;
use crate::supervisor::Supervisor;
use log::{debug, error};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// The two output channels every process is multiplexed into. Both roots
/// should share one `LabelWidth` so their columns line up.
#[derive(Clone)]
pub struct Sinks {
    pub stdout: LogSink,
    pub stderr: LogSink,
}

impl Sinks {
    pub fn new(stdout: LogSink, stderr: LogSink) -> Self {
        Self { stdout, stderr }
    }

    /// System view for the supervisor's own messages.
    pub fn system(&self) -> LogView {
        self.stderr.with_sep(SEP_SYS).view(SYSTEM_LABEL)
    }

    pub fn process(&self, name: &str) -> ProcessSinks {
        ProcessSinks::labeled(name, &self.stdout, &self.stderr)
    }

    pub fn close(&self) {
        self.stdout.close();
        self.stderr.close();
    }
}

/// How [`Orchestrator::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Every supervisor reached its terminal state.
    Graceful,
    /// A second termination request arrived; children may still be running.
    Forced,
}

impl Shutdown {
    pub fn exit_code(self) -> i32 {
        match self {
            Shutdown::Graceful => 0,
            Shutdown::Forced => 1,
        }
    }
}

/// Runs one [`Supervisor`] per spec under a shared cancellation token.
pub struct Orchestrator {
    specs: Vec<ProcessSpec>,
    sinks: Sinks,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(specs: Vec<ProcessSpec>, sinks: Sinks) -> Self {
        // Register every label up front so the first lines are already aligned.
        for spec in &specs {
            sinks.stdout.width().register(&spec.name);
        }
        Self {
            specs,
            sinks,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Supervise until every process has stopped, or until a second request
    /// on `requests` forces an early return. Each request carries the name
    /// of whatever asked for termination, e.g. `SIGTERM`. Sinks are closed
    /// before returning.
    pub async fn run(self, mut requests: mpsc::Receiver<&'static str>) -> Shutdown {
        let sys = self.sinks.system();
        let mut supervisors = JoinSet::new();
        for spec in self.specs {
            let sinks = self.sinks.process(&spec.name);
            supervisors.spawn(Supervisor::new(spec, sinks).run(self.cancel.clone()));
        }

        // A closed request channel just means nobody else can ask us to stop.
        let mut listening = true;
        loop {
            tokio::select! {
                joined = supervisors.join_next() => match joined {
                    None => break,
                    Some(Ok(report)) => debug!(
                        "[{}] supervisor finished after {} attempt(s), last exit code {}",
                        report.name, report.attempts, report.last_exit_code
                    ),
                    Some(Err(e)) => error!("supervisor task failed: {e}"),
                },
                request = requests.recv(), if listening => match request {
                    None => listening = false,
                    Some(reason) if !self.cancel.is_cancelled() => {
                        sys.println(&format!("{reason} signal received, stopping all processes"));
                        self.cancel.cancel();
                    }
                    Some(_) => {
                        sys.println(
                            "forcefully exiting pmux process, child processes may be left behind",
                        );
                        self.sinks.close();
                        return Shutdown::Forced;
                    }
                },
            }
        }

        sys.println("exited gracefully, ciao!");
        self.sinks.close();
        Shutdown::Graceful
    }
}
