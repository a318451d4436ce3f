// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Restart loop for one process.
//!
//! Each iteration runs one attempt, logs its outcome and decides whether to
//! go again. Restarts are paced by [`Backoff`]: fast back-to-back failures
//! double the wait up to `max_wait`, while a run that outlasts twice the
//! previous wait brings it back down to `min_wait`.

use crate::process::{ProcessSinks, run_attempt};
use crate::spec::{NO_EXIT_CODE, ProcessSpec};
use crate::state::SupervisorState;
use log::{debug, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Restart pacing for one supervisor. Starts at zero so the first restart
/// always waits `min_wait`.
#[derive(Debug, Clone)]
pub struct Backoff {
    wait: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            wait: Duration::ZERO,
            min,
            max,
        }
    }

    pub fn current(&self) -> Duration {
        self.wait
    }

    /// Wait before the next attempt, given how long the last one ran.
    ///
    /// `2 * previous - elapsed`, truncated to whole milliseconds, then
    /// clamped to `[min, max]`. A run longer than twice the previous wait
    /// saturates at zero and lands on `min`.
    pub fn next(&mut self, elapsed: Duration) -> Duration {
        let raw = truncate_to_millis(self.wait.saturating_mul(2).saturating_sub(elapsed));
        self.wait = if raw < self.min {
            self.min
        } else if raw > self.max {
            self.max
        } else {
            raw
        };
        self.wait
    }
}

fn truncate_to_millis(d: Duration) -> Duration {
    Duration::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Summary of a supervisor that reached [`SupervisorState::Stopped`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    pub name: String,
    pub attempts: u32,
    /// Exit code of the final attempt, `-1` when it had none.
    pub last_exit_code: i32,
}

pub struct Supervisor {
    spec: ProcessSpec,
    sinks: ProcessSinks,
    state: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(spec: ProcessSpec, sinks: ProcessSinks) -> Self {
        let (state, _) = watch::channel(SupervisorState::Starting);
        Self { spec, sinks, state }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Follow state changes. Intermediate states may be coalesced; the
    /// terminal `Stopped` is always the last value published.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SupervisorState) {
        let prev = self.state();
        if !prev.can_transition_to(next) {
            warn!("[{}] ignoring illegal transition {prev} -> {next}", self.spec.name);
            return;
        }
        debug!("[{}] {prev} -> {next}", self.spec.name);
        self.state.send_replace(next);
    }

    /// Run attempts until cancellation or a no-restart exit code.
    pub async fn run(self, cancel: CancellationToken) -> SupervisorReport {
        let sys = self.sinks.sys.as_ref();
        let mut backoff = Backoff::new(self.spec.min_wait, self.spec.max_wait);
        let mut attempts = 0u32;

        sys.println("starting process");

        let last_exit_code = loop {
            if cancel.is_cancelled() {
                break NO_EXIT_CODE;
            }
            attempts += 1;
            let start = Instant::now();
            let result = run_attempt(&self.spec, &cancel, &self.sinks, |_| {
                self.transition(SupervisorState::Running)
            })
            .await;
            let elapsed = start.elapsed();

            let code = result.exit_code();
            match result.error {
                Some(ref err) => sys.println(&format!("exit code {code}, {err}")),
                None => sys.println(&format!("exit code {code}")),
            }
            self.transition(SupervisorState::Exited(code));

            if cancel.is_cancelled() || self.spec.suppresses_restart(result.os_exit_code()) {
                break code;
            }

            let wait = backoff.next(elapsed);
            sys.println(&format!("will restart process in {wait:?}"));
            self.transition(SupervisorState::RestartWait(wait));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break code,
                _ = tokio::time::sleep(wait) => {}
            }
            self.transition(SupervisorState::Starting);
        };

        self.transition(SupervisorState::Stopped);
        sys.println("stopped process handler");

        SupervisorReport {
            name: self.spec.name.clone(),
            attempts,
            last_exit_code,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::Captured;

    const MS: Duration = Duration::from_millis(1);

    fn sh(name: &str, script: &str) -> ProcessSpec {
        ProcessSpec::new(name, "/bin/sh").with_args(["-c", script])
    }

    /// Poll `cond` every 10ms for up to 10s.
    async fn eventually(cond: impl Fn() -> bool) -> bool {
        for _ in 0..1000 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_first_restart_waits_min() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(64));
        assert_eq!(b.current(), Duration::ZERO);
        assert_eq!(b.next(Duration::from_millis(3)), Duration::from_secs(1));
    }

    #[test]
    fn test_fast_failures_grow_to_max() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(64));
        let waits: Vec<u64> = (0..9).map(|_| b.next(Duration::ZERO).as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 16, 32, 64, 64, 64]);
    }

    #[test]
    fn test_growth_is_monotonic_with_small_elapsed() {
        let mut b = Backoff::new(100 * MS, Duration::from_secs(10));
        let mut prev = Duration::ZERO;
        let max = Duration::from_secs(10);
        for _ in 0..20 {
            let wait = b.next(5 * MS);
            if prev < max {
                assert!(wait > prev, "{wait:?} <= {prev:?}");
            } else {
                assert_eq!(wait, max);
            }
            assert!(wait <= max);
            prev = wait;
        }
        assert_eq!(prev, Duration::from_secs(10));
    }

    #[test]
    fn test_long_run_resets_to_min() {
        let max = Duration::from_secs(64);
        let mut b = Backoff::new(Duration::from_secs(1), max);
        for _ in 0..10 {
            b.next(Duration::ZERO);
        }
        assert_eq!(b.current(), max);
        assert_eq!(b.next(2 * max), Duration::from_secs(1));
    }

    #[test]
    fn test_elapsed_partially_offsets_growth() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(64));
        b.next(Duration::ZERO);
        b.next(Duration::ZERO);
        b.next(Duration::ZERO); // 4s
        assert_eq!(b.next(Duration::from_secs(3)), Duration::from_secs(5));
    }

    #[test]
    fn test_wait_is_truncated_to_millis() {
        let mut b = Backoff::new(MS, Duration::from_secs(1));
        b.next(Duration::ZERO); // 1ms
        b.next(Duration::ZERO); // 2ms
        assert_eq!(b.next(Duration::from_micros(500)), 3 * MS);
        assert_eq!(b.next(Duration::from_nanos(1)), 5 * MS);
    }

    #[tokio::test]
    async fn test_no_restart_code_stops_after_one_attempt() {
        let cap = Captured::default();
        let spec = sh("once", "echo hi; exit 3").with_no_restart_on([3]);
        let sup = Supervisor::new(spec, cap.sinks());
        let states = sup.subscribe();

        let report = sup.run(CancellationToken::new()).await;

        assert_eq!(report.attempts, 1);
        assert_eq!(report.last_exit_code, 3);
        assert_eq!(*states.borrow(), SupervisorState::Stopped);
        assert_eq!(cap.stdout.snapshot(), vec!["hi"]);

        let sys: Vec<String> = cap
            .sys
            .snapshot()
            .into_iter()
            .filter(|l| !l.starts_with("started (pid="))
            .collect();
        assert_eq!(
            sys,
            vec![
                "starting process",
                "exit code 3, process exited: exit status: 3",
                "stopped process handler",
            ]
        );
    }

    #[tokio::test]
    async fn test_clean_exit_is_restarted() {
        let cap = Captured::default();
        let spec = sh("again", "exit 0").with_waits(10 * MS, 20 * MS);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Supervisor::new(spec, cap.sinks()).run(cancel.clone()));

        assert!(eventually(|| cap.sys.count("exit code 0") >= 3).await);
        cancel.cancel();
        let report = handle.await.unwrap();

        assert!(report.attempts >= 3);
        assert!(cap.sys.contains("will restart process in 10ms"));
        assert_eq!(cap.sys.count("stopped process handler"), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_follows_backoff() {
        let cap = Captured::default();
        let spec = ProcessSpec::new("ghost", "/nonexistent/binary").with_waits(5 * MS, 20 * MS);
        let cancel = CancellationToken::new();
        let sup = Supervisor::new(spec, cap.sinks());
        let mut states = sup.subscribe();
        let handle = tokio::spawn(sup.run(cancel.clone()));

        assert!(eventually(|| cap.sys.count("exit code -1, failed to start") >= 2).await);
        cancel.cancel();
        let report = handle.await.unwrap();

        assert!(report.attempts >= 2);
        assert_eq!(report.last_exit_code, -1);
        assert!(!cap.sys.contains("started (pid="));
        assert!(states.wait_for(|s| s.is_terminal()).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_spawns_nothing() {
        let cap = Captured::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sup = Supervisor::new(sh("never", "echo hi"), cap.sinks());
        let states = sup.subscribe();

        let report = sup.run(cancel).await;

        assert_eq!(report.attempts, 0);
        assert_eq!(report.last_exit_code, -1);
        assert!(cap.stdout.snapshot().is_empty());
        assert_eq!(cap.sys.snapshot(), vec!["starting process", "stopped process handler"]);
        assert_eq!(*states.borrow(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_cancel_during_restart_wait() {
        let cap = Captured::default();
        let spec = sh("slow", "exit 1").with_waits(Duration::from_secs(30), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let sup = Supervisor::new(spec, cap.sinks());
        let mut states = sup.subscribe();
        let handle = tokio::spawn(sup.run(cancel.clone()));

        states
            .wait_for(|s| matches!(s, SupervisorState::RestartWait(_)))
            .await
            .unwrap();
        let start = std::time::Instant::now();
        cancel.cancel();
        let report = handle.await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.attempts, 1);
        assert_eq!(report.last_exit_code, 1);
        assert_eq!(cap.sys.snapshot().last().unwrap(), "stopped process handler");
    }

    #[tokio::test]
    async fn test_cancel_while_running_never_restarts() {
        let cap = Captured::default();
        let spec = sh("sleeper", "exec sleep 60").with_waits(MS, MS);
        let cancel = CancellationToken::new();
        let sup = Supervisor::new(spec, cap.sinks());
        let mut states = sup.subscribe();
        let handle = tokio::spawn(sup.run(cancel.clone()));

        states
            .wait_for(|s| *s == SupervisorState::Running)
            .await
            .unwrap();
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.attempts, 1);
        assert_eq!(report.last_exit_code, -1);
        assert!(cap.sys.contains("exit code -1, process cancelled"));
        assert!(!cap.sys.contains("will restart"));
    }

    #[tokio::test]
    async fn test_unlisted_code_restarts() {
        let cap = Captured::default();
        let spec = sh("flaky", "exit 2").with_no_restart_on([3]).with_waits(MS, 5 * MS);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Supervisor::new(spec, cap.sinks()).run(cancel.clone()));

        assert!(eventually(|| cap.sys.count("exit code 2") >= 2).await);
        cancel.cancel();
        assert!(handle.await.unwrap().attempts >= 2);
    }
}
