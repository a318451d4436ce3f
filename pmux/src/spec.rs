// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MIN_WAIT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(64);
pub const DEFAULT_SIG_KILL_WAIT: Duration = Duration::from_secs(10);

/// Exit code reported when no real OS exit code exists: the process never
/// started, was cancelled, or was terminated by a signal. It is never
/// matched against `no_restart_on`.
pub const NO_EXIT_CODE: i32 = -1;

/// Immutable description of one supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub cmd: String,
    pub args: Vec<String>,
    /// Merged over the inherited environment.
    pub env: HashMap<String, String>,
    /// `None` inherits the supervisor's working directory.
    pub dir: Option<PathBuf>,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub sig_kill_wait: Duration,
    pub no_restart_on: Vec<i32>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            args: Vec::new(),
            env: HashMap::new(),
            dir: None,
            min_wait: DEFAULT_MIN_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
            sig_kill_wait: DEFAULT_SIG_KILL_WAIT,
            no_restart_on: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_waits(mut self, min_wait: Duration, max_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self.max_wait = max_wait;
        self
    }

    pub fn with_sig_kill_wait(mut self, wait: Duration) -> Self {
        self.sig_kill_wait = wait;
        self
    }

    pub fn with_no_restart_on(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.no_restart_on = codes.into_iter().collect();
        self
    }

    /// `exit_code` is `None` when the attempt produced no real exit code.
    pub fn suppresses_restart(&self, exit_code: Option<i32>) -> bool {
        exit_code.is_some_and(|code| self.no_restart_on.contains(&code))
    }
}
