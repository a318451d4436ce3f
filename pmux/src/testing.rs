// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::logging::LineSink;
use crate::process::ProcessSinks;
use std::sync::{Arc, Mutex};

/// Records every line it is given.
#[derive(Default)]
pub(crate) struct Lines(Mutex<Vec<String>>);

impl Lines {
    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.0.lock().unwrap())
    }

    pub(crate) fn count(&self, pattern: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.contains(pattern))
            .count()
    }

    pub(crate) fn contains(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }
}

impl LineSink for Lines {
    fn println(&self, line: &str) {
        self.0.lock().unwrap().push(line.to_string());
    }
}

/// One recorder per stream of a process.
#[derive(Default)]
pub(crate) struct Captured {
    pub(crate) stdout: Arc<Lines>,
    pub(crate) stderr: Arc<Lines>,
    pub(crate) sys: Arc<Lines>,
}

impl Captured {
    pub(crate) fn sinks(&self) -> ProcessSinks {
        ProcessSinks {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            sys: self.sys.clone(),
        }
    }

    /// Pid from the `started (pid=N)` line of the most recent attempt.
    pub(crate) fn last_pid(&self) -> Option<u32> {
        self.sys.snapshot().iter().rev().find_map(|l| {
            l.strip_prefix("started (pid=")?
                .strip_suffix(')')?
                .parse()
                .ok()
        })
    }
}
