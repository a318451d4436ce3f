// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Supervise a fixed set of child processes: restart them with backoff,
//! stop them with an escalating grace period and multiplex their output
//! into labeled log streams.

pub mod config;
pub mod duration;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod relay;
pub mod signal;
pub mod spec;
pub mod state;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError, DaemonConfig};
pub use error::ProcessError;
pub use orchestrator::{Orchestrator, Shutdown, Sinks};
pub use process::{ProcessSinks, RunResult, run_once};
pub use spec::ProcessSpec;
pub use state::SupervisorState;
pub use supervisor::{Backoff, Supervisor, SupervisorReport};
