// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::duration;
use crate::logging::TimeFormat;
use crate::spec::{DEFAULT_MAX_WAIT, DEFAULT_MIN_WAIT, DEFAULT_SIG_KILL_WAIT, ProcessSpec};
use anyhow::{Context, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./pmux.yml";
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no processes defined")]
    NoProcesses,
    #[error("process #{0} has an empty name")]
    EmptyName(usize),
    #[error("duplicate process name {0:?}")]
    DuplicateName(String),
    #[error("[{0}] cmd is empty")]
    EmptyCmd(String),
    #[error("[{name}] {field} must be greater than zero")]
    ZeroDuration { name: String, field: &'static str },
    #[error("[{name}] minWait ({min:?}) is greater than maxWait ({max:?})")]
    WaitBounds {
        name: String,
        min: Duration,
        max: Duration,
    },
    #[error("[{name}] noRestartOn contains {code}, exit codes are never negative")]
    NegativeExitCode { name: String, code: i32 },
    #[error("invalid timeFormat {format:?}: {reason}")]
    TimeFormat { format: String, reason: String },
}

/// Top-level config file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// `time` format description; empty disables timestamps.
    #[serde(default)]
    pub time_format: String,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProcessConfig {
    pub name: String,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub min_wait: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub max_wait: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub sig_kill_wait: Option<Duration>,
    #[serde(default, alias = "no_restart_on")]
    pub no_restart_on: Vec<i32>,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).context("parsing config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("loading {}", path.display()))
    }

    /// Validate and split into the log time format and one spec per process.
    pub fn into_parts(self) -> Result<(TimeFormat, Vec<ProcessSpec>), ConfigError> {
        let time_format =
            TimeFormat::parse(&self.time_format).map_err(|e| ConfigError::TimeFormat {
                format: self.time_format.clone(),
                reason: e.to_string(),
            })?;

        if self.processes.is_empty() {
            return Err(ConfigError::NoProcesses);
        }

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(self.processes.len());
        for (i, proc) in self.processes.into_iter().enumerate() {
            if proc.name.trim().is_empty() {
                return Err(ConfigError::EmptyName(i));
            }
            if !seen.insert(proc.name.clone()) {
                return Err(ConfigError::DuplicateName(proc.name));
            }
            specs.push(proc.into_spec()?);
        }
        Ok((time_format, specs))
    }
}

impl ProcessConfig {
    fn into_spec(self) -> Result<ProcessSpec, ConfigError> {
        if self.cmd.trim().is_empty() {
            return Err(ConfigError::EmptyCmd(self.name));
        }

        let min_wait = self.min_wait.unwrap_or(DEFAULT_MIN_WAIT);
        let max_wait = self.max_wait.unwrap_or(DEFAULT_MAX_WAIT);
        let sig_kill_wait = self.sig_kill_wait.unwrap_or(DEFAULT_SIG_KILL_WAIT);

        for (field, value) in [
            ("minWait", min_wait),
            ("maxWait", max_wait),
            ("sigKillWait", sig_kill_wait),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration {
                    name: self.name,
                    field,
                });
            }
        }
        if min_wait > max_wait {
            return Err(ConfigError::WaitBounds {
                name: self.name,
                min: min_wait,
                max: max_wait,
            });
        }
        if let Some(&code) = self.no_restart_on.iter().find(|c| **c < 0) {
            return Err(ConfigError::NegativeExitCode {
                name: self.name,
                code,
            });
        }

        Ok(ProcessSpec {
            name: self.name,
            cmd: self.cmd,
            args: self.args,
            env: self.env,
            dir: self.dir.filter(|d| !d.is_empty()).map(PathBuf::from),
            min_wait,
            max_wait,
            sig_kill_wait,
            no_restart_on: self.no_restart_on,
        })
    }
}

/// Settings for the supervisor itself, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub log_level: LevelFilter,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Priority: `PMUX_LOG_LEVEL` > `RUST_LOG` > info. Unparseable values
    /// fall through to the next source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_level = ["PMUX_LOG_LEVEL", "RUST_LOG"]
            .into_iter()
            .filter_map(|key| lookup(key))
            .find_map(|value| value.trim().parse::<LevelFilter>().ok())
            .unwrap_or(DEFAULT_LOG_LEVEL);
        Self { log_level }
    }
}
