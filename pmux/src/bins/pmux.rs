// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use pmux::config::DEFAULT_CONFIG_PATH;
use pmux::logging::{
    DEFAULT_FLUSH_INTERVAL, Destination, FlushMode, LabelWidth, LogSink, SEP_STDERR, SEP_STDOUT,
    SinkLogger, SinkOptions,
};
use pmux::{Config, DaemonConfig, Orchestrator, Sinks};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Run and supervise a set of processes
#[derive(Parser, Debug)]
#[command(name = "pmux", version)]
struct Args {
    /// Path to the YAML config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let daemon = DaemonConfig::from_env();

    let (time_format, specs) = Config::load(&args.config)?
        .into_parts()
        .with_context(|| format!("invalid config {}", args.config.display()))?;

    let width = LabelWidth::new();
    let sinks = Sinks::new(
        LogSink::new(
            Destination::Stdout,
            SEP_STDOUT,
            SinkOptions {
                time_format: time_format.clone(),
                flush: FlushMode::Interval(DEFAULT_FLUSH_INTERVAL),
                width: width.clone(),
            },
        ),
        // System events go out immediately so they interleave correctly
        // with whatever the terminal does on a signal.
        LogSink::new(
            Destination::Stderr,
            SEP_STDERR,
            SinkOptions {
                time_format,
                flush: FlushMode::EveryLine,
                width,
            },
        ),
    );
    SinkLogger::install(sinks.system(), daemon.log_level).context("installing logger")?;

    info!(
        "supervising {} process(es) (version {})",
        specs.len(),
        env!("CARGO_PKG_VERSION")
    );

    let (tx, rx) = mpsc::channel(2);
    forward_termination_signals(tx)?;

    let shutdown = Orchestrator::new(specs, sinks).run(rx).await;
    std::process::exit(shutdown.exit_code());
}

/// Forward every SIGINT and SIGTERM to the orchestrator.
#[cfg(unix)]
fn forward_termination_signals(tx: mpsc::Sender<&'static str>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            if tx.send(name).await.is_err() {
                return;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn forward_termination_signals(tx: mpsc::Sender<&'static str>) -> Result<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send("CTRL-C").await.is_err() {
                return;
            }
        }
    });
    Ok(())
}
