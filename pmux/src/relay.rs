// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Forwards one child output stream to a sink, line by line.
//!
//! Lines are read as bytes and decoded lossily: children are free to write
//! non-UTF-8 output and that must not end the relay.

use crate::error::ProcessError;
use crate::logging::LineSink;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Read `stream` until EOF, writing each line (newline stripped) to `out`.
/// A read error is reported once on `sys` and ends the relay.
pub async fn relay<R>(stream: R, name: &'static str, out: &dyn LineSink, sys: &dyn LineSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf: Vec<u8> = Vec::with_capacity(1024);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => return,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                out.println(&String::from_utf8_lossy(&buf));
            }
            Err(source) => {
                let err = ProcessError::OutputReadFailure {
                    stream: name,
                    source,
                };
                sys.println(&err.to_string());
                return;
            }
        }
    }
}

/// Spawn [`relay`] as its own task. The caller joins the handle before
/// treating the child as exited.
pub fn spawn_relay<R>(
    stream: R,
    name: &'static str,
    out: Arc<dyn LineSink>,
    sys: Arc<dyn LineSink>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move { relay(stream, name, out.as_ref(), sys.as_ref()).await })
}
