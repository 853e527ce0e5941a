// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local process execution on the appliance host.

use crate::output::ScriptOutput;
use crate::params::shell_env_preamble;
use crate::{truncate_capture, ExecError, Executor, CAPTURE_LIMIT};
use async_trait::async_trait;
use dw_core::Target;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Runs scripts through `/bin/sh` on the appliance itself.
#[derive(Clone)]
pub struct LocalExecutor {
    shell: String,
    cancel: CancellationToken,
}

impl LocalExecutor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { shell: "/bin/sh".to_string(), cancel }
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn with_shell(shell: impl Into<String>, cancel: CancellationToken) -> Self {
        Self { shell: shell.into(), cancel }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn run_script(
        &self,
        _target: &Target,
        script: &str,
        params: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<ScriptOutput, ExecError> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|source| ExecError::Spawn { command: self.shell.clone(), source })?;

        let body = format!("{}{}", shell_env_preamble(params), script);
        feed_stdin(&mut child, body.into_bytes()).await?;
        wait_with_timeout(child, timeout, &self.cancel).await
    }
}

/// Write the script to the child's stdin and close the pipe.
pub(crate) async fn feed_stdin(child: &mut Child, data: Vec<u8>) -> Result<(), ExecError> {
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&data).await?;
        // Dropping closes the pipe, signalling EOF to the shell
        drop(stdin);
    }
    Ok(())
}

/// Wait for a child with a timeout and cancellation.
///
/// Timeout is not an error: the child is killed and whatever output was
/// captured so far comes back with `timed_out` set. Cancellation kills the
/// child and returns [`ExecError::Cancelled`]; both paths reap the child
/// before returning so nothing outlives shutdown by more than the kill.
pub(crate) async fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ScriptOutput, ExecError> {
    let start = Instant::now();

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_task = tokio::spawn(read_stream(stdout));
    let err_task = tokio::spawn(read_stream(stderr));

    let (exit_code, timed_out) = tokio::select! {
        status = child.wait() => {
            let status = status?;
            (status.code().unwrap_or(-1), false)
        }
        _ = tokio::time::sleep(timeout) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            (-1, true)
        }
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = out_task.await;
            let _ = err_task.await;
            return Err(ExecError::Cancelled);
        }
    };

    // Pipes are closed once the child is gone, so these complete promptly.
    let stdout = out_task.await.unwrap_or_default();
    let stderr = err_task.await.unwrap_or_default();

    Ok(ScriptOutput {
        exit_code,
        stdout: truncate_capture(&stdout, CAPTURE_LIMIT),
        stderr: truncate_capture(&stderr, CAPTURE_LIMIT),
        duration: start.elapsed(),
        timed_out,
    })
}

async fn read_stream<R>(reader: Option<R>) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
