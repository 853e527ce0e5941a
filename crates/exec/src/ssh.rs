// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSH execution through the OpenSSH client.
//!
//! The script is piped to a non-interactive remote shell on stdin with a
//! `PARAMS_<UPPER>` preamble prepended, so nothing secret lands on either
//! command line. Key auth uses the appliance's own identity file; password
//! auth goes through `sshpass -e` so the secret travels in the child's
//! environment, never on disk.

use crate::local::{feed_stdin, wait_with_timeout};
use crate::output::ScriptOutput;
use crate::params::shell_env_preamble;
use crate::{ExecError, Executor};
use async_trait::async_trait;
use dw_core::{AuthScheme, CredentialStore, Target};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const SSH_CONNECT_TIMEOUT_SEC: u32 = 10;

#[derive(Clone)]
pub struct SshExecutor {
    credentials: CredentialStore,
    cancel: CancellationToken,
    ssh_binary: String,
}

impl SshExecutor {
    pub fn new(credentials: CredentialStore, cancel: CancellationToken) -> Self {
        Self { credentials, cancel, ssh_binary: "ssh".to_string() }
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.ssh_binary = binary.into();
        self
    }
}

#[async_trait]
impl Executor for SshExecutor {
    async fn run_script(
        &self,
        target: &Target,
        script: &str,
        params: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<ScriptOutput, ExecError> {
        let cred = self.credentials.get(&target.credentials).ok_or_else(|| {
            ExecError::MissingCredentials {
                target: target.id.clone(),
                handle: target.credentials.clone(),
            }
        })?;

        // Strict host-key checking stays on unless the target opted out
        // (tls_verify doubles as the host-trust flag for SSH targets).
        let host_key_policy =
            if target.tls_verify { "yes" } else { "accept-new" };

        let mut args: Vec<String> = vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("StrictHostKeyChecking={host_key_policy}"),
            "-o".into(),
            format!("ConnectTimeout={SSH_CONNECT_TIMEOUT_SEC}"),
        ];
        if let Some(port) = target.port {
            args.push("-p".into());
            args.push(port.to_string());
        }

        let mut command;
        match cred.scheme {
            AuthScheme::SshKey => {
                // Secret carries the appliance-local identity path, not material
                args.push("-i".into());
                args.push(cred.secret.reveal().to_string());
                command = Command::new(&self.ssh_binary);
            }
            AuthScheme::SshPassword => {
                command = Command::new("sshpass");
                command.arg("-e").arg(&self.ssh_binary);
                command.env("SSHPASS", cred.secret.reveal());
            }
            other => {
                return Err(ExecError::Transport {
                    target: target.id.clone(),
                    detail: format!("auth scheme {other:?} not valid for ssh"),
                });
            }
        }

        command
            .args(&args)
            .arg(format!("{}@{}", cred.username, target.address))
            .arg("sh")
            .arg("-s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(target = %target.id, address = %target.address, "ssh exec");

        let mut child = command
            .spawn()
            .map_err(|source| ExecError::Spawn { command: self.ssh_binary.clone(), source })?;

        let body = format!("{}{}", shell_env_preamble(params), script);
        feed_stdin(&mut child, body.into_bytes()).await?;
        wait_with_timeout(child, timeout, &self.cancel).await
    }
}

#[cfg(test)]
#[path = "ssh_tests.rs"]
mod tests;
