// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WinRM executor: WS-Man shell lifecycle over HTTPS.
//!
//! HTTPS on 5986 is the default; plaintext 5985 only when the target's
//! configuration explicitly allows it. Parameters become a `$params_*`
//! PowerShell preamble and the whole script travels as `-EncodedCommand`,
//! so nothing is subject to cmd.exe quoting.

mod wsman;

use crate::output::ScriptOutput;
use crate::params::powershell_preamble;
use crate::{truncate_capture, ExecError, Executor, CAPTURE_LIMIT};
use async_trait::async_trait;
use dw_core::{AuthScheme, Credential, CredentialStore, Target};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct WinRmExecutor {
    credentials: CredentialStore,
    cancel: CancellationToken,
    verified: reqwest::Client,
    unverified: reqwest::Client,
}

enum Auth {
    Basic { username: String, password: String },
    Negotiate { token: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[redacted]")
                .finish(),
            Auth::Negotiate { .. } => f
                .debug_struct("Negotiate")
                .field("token", &"[redacted]")
                .finish(),
        }
    }
}

impl WinRmExecutor {
    pub fn new(credentials: CredentialStore, cancel: CancellationToken) -> Result<Self, ExecError> {
        let build = |accept_invalid: bool| {
            reqwest::Client::builder()
                .danger_accept_invalid_certs(accept_invalid)
                .timeout(Duration::from_secs(90))
                .build()
                .map_err(|e| ExecError::Transport {
                    target: String::new(),
                    detail: format!("http client: {e}"),
                })
        };
        Ok(Self { credentials, cancel, verified: build(false)?, unverified: build(true)? })
    }

    fn endpoint(target: &Target) -> Result<String, ExecError> {
        if target.port == Some(5985) && !target.allow_plaintext {
            return Err(ExecError::PlaintextRefused { target: target.id.clone() });
        }
        let (scheme, port) = if target.allow_plaintext {
            ("http", target.port.unwrap_or(5985))
        } else {
            ("https", target.port.unwrap_or(5986))
        };
        Ok(format!("{scheme}://{}:{port}/wsman", target.address))
    }

    fn auth_for(target: &Target, cred: &Credential) -> Result<Auth, ExecError> {
        match cred.scheme {
            AuthScheme::Basic => Ok(Auth::Basic {
                username: cred.username.clone(),
                password: cred.secret.reveal().to_string(),
            }),
            AuthScheme::Ntlm | AuthScheme::Kerberos => {
                let token = cred.negotiate_token.as_ref().ok_or_else(|| {
                    ExecError::Transport {
                        target: target.id.clone(),
                        detail: "negotiate scheme without a token in the credential".into(),
                    }
                })?;
                Ok(Auth::Negotiate { token: token.reveal().to_string() })
            }
            other => Err(ExecError::Transport {
                target: target.id.clone(),
                detail: format!("auth scheme {other:?} not valid for winrm"),
            }),
        }
    }

    async fn post(
        &self,
        target: &Target,
        endpoint: &str,
        auth: &Auth,
        body: String,
        deadline: Instant,
    ) -> Result<PostOutcome, ExecError> {
        let client = if target.tls_verify { &self.verified } else { &self.unverified };
        let mut request = client
            .post(endpoint)
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(body);
        request = match auth {
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::Negotiate { token } => {
                request.header("Authorization", format!("Negotiate {token}"))
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(PostOutcome::Deadline);
        }

        tokio::select! {
            response = request.send() => {
                let response = response.map_err(|e| ExecError::Transport {
                    target: target.id.clone(),
                    detail: e.to_string(),
                })?;
                let status = response.status();
                let text = response.text().await.map_err(|e| ExecError::Transport {
                    target: target.id.clone(),
                    detail: e.to_string(),
                })?;
                if !status.is_success() {
                    let detail = wsman::fault_reason(&text)
                        .unwrap_or_else(|| format!("http {status}"));
                    return Err(ExecError::Transport { target: target.id.clone(), detail });
                }
                Ok(PostOutcome::Response(text))
            }
            _ = tokio::time::sleep(remaining) => Ok(PostOutcome::Deadline),
            _ = self.cancel.cancelled() => Ok(PostOutcome::Cancelled),
        }
    }

    /// Fire-and-forget shell deletion for timeout/cancel paths.
    async fn best_effort_delete(&self, target: &Target, endpoint: &str, auth: &Auth, shell_id: &str) {
        let body = wsman::delete_envelope(endpoint, &Uuid::new_v4().to_string(), shell_id);
        let deadline = Instant::now() + Duration::from_secs(5);
        let _ = self.post(target, endpoint, auth, body, deadline).await;
    }
}

enum PostOutcome {
    Response(String),
    Deadline,
    Cancelled,
}

#[async_trait]
impl Executor for WinRmExecutor {
    async fn run_script(
        &self,
        target: &Target,
        script: &str,
        params: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<ScriptOutput, ExecError> {
        let start = Instant::now();
        let deadline = start + timeout;
        let endpoint = Self::endpoint(target)?;
        let cred = self.credentials.get(&target.credentials).ok_or_else(|| {
            ExecError::MissingCredentials {
                target: target.id.clone(),
                handle: target.credentials.clone(),
            }
        })?;
        let auth = Self::auth_for(target, &cred)?;

        let encoded =
            wsman::encode_powershell(&format!("{}{}", powershell_preamble(params), script));
        let command = format!(
            "powershell.exe -NoProfile -NonInteractive -EncodedCommand {encoded}"
        );

        tracing::debug!(target = %target.id, endpoint = %endpoint, "winrm exec");

        // Create shell
        let create = wsman::create_shell_envelope(&endpoint, &Uuid::new_v4().to_string());
        let shell_id = match self.post(target, &endpoint, &auth, create, deadline).await? {
            PostOutcome::Response(xml) => wsman::extract_shell_id(&xml).ok_or_else(|| {
                ExecError::Transport {
                    target: target.id.clone(),
                    detail: "create response carried no ShellId".into(),
                }
            })?,
            PostOutcome::Deadline => {
                return Ok(timed_out_output(start, Vec::new(), Vec::new()));
            }
            PostOutcome::Cancelled => return Err(ExecError::Cancelled),
        };

        // Run command
        let run =
            wsman::command_envelope(&endpoint, &Uuid::new_v4().to_string(), &shell_id, &command);
        let command_id = match self.post(target, &endpoint, &auth, run, deadline).await {
            Ok(PostOutcome::Response(xml)) => {
                wsman::extract_command_id(&xml).ok_or_else(|| ExecError::Transport {
                    target: target.id.clone(),
                    detail: "command response carried no CommandId".into(),
                })?
            }
            Ok(PostOutcome::Deadline) => {
                self.best_effort_delete(target, &endpoint, &auth, &shell_id).await;
                return Ok(timed_out_output(start, Vec::new(), Vec::new()));
            }
            Ok(PostOutcome::Cancelled) => {
                self.best_effort_delete(target, &endpoint, &auth, &shell_id).await;
                return Err(ExecError::Cancelled);
            }
            Err(e) => {
                self.best_effort_delete(target, &endpoint, &auth, &shell_id).await;
                return Err(e);
            }
        };

        // Receive until done, deadline, or cancellation
        let mut stdout: Vec<u8> = Vec::new();
        let mut stderr: Vec<u8> = Vec::new();
        let mut exit_code = -1;
        loop {
            let receive = wsman::receive_envelope(
                &endpoint,
                &Uuid::new_v4().to_string(),
                &shell_id,
                &command_id,
            );
            match self.post(target, &endpoint, &auth, receive, deadline).await {
                Ok(PostOutcome::Response(xml)) => {
                    let chunk = wsman::parse_receive(&xml);
                    stdout.extend_from_slice(&chunk.stdout);
                    stderr.extend_from_slice(&chunk.stderr);
                    if chunk.done {
                        exit_code = chunk.exit_code.unwrap_or(-1);
                        break;
                    }
                }
                Ok(PostOutcome::Deadline) => {
                    self.best_effort_delete(target, &endpoint, &auth, &shell_id).await;
                    return Ok(timed_out_output(start, stdout, stderr));
                }
                Ok(PostOutcome::Cancelled) => {
                    self.best_effort_delete(target, &endpoint, &auth, &shell_id).await;
                    return Err(ExecError::Cancelled);
                }
                Err(e) => {
                    self.best_effort_delete(target, &endpoint, &auth, &shell_id).await;
                    return Err(e);
                }
            }
        }

        self.best_effort_delete(target, &endpoint, &auth, &shell_id).await;

        Ok(ScriptOutput {
            exit_code,
            stdout: truncate_capture(&stdout, CAPTURE_LIMIT),
            stderr: truncate_capture(&stderr, CAPTURE_LIMIT),
            duration: start.elapsed(),
            timed_out: false,
        })
    }
}

fn timed_out_output(start: Instant, stdout: Vec<u8>, stderr: Vec<u8>) -> ScriptOutput {
    ScriptOutput {
        exit_code: -1,
        stdout: truncate_capture(&stdout, CAPTURE_LIMIT),
        stderr: truncate_capture(&stderr, CAPTURE_LIMIT),
        duration: start.elapsed(),
        timed_out: true,
    }
}

#[cfg(test)]
#[path = "winrm_tests.rs"]
mod tests;
