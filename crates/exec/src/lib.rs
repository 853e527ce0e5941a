// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dw-exec: remote script execution over WinRM, SSH, and the local host.
//!
//! All three transports share one outer contract: run a script on a target
//! with named parameters and a timeout, return exit code and captured
//! output. Timeouts are not errors: they surface partial output with the
//! `timed_out` flag set. Every call is cancellable through the token the
//! executor was built with.

mod local;
mod output;
mod params;
mod ssh;
mod winrm;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use local::LocalExecutor;
pub use output::ScriptOutput;
pub use params::{powershell_preamble, shell_env_preamble};
pub use ssh::SshExecutor;
pub use winrm::WinRmExecutor;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeExecutor, RecordedCall};

use async_trait::async_trait;
use dw_core::Target;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Cap on captured stdout/stderr per stream.
pub(crate) const CAPTURE_LIMIT: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no credentials for target {target} (handle {handle})")]
    MissingCredentials { target: String, handle: String },
    #[error("plaintext WinRM refused for {target}: allow_plaintext not set")]
    PlaintextRefused { target: String },
    #[error("transport error for {target}: {detail}")]
    Transport { target: String, detail: String },
    #[error("execution cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One contract across transports.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run_script(
        &self,
        target: &Target,
        script: &str,
        params: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<ScriptOutput, ExecError>;
}

/// Truncate a byte buffer to a UTF-8–safe string of at most `limit` bytes.
pub(crate) fn truncate_capture(bytes: &[u8], limit: usize) -> String {
    let s = String::from_utf8_lossy(bytes);
    if s.len() <= limit {
        s.into_owned()
    } else {
        let mut end = limit.min(s.len());
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
