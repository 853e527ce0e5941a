// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recording fake executor for other crates' tests.

use crate::output::ScriptOutput;
use crate::{ExecError, Executor};
use async_trait::async_trait;
use dw_core::Target;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// One recorded `run_script` invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub target_id: String,
    pub script: String,
    pub params: HashMap<String, String>,
    pub timeout: Duration,
}

/// Scripted responses, served in push order; defaults to exit 0.
#[derive(Clone, Default)]
pub struct FakeExecutor {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    responses: Arc<Mutex<VecDeque<Result<ScriptOutput, String>>>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_output(&self, output: ScriptOutput) {
        self.responses.lock().push_back(Ok(output));
    }

    /// Queue a transport failure for the next call.
    pub fn push_failure(&self, detail: impl Into<String>) {
        self.responses.lock().push_back(Err(detail.into()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn run_script(
        &self,
        target: &Target,
        script: &str,
        params: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<ScriptOutput, ExecError> {
        self.calls.lock().push(RecordedCall {
            target_id: target.id.clone(),
            script: script.to_string(),
            params: params.clone(),
            timeout,
        });
        match self.responses.lock().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(detail)) => {
                Err(ExecError::Transport { target: target.id.clone(), detail })
            }
            None => Ok(ScriptOutput::ok("")),
        }
    }
}
