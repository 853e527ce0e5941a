// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dw-command: the Central Command surface.
//!
//! A thin REST client (check-in with credential-pull, evidence, pattern
//! stats, promoted rules, executions, signed orders), the offline-queue
//! drain sender with its backoff policy, order verification against the
//! pinned server key, and the four-hour learning sync cycle.

mod client;
mod learning;
mod orders;
mod sender;
mod types;

pub use client::{CommandClient, CommandError, DeliveryOutcome};
pub use learning::{LearningCursors, LearningSync};
pub use orders::{OrderDecision, OrderProcessor};
pub use sender::{DrainStats, QueueSender};
pub use types::{
    CheckinRequest, CheckinResponse, ExecutionRecord, OrderRecord, PromotedRulesResponse,
    TargetRecord, TicketRecord,
};
