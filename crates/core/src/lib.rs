// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dw-core: Core library for the Driftwarden compliance appliance agent

pub mod macros;

pub mod clock;
pub mod config;
pub mod drift;
pub mod healing;
pub mod id;
pub mod incident;
pub mod pattern;
pub mod scrub;
pub mod target;
pub mod time;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{
    AgentConfig, CentralCommandConfig, CircuitConfig, ConfigError, EscalationConfig,
    EvidenceConfig, FlapConfig, GrpcConfig, HealingConfig, Intervals, L2Config, MaintenanceWindow,
};
pub use drift::{DriftResult, DriftStatus, EvidenceFragment, Platform, Severity};
pub use healing::{DeferralReason, EscalationReason, HealingResult};
pub use id::{IdBuf, TicketId};
pub use incident::{Incident, IncidentId, Outcome, ResolutionStatus, ResolutionTier, TransitionError};
pub use pattern::{pattern_signature, PatternStat, PatternTable, StateDiff};
pub use scrub::PhiScrubber;
pub use target::{AuthScheme, Credential, CredentialStore, Secret, Target, Transport};
pub use time::{parse_rfc3339, rfc3339_ms};

/// Raw key→value state collected from a target for one check.
///
/// Ordered map so serialization (and therefore pattern signatures and
/// evidence hashes) is deterministic.
pub type RawState = std::collections::BTreeMap<String, serde_json::Value>;
