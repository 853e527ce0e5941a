// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IntakeService implementation.

use crate::proto::intake_service_server::{IntakeService as IntakeServiceTrait, IntakeServiceServer};
use crate::proto::{
    Ack, DriftAck, DriftEvent, HealingReport, HeartbeatRequest, HeartbeatResponse,
    RegisterRequest, RegisterResponse,
};
use crate::{drift_event_message, drift_result_from_event};
use dw_core::{rfc3339_ms, Clock, DriftResult, SystemClock};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

/// Observable drop/accept counters.
#[derive(Default)]
pub struct IntakeCounters {
    pub accepted: AtomicU64,
    pub dropped_unknown_agent: AtomicU64,
    pub dropped_bad_signature: AtomicU64,
    pub dropped_malformed: AtomicU64,
}

pub struct IntakeService {
    /// Pinned agent keys, learned at Register.
    agents: Mutex<HashMap<String, VerifyingKey>>,
    /// Last heartbeat/event per agent, epoch ms.
    last_seen: Mutex<HashMap<String, u64>>,
    /// Accepted drift results flow into the standard scan pipeline.
    drift_tx: mpsc::Sender<DriftResult>,
    counters: Arc<IntakeCounters>,
}

impl IntakeService {
    pub fn new(drift_tx: mpsc::Sender<DriftResult>, counters: Arc<IntakeCounters>) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            last_seen: Mutex::new(HashMap::new()),
            drift_tx,
            counters,
        }
    }

    /// Agents seen within `window_ms` of `now`, for the workstation
    /// compliance tick.
    pub fn online_agents(&self, now_epoch_ms: u64, window_ms: u64) -> Vec<String> {
        let mut online: Vec<String> = self
            .last_seen
            .lock()
            .iter()
            .filter(|(_, seen)| now_epoch_ms.saturating_sub(**seen) <= window_ms)
            .map(|(id, _)| id.clone())
            .collect();
        online.sort();
        online
    }

    pub fn registered_count(&self) -> usize {
        self.agents.lock().len()
    }

    fn touch(&self, agent_id: &str) {
        self.last_seen
            .lock()
            .insert(agent_id.to_string(), SystemClock.epoch_ms());
    }

    fn verify_event(&self, event: &DriftEvent) -> Result<(), &'static str> {
        let key = {
            let agents = self.agents.lock();
            agents.get(&event.agent_id).copied()
        };
        let Some(key) = key else { return Err("unknown_agent") };
        let Ok(sig_bytes) = hex::decode(&event.signature) else { return Err("bad_signature") };
        let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
            return Err("bad_signature");
        };
        let message = drift_event_message(event);
        key.verify(&message, &Signature::from_bytes(&sig_array))
            .map_err(|_| "bad_signature")
    }

    /// Process one event; returns the ack sent back on the stream.
    fn process_event(&self, event: &DriftEvent) -> DriftAck {
        let counters = &self.counters;
        match self.verify_event(event) {
            Ok(()) => self.touch(&event.agent_id),
            Err(reason) => {
                match reason {
                    "unknown_agent" => {
                        counters.dropped_unknown_agent.fetch_add(1, Ordering::Relaxed)
                    }
                    _ => counters.dropped_bad_signature.fetch_add(1, Ordering::Relaxed),
                };
                tracing::warn!(agent = %event.agent_id, reason, "drift event dropped");
                return DriftAck {
                    check_id: event.check_id.clone(),
                    accepted: false,
                    reason: reason.to_string(),
                };
            }
        }
        match drift_result_from_event(event) {
            Ok(result) => {
                if self.drift_tx.try_send(result).is_err() {
                    // Intake backpressure: better to drop one event than
                    // block the stream handler.
                    counters.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                    return DriftAck {
                        check_id: event.check_id.clone(),
                        accepted: false,
                        reason: "intake_full".to_string(),
                    };
                }
                counters.accepted.fetch_add(1, Ordering::Relaxed);
                DriftAck { check_id: event.check_id.clone(), accepted: true, reason: String::new() }
            }
            Err(reason) => {
                counters.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(agent = %event.agent_id, %reason, "malformed drift event");
                DriftAck { check_id: event.check_id.clone(), accepted: false, reason }
            }
        }
    }
}

#[tonic::async_trait]
impl IntakeServiceTrait for Arc<IntakeService> {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        let Ok(key_bytes) = hex::decode(&req.public_key) else {
            return Err(Status::invalid_argument("public_key is not hex"));
        };
        let Ok(key_array) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
            return Err(Status::invalid_argument("public_key must be 32 bytes"));
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_array) else {
            return Err(Status::invalid_argument("public_key is not ed25519"));
        };
        self.agents.lock().insert(req.agent_id.clone(), key);
        self.touch(&req.agent_id);
        tracing::info!(agent = %req.agent_id, capabilities = ?req.capabilities, "agent registered");
        let config = serde_json::json!({
            "report_interval_sec": 300,
            "checks": ["firewall", "defender", "bitlocker", "patch"],
        });
        Ok(Response::new(RegisterResponse { accepted: true, config_json: config.to_string() }))
    }

    type ReportDriftStream = ReceiverStream<Result<DriftAck, Status>>;

    async fn report_drift(
        &self,
        request: Request<Streaming<DriftEvent>>,
    ) -> Result<Response<Self::ReportDriftStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(64);
        let service = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = inbound.next().await {
                let ack = match event {
                    Ok(event) => service.process_event(&event),
                    Err(status) => {
                        tracing::debug!(error = %status, "drift stream error");
                        break;
                    }
                };
                if tx.send(Ok(ack)).await.is_err() {
                    break;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn report_healing(
        &self,
        request: Request<HealingReport>,
    ) -> Result<Response<Ack>, Status> {
        let report = request.into_inner();
        let known = self.agents.lock().contains_key(&report.agent_id);
        if !known {
            self.counters.dropped_unknown_agent.fetch_add(1, Ordering::Relaxed);
            return Ok(Response::new(Ack { accepted: false }));
        }
        tracing::info!(
            agent = %report.agent_id,
            incident = %report.incident_id,
            tier = %report.tier,
            success = report.success,
            "workstation healing reported"
        );
        Ok(Response::new(Ack { accepted: true }))
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();
        self.touch(&req.agent_id);
        Ok(Response::new(HeartbeatResponse {
            server_time: rfc3339_ms(SystemClock.now_utc()),
        }))
    }
}

/// Run the intake server until cancellation.
pub async fn serve_intake(
    service: Arc<IntakeService>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    tracing::info!(%addr, "grpc intake listening");
    tonic::transport::Server::builder()
        .add_service(IntakeServiceServer::new(service))
        .serve_with_shutdown(addr, cancel.cancelled())
        .await
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
