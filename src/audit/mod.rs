//! Compliance audit trail.
//!
//! Every lifecycle and negotiation event is mirrored here,
//! fire-and-forget: `Emitter::emit` never blocks and never fails the
//! user action that produced the event. A dedicated worker drains the
//! channel into a bounded in-memory buffer and flushes it to the
//! durable sink with retry and backoff. When the buffer overflows,
//! the oldest pending entries are dropped and logged as errors so
//! operators can alert on audit loss; session availability wins over
//! audit completeness.

pub mod sink;

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{MediaTrack, Role};
use crate::signaling::{CallFlowState, SignalKind};

pub use sink::{HttpSink, NullSink, RecordSink, SinkError};

const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_MAX: Duration = Duration::from_secs(30);

/// What happened, with the event-specific fields inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AuditKind {
    RoomCreated,
    RoomEnded,
    ParticipantJoined,
    ParticipantLeft {
        unexpected: bool,
    },
    SignalAccepted {
        signal: SignalKind,
        previous: CallFlowState,
        next: CallFlowState,
    },
    SignalRejected {
        signal: SignalKind,
        reason: String,
    },
    ChatMessage,
    MediaToggled {
        track: MediaTrack,
        enabled: bool,
    },
    VitalsRecorded,
    VitalsAnomaly {
        reason: String,
    },
    ScreenShare {
        active: bool,
    },
}

/// Immutable audit record; ordering is per-room by server receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub room_id: String,
    pub actor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_role: Option<Role>,
    #[serde(flatten)]
    pub kind: AuditKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_digest: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(room_id: &str, actor_id: &str, actor_role: Role, kind: AuditKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            actor_id: actor_id.to_string(),
            actor_role: Some(actor_role),
            kind,
            payload_digest: None,
            timestamp: Utc::now(),
        }
    }

    /// Lifecycle event not attributable to a participant (room
    /// creation, expiry).
    pub fn system(room_id: &str, kind: AuditKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            actor_id: "system".to_string(),
            actor_role: None,
            kind,
            payload_digest: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a digest of the (otherwise unrecorded) payload.
    pub fn with_payload(mut self, payload: &serde_json::Value) -> Self {
        self.payload_digest = Some(payload_digest(payload));
        self
    }
}

/// SHA-256 hex digest of a JSON payload. The audit trail stores the
/// digest, never the payload itself.
pub fn payload_digest(payload: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

/// Non-blocking handle used by request handlers to enqueue records.
pub struct Emitter<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Serialize + Send + 'static> Emitter<T> {
    /// Enqueue a record. Never blocks and never errors back to the
    /// caller; if the worker is gone the record is dropped with a log
    /// entry.
    pub fn emit(&self, record: T) {
        if self.tx.send(record).is_err() {
            tracing::error!("record worker stopped, dropping record");
        }
    }
}

pub type AuditEmitter = Emitter<AuditEvent>;
pub type ClinicalEmitter = Emitter<crate::models::VitalsRecord>;
pub type TranscriptEmitter = Emitter<crate::models::ChatRecord>;

/// Spawn the flush worker for one sink and return its emitter handle.
///
/// `capacity` bounds the pending buffer; overflow drops the oldest
/// entry.
pub fn spawn_emitter<T, S>(
    name: &'static str,
    sink: S,
    capacity: usize,
) -> (Emitter<T>, JoinHandle<()>)
where
    T: Serialize + Send + 'static,
    S: RecordSink,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_worker(name, sink, rx, capacity));
    (Emitter { tx }, handle)
}

async fn run_worker<T, S>(
    name: &'static str,
    sink: S,
    mut rx: mpsc::UnboundedReceiver<T>,
    capacity: usize,
) where
    T: Serialize + Send + 'static,
    S: RecordSink,
{
    let mut pending: VecDeque<serde_json::Value> = VecDeque::new();
    let mut retry_delay = RETRY_BASE;

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(record) => {
                        match serde_json::to_value(&record) {
                            Ok(value) => {
                                pending.push_back(value);
                                if pending.len() > capacity {
                                    pending.pop_front();
                                    tracing::error!(
                                        worker = name,
                                        capacity,
                                        "sink unavailable, dropped oldest pending record"
                                    );
                                }
                            }
                            Err(e) => {
                                tracing::error!(worker = name, error = %e, "unserializable record dropped");
                            }
                        }
                        // Opportunistic flush while the sink is healthy.
                        if retry_delay == RETRY_BASE {
                            flush(name, &sink, &mut pending, &mut retry_delay).await;
                        }
                    }
                    None => {
                        // Producers are gone; one last best-effort flush.
                        flush(name, &sink, &mut pending, &mut retry_delay).await;
                        if !pending.is_empty() {
                            tracing::warn!(
                                worker = name,
                                lost = pending.len(),
                                "shutting down with unflushed records"
                            );
                        }
                        return;
                    }
                }
            }
            _ = tokio::time::sleep(retry_delay), if !pending.is_empty() => {
                flush(name, &sink, &mut pending, &mut retry_delay).await;
            }
        }
    }
}

/// Drain as much of the buffer as the sink accepts; on the first
/// failure, back off exponentially with jitter.
async fn flush<S: RecordSink>(
    name: &'static str,
    sink: &S,
    pending: &mut VecDeque<serde_json::Value>,
    retry_delay: &mut Duration,
) {
    while let Some(record) = pending.front() {
        match sink.append(record.clone()).await {
            Ok(()) => {
                pending.pop_front();
                *retry_delay = RETRY_BASE;
            }
            Err(e) => {
                let jitter = rand::rng().random_range(0..=retry_delay.as_millis() as u64 / 4);
                *retry_delay = (*retry_delay * 2 + Duration::from_millis(jitter)).min(RETRY_MAX);
                tracing::warn!(
                    worker = name,
                    error = %e,
                    pending = pending.len(),
                    retry_in_ms = retry_delay.as_millis() as u64,
                    "sink append failed, will retry"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sink::testing::{FlakySink, MemorySink};
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(n: usize) -> AuditEvent {
        AuditEvent::new(
            "R-100",
            &format!("actor-{n}"),
            Role::Doctor,
            AuditKind::ParticipantJoined,
        )
    }

    #[tokio::test]
    async fn events_reach_the_sink_in_order() {
        let sink = MemorySink::default();
        let (emitter, handle) = spawn_emitter::<AuditEvent, _>("audit", sink.clone(), 64);

        for n in 0..5 {
            emitter.emit(event(n));
        }
        drop(emitter);
        handle.await.unwrap();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 5);
        for (n, record) in records.iter().enumerate() {
            assert_eq!(record["actor_id"], format!("actor-{n}"));
            assert_eq!(record["kind"], "participant-joined");
        }
    }

    #[tokio::test]
    async fn flaky_sink_is_retried_without_loss() {
        let sink = FlakySink::failing_first(2);
        let (emitter, handle) = spawn_emitter::<AuditEvent, _>("audit", sink.clone(), 64);

        for n in 0..3 {
            emitter.emit(event(n));
        }
        // The shutdown flush only makes one attempt, so wait for the
        // retry loop to recover before producers go away.
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(emitter);
        handle.await.unwrap();

        assert_eq!(sink.inner.records.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_records() {
        // A sink that always fails keeps everything pending.
        let sink = FlakySink::failing_first(usize::MAX);
        let (emitter, handle) = spawn_emitter::<AuditEvent, _>("audit", sink.clone(), 4);

        for n in 0..10 {
            emitter.emit(event(n));
        }
        // Let the worker ingest everything before shutdown.
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(emitter);
        handle.await.unwrap();

        // Nothing was flushed, and only the newest 4 remained pending.
        assert!(sink.inner.records.lock().unwrap().is_empty());
    }

    #[test]
    fn digest_is_stable_and_hex() {
        let payload = serde_json::json!({ "sdp": "v=0..." });
        let a = payload_digest(&payload);
        let b = payload_digest(&payload);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn audit_event_serializes_flat() {
        let ev = AuditEvent::new(
            "R-1",
            "d1",
            Role::Doctor,
            AuditKind::SignalAccepted {
                signal: SignalKind::Offer,
                previous: CallFlowState::Idle,
                next: CallFlowState::Offered,
            },
        )
        .with_payload(&serde_json::json!({"sdp": "x"}));

        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["kind"], "signal-accepted");
        assert_eq!(value["signal"], "offer");
        assert_eq!(value["previous"], "idle");
        assert_eq!(value["next"], "offered");
        assert_eq!(value["actor_role"], "doctor");
        assert!(value["payload_digest"].is_string());
    }
}
