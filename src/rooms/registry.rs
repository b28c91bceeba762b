use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::audit::{AuditEmitter, AuditEvent, AuditKind, ClinicalEmitter, TranscriptEmitter};
use crate::error::{AppError, Result};
use crate::models::{
    ChatKind, ChatRecord, ConnectionMeta, Identity, MediaState, MediaTrack, Participant, Role,
    Room, RoomInfo, RoomState, VitalSigns, VitalsRecord,
};
use crate::signaling::{CallFlow, CallFlowState, SignalKind};
use crate::ws::{ClientHandle, ServerMessage};

/// In-memory directory of active consultation rooms.
///
/// The registry map itself is lock-free; each room carries one
/// `tokio::sync::Mutex` that serializes every mutating operation on
/// that room. Cross-room traffic proceeds in parallel, while join,
/// leave, call-flow transitions and media mutations on the same room
/// are strictly ordered. Broadcast fan-out and audit emission happen
/// under that lock through non-blocking queues, so recipients and the
/// audit trail both observe room events in server receipt order.
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<RoomEntry>>,
    audit: AuditEmitter,
    clinical: ClinicalEmitter,
    transcript: TranscriptEmitter,
    ttl: Duration,
}

struct RoomEntry {
    room: Room,
    inner: Mutex<RoomInner>,
}

struct RoomInner {
    state: RoomState,
    /// Set by an explicit administrative close; blocks rejoins.
    closed: bool,
    /// Tombstone set under the lock just before the sweeper unmaps the
    /// room. A join that cloned the entry before removal observes it
    /// once it acquires the lock and is refused, so no participant can
    /// land in a detached room.
    swept: bool,
    participants: HashMap<String, Participant>,
    clients: HashMap<String, ClientHandle>,
    call_flow: CallFlow,
    /// True once the room has been ACTIVE; an empty room is then ENDED
    /// rather than EMPTY.
    was_active: bool,
    emptied_at: Option<Instant>,
}

impl RoomInner {
    fn new() -> Self {
        Self {
            state: RoomState::Empty,
            closed: false,
            swept: false,
            participants: HashMap::new(),
            clients: HashMap::new(),
            call_flow: CallFlow::new(),
            was_active: false,
            emptied_at: Some(Instant::now()),
        }
    }

    /// Participant snapshot ordered by join time.
    fn snapshot(&self) -> Vec<Participant> {
        let mut list: Vec<Participant> = self.participants.values().cloned().collect();
        list.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.identity.id.cmp(&b.identity.id))
        });
        list
    }

    fn broadcast(&self, msg: &ServerMessage, exclude_identity: Option<&str>) {
        for (identity_id, client) in &self.clients {
            if Some(identity_id.as_str()) == exclude_identity {
                continue;
            }
            client.send(msg.clone());
        }
    }

    fn recompute_state(&mut self) {
        match self.participants.len() {
            0 => {
                self.emptied_at = Some(Instant::now());
                self.state = if self.was_active {
                    RoomState::Ended
                } else {
                    RoomState::Empty
                };
            }
            1 => {
                self.emptied_at = None;
                self.state = RoomState::Waiting;
            }
            _ => {
                self.emptied_at = None;
                self.state = RoomState::Active;
                self.was_active = true;
            }
        }
    }
}

impl RoomRegistry {
    pub fn new(
        audit: AuditEmitter,
        clinical: ClinicalEmitter,
        transcript: TranscriptEmitter,
        ttl: Duration,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            audit,
            clinical,
            transcript,
            ttl,
        }
    }

    // ==================== Room lifecycle ====================

    /// Register a new room. Fails if the key is already taken.
    pub fn create(&self, room: Room) -> Result<Room> {
        let room_id = room.room_id.clone();
        let entry = Arc::new(RoomEntry {
            room: room.clone(),
            inner: Mutex::new(RoomInner::new()),
        });
        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(_) => {
                return Err(AppError::BadRequest(format!(
                    "room {room_id} already exists"
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }

        self.audit
            .emit(AuditEvent::system(&room_id, AuditKind::RoomCreated));
        tracing::info!(room_id = %room_id, "Room created");
        Ok(room)
    }

    /// Mark a room closed: the consultation is over, rejoins are
    /// refused, the sweeper collects it once empty.
    pub async fn close(&self, room_id: &str) -> Result<()> {
        let entry = self.entry(room_id)?;
        let mut inner = entry.inner.lock().await;
        inner.closed = true;
        inner.state = RoomState::Ended;
        self.audit
            .emit(AuditEvent::system(room_id, AuditKind::RoomEnded));
        drop(inner);

        tracing::info!(room_id = %room_id, "Room closed");
        Ok(())
    }

    pub async fn info(&self, room_id: &str) -> Option<RoomInfo> {
        let entry = self.rooms.get(room_id)?.clone();
        let inner = entry.inner.lock().await;
        Some(RoomInfo {
            room_id: entry.room.room_id.clone(),
            name: entry.room.name.clone(),
            state: inner.state,
            participants_count: inner.participants.len(),
            participants: inner.snapshot(),
            created_at: entry.room.created_at,
        })
    }

    pub async fn list(&self) -> Vec<RoomInfo> {
        let ids: Vec<String> = self.rooms.iter().map(|e| e.key().clone()).collect();
        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(info) = self.info(&id).await {
                infos.push(info);
            }
        }
        infos
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    // ==================== Participant lifecycle ====================

    /// Register a participant and announce them to the room.
    ///
    /// A rejoin by the same identity replaces the stale entry, so a
    /// room never holds two participants for one identity. Returns
    /// the new participant and the post-join snapshot.
    pub async fn join(
        &self,
        room_id: &str,
        identity: &Identity,
        declared_role: Role,
        meta: ConnectionMeta,
        handle: ClientHandle,
    ) -> Result<(Participant, Vec<Participant>)> {
        if declared_role != identity.role {
            return Err(AppError::InvalidRole(format!(
                "declared role {declared_role} does not match authenticated role {}",
                identity.role
            )));
        }

        let entry = self.entry(room_id)?;
        let mut inner = entry.inner.lock().await;
        if inner.closed {
            return Err(AppError::RoomNotFound(format!(
                "room {room_id} has been closed"
            )));
        }
        if inner.swept {
            return Err(AppError::RoomNotFound(format!(
                "room {room_id} has expired"
            )));
        }

        let participant = Participant {
            participant_id: Uuid::new_v4().to_string(),
            identity: identity.clone(),
            connection_id: handle.conn_id.clone(),
            joined_at: Utc::now(),
            connection_meta: meta,
            media_state: MediaState::default(),
        };

        let replaced = inner
            .participants
            .insert(identity.id.clone(), participant.clone())
            .is_some();
        inner.clients.insert(identity.id.clone(), handle.clone());
        inner.recompute_state();

        // The join acknowledgement goes onto the joiner's own queue
        // while the lock is still held, so no later room event can
        // overtake it and the snapshot it carries is exact.
        let snapshot = inner.snapshot();
        handle.send(ServerMessage::RoomJoined {
            room_id: room_id.to_string(),
            participant_id: participant.participant_id.clone(),
            participants: snapshot.clone(),
        });
        inner.broadcast(
            &ServerMessage::ParticipantJoined {
                participant: participant.clone(),
                total_participants: snapshot.len(),
            },
            Some(&identity.id),
        );
        self.audit.emit(AuditEvent::new(
            room_id,
            &identity.id,
            identity.role,
            AuditKind::ParticipantJoined,
        ));
        drop(inner);

        tracing::info!(
            room_id = %room_id,
            user_id = %identity.id,
            role = %identity.role,
            rejoin = replaced,
            "Participant joined room"
        );

        Ok((participant, snapshot))
    }

    /// Deregister a participant and announce the departure.
    ///
    /// Idempotent: leaving twice, or leaving a room the identity never
    /// joined, succeeds and returns the unchanged snapshot. This
    /// tolerates the race between an explicit leave and the disconnect
    /// cleanup for the same connection. When `conn_id` is given, a
    /// departure is only applied if it still owns the membership, so
    /// a stale disconnect cannot evict a rejoined participant.
    pub async fn leave(
        &self,
        room_id: &str,
        identity_id: &str,
        conn_id: Option<&str>,
        unexpected: bool,
    ) -> Result<Vec<Participant>> {
        let Some(entry) = self.rooms.get(room_id).map(|e| e.clone()) else {
            // Room already swept; nothing to do.
            return Ok(Vec::new());
        };
        let mut inner = entry.inner.lock().await;

        let owns_membership = match (inner.participants.get(identity_id), conn_id) {
            (Some(p), Some(conn)) => p.connection_id == conn,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !owns_membership {
            return Ok(inner.snapshot());
        }

        let Some(participant) = inner.participants.remove(identity_id) else {
            return Ok(inner.snapshot());
        };
        inner.clients.remove(identity_id);
        let reset = inner.call_flow.reset_if_party(identity_id);
        inner.recompute_state();
        let ended = inner.state == RoomState::Ended;

        let snapshot = inner.snapshot();
        inner.broadcast(
            &ServerMessage::ParticipantLeft {
                identity_id: identity_id.to_string(),
                remaining: snapshot.clone(),
                unexpected,
            },
            None,
        );
        self.audit.emit(AuditEvent::new(
            room_id,
            identity_id,
            participant.identity.role,
            AuditKind::ParticipantLeft { unexpected },
        ));
        if ended {
            self.audit
                .emit(AuditEvent::system(room_id, AuditKind::RoomEnded));
        }
        drop(inner);

        tracing::info!(
            room_id = %room_id,
            user_id = %identity_id,
            unexpected,
            call_flow_reset = reset,
            "Participant left room"
        );

        Ok(snapshot)
    }

    pub async fn participants(&self, room_id: &str) -> Result<Vec<Participant>> {
        let entry = self.entry(room_id)?;
        let inner = entry.inner.lock().await;
        Ok(inner.snapshot())
    }

    /// Current negotiation state of a room, for diagnostics.
    pub async fn call_flow_state(&self, room_id: &str) -> Option<CallFlowState> {
        let entry = self.rooms.get(room_id)?.clone();
        let inner = entry.inner.lock().await;
        Some(inner.call_flow.state())
    }

    // ==================== Signaling relay ====================

    /// Gate a negotiation message through the call-flow state machine
    /// and relay the opaque payload to the addressed peer.
    pub async fn relay_signal(
        &self,
        room_id: &str,
        sender: &Identity,
        kind: SignalKind,
        to: &str,
        data: Value,
    ) -> Result<()> {
        let entry = self.entry(room_id)?;
        let mut inner = entry.inner.lock().await;

        if !inner.participants.contains_key(&sender.id) {
            return Err(AppError::Signal(format!(
                "sender {} is not a participant of room {room_id}",
                sender.id
            )));
        }
        let Some(target) = inner.clients.get(to).cloned() else {
            return Err(AppError::Signal(format!(
                "addressed peer {to} is not in room {room_id}"
            )));
        };

        match inner.call_flow.apply(kind, sender.role, &sender.id) {
            Ok(accepted) => {
                // Forward the payload untouched; its contents are
                // never parsed here.
                target.send(ServerMessage::WebrtcSignal {
                    kind,
                    from: sender.id.clone(),
                    to: to.to_string(),
                    data: data.clone(),
                });
                self.audit.emit(
                    AuditEvent::new(
                        room_id,
                        &sender.id,
                        sender.role,
                        AuditKind::SignalAccepted {
                            signal: kind,
                            previous: accepted.previous,
                            next: accepted.next,
                        },
                    )
                    .with_payload(&data),
                );
                drop(inner);

                tracing::debug!(
                    room_id = %room_id,
                    user_id = %sender.id,
                    signal = %kind,
                    "Signal relayed"
                );
                Ok(())
            }
            Err(violation) => {
                self.audit.emit(
                    AuditEvent::new(
                        room_id,
                        &sender.id,
                        sender.role,
                        AuditKind::SignalRejected {
                            signal: kind,
                            reason: violation.to_string(),
                        },
                    )
                    .with_payload(&data),
                );
                drop(inner);

                tracing::warn!(
                    room_id = %room_id,
                    user_id = %sender.id,
                    role = %sender.role,
                    signal = %kind,
                    "Invalid call flow"
                );
                Err(AppError::InvalidWebrtcFlow(violation.to_string()))
            }
        }
    }

    // ==================== Auxiliary channels ====================

    /// Broadcast a chat message to the whole room, sender included,
    /// so every client renders the same transcript order.
    pub async fn chat(
        &self,
        room_id: &str,
        sender: &Identity,
        body: String,
        kind: ChatKind,
        file_url: Option<String>,
        file_name: Option<String>,
    ) -> Result<()> {
        let entry = self.entry(room_id)?;
        let inner = entry.inner.lock().await;
        if !inner.participants.contains_key(&sender.id) {
            return Err(AppError::BadRequest(format!(
                "sender {} is not a participant of room {room_id}",
                sender.id
            )));
        }

        let record = ChatRecord {
            message_id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender.id.clone(),
            sender_name: sender.display_name.clone(),
            body,
            kind,
            file_url,
            file_name,
            timestamp: Utc::now(),
        };
        let msg = ServerMessage::ChatMessage {
            message_id: record.message_id.clone(),
            room_id: record.room_id.clone(),
            sender_id: record.sender_id.clone(),
            sender_name: record.sender_name.clone(),
            body: record.body.clone(),
            kind,
            file_url: record.file_url.clone(),
            file_name: record.file_name.clone(),
            timestamp: record.timestamp,
        };
        inner.broadcast(&msg, None);
        // The transcript keeps the full message; the audit trail keeps
        // only a digest of the body.
        self.audit.emit(
            AuditEvent::new(room_id, &sender.id, sender.role, AuditKind::ChatMessage)
                .with_payload(&Value::String(record.body.clone())),
        );
        self.transcript.emit(record);
        drop(inner);

        Ok(())
    }

    /// Update the sender's media state and notify the others.
    pub async fn toggle_media(
        &self,
        room_id: &str,
        identity_id: &str,
        track: MediaTrack,
        enabled: bool,
    ) -> Result<()> {
        let entry = self.entry(room_id)?;
        let mut inner = entry.inner.lock().await;
        let Some(participant) = inner.participants.get_mut(identity_id) else {
            return Err(AppError::BadRequest(format!(
                "sender {identity_id} is not a participant of room {room_id}"
            )));
        };
        participant.media_state.set_track(track, enabled);
        let role = participant.identity.role;

        inner.broadcast(
            &ServerMessage::ParticipantToggledMedia {
                identity_id: identity_id.to_string(),
                track,
                enabled,
            },
            Some(identity_id),
        );
        self.audit.emit(AuditEvent::new(
            room_id,
            identity_id,
            role,
            AuditKind::MediaToggled { track, enabled },
        ));
        drop(inner);

        Ok(())
    }

    /// Forward a vital-sign snapshot to the doctors in the room and
    /// persist it to the clinical store.
    ///
    /// Vitals are best-effort telemetry: a sender without the patient
    /// role gets a silent drop, recorded as an audit anomaly rather
    /// than an error.
    pub async fn vitals_update(
        &self,
        room_id: &str,
        sender: &Identity,
        vitals: VitalSigns,
    ) -> Result<()> {
        let entry = self.entry(room_id)?;
        let inner = entry.inner.lock().await;
        if !inner.participants.contains_key(&sender.id) {
            return Err(AppError::BadRequest(format!(
                "sender {} is not a participant of room {room_id}",
                sender.id
            )));
        }

        if !sender.role.is_responder() {
            self.audit.emit(AuditEvent::new(
                room_id,
                &sender.id,
                sender.role,
                AuditKind::VitalsAnomaly {
                    reason: format!("vitals push from non-patient role {}", sender.role),
                },
            ));
            drop(inner);
            tracing::warn!(
                room_id = %room_id,
                user_id = %sender.id,
                role = %sender.role,
                "Dropped vitals push from non-patient"
            );
            return Ok(());
        }

        let record = VitalsRecord {
            record_id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            patient_id: sender.id.clone(),
            vitals: vitals.clone(),
            timestamp: Utc::now(),
        };
        let msg = ServerMessage::VitalsUpdate {
            patient_id: sender.id.clone(),
            vitals,
            timestamp: record.timestamp,
        };
        for (identity_id, client) in &inner.clients {
            let is_doctor = inner
                .participants
                .get(identity_id)
                .is_some_and(|p| p.identity.role.is_initiator());
            if is_doctor {
                client.send(msg.clone());
            }
        }
        self.clinical.emit(record);
        self.audit.emit(AuditEvent::new(
            room_id,
            &sender.id,
            sender.role,
            AuditKind::VitalsRecorded,
        ));
        drop(inner);

        Ok(())
    }

    /// Flip the sender's screen-share flag and notify the others.
    pub async fn screen_share(
        &self,
        room_id: &str,
        sender: &Identity,
        active: bool,
    ) -> Result<()> {
        let entry = self.entry(room_id)?;
        let mut inner = entry.inner.lock().await;
        let Some(participant) = inner.participants.get_mut(&sender.id) else {
            return Err(AppError::BadRequest(format!(
                "sender {} is not a participant of room {room_id}",
                sender.id
            )));
        };
        participant.media_state.screen_sharing = active;

        let msg = if active {
            ServerMessage::ScreenShareStarted {
                identity_id: sender.id.clone(),
                display_name: sender.display_name.clone(),
            }
        } else {
            ServerMessage::ScreenShareStopped {
                identity_id: sender.id.clone(),
            }
        };
        inner.broadcast(&msg, Some(&sender.id));
        self.audit.emit(AuditEvent::new(
            room_id,
            &sender.id,
            sender.role,
            AuditKind::ScreenShare { active },
        ));
        drop(inner);

        Ok(())
    }

    // ==================== Garbage collection ====================

    /// Remove rooms that have sat empty past the TTL. Returns how
    /// many were collected.
    pub async fn sweep(&self) -> usize {
        let ids: Vec<String> = self.rooms.iter().map(|e| e.key().clone()).collect();
        let mut collected = 0;
        for id in ids {
            let Some(entry) = self.rooms.get(&id).map(|e| e.clone()) else {
                continue;
            };
            let mut inner = entry.inner.lock().await;
            let expired = inner.participants.is_empty()
                && (inner.closed
                    || inner
                        .emptied_at
                        .is_some_and(|t| t.elapsed() >= self.ttl));
            if expired {
                // Tombstone before unmapping, while the lock is held,
                // so a join racing on a pre-removal clone of the entry
                // cannot slip a participant into a detached room.
                inner.swept = true;
            }
            drop(inner);

            if expired && self.rooms.remove(&id).is_some() {
                collected += 1;
                tracing::info!(room_id = %id, "Empty room collected");
            }
        }
        collected
    }

    /// Background sweep loop.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                registry.sweep().await;
            }
        })
    }

    fn entry(&self, room_id: &str) -> Result<Arc<RoomEntry>> {
        self.rooms
            .get(room_id)
            .map(|e| e.clone())
            .ok_or_else(|| AppError::RoomNotFound(format!("room {room_id} does not exist")))
    }
}
