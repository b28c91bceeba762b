use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::header::USER_AGENT,
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ConnectionMeta;
use crate::state::AppState;
use crate::ws::{ClientHandle, ClientMessage, ConnectionContext, ServerMessage};

/// WebSocket routes
pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// WebSocket upgrade handler.
///
/// The upgrade itself is open; the first accepted message on the
/// socket must be `authenticate`. Connection metadata is captured
/// here while the HTTP headers are still available.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_agent, addr))
}

/// Per-connection message loop.
///
/// Runs in its own task, so a failure here never affects other
/// connections. All connection state lives in the `ConnectionContext`
/// owned by this function; nothing survives the loop except room
/// memberships, which the disconnect path below tears down.
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    user_agent: Option<String>,
    addr: SocketAddr,
) {
    let conn_id = Uuid::new_v4().to_string();
    let meta = ConnectionMeta::from_user_agent(user_agent.as_deref(), addr.ip().to_string());
    let mut ctx = ConnectionContext::new(conn_id.clone(), meta);

    tracing::info!(conn_id = %conn_id, addr = %addr, "WebSocket connected");

    // Outbound queue drained by a dedicated writer task; everything
    // that wants to reach this client goes through it.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Transport-level disconnect plus a heartbeat deadline: silence
    // beyond the timeout is treated as a disconnect.
    let heartbeat = Duration::from_secs(state.config.heartbeat_timeout_seconds);

    loop {
        let frame = tokio::time::timeout(heartbeat, ws_receiver.next()).await;
        match frame {
            Err(_) => {
                tracing::info!(conn_id = %conn_id, "Heartbeat timeout, treating as disconnect");
                break;
            }
            Ok(None) => break,
            Ok(Some(Ok(Message::Text(text)))) => {
                if !handle_message(&text, &mut ctx, &tx, &state).await {
                    break;
                }
            }
            Ok(Some(Ok(Message::Ping(_)))) => {
                // Protocol-level pong is handled by axum. Any inbound
                // frame restarts the heartbeat window; the
                // application-level ping message is the heartbeat
                // clients are expected to send.
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close received");
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
            Ok(Some(Ok(_))) => {}
        }
    }

    // Cleanup: every room this connection joined gets the same leave
    // path an explicit leave-room would take, tagged unexpected.
    if let Some(identity) = ctx.identity().cloned() {
        for room_id in std::mem::take(&mut ctx.joined_rooms) {
            let _ = state
                .registry
                .leave(&room_id, &identity.id, Some(&conn_id), true)
                .await;
        }
    }

    tracing::info!(conn_id = %conn_id, "WebSocket disconnected, cleaned up");
    send_task.abort();
}

/// Dispatch one inbound message. Returns false when the connection
/// should be closed.
async fn handle_message(
    text: &str,
    ctx: &mut ConnectionContext,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    state: &AppState,
) -> bool {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            let err = AppError::BadRequest(format!("malformed message: {e}"));
            let _ = tx.send(ServerMessage::error(&err));
            return true;
        }
    };

    // Authentication is the one message allowed before an identity is
    // attached.
    if let ClientMessage::Authenticate { token } = &msg {
        return handle_authenticate(token, ctx, tx, state);
    }

    let Some(identity) = ctx.identity().cloned() else {
        let err = AppError::NotAuthenticated("please authenticate first".into());
        let _ = tx.send(ServerMessage::error(&err));
        return true;
    };

    let result = match msg {
        ClientMessage::Authenticate { .. } => unreachable!("handled above"),
        ClientMessage::JoinRoom {
            room_id,
            declared_role,
        } => {
            let handle = ClientHandle::new(ctx.conn_id.clone(), identity.id.clone(), tx.clone());
            // The registry queues the room-joined acknowledgement on
            // the handle itself, ahead of any later room traffic.
            match state
                .registry
                .join(&room_id, &identity, declared_role, ctx.meta.clone(), handle)
                .await
            {
                Ok(_) => {
                    ctx.joined_rooms.insert(room_id);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        ClientMessage::LeaveRoom { room_id } => {
            let result = state
                .registry
                .leave(&room_id, &identity.id, Some(&ctx.conn_id), false)
                .await;
            ctx.joined_rooms.remove(&room_id);
            result.map(|_| ())
        }
        ClientMessage::WebrtcSignal {
            room_id,
            kind,
            to,
            data,
        } => {
            state
                .registry
                .relay_signal(&room_id, &identity, kind, &to, data)
                .await
        }
        ClientMessage::ChatMessage {
            room_id,
            body,
            kind,
            file_url,
            file_name,
        } => {
            state
                .registry
                .chat(&room_id, &identity, body, kind, file_url, file_name)
                .await
        }
        ClientMessage::ToggleMedia {
            room_id,
            track,
            enabled,
        } => {
            state
                .registry
                .toggle_media(&room_id, &identity.id, track, enabled)
                .await
        }
        ClientMessage::VitalsUpdate { room_id, vitals } => {
            state
                .registry
                .vitals_update(&room_id, &identity, vitals)
                .await
        }
        ClientMessage::ScreenShareStarted { room_id } => {
            state.registry.screen_share(&room_id, &identity, true).await
        }
        ClientMessage::ScreenShareStopped { room_id } => {
            state
                .registry
                .screen_share(&room_id, &identity, false)
                .await
        }
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong {
                timestamp: Utc::now().timestamp_millis(),
            });
            Ok(())
        }
    };

    // Validation failures are reported to this connection only; they
    // never terminate it or touch other participants.
    if let Err(e) = result {
        tracing::debug!(conn_id = %ctx.conn_id, error = %e, "Request failed");
        let _ = tx.send(ServerMessage::error(&e));
    }
    true
}

fn handle_authenticate(
    token: &str,
    ctx: &mut ConnectionContext,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    state: &AppState,
) -> bool {
    match state.auth.verify(token) {
        Ok(identity) => {
            tracing::info!(
                conn_id = %ctx.conn_id,
                user_id = %identity.id,
                role = %identity.role,
                "Connection authenticated"
            );
            ctx.attach_identity(identity.clone());
            let _ = tx.send(ServerMessage::Authenticated { identity });
            true
        }
        Err(e) => {
            tracing::warn!(conn_id = %ctx.conn_id, error = %e, "Authentication failed");
            let _ = tx.send(ServerMessage::AuthError {
                message: e.to_string(),
            });
            // Failed authentication closes the connection with no
            // other side effects.
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::audit::{spawn_emitter, NullSink};
    use crate::auth::AuthService;
    use crate::config::Config;
    use crate::error::ErrorCode;
    use crate::models::{Role, Room};
    use crate::rooms::RoomRegistry;

    fn test_state() -> AppState {
        let config = Config::for_tests();
        let auth = AuthService::new(&config);
        let (audit, _) = spawn_emitter("audit", NullSink, 8);
        let (clinical, _) = spawn_emitter("clinical", NullSink, 8);
        let (transcript, _) = spawn_emitter("transcript", NullSink, 8);
        let registry = Arc::new(RoomRegistry::new(
            audit,
            clinical,
            transcript,
            Duration::from_secs(3600),
        ));
        AppState::new(config, auth, registry)
    }

    fn connection() -> (
        ConnectionContext,
        mpsc::UnboundedSender<ServerMessage>,
        UnboundedReceiver<ServerMessage>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let meta = ConnectionMeta::from_user_agent(None, "127.0.0.1".into());
        (ConnectionContext::new("c-test".into(), meta), tx, rx)
    }

    async fn authenticate(
        ctx: &mut ConnectionContext,
        tx: &mpsc::UnboundedSender<ServerMessage>,
        rx: &mut UnboundedReceiver<ServerMessage>,
        state: &AppState,
        user_id: &str,
        role: Role,
    ) {
        let token = state.auth.generate_token(user_id, role, user_id).unwrap();
        let text = serde_json::json!({
            "type": "authenticate",
            "payload": { "token": token }
        })
        .to_string();
        assert!(handle_message(&text, ctx, tx, state).await);
        match rx.recv().await.unwrap() {
            ServerMessage::Authenticated { identity } => assert_eq!(identity.id, user_id),
            other => panic!("expected authenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn messages_before_authentication_are_refused_but_keep_the_socket() {
        let state = test_state();
        let (mut ctx, tx, mut rx) = connection();

        let text = serde_json::json!({
            "type": "join-room",
            "payload": { "room_id": "R-1", "declared_role": "doctor" }
        })
        .to_string();
        let keep_open = handle_message(&text, &mut ctx, &tx, &state).await;

        assert!(keep_open);
        assert!(ctx.joined_rooms.is_empty());
        match rx.recv().await.unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::NotAuthenticated),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_authentication_closes_the_connection() {
        let state = test_state();
        let (mut ctx, tx, mut rx) = connection();

        let text = serde_json::json!({
            "type": "authenticate",
            "payload": { "token": "not-a-token" }
        })
        .to_string();
        let keep_open = handle_message(&text, &mut ctx, &tx, &state).await;

        assert!(!keep_open);
        assert!(ctx.identity().is_none());
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::AuthError { .. }
        ));
    }

    #[tokio::test]
    async fn authenticate_then_join_attaches_identity_and_tracks_the_room() {
        let state = test_state();
        state
            .registry
            .create(Room::new("R-1".into(), "Consultation".into(), 7200))
            .unwrap();
        let (mut ctx, tx, mut rx) = connection();
        authenticate(&mut ctx, &tx, &mut rx, &state, "d1", Role::Doctor).await;

        let text = serde_json::json!({
            "type": "join-room",
            "payload": { "room_id": "R-1", "declared_role": "doctor" }
        })
        .to_string();
        assert!(handle_message(&text, &mut ctx, &tx, &state).await);

        assert!(ctx.joined_rooms.contains("R-1"));
        match rx.recv().await.unwrap() {
            ServerMessage::RoomJoined {
                room_id,
                participants,
                ..
            } => {
                assert_eq!(room_id, "R-1");
                assert_eq!(participants.len(), 1);
            }
            other => panic!("expected room-joined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frames_report_bad_request_without_closing() {
        let state = test_state();
        let (mut ctx, tx, mut rx) = connection();

        let keep_open = handle_message("{not json", &mut ctx, &tx, &state).await;

        assert!(keep_open);
        match rx.recv().await.unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::BadRequest),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_answers_pong_once_authenticated() {
        let state = test_state();
        let (mut ctx, tx, mut rx) = connection();
        authenticate(&mut ctx, &tx, &mut rx, &state, "p1", Role::Patient).await;

        assert!(handle_message(r#"{"type":"ping"}"#, &mut ctx, &tx, &state).await);

        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::Pong { .. }
        ));
    }
}
