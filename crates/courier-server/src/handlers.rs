//! Connection handlers for the Courier server.
//!
//! This module owns the realtime channel: the WebSocket lifecycle, frame
//! processing, and the forwarding tasks that bridge room and presence
//! broadcasts onto each client socket.

use crate::config::Config;
use crate::directory::InMemoryDirectory;
use crate::http;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use courier_core::{
    conversation::validate_user_id, ChatMessage, ConnectionId, ConversationAggregator,
    ConversationId, MessageKind, MessageStore, PresenceEvent, PresenceRegistry, RelayEvent,
    RelayKind, RoomRouter,
};
use courier_protocol::{codec, Frame, Version, WireMessage, WireMessageKind, PROTOCOL_VERSION};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};

/// Error code for malformed input.
const CODE_VALIDATION: u16 = 1001;
/// Error code for operations that require a prior `join`.
const CODE_NOT_JOINED: u16 = 1004;
/// Error code for exceeded limits or missing subscriptions.
const CODE_LIMIT: u16 = 1008;

/// Shared server state.
pub struct AppState {
    /// Who is reachable right now.
    pub presence: Arc<PresenceRegistry>,
    /// Who is listening to what.
    pub router: RoomRouter,
    /// The durable message log.
    pub store: Arc<MessageStore>,
    /// Read-side conversation views.
    pub aggregator: ConversationAggregator,
    /// Identity collaborator stand-in.
    pub directory: InMemoryDirectory,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let store = Arc::new(MessageStore::with_config(config.store_config()));
        let aggregator = ConversationAggregator::new(store.clone(), presence.clone());

        Self {
            presence,
            router: RoomRouter::with_config(config.router_config()),
            store,
            aggregator,
            directory: InMemoryDirectory::new(),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .merge(http::routes())
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Courier server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Per-connection mutable state for the frame loop.
struct ConnectionState {
    /// Handle identity of this socket.
    handle: ConnectionId,
    /// The user this connection joined as, once `Join` arrives.
    user_id: Option<String>,
    /// Forwarding tasks per subscribed room.
    room_tasks: HashMap<ConversationId, tokio::task::JoinHandle<()>>,
    /// Forwarding task for presence transitions.
    presence_task: Option<tokio::task::JoinHandle<()>>,
}

impl ConnectionState {
    fn new(handle: ConnectionId) -> Self {
        Self {
            handle,
            user_id: None,
            room_tasks: HashMap::new(),
            presence_task: None,
        }
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let handle = ConnectionId::generate();
    debug!(connection = %handle, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Send Connected frame
    let connected_frame = Frame::connected(
        handle.as_str(),
        PROTOCOL_VERSION.major,
        state.config.heartbeat.interval_ms as u32,
    );
    if let Ok(data) = codec::encode(&connected_frame) {
        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
            error!(connection = %handle, "Failed to send Connected frame");
            return;
        }
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Outbound frames from forwarding tasks, merged onto one channel
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();

    let mut conn = ConnectionState::new(handle.clone());

    // Frame processing loop
    loop {
        tokio::select! {
            biased;

            // Frames produced by room/presence forwarding tasks
            Some(frame) = out_rx.recv() => {
                if let Ok(data) = codec::encode(&frame) {
                    if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                        break;
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        read_buffer.extend_from_slice(&data);

                        // Try to decode frames
                        while let Ok(Some(frame)) = codec::decode_from(&mut read_buffer) {
                            if let Err(e) = handle_frame(
                                &frame,
                                &mut conn,
                                &state,
                                &mut sender,
                                &out_tx,
                            ).await {
                                error!(connection = %conn.handle, error = %e, "Frame handling error");
                                break;
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        if let Some(user_id) = &conn.user_id {
                            state.presence.touch(user_id);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %conn.handle, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %conn.handle, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %conn.handle, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: stop forwarding before the handle is considered free
    for (_, task) in conn.room_tasks.drain() {
        task.abort();
    }
    if let Some(task) = conn.presence_task.take() {
        task.abort();
    }

    // Cleanup: presence first (broadcasts userOffline), then room membership
    state.presence.leave(&conn.handle);
    state.router.unsubscribe_all(&conn.handle);

    metrics::set_users_online(state.presence.online_count());
    metrics::set_active_rooms(state.router.stats().room_count);

    debug!(connection = %conn.handle, "WebSocket disconnected");
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: &Frame,
    conn: &mut ConnectionState,
    state: &Arc<AppState>,
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    out_tx: &mpsc::UnboundedSender<Frame>,
) -> Result<()> {
    match frame {
        Frame::Join {
            id,
            user_id,
            display_name,
            avatar_url,
        } => {
            debug!(connection = %conn.handle, user = %user_id, "Join request");

            if let Err(e) = validate_user_id(user_id) {
                send_frame(sender, &Frame::error(*id, CODE_VALIDATION, e)).await?;
                return Ok(());
            }

            // Switching identity on a live connection releases the old one first.
            if conn.user_id.as_deref().is_some_and(|prev| prev != user_id) {
                state.presence.leave(&conn.handle);
            }

            state
                .directory
                .upsert(user_id, display_name.clone(), avatar_url.clone());
            state.presence.join(user_id.clone(), conn.handle.clone());

            // Re-joining as a different user rewires the presence feed.
            if let Some(task) = conn.presence_task.take() {
                task.abort();
            }
            conn.presence_task = Some(spawn_presence_forwarder(
                state.presence.subscribe(),
                user_id.clone(),
                out_tx.clone(),
            ));
            conn.user_id = Some(user_id.clone());

            metrics::set_users_online(state.presence.online_count());
            send_frame(sender, &Frame::ack(*id)).await?;
        }

        Frame::JoinRoom { id, conversation } => {
            debug!(connection = %conn.handle, conversation = %conversation, "JoinRoom request");

            let Some(user_id) = conn.user_id.clone() else {
                send_frame(sender, &Frame::error(*id, CODE_NOT_JOINED, "Join first")).await?;
                return Ok(());
            };

            let conversation = match ConversationId::parse(conversation) {
                Ok(c) => c,
                Err(e) => {
                    send_frame(sender, &Frame::error(*id, CODE_VALIDATION, e)).await?;
                    return Ok(());
                }
            };
            if !conversation.involves(&user_id) {
                let response =
                    Frame::error(*id, CODE_VALIDATION, "Not a participant of this conversation");
                send_frame(sender, &response).await?;
                return Ok(());
            }

            let response = match state.router.subscribe(&conn.handle, &conversation) {
                Ok(rx) => {
                    let task =
                        spawn_room_forwarder(rx, conn.handle.clone(), out_tx.clone());
                    if let Some(old) = conn.room_tasks.insert(conversation.clone(), task) {
                        old.abort();
                    }
                    metrics::record_subscription();
                    metrics::set_active_rooms(state.router.stats().room_count);
                    Frame::ack(*id)
                }
                Err(e) => {
                    warn!(connection = %conn.handle, error = %e, "Subscribe failed");
                    Frame::error(*id, CODE_LIMIT, e.to_string())
                }
            };

            send_frame(sender, &response).await?;
        }

        Frame::SendMessage {
            id,
            conversation,
            message,
        } => {
            // Relay path is best effort: an unjoined sender is dropped, not errored.
            let Some(user_id) = conn.user_id.clone() else {
                trace!(connection = %conn.handle, "SendMessage before join, dropped");
                return Ok(());
            };
            let Ok(conversation) = ConversationId::parse(conversation) else {
                trace!(connection = %conn.handle, "SendMessage with bad conversation, dropped");
                return Ok(());
            };
            if message.sender_id != user_id || !conversation.involves(&user_id) {
                trace!(connection = %conn.handle, "SendMessage for another identity, dropped");
                return Ok(());
            }

            let chat = chat_from_wire(message, conversation);
            let recipients = state
                .router
                .publish(RelayEvent::message(chat, Some(conn.handle.clone())));
            metrics::record_relayed_message();

            // Send ack if requested
            if let Some(req_id) = id {
                send_frame(sender, &Frame::ack(*req_id)).await?;
            }

            debug!(connection = %conn.handle, recipients, "Relayed message");
        }

        Frame::Typing {
            conversation,
            is_typing,
        } => {
            // Same best-effort policy as message relay.
            let Some(user_id) = conn.user_id.clone() else {
                return Ok(());
            };
            let Ok(conversation) = ConversationId::parse(conversation) else {
                return Ok(());
            };
            if !conversation.involves(&user_id) {
                return Ok(());
            }

            state.router.publish(RelayEvent::typing(
                conversation,
                user_id,
                *is_typing,
                Some(conn.handle.clone()),
            ));
            metrics::record_typing_event();
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(*timestamp)).await?;
        }

        Frame::Pong { .. } => {
            if let Some(user_id) = &conn.user_id {
                state.presence.touch(user_id);
            }
        }

        Frame::Connect { version, token } => {
            debug!(
                connection = %conn.handle,
                version = version,
                has_token = token.is_some(),
                "Connect frame (already connected)"
            );
            // The Connected frame already went out on upgrade; re-negotiation
            // only rejects an incompatible client.
            if !version_supported(*version) {
                let response = Frame::error(
                    0,
                    CODE_VALIDATION,
                    format!("Unsupported protocol version {version}; server speaks {PROTOCOL_VERSION}"),
                );
                send_frame(sender, &response).await?;
            }
        }

        _ => {
            warn!(connection = %conn.handle, frame_type = ?frame.frame_type(), "Unexpected frame type");
        }
    }

    Ok(())
}

/// Whether a client speaking the given major version can talk to us.
fn version_supported(major: u8) -> bool {
    Version::new(major, 0).is_compatible_with(&PROTOCOL_VERSION)
}

/// Forward room events to the socket, dropping the sender's own echo.
fn spawn_room_forwarder(
    mut rx: broadcast::Receiver<Arc<RelayEvent>>,
    handle: ConnectionId,
    out_tx: mpsc::UnboundedSender<Frame>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.excludes(&handle) {
                        continue;
                    }
                    if out_tx.send(relay_to_frame(&event)).is_err() {
                        break; // Receiver dropped
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                // Typing indicators have no delivery guarantee; skipping
                // lagged events is acceptable here.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    })
}

/// Forward presence transitions to the socket, skipping the user's own.
fn spawn_presence_forwarder(
    mut rx: broadcast::Receiver<PresenceEvent>,
    user_id: String,
    out_tx: mpsc::UnboundedSender<Frame>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.user_id() == user_id {
                        continue;
                    }
                    let frame = match &event {
                        PresenceEvent::Online { user_id } => Frame::user_online(user_id.clone()),
                        PresenceEvent::Offline { user_id } => Frame::user_offline(user_id.clone()),
                    };
                    if out_tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    })
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> Result<()> {
    let data = codec::encode(frame)?;
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}

/// Wire rendering of a stored message.
pub fn wire_from_chat(message: &ChatMessage) -> WireMessage {
    WireMessage {
        id: message.id,
        conversation: message.conversation.to_string(),
        sender_id: message.sender_id.clone(),
        recipient_id: message.recipient_id.clone(),
        content: message.content.clone(),
        kind: match message.kind {
            MessageKind::Text => WireMessageKind::Text,
            MessageKind::Attachment => WireMessageKind::Attachment,
            MessageKind::System => WireMessageKind::System,
        },
        created_at: message.created_at,
        is_read: message.is_read,
        read_at: message.read_at,
    }
}

/// Relay copy of a wire message; `seq` stays 0 since the relay path never
/// touches the store.
fn chat_from_wire(message: &WireMessage, conversation: ConversationId) -> ChatMessage {
    ChatMessage {
        id: message.id,
        seq: 0,
        conversation,
        sender_id: message.sender_id.clone(),
        recipient_id: message.recipient_id.clone(),
        content: message.content.clone(),
        kind: match message.kind {
            WireMessageKind::Text => MessageKind::Text,
            WireMessageKind::Attachment => MessageKind::Attachment,
            WireMessageKind::System => MessageKind::System,
        },
        created_at: message.created_at,
        is_read: message.is_read,
        read_at: message.read_at,
    }
}

/// Convert a room event to its outbound frame.
fn relay_to_frame(event: &RelayEvent) -> Frame {
    match &event.kind {
        RelayKind::Message(message) => Frame::new_message(wire_from_chat(message)),
        RelayKind::Typing { user_id, is_typing } => {
            Frame::user_typing(event.conversation.to_string(), user_id.clone(), *is_typing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_chat_roundtrip() {
        let chat = ChatMessage::new("alice", "bob", "hi", MessageKind::Attachment).unwrap();
        let wire = wire_from_chat(&chat);
        assert_eq!(wire.conversation, "alice:bob");

        let back = chat_from_wire(&wire, chat.conversation.clone());
        assert_eq!(back.content, chat.content);
        assert_eq!(back.kind, chat.kind);
        assert_eq!(back.seq, 0);
    }

    #[test]
    fn test_version_gate() {
        assert!(version_supported(PROTOCOL_VERSION.major));
        assert!(!version_supported(PROTOCOL_VERSION.major + 1));
        assert!(!version_supported(0));
    }

    #[test]
    fn test_relay_to_frame_typing() {
        let conversation = ConversationId::for_pair("alice", "bob").unwrap();
        let event = RelayEvent::typing(conversation, "alice", true, None);

        match relay_to_frame(&event) {
            Frame::UserTyping {
                conversation,
                user_id,
                is_typing,
            } => {
                assert_eq!(conversation, "alice:bob");
                assert_eq!(user_id, "alice");
                assert!(is_typing);
            }
            other => panic!("Unexpected frame: {other:?}"),
        }
    }
}
