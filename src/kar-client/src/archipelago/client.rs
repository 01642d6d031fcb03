//! Archipelago session loop
//!
//! Keeps a WebSocket connection to the server, feeds inbound items and
//! deaths into the shared [`SessionContext`], and flushes the context's
//! outbox whenever the sampling loop signals new events.

use super::protocol::{
    self, ClientPacket, DataStorageOperation, NetworkVersion, ServerPacket, CLIENT_GOAL,
    DEATH_LINK_TAG, GAME_NAME, ITEMS_HANDLING_ALL, WATERMARK_KEY,
};
use crate::sync::SharedContext;
use futures_util::{SinkExt, StreamExt};
use kar_bridge::{
    ConnectionStatus, DeathEvent, Intake, ItemApplyEngine, OutboundEvent, PatchKind, ReceivedItem,
    SessionContext,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session disconnected")]
    Disconnected,

    #[error("Connection refused by server: {}", .0.join(", "))]
    Refused(Vec<String>),

    #[error("WebSocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bounded exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt; doubles up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub url: String,
    pub slot: String,
    pub password: Option<String>,
    /// DeathLink forced on from the command line
    pub force_death_link: bool,
    pub backoff: Backoff,
}

/// Protocol state for one connection
pub struct SessionState {
    slot: String,
    password: Option<String>,
    uuid: String,
    force_death_link: bool,
    engine: ItemApplyEngine,
    connected: bool,
    /// DeathLink tag as last announced to the server
    announced_death_link: bool,
    mirrored_watermark: u64,
}

impl SessionState {
    pub fn new(settings: &SessionSettings, engine: ItemApplyEngine, uuid: &str) -> Self {
        Self {
            slot: settings.slot.clone(),
            password: settings.password.clone(),
            uuid: uuid.to_string(),
            force_death_link: settings.force_death_link,
            engine,
            connected: false,
            announced_death_link: false,
            mirrored_watermark: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn tags(death_link: bool) -> Vec<String> {
        if death_link {
            vec![DEATH_LINK_TAG.to_string()]
        } else {
            Vec::new()
        }
    }

    /// React to one server packet; returns packets to send back
    pub fn handle(
        &mut self,
        packet: ServerPacket,
        ctx: &mut SessionContext,
    ) -> Result<Vec<ClientPacket>, SessionError> {
        if let Some(text) = packet.text() {
            info!(target: "kar_client::server", "{}", text);
        }

        match packet {
            ServerPacket::RoomInfo { seed_name, .. } => {
                info!(
                    seed = seed_name.as_deref().unwrap_or("?"),
                    "room info received, connecting slot"
                );
                self.announced_death_link = ctx.death_link;
                Ok(vec![ClientPacket::Connect {
                    password: self.password.clone().unwrap_or_default(),
                    game: GAME_NAME.to_string(),
                    name: self.slot.clone(),
                    uuid: self.uuid.clone(),
                    version: NetworkVersion::CLIENT,
                    items_handling: ITEMS_HANDLING_ALL,
                    tags: Self::tags(ctx.death_link),
                    slot_data: true,
                }])
            }

            ServerPacket::Connected {
                team,
                slot,
                checked_locations,
                slot_data,
            } => {
                info!(team, slot, server_checked = checked_locations.len(), "slot connected");
                self.connected = true;
                ctx.connection = ConnectionStatus::Connected;
                self.apply_slot_data(&slot_data, ctx);

                // The full resend below covers any checks still in the outbox
                let others: Vec<OutboundEvent> = ctx
                    .drain_outbound()
                    .into_iter()
                    .filter(|e| !matches!(e, OutboundEvent::LocationChecked(_)))
                    .collect();
                for event in others {
                    ctx.push_outbound(event);
                }

                let mut replies = Vec::new();
                let checked: Vec<i64> = ctx.checked_locations().iter().copied().collect();
                if !checked.is_empty() {
                    replies.push(ClientPacket::LocationChecks { locations: checked });
                }
                if ctx.goal.is_reached() {
                    replies.push(ClientPacket::StatusUpdate { status: CLIENT_GOAL });
                }
                replies.extend(self.outbound(ctx));
                Ok(replies)
            }

            ServerPacket::ConnectionRefused { errors } => Err(SessionError::Refused(errors)),

            ServerPacket::ReceivedItems { index, items } => {
                if index == 0 {
                    // Full resync; the watermark decides what was applied already
                    ctx.reset_items();
                }
                for (pos, network_item) in items.iter().enumerate() {
                    let sequence = index + pos as u64 + 1;
                    let item = ReceivedItem::from_code(network_item.item, sequence);
                    if item.kind == PatchKind::Unrecognized {
                        warn!(
                            code = network_item.item,
                            sequence,
                            "unknown item code, acknowledging without effect"
                        );
                    }
                    let intake = self.engine.receive(ctx, item);
                    match intake {
                        Intake::Queued => info!(sequence, item = item.name(), "item received"),
                        other => {
                            debug!(sequence, item = item.name(), intake = ?other, "item not queued")
                        }
                    }
                }
                Ok(Vec::new())
            }

            ServerPacket::Bounced { tags, data } => {
                if tags.iter().any(|t| t == DEATH_LINK_TAG) {
                    self.on_death_link(&data, ctx);
                }
                Ok(Vec::new())
            }

            ServerPacket::PrintJson { .. } | ServerPacket::Unknown => Ok(Vec::new()),
        }
    }

    fn apply_slot_data(&mut self, slot_data: &Value, ctx: &mut SessionContext) {
        if let Some(enabled) = slot_data.get("death_link").and_then(as_flag) {
            ctx.death_link = enabled || self.force_death_link;
            info!(enabled = ctx.death_link, "DeathLink set from slot data");
        }
        if let Some(goal) = slot_data.get("goal").and_then(Value::as_str) {
            let amount = slot_data
                .get("checklist_amount")
                .and_then(Value::as_u64)
                .map(|n| n as usize);
            ctx.goal.set_from_slot_data(goal, amount);
        }
    }

    fn on_death_link(&self, data: &Value, ctx: &mut SessionContext) {
        let source = data.get("source").and_then(Value::as_str).map(str::to_string);
        if source.as_deref() == Some(self.slot.as_str()) {
            debug!("ignoring our own death");
            return;
        }
        if !ctx.death_link {
            debug!(
                source = source.as_deref().unwrap_or("unknown"),
                "DeathLink disabled, ignoring death"
            );
            return;
        }
        let cause = data.get("cause").and_then(Value::as_str).map(str::to_string);
        info!(
            source = source.as_deref().unwrap_or("unknown"),
            cause = cause.as_deref().unwrap_or(""),
            "death received"
        );
        ctx.push_remote_death(DeathEvent::remote(source, cause));
    }

    /// Packets for everything waiting in the outbox.
    ///
    /// Nothing is drained until the slot is connected, so events raised
    /// while offline are sent after the next `Connected`.
    pub fn outbound(&mut self, ctx: &mut SessionContext) -> Vec<ClientPacket> {
        let mut packets = Vec::new();
        if !self.connected {
            return packets;
        }

        if ctx.death_link != self.announced_death_link {
            self.announced_death_link = ctx.death_link;
            packets.push(ClientPacket::ConnectUpdate {
                items_handling: ITEMS_HANDLING_ALL,
                tags: Self::tags(ctx.death_link),
            });
        }

        let mut locations = Vec::new();
        for event in ctx.drain_outbound() {
            match event {
                OutboundEvent::LocationChecked(id) => locations.push(id),
                OutboundEvent::Death(death) => {
                    if ctx.death_link {
                        packets.push(self.death_bounce(&death));
                    }
                }
                OutboundEvent::Goal => {
                    packets.push(ClientPacket::StatusUpdate { status: CLIENT_GOAL })
                }
            }
        }
        if !locations.is_empty() {
            debug!(?locations, "sending location checks");
            packets.insert(0, ClientPacket::LocationChecks { locations });
        }

        let watermark = ctx.watermark();
        if watermark > self.mirrored_watermark {
            self.mirrored_watermark = watermark;
            packets.push(ClientPacket::Set {
                key: WATERMARK_KEY.to_string(),
                default: json!(0),
                want_reply: false,
                operations: vec![DataStorageOperation {
                    operation: "replace".to_string(),
                    value: json!(watermark),
                }],
            });
        }

        packets
    }

    fn death_bounce(&self, death: &DeathEvent) -> ClientPacket {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let cause = death
            .cause
            .clone()
            .unwrap_or_else(|| format!("{} exploded.", self.slot));
        ClientPacket::Bounce {
            tags: vec![DEATH_LINK_TAG.to_string()],
            data: json!({
                "time": time,
                "source": self.slot,
                "cause": cause,
            }),
        }
    }
}

/// Slot data options arrive as 0/1 or as booleans depending on the world version
fn as_flag(value: &Value) -> Option<bool> {
    value.as_bool().or_else(|| value.as_u64().map(|n| n != 0))
}

/// Connect, serve, and reconnect until shutdown or a refused login
pub async fn run(
    mut settings: SessionSettings,
    engine: ItemApplyEngine,
    ctx: SharedContext,
    notify: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SessionError> {
    let uuid = uuid::Uuid::new_v4().to_string();
    let mut state = SessionState::new(&settings, engine, &uuid);

    loop {
        if *shutdown.borrow() {
            break;
        }

        ctx.lock().await.connection = ConnectionStatus::Connecting;
        info!(url = %settings.url, "connecting to server");

        match connect_async(settings.url.as_str()).await {
            Ok((socket, _response)) => {
                let result = serve(
                    socket,
                    &mut state,
                    &ctx,
                    &notify,
                    &mut shutdown,
                    &mut settings.backoff,
                )
                .await;
                state.connected = false;
                ctx.lock().await.connection = ConnectionStatus::Disconnected;
                match result {
                    Ok(()) => break,
                    Err(SessionError::Refused(errors)) => return Err(SessionError::Refused(errors)),
                    Err(err) => warn!(error = %err, "server connection lost"),
                }
            }
            Err(err) => {
                ctx.lock().await.connection = ConnectionStatus::Disconnected;
                warn!(error = %err, "failed to connect to server");
            }
        }

        let delay = settings.backoff.next_delay();
        info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(delay) => {}
        }
    }

    ctx.lock().await.connection = ConnectionStatus::Disconnected;
    Ok(())
}

async fn serve(
    socket: Socket,
    state: &mut SessionState,
    ctx: &SharedContext,
    notify: &Notify,
    shutdown: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> Result<(), SessionError> {
    let (mut write, mut read) = socket.split();

    loop {
        let replies = tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = notify.notified() => {
                let mut ctx = ctx.lock().await;
                state.outbound(&mut ctx)
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let packets = protocol::decode(&text)?;
                    let mut ctx = ctx.lock().await;
                    let mut replies = Vec::new();
                    for packet in packets {
                        let was_connected = state.is_connected();
                        replies.extend(state.handle(packet, &mut ctx)?);
                        if !was_connected && state.is_connected() {
                            backoff.reset();
                        }
                    }
                    replies.extend(state.outbound(&mut ctx));
                    replies
                }
                Some(Ok(Message::Close(_))) | None => return Err(SessionError::Disconnected),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            },
        };

        if !replies.is_empty() {
            write.send(Message::Text(protocol::encode(&replies)?)).await?;
        }
    }
}
