//! Per-connection message router.
//!
//! Each live socket is one actor that owns the read loop, the heartbeat
//! watchdog, and exactly-once teardown. Frame dispatch policy lives in
//! `route_frame`, separate from the actor, where it can be tested without a
//! running socket.

use std::time::Instant;

use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web_actors::ws;
use actix_web_actors::ws::{CloseCode, CloseReason};

use super::broadcast;
use super::message_types::{decode_frame, SystemAction, WsInboundEvent, WsOutboundEvent};
use super::{ConnectionId, RoomId, UserId};
use crate::state::AppState;

/// Outbound frame relayed from the registry channel into the actor mailbox.
#[derive(ActixMessage)]
#[rtype(result = "()")]
pub struct OutboundFrame(pub String);

/// Where a decoded frame goes.
#[derive(Debug, PartialEq)]
enum Dispatch {
    Reply(WsOutboundEvent),
    Room(RoomId, WsOutboundEvent),
    All(WsOutboundEvent),
}

/// Dispatch policy for one inbound frame.
///
/// `chat` and `typing` are only available to room-scoped connections;
/// `broadcast` requires an identity. Violations are answered with an `error`
/// frame and never touch the registry.
fn route_frame(raw: &str, user_id: Option<&UserId>, room_id: Option<&RoomId>) -> Dispatch {
    let event = match decode_frame(raw) {
        Ok(event) => event,
        Err(e) => return Dispatch::Reply(e.to_event()),
    };

    match event {
        WsInboundEvent::Ping => Dispatch::Reply(WsOutboundEvent::Pong),

        WsInboundEvent::Chat { content, timestamp } => match (user_id, room_id) {
            (Some(user), Some(room)) => Dispatch::Room(
                room.clone(),
                WsOutboundEvent::Chat {
                    sender: user.clone(),
                    content,
                    room_id: room.clone(),
                    timestamp,
                },
            ),
            _ => Dispatch::Reply(WsOutboundEvent::Error {
                message: "chat is only available on room connections".to_string(),
            }),
        },

        WsInboundEvent::Typing => match (user_id, room_id) {
            (Some(user), Some(room)) => Dispatch::Room(
                room.clone(),
                WsOutboundEvent::Typing {
                    user_id: user.clone(),
                    room_id: room.clone(),
                },
            ),
            _ => Dispatch::Reply(WsOutboundEvent::Error {
                message: "typing is only available on room connections".to_string(),
            }),
        },

        WsInboundEvent::Broadcast { content, timestamp } => match user_id {
            Some(user) => Dispatch::All(WsOutboundEvent::Message {
                sender: user.clone(),
                content,
                timestamp,
            }),
            None => Dispatch::Reply(WsOutboundEvent::Error {
                message: "broadcast requires an authenticated connection".to_string(),
            }),
        },
    }
}

// WebSocket session actor
pub struct WsSession {
    connection_id: ConnectionId,
    user_id: Option<UserId>,
    room_id: Option<RoomId>,
    state: AppState,
    hb: Instant,
}

impl WsSession {
    pub fn new(
        connection_id: ConnectionId,
        user_id: Option<UserId>,
        room_id: Option<RoomId>,
        state: AppState,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            room_id,
            state,
            hb: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.state.config.heartbeat.client_timeout;
        ctx.run_interval(self.state.config.heartbeat.interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(
                    connection = %act.connection_id,
                    "heartbeat timed out, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn reply(&self, event: &WsOutboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(event) {
            Ok(frame) => ctx.text(frame),
            Err(e) => tracing::error!(error = %e, "failed to encode reply frame"),
        }
    }

    fn dispatch(&self, raw: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match route_frame(raw, self.user_id.as_ref(), self.room_id.as_ref()) {
            Dispatch::Reply(event) => self.reply(&event, ctx),
            Dispatch::Room(room, event) => {
                let registry = self.state.registry.clone();
                actix::spawn(async move {
                    broadcast::send_to_room(&registry, &room, &event).await;
                });
            }
            Dispatch::All(event) => {
                let registry = self.state.registry.clone();
                actix::spawn(async move {
                    broadcast::send_to_all(&registry, &event).await;
                });
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            connection = %self.connection_id,
            user = ?self.user_id,
            room = ?self.room_id,
            "websocket session started"
        );
        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(connection = %self.connection_id, "websocket session stopped");

        let registry = self.state.registry.clone();
        let id = self.connection_id;

        actix::spawn(async move {
            // Only the call that actually removes the registration announces
            // the departure; other exit paths find nothing to do.
            let Some(registration) = registry.unregister(id).await else {
                return;
            };

            if let Some(user) = registration.user_id {
                for room in registration.rooms {
                    let event = WsOutboundEvent::System {
                        action: SystemAction::Leave,
                        user_id: user.clone(),
                        room_id: room.clone(),
                        timestamp: chrono::Utc::now().to_rfc3339(),
                    };
                    broadcast::send_to_room(&registry, &room, &event).await;
                }
            }
        });
    }
}

impl Handler<OutboundFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => self.dispatch(&text, ctx),
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!(
                    connection = %self.connection_id,
                    "binary frames not supported"
                );
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(connection = %self.connection_id, error = %e, "websocket read error");
                ctx.stop();
            }
        }
    }
}

/// Session that never enters the open state: the handshake completed but the
/// credential was rejected, so the socket closes immediately with a policy
/// violation code.
pub struct Rejected;

impl Actor for Rejected {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.close(Some(CloseReason {
            code: CloseCode::Policy,
            description: Some("authentication failed".to_string()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for Rejected {
    fn handle(&mut self, _msg: Result<ws::Message, ws::ProtocolError>, _ctx: &mut Self::Context) {}
}
