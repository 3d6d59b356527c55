use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;

use crate::middleware::auth::bearer_token;
use crate::state::AppState;
use crate::websocket::broadcast;
use crate::websocket::message_types::{SystemAction, WsOutboundEvent};
use crate::websocket::session::{OutboundFrame, Rejected, WsSession};
use crate::websocket::{RoomId, UserId};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Credential from the query string, falling back to the Authorization
/// header (browser clients can only use the former).
fn credential(params: &WsParams, req: &HttpRequest) -> Option<String> {
    params.token.clone().or_else(|| bearer_token(req))
}

/// Complete the handshake, then close with a policy-violation code. The
/// client sees a proper close frame, not a failed upgrade.
fn reject(req: &HttpRequest, stream: web::Payload) -> Result<HttpResponse, Error> {
    ws::start(Rejected, req, stream)
}

/// Register the connection, start its session actor, and bridge the
/// registry's outbound channel into the actor mailbox.
async fn open_session(
    req: &HttpRequest,
    stream: web::Payload,
    state: &AppState,
    user_id: Option<UserId>,
    room_id: Option<RoomId>,
) -> Result<HttpResponse, Error> {
    let rooms = room_id.clone().into_iter().collect();
    let (connection_id, mut rx) = state.registry.register(user_id.clone(), rooms).await;

    let session = WsSession::new(connection_id, user_id, room_id, state.clone());
    let (addr, resp) = match ws::WsResponseBuilder::new(session, req, stream).start_with_addr() {
        Ok(pair) => pair,
        Err(e) => {
            // the session never started, so its teardown will not run
            state.registry.unregister(connection_id).await;
            return Err(e);
        }
    };

    // The forwarding task ends when the registry drops the send half at
    // unregister time.
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            addr.do_send(OutboundFrame(frame));
        }
    });

    Ok(resp)
}

/// Generic endpoint: identity optional. Anonymous connections may ping, but
/// broadcast is rejected and room messaging needs the room-scoped endpoint.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let params = query.into_inner();

    let user_id = match credential(&params, &req) {
        None => None,
        Some(token) => match state.identity.resolve(&token).await {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                tracing::warn!(error = %e, "websocket connection rejected: invalid credential");
                return reject(&req, stream);
            }
        },
    };

    open_session(&req, stream, &state, user_id, None).await
}

/// Room-scoped endpoint: identity mandatory; the connection joins the room
/// for its whole lifetime and the room is told about it.
#[get("/ws/chat/{room_id}")]
pub async fn chat_ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let room_id = RoomId::from(path.into_inner());
    let params = query.into_inner();

    let Some(token) = credential(&params, &req) else {
        tracing::warn!(room = %room_id, "websocket connection rejected: room endpoint requires a credential");
        return reject(&req, stream);
    };

    let user_id = match state.identity.resolve(&token).await {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(room = %room_id, error = %e, "websocket connection rejected: invalid credential");
            return reject(&req, stream);
        }
    };

    let resp = open_session(
        &req,
        stream,
        &state,
        Some(user_id.clone()),
        Some(room_id.clone()),
    )
    .await?;

    let event = WsOutboundEvent::System {
        action: SystemAction::Join,
        user_id,
        room_id: room_id.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    broadcast::send_to_room(&state.registry, &room_id, &event).await;

    Ok(resp)
}
