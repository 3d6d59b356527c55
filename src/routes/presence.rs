//! Presence queries over the membership index, safe to call from any
//! request-handling code while connections churn.

use actix_web::{get, web, HttpResponse};
use serde::Serialize;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::state::AppState;
use crate::websocket::{RoomId, UserId};

#[derive(Debug, Serialize)]
struct RoomsResponse {
    rooms: Vec<RoomId>,
}

#[derive(Debug, Serialize)]
struct RoomUsersResponse {
    users: Vec<UserId>,
}

/// Rooms the calling user currently has an open connection in.
#[get("/chat/rooms")]
pub async fn get_rooms(
    user: AuthUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let rooms = state.registry.rooms_of(&user.id).await;
    Ok(HttpResponse::Ok().json(RoomsResponse { rooms }))
}

/// Users currently present in one room.
#[get("/chat/rooms/{room_id}/users")]
pub async fn get_room_users(
    _user: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let room_id = RoomId::from(path.into_inner());
    let users = state.registry.users_of(&room_id).await;
    Ok(HttpResponse::Ok().json(RoomUsersResponse { users }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, HeartbeatConfig};
    use crate::services::identity::IdentityResolver;
    use crate::websocket::ConnectionRegistry;
    use actix_web::{test, App};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StaticResolver;

    #[async_trait]
    impl IdentityResolver for StaticResolver {
        async fn resolve(&self, credential: &str) -> Result<UserId, AppError> {
            if credential == "valid-token" {
                Ok(UserId::from("u1"))
            } else {
                Err(AppError::Unauthorized)
            }
        }
    }

    fn test_state() -> AppState {
        AppState {
            registry: ConnectionRegistry::new(),
            identity: Arc::new(StaticResolver),
            config: Arc::new(Config {
                port: 0,
                jwt_secret: "test".to_string(),
                heartbeat: HeartbeatConfig::new(5, 30).expect("test heartbeat config"),
            }),
        }
    }

    #[actix_web::test]
    async fn test_rooms_query_requires_auth() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(get_rooms),
        )
        .await;

        let req = test::TestRequest::get().uri("/chat/rooms").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 401);

        let app2 = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state()))
                .service(get_rooms),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/chat/rooms")
            .insert_header(("Authorization", "Bearer wrong"))
            .to_request();
        let resp = test::call_service(&app2, req).await;
        assert_eq!(resp.status().as_u16(), 401);
    }

    #[actix_web::test]
    async fn test_queries_reflect_live_membership() {
        let state = test_state();
        let (_id, _rx) = state
            .registry
            .register(Some(UserId::from("u1")), vec![RoomId::from("r1")])
            .await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(get_rooms)
                .service(get_room_users),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/chat/rooms")
            .insert_header(("Authorization", "Bearer valid-token"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["rooms"], serde_json::json!(["r1"]));

        let req = test::TestRequest::get()
            .uri("/chat/rooms/r1/users")
            .insert_header(("Authorization", "Bearer valid-token"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["users"], serde_json::json!(["u1"]));
    }
}
