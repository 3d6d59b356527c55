//! Bearer-credential handling for the HTTP query surface.
//!
//! WebSocket accepts run their own credential flow in the route because the
//! token may arrive as a query parameter there.

use std::future::Future;
use std::pin::Pin;

use actix_web::{http::header, web, Error, FromRequest, HttpRequest};

use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::UserId;

/// Bearer credential from the Authorization header, if any.
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// An authenticated caller, resolved through the identity boundary.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: UserId,
}

impl FromRequest for AuthUser {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let token = bearer_token(req);

        Box::pin(async move {
            let state = state.ok_or(AppError::Internal)?;
            let token = token.ok_or(AppError::Unauthorized)?;
            let id = state.identity.resolve(&token).await?;
            Ok(AuthUser { id })
        })
    }
}
