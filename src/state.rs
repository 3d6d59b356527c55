use crate::{config::Config, services::identity::IdentityResolver, websocket::ConnectionRegistry};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub identity: Arc<dyn IdentityResolver>,
    pub config: Arc<Config>,
}
