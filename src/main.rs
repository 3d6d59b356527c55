use actix_web::{web, App, HttpServer};
use std::sync::Arc;

use realtime_gateway_service::{
    config::Config,
    error::AppError,
    logging, middleware, routes,
    services::identity::{IdentityResolver, JwtIdentityResolver},
    state::AppState,
    websocket::ConnectionRegistry,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);

    let registry = ConnectionRegistry::new();
    let identity: Arc<dyn IdentityResolver> =
        Arc::new(JwtIdentityResolver::from_secret(cfg.jwt_secret.as_bytes()));

    let state = AppState {
        registry,
        identity,
        config: cfg.clone(),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting realtime-gateway-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::RequestId::new())
            .wrap(middleware::Logging)
            .app_data(web::Data::new(state.clone()))
            .service(routes::wsroute::ws_handler)
            .service(routes::wsroute::chat_ws_handler)
            .service(routes::presence::get_rooms)
            .service(routes::presence::get_room_users)
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("run: {e}")))
}
