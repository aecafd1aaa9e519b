pub mod events;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Extension},
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::api::{DynAPI, API};
use crate::registry::ConnectionRegistry;

pub async fn serve<T: API + Send + Sync + 'static>(
    api: T,
    registry: Arc<ConnectionRegistry>,
    addr: SocketAddr,
) {
    tokio::spawn(registry.clone().run_listener());

    let api = Arc::new(api) as DynAPI;

    let app = Router::new()
        .route("/", get(root))
        .route("/ws", get(upgrade))
        .layer(Extension(api))
        .layer(Extension(registry));

    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}

async fn root() -> &'static str {
    "Hello, World!"
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Extension(api): Extension<DynAPI>,
    Extension(registry): Extension<Arc<ConnectionRegistry>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, api, registry))
}
