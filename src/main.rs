use std::sync::Arc;

use vectura::config::Config;
use vectura::db::PgPool;
use vectura::engine::Engine;
use vectura::gateway;
use vectura::registry::ConnectionRegistry;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env().unwrap();

    let PgPool(pool) = PgPool::new(&config.database_url, config.max_connections)
        .await
        .unwrap();

    let registry = Arc::new(ConnectionRegistry::new(pool.clone()));
    let engine = Engine::new(pool, registry.clone()).await.unwrap();

    gateway::serve(engine, registry, config.listen_addr).await;
}
