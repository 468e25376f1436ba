use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keepsake_api::auth::tokens::TokenVerifier;
use keepsake_api::config::Config;
use keepsake_api::db::kv::{RedisStore, SetStore};
use keepsake_api::db::users::{PgUserDirectory, UserDirectory};
use keepsake_api::gateway::layer::{GroupLayer, InMemoryLayer};
use keepsake_api::gateway::notify::Notifier;
use keepsake_api::gateway::presence::Presence;
use keepsake_api::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let db = keepsake_api::db::pool::connect(&config.database_url)?;
    let users: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(db));

    // Connects on first use.
    let store: Arc<dyn SetStore> = Arc::new(RedisStore::new(config.redis_url.clone()));
    let presence = Presence::new(store, config.presence_ttl_secs);

    let layer = Arc::new(InMemoryLayer::new());
    let group_layer: Arc<dyn GroupLayer> = layer.clone();

    tracing::info!(
        presence_ttl_secs = config.presence_ttl_secs,
        heartbeat_interval_ms = config.heartbeat_interval.as_millis() as u64,
        heartbeat_timeout_ms = config.heartbeat_timeout.map(|t| t.as_millis() as u64),
        max_frame_bytes = config.max_frame_bytes,
        "keepsake-api configured"
    );

    let state = AppState {
        users,
        presence: presence.clone(),
        layer: group_layer.clone(),
        notifier: Notifier::new(group_layer),
        tokens: TokenVerifier::new(&config.secret_key),
        config: Arc::new(config),
    };

    let app = keepsake_api::routes::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "keepsake-api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Ends every open connection's inbox, then drop the store connection.
    layer.close();
    presence.close().await;
    tracing::info!("keepsake-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
