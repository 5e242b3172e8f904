use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use mistduel_server::config::ServerConfig;
use mistduel_server::location::StaticLocationPool;
use mistduel_server::profile::InMemoryProfiles;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("MISTDUEL_LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServerConfig::load();
    config.validate();

    let locations = match StaticLocationPool::load(config.locations.file.as_deref()) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to load locations: {e}");
            std::process::exit(1);
        },
    };
    tracing::info!(locations = locations.len(), "Location pool ready");

    let addr = config.listen_addr.clone();
    let (app, state) = mistduel_server::build_app_with(
        config,
        Arc::new(locations),
        Arc::new(InMemoryProfiles::new()),
    );
    mistduel_server::spawn_janitor(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        },
    };
    tracing::info!("mistduel server listening on {addr}");

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}
