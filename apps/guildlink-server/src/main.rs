use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use guildlink_sync::directory::JellyfinDirectory;
use guildlink_sync::providers::{
    ConnectionStatus, DiscordOAuthProvider, GuildConnection, GuildMembershipProvider, GuildSettings,
};
use guildlink_sync::services::{
    run_migrations, ChannelEventSource, EventDispatcher, LoginStateSigner, PermissionPolicy,
    PostgresLinkStore, ReconciliationEngine,
};
use guildlink_sync::{sync_router, SyncConfig, SyncState};

/// How often a dropped guild connection is retried.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(60);

/// Buffered events between the relay endpoint and the dispatcher.
const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,guildlink_sync=debug")),
        )
        .init();

    let config = SyncConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });

    info!(
        listen_addr = %config.listen_addr,
        gating_enabled = config.discord.gating_enabled(),
        admin_role = %config.roles.admin_role_name,
        default_roles = config.roles.default_role_ids.len(),
        "starting guildlink server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Database connection error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = run_migrations(&pool).await {
        eprintln!("Migration error: {e}");
        std::process::exit(1);
    }

    let connection = Arc::new(GuildConnection::new(GuildSettings::from_config(&config.discord)));
    if let Err(e) = connection.connect().await {
        warn!(error = %e, "Discord connection failed, will retry");
    }
    tokio::spawn(supervise_connection(Arc::clone(&connection)));

    let http_client = reqwest_client(config.request_timeout);
    let engine = ReconciliationEngine::new(
        Arc::new(DiscordOAuthProvider::new(
            config.discord.client_id.clone(),
            config.discord.client_secret.clone(),
            config.discord.api_base.clone(),
        )),
        Arc::new(GuildMembershipProvider::new(Arc::clone(&connection))),
        Arc::new(JellyfinDirectory::with_client(
            config.jellyfin_url.clone(),
            config.jellyfin_api_key.clone(),
            http_client,
        )),
        Arc::new(PostgresLinkStore::new(pool)),
        PermissionPolicy::new(config.roles.admin_role_name.clone()),
    );

    let dispatcher = EventDispatcher::new(
        engine,
        config.roles.default_role_ids.clone(),
        config.lane_idle_timeout,
    );
    let (events, source) = ChannelEventSource::channel(EVENT_BUFFER);
    let runner = dispatcher.clone();
    tokio::spawn(async move { runner.run(source).await });

    let state = SyncState {
        dispatcher: dispatcher.clone(),
        login_state: LoginStateSigner::new(&config.state_secret),
        connection: Arc::clone(&connection),
        events,
        redirect_uri: config.redirect_uri(),
        request_timeout: config.request_timeout,
        event_relay_token: config.event_relay_token.clone(),
    };
    let app = sync_router(state);

    let listen_addr = config.listen_addr;
    let listener = match tokio::net::TcpListener::bind(listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to address {listen_addr}: {e}");
            std::process::exit(1);
        }
    };
    info!(%listen_addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }

    dispatcher.shutdown();
    connection.shutdown();
    info!("Server shutdown complete");
}

fn reqwest_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            eprintln!("HTTP client error: {e}");
            std::process::exit(1);
        })
}

/// Retry the guild connection whenever it is down.
async fn supervise_connection(connection: Arc<GuildConnection>) {
    let mut ticker = tokio::time::interval(RECONNECT_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match connection.status() {
            ConnectionStatus::Shutdown => break,
            ConnectionStatus::Connected { .. } => {}
            ConnectionStatus::Disconnected => {
                if let Err(e) = connection.reconnect(None).await {
                    warn!(error = %e, "Discord reconnect failed");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
