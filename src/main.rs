use caddy_proxy_manager::api::ApiServer;
use caddy_proxy_manager::auth::{AuthConfig, AuthManager};
use caddy_proxy_manager::caddy::CaddyClient;
use caddy_proxy_manager::config::Config;
use caddy_proxy_manager::db::Database;
use caddy_proxy_manager::remote::RemoteServerService;
use caddy_proxy_manager::service::HostService;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("caddy_proxy_manager=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        path = %config_path.display(),
        caddy = %config.caddy.admin_url,
        data_dir = %config.server.data_dir,
        "Configuration loaded"
    );

    let db = Arc::new(Database::open(config.server.database_path())?);
    let client = Arc::new(CaddyClient::new(&config.caddy.admin_url)?);
    let servers = Arc::new(RemoteServerService::new(Arc::clone(&db)));
    let service = Arc::new(HostService::new(db, client));

    if config.server.sync_on_startup {
        service.sync_on_startup().await;
    }

    // Generate or use configured admin token
    let admin_token = config.server.admin_token.clone().unwrap_or_else(|| {
        let token = uuid::Uuid::new_v4().to_string();
        info!(token = %token, "Generated admin API token (configure admin_token to set a fixed value)");
        token
    });

    let auth = AuthManager::new(AuthConfig {
        secret: config
            .server
            .jwt_secret
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        admin_token,
        token_expiry_hours: config.server.token_expiry_hours,
    });

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api = Arc::new(ApiServer::new(bind_addr, service, servers, auth, shutdown_rx));
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api.run().await {
            error!(error = %e, "Admin API error");
        }
    });

    wait_for_shutdown().await?;

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(Duration::from_secs(5), api_handle).await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}
