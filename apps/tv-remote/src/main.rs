use std::{net::SocketAddr, sync::Arc};

use adb_broker::AdbServerBroker;
use tracing::{info, warn};
use tv_remote::config::AppConfig;
use tv_remote::device::session::sweep_interval;
use tv_remote::metrics;
use tv_remote::routes::build_router;
use tv_remote::state::AppState;
use tv_remote::telemetry::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cfg = AppConfig::from_env()?;
    init_tracing(&cfg.log_filter(), cfg.debug)?;

    if cfg.uses_default_secret() {
        warn!("SECRET_KEY not set; session cookies are signed with the development key");
    }
    let allow_list = cfg.allow_list();
    if allow_list.is_empty() {
        warn!("ALLOWED_EMAILS is empty; every login will be rejected");
    }
    if cfg.google_client_id.is_none() || cfg.google_client_secret.is_none() {
        warn!("GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET not set; login is disabled");
    }

    let broker = AdbServerBroker::new(cfg.adb_server_addr.clone(), cfg.broker_timeout());
    let state = AppState::new(&cfg, Arc::new(broker));

    let _sweeper = cfg
        .device_idle_ttl()
        .map(|ttl| state.sessions().spawn_idle_sweeper(ttl, sweep_interval(ttl)));

    let app = build_router(state);
    let addr: SocketAddr = cfg.bind_addr.parse()?;

    info!(
        addr = %addr,
        device = %cfg.device_endpoint(),
        adb_server = %cfg.adb_server_addr,
        allowed_emails = allow_list.len(),
        debug = cfg.debug,
        build = env!("TV_REMOTE_BUILD_ID"),
        profile = env!("TV_REMOTE_BUILD_PROFILE"),
        "starting tv-remote"
    );
    metrics::BOOT_COUNTER.inc();

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("tv-remote stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
