use anyhow::Result;
use std::sync::Arc;
use tokio::signal;

use lib_fleet::config;
use lib_fleet::connection::ConnectionManager;
use lib_fleet::dispatch::Dispatcher;
use lib_fleet::logger;
use lib_fleet::notify::{LogNotifier, NotificationRelay};
use lib_fleet::poller::AlertPoller;
use lib_fleet::rest::ApiClient;
use lib_fleet::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    let state = AppState::new();
    let api = Arc::new(ApiClient::new(config.api_base_url(), config.auth_token.clone())?);

    // Fleet listing first: vehicle identity only ever comes from here, the
    // stream can merely update vehicles that already exist.
    if let Some(user_id) = config.user_id.as_deref() {
        match api.load_fleet(user_id).await {
            Ok(fleet) => {
                log::info!("Loaded {} vehicles for user {user_id}", fleet.len());
                state.set_vehicles(fleet);
            }
            Err(e) => log::error!("Fleet bootstrap failed: {e}"),
        }
    } else {
        log::warn!("No user id configured, starting with an empty fleet");
    }

    let relay = NotificationRelay::new(Arc::new(LogNotifier));
    let dispatcher = Dispatcher::new(state.clone(), relay.clone());
    let manager = ConnectionManager::new(config.connection(), state.clone(), dispatcher);
    if let Some(token) = config.auth_token.clone() {
        manager.set_token(token);
    }
    manager.connect();

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let poller = AlertPoller::new(Arc::clone(&api), state.clone(), config.poll_interval());
    let poller_handle = tokio::spawn({
        let shutdown = shutdown_tx.subscribe();
        async move { poller.run(shutdown).await }
    });

    // Surface connection lifecycle transitions in the log.
    let mut status_rx = state.subscribe_status();
    tokio::spawn(async move {
        while let Ok(event) = status_rx.recv().await {
            log::info!("Connection event: {event:?}");
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(_) => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    let _ = shutdown_tx.send(());
    manager.disconnect();
    let _ = poller_handle.await;

    log::info!("Shutdown complete.");
    Ok(())
}
