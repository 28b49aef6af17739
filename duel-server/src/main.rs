use std::net::IpAddr;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use duel_server::config::Config;
use duel_server::{ServerState, create_routes};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(environment = %config.environment, "starting word-duel server");

    let host: IpAddr = match config.host.parse() {
        Ok(host) => host,
        Err(e) => {
            error!(host = %config.host, error = %e, "invalid HOST");
            std::process::exit(1);
        }
    };
    let port = config.port;
    let shutdown_timeout = config.shutdown_timeout;

    let (state, hub_receivers) = match ServerState::new(config) {
        Ok(built) => built,
        Err(e) => {
            error!(error = %e, "failed to initialize server state");
            std::process::exit(1);
        }
    };

    info!(
        targets = state.dictionary.target_count(),
        valid = state.dictionary.valid_count(),
        "dictionary loaded"
    );

    state.spawn_dispatcher(hub_receivers);
    state.admission.start_sweeper();
    state.reaper.start().await;

    let routes = create_routes(state.clone());

    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();
    let (addr, server) =
        warp::serve(routes).bind_with_graceful_shutdown((host, port), async move {
            wait_for_signal().await;
            let _ = signal_tx.send(());
        });

    info!(%addr, "server started, press Ctrl+C to stop");

    let server_handle = tokio::spawn(server);

    // Once the signal fires, active requests get the shutdown budget to
    // drain before the process exits anyway
    let _ = signal_rx.await;
    if tokio::time::timeout(shutdown_timeout, server_handle)
        .await
        .is_err()
    {
        error!("shutdown grace period expired, exiting");
    }

    state.reaper.stop().await;
    info!("server shutdown complete");
}

async fn wait_for_signal() {
    // Wait for SIGINT (Ctrl+C) or SIGTERM
    #[cfg(unix)]
    {
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("failed to install SIGINT handler");
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down gracefully...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
        info!("received Ctrl+C, shutting down gracefully...");
    }
}
