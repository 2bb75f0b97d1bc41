// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, process::ExitCode, time::Duration};

use axum_server::Handle;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use grading_auth_server::{
    api::router,
    clock,
    config::{LogFormat, Settings},
    state::AppState,
    sweeper::{RateWindowSweeper, SessionSweeper},
    tls::load_rustls_config,
};

/// Time allowed for in-flight requests after a shutdown signal.
const GRACE_PERIOD: Duration = Duration::from_secs(10);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received, starting graceful shutdown"),
        _ = terminate => info!("SIGTERM received, starting graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(settings.log_format);

    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        error!("Failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    let addr: SocketAddr = match settings.bind_address().parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(address = %settings.bind_address(), error = %e, "Failed to parse bind address");
            return ExitCode::FAILURE;
        }
    };

    let tls = match settings.tls.as_ref().map(load_rustls_config).transpose() {
        Ok(tls) => tls,
        Err(e) => {
            error!(error = %e, "Failed to load TLS credentials");
            return ExitCode::FAILURE;
        }
    };

    let token_sweep_interval = settings.token_sweep_interval;
    let rate_sweep_interval = settings.rate_limit_sweep_interval;
    let rate_idle = settings.rate_limit_idle;

    let state = match AppState::from_settings(settings, clock::system()) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to initialise application state");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let session_sweeper = tokio::spawn(
        SessionSweeper::new(state.sessions.clone(), state.clock.clone())
            .with_interval(token_sweep_interval)
            .run(shutdown.clone()),
    );
    let rate_sweeper = tokio::spawn(
        RateWindowSweeper::new(state.limiter.clone(), rate_idle)
            .with_interval(rate_sweep_interval)
            .run(shutdown.clone()),
    );

    let handle = Handle::<SocketAddr>::new();
    tokio::spawn({
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
            handle.graceful_shutdown(Some(GRACE_PERIOD));
        }
    });

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let served = match tls {
        Some(tls) => {
            info!(%addr, "Auth server listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app)
                .await
        }
        None => {
            info!(%addr, "Auth server listening on http (docs at /docs)");
            axum_server::bind(addr).handle(handle).serve(app).await
        }
    };

    shutdown.cancel();
    let _ = tokio::join!(session_sweeper, rate_sweeper);

    match served {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
