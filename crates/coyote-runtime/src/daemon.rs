//! Daemon wiring: config, presets, controller, UDS server, signals.

use std::sync::Arc;

use coyote_core::PresetRegistry;
use coyote_session::{Controller, SessionManager};

use crate::cli::DaemonOpts;
use crate::config::Config;
use crate::server;

#[cfg(feature = "dglab")]
type Transport = coyote_dglab::DgLabTransport;
#[cfg(not(feature = "dglab"))]
type Transport = coyote_session::Unavailable;

fn transport() -> Option<Transport> {
    #[cfg(feature = "dglab")]
    {
        Some(coyote_dglab::DgLabTransport)
    }
    #[cfg(not(feature = "dglab"))]
    {
        None
    }
}

/// Apply CLI overrides on top of the loaded file.
pub(crate) fn apply_overrides(config: &mut Config, opts: &DaemonOpts) {
    if let Some(uri) = &opts.server_uri {
        config.connection.server_uri = uri.clone();
    }
    if let Some(dir) = &opts.pulse_dir {
        config.connection.pulse_dir = dir.clone();
    }
}

pub(crate) fn load_presets(config: &Config) -> PresetRegistry {
    let mut presets = PresetRegistry::with_builtins();
    let dir = config.pulse_dir();
    let loaded = presets.load_dir(&dir);
    tracing::info!(dir = %dir.display(), loaded, total = presets.len(), "presets loaded");
    presets
}

/// Run the daemon: builds the controller, starts the UDS server, waits for
/// shutdown signal, then tears the session down.
pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let mut config = Config::load(&opts.config)?;
    apply_overrides(&mut config, &opts);

    let settings = config.control_settings();
    if let Err(e) = settings.resolve_identity(None) {
        tracing::warn!(error = %e, "configured endpoint is not usable, connect needs an explicit endpoint");
    }

    let manager = SessionManager::with_transport(transport());
    if !manager.is_available() {
        tracing::warn!("built without the DG-LAB transport, control calls will fail");
    }
    let controller = Arc::new(Controller::new(manager, settings, load_presets(&config)));

    // Start UDS server
    let server_controller = Arc::clone(&controller);
    let server_socket = socket_path.to_string();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_controller).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                },
                Err(e) => {
                    tracing::warn!("cannot register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    controller.shutdown().await;

    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}
