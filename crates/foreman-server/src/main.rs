mod knowledge;
mod log_store;
mod memory;
mod paths;
mod platform;
mod port_reaper;
mod process_manager;
mod protocol;
mod readiness;
mod response_log;
mod server;
mod tools;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Supervisor logs go to stderr and a per-run file; stdout belongs to
    // the JSON-RPC transport.
    let log_dir = paths::logs_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_name = format!("foreman_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
    let file_appender = tracing_appender::rolling::never(&log_dir, log_name);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();
    let _file_guard = file_guard;

    tracing::info!(version = protocol::SERVER_VERSION, "foreman supervisor starting");

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let manager = process_manager::ProcessManager::with_shutdown(shutdown.child_token());
    let tools = std::sync::Arc::new(tools::Tools::new(manager));

    server::run(&tools, shutdown).await?;

    // Children never outlive the supervisor; each terminate runs under its
    // own bounded timeouts.
    tools.shutdown().await;
    tracing::info!("foreman supervisor stopped");
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(err) => {
                    tracing::error!(%err, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
                _ = term.recv() => tracing::info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received ctrl-c");
        }
        shutdown.cancel();
    });
}
