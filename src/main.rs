// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use kube::Client;
use nfs_provisioner::{
    config::{ProvisionerConfig, Settings},
    constants::TOKIO_WORKER_THREADS,
    controller::{run_claim_controller, run_volume_controller, ControllerContext},
    hooks::HookEngine,
    provisioner::Provisioner,
    store::{ClusterStore, KubeStore},
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Output format of the log subscriber, from `RUST_LOG_FORMAT`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

fn main() -> Result<()> {
    let settings = Settings::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("nfs-provisioner")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(settings))
}

/// Initialize logging
///
/// Respects `RUST_LOG` (default `info`) and `RUST_LOG_FORMAT` (`json` or `text`)
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = LogFormat::from_env_value(std::env::var("RUST_LOG_FORMAT").ok().as_deref());

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(settings: Settings) -> Result<()> {
    init_tracing();

    info!("Starting NFS provisioner");

    let config = Arc::new(ProvisionerConfig::try_from(settings)?);
    info!(
        provisioner = %config.provisioner_name,
        namespace = %config.namespace,
        server_image = %config.server_image,
        use_cluster_ip = config.use_cluster_ip,
        gc_interval_secs = config.gc_interval.as_secs(),
        "Configuration loaded"
    );

    let hooks = match &config.hooks_path {
        Some(path) => HookEngine::load(path).await?,
        None => HookEngine::default(),
    };

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let store: Arc<dyn ClusterStore> = Arc::new(KubeStore::new(client.clone()));
    let provisioner = Arc::new(Provisioner::new(
        store.clone(),
        Arc::new(hooks),
        config.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gc = Arc::new(provisioner.garbage_collector());
    let gc_handle = tokio::spawn(gc.run(shutdown_rx));

    let ctx = Arc::new(ControllerContext::new(store, provisioner));

    info!("Starting all controllers");

    // Controllers should never exit; if one does, shut down the process
    let result = tokio::select! {
        result = run_claim_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: PersistentVolumeClaim controller exited unexpectedly: {:?}", result);
            result.and_then(|()| {
                Err(anyhow::anyhow!("PersistentVolumeClaim controller exited unexpectedly without error"))
            })
        }
        result = run_volume_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: PersistentVolume controller exited unexpectedly: {:?}", result);
            result.and_then(|()| {
                Err(anyhow::anyhow!("PersistentVolume controller exited unexpectedly without error"))
            })
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    // Receiver may already be gone if the collector task panicked
    let _ = shutdown_tx.send(true);
    if let Err(e) = gc_handle.await {
        error!("Garbage collector task failed: {}", e);
    }

    info!("NFS provisioner stopped");
    result
}

/// Resolves on SIGINT, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
