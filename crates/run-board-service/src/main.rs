//! # Run-Board Service
//!
//! Binary entry point for the run-board HTTP service.
//!
//! This executable:
//! - Loads configuration from environment and files
//! - Initializes logging per the configured format and level
//! - Wires the webhook pipeline to the configured run store
//! - Starts the HTTP server from run-board-api

use run_board_api::{
    start_server, LogFormat, ServiceConfig, ServiceError, ServiceMetrics, StorageBackend,
};
use run_board_core::{
    FilesystemRunStore, InMemoryRunStore, RelayPolicy, RunIngestor, RunStore,
    SharedSecretVerifier, SignatureVerifier,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // -------------------------------------------------------------------------
    // Load configuration
    //
    // Sources, applied in order; later sources override earlier ones:
    //  1. /etc/run-board/service.yaml      (system-wide defaults)
    //  2. ./config/service.yaml            (deployment-local override)
    //  3. Path given by RB_CONFIG_FILE env (operator-specified file)
    //  4. Environment variables prefixed RB__ (double-underscore separator)
    //     e.g. RB__SERVER__PORT=9090 sets server.port = 9090
    //
    // All service configuration fields carry serde defaults, so absent files
    // or an entirely unconfigured environment produces a valid service config
    // apart from the webhook secret, which has no safe default and must be
    // supplied. A malformed file or an environment variable that cannot be
    // coerced to the correct type is a hard error.
    //
    // The logging subscriber is configured from this file, so failures here
    // report to stderr.
    // -------------------------------------------------------------------------
    let mut config_builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/run-board/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    // Optional explicit path supplied by the operator.
    if let Ok(explicit_path) = std::env::var("RB_CONFIG_FILE") {
        if !explicit_path.is_empty() {
            config_builder = config_builder.add_source(
                config::File::with_name(&explicit_path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }
    }

    let raw_config = match config_builder
        .add_source(config::Environment::with_prefix("RB").separator("__"))
        .build()
    {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to build configuration; aborting: {e}");
            std::process::exit(3);
        }
    };

    let service_config: ServiceConfig = match raw_config.try_deserialize() {
        Ok(sc) => sc,
        Err(e) => {
            eprintln!(
                "Could not deserialize service configuration; aborting. \
                 Fix the configuration and restart: {e}"
            );
            std::process::exit(3);
        }
    };

    if let Err(e) = service_config.validate() {
        eprintln!("Service configuration is invalid; aborting: {e}");
        std::process::exit(3);
    }

    // -------------------------------------------------------------------------
    // Initialize logging
    //
    // RUST_LOG takes precedence when set; otherwise the configured level
    // applies to the service crates with tower_http kept at debug.
    // -------------------------------------------------------------------------
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "run_board_service={level},run_board_api={level},run_board_core={level},tower_http=debug",
            level = service_config.logging.level
        )
        .into()
    });

    match service_config.logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!(
        environment = %service_config.environment,
        "Starting Run-Board Service"
    );

    // -------------------------------------------------------------------------
    // Build the run store
    //
    // The store must come up and pass its health probe before the server
    // accepts traffic; a service that cannot persist runs is better off dead
    // than acknowledging deliveries it silently drops.
    // -------------------------------------------------------------------------
    let store: Arc<dyn RunStore> = match &service_config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory run store");
            Arc::new(InMemoryRunStore::new())
        }
        StorageBackend::Filesystem { path } => {
            info!(path = %path.display(), "Using filesystem run store");
            match FilesystemRunStore::new(path.clone()).await {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    error!(error = %e, "Failed to initialize filesystem store; aborting");
                    std::process::exit(4);
                }
            }
        }
    };

    match store.health_check().await {
        Ok(health) if health.healthy => {
            info!(backend = health.backend, "Run store ready");
        }
        Ok(health) => {
            error!(
                backend = health.backend,
                error = health.error_message.as_deref().unwrap_or("unknown"),
                "Run store failed startup health check; aborting"
            );
            std::process::exit(4);
        }
        Err(e) => {
            error!(error = %e, "Run store failed startup health check; aborting");
            std::process::exit(4);
        }
    }

    // -------------------------------------------------------------------------
    // Wire the webhook pipeline
    //
    // validate() has already guaranteed a webhook secret is present, so the
    // verifier is always installed here; the Option only exists for test
    // setups inside the library crates.
    // -------------------------------------------------------------------------
    let verifier: Option<Arc<dyn SignatureVerifier>> = service_config
        .webhooks
        .secret
        .as_ref()
        .map(|secret| Arc::new(SharedSecretVerifier::new(secret.clone())) as _);

    let relay_policy = RelayPolicy::new(
        service_config.webhooks.allow_unverified_relay,
        service_config.environment,
    );

    let ingestor = Arc::new(RunIngestor::new(verifier, store.clone(), relay_policy));

    let metrics = match ServiceMetrics::new() {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "Failed to register metrics; aborting");
            std::process::exit(2);
        }
    };

    // -------------------------------------------------------------------------
    // Periodic retention sweep
    //
    // Upserts already trim each repository as new runs arrive; the sweep
    // repairs drift from runs written outside the pipeline or left behind by
    // a crash mid-upsert.  Failures are logged and retried on the next tick,
    // never fatal.
    // -------------------------------------------------------------------------
    if let Some(interval) = service_config.storage.sweep_interval() {
        let sweep_store = store.clone();
        let sweep_metrics = metrics.clone();
        info!(interval_seconds = interval.as_secs(), "Retention sweep enabled");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; consume it so the first
            // sweep runs a full period after startup.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match sweep_store.cleanup_old_runs().await {
                    Ok(report) => {
                        sweep_metrics.record_sweep(&report);
                        if report.runs_deleted > 0 {
                            info!(
                                repositories = report.repositories_swept,
                                runs = report.runs_deleted,
                                "Retention sweep deleted excess runs"
                            );
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Retention sweep failed; retrying next interval");
                    }
                }
            }
        });
    } else {
        info!("Periodic retention sweep disabled");
    }

    info!(
        host = %service_config.server.host,
        port = service_config.server.port,
        "Starting HTTP server"
    );

    // Start the server
    if let Err(e) = start_server(service_config, ingestor, store, metrics).await {
        error!("Failed to start server: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) => 3,
            ServiceError::StoreInitFailed { .. } => 4,
        };

        std::process::exit(exit_code);
    }

    Ok(())
}
