//! seis-consumer: broker to PostgreSQL egress
//!
//! Exit codes: 0 clean shutdown, 1 fatal runtime failure (store
//! unreachable at startup, broker retries exhausted), 2 configuration error.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seis_consumer::{run_service, Args, BrokerConsumer, EgressConfig, PgConnector, Pipeline};
use seis_middleware::{serve_status, NatsConnector, ServiceStatus};

const EXIT_FATAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
        }
        shutdown_tx.send(true).ok();
    });
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Consumer failed");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(config: EgressConfig) -> anyhow::Result<()> {
    info!(
        broker = %config.broker.endpoint(),
        queue = %config.consumer.binding.queue,
        binding_key = %config.consumer.binding.binding_key,
        store = %config.store.endpoint(),
        table = %config.store.table,
        "Starting seis-consumer"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx)?;

    // Store first: without it there is nowhere to put messages
    let mut pipeline = Pipeline::new(PgConnector::new(config.store.clone()), &config.store_retry)
        .with_shutdown(shutdown_rx.clone());
    pipeline.connect().await?;

    let connector = Arc::new(NatsConnector::new(config.broker.clone()));
    let mut consumer = BrokerConsumer::new(connector, config.consumer.clone())
        .with_shutdown(shutdown_rx.clone());

    if let Some(addr) = config.metrics_addr {
        let status = ServiceStatus::new("seis-consumer", consumer.connected_flag());
        tokio::spawn(async move {
            if let Err(e) = serve_status(addr, status).await {
                error!(addr = %addr, error = %e, "Status server failed");
            }
        });
        info!(addr = %addr, "Status server listening");
    }

    run_service(&mut consumer, &mut pipeline, shutdown_rx).await?;
    info!("seis-consumer stopped");
    Ok(())
}
