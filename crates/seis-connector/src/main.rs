//! seis-connector: SeedLink to broker ingress
//!
//! Exit codes: 0 clean shutdown (including an oversized packet),
//! 1 fatal runtime failure, 2 configuration error.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seis_connector::{
    Args, BrokerPublisher, PublisherError, ReceiverExit, SeedLinkClient, StreamReceiver,
};
use seis_middleware::{serve_status, NatsConnector, RetryError, ServiceStatus};

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

/// Flip the shutdown flag on SIGINT or SIGTERM
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
            error!(error = %e, "Connector failed");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(config: seis_connector::IngressConfig) -> anyhow::Result<()> {
    info!(
        server = %config.seedlink.server,
        broker = %config.broker.endpoint(),
        exchange = %config.publisher.exchange,
        routing_key = %config.publisher.routing_key,
        "Starting seis-connector"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx)?;

    let connector = Arc::new(NatsConnector::new(config.broker.clone()));
    let mut publisher = BrokerPublisher::new(connector, config.publisher.clone())
        .with_shutdown(shutdown_rx.clone());

    if let Some(addr) = config.metrics_addr {
        let status = ServiceStatus::new("seis-connector", publisher.connected_flag());
        tokio::spawn(async move {
            if let Err(e) = serve_status(addr, status).await {
                error!(addr = %addr, error = %e, "Status server failed");
            }
        });
        info!(addr = %addr, "Status server listening");
    }

    match publisher.connect().await {
        Ok(()) => {}
        Err(PublisherError::Retry(RetryError::Cancelled(_))) => {
            info!("Shutdown requested before broker connection");
            return Ok(());
        }
        Err(e) => {
            warn!(error = %e, "Broker unavailable, packets are dropped until it returns");
        }
    }

    let source = SeedLinkClient::new(config.seedlink.clone(), config.credentials());
    let mut receiver = StreamReceiver::new(source, publisher, config.receiver.clone(), shutdown_rx);

    match receiver.run().await {
        ReceiverExit::Terminated => info!("Receive loop finished"),
        ReceiverExit::Oversized { needed, capacity } => {
            warn!(needed = needed, capacity = capacity, "Stopping after oversized packet");
        }
    }

    receiver.close().await;
    info!("seis-connector stopped");
    Ok(())
}
