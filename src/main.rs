use anyhow::{Context, Result};
use givenergy_local::config::Config;
use givenergy_local::coordinator::Coordinator;
use givenergy_local::logging::init_logging;
use givenergy_local::modbus::GivEnergyClient;
use givenergy_local::planner::{RequestPlanner, RetryPolicy};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging).context("Failed to initialize logging")?;
    info!(
        "GivEnergy Local {} starting up, inverter at {}:{}",
        env!("APP_VERSION"),
        config.device.host,
        config.device.port
    );

    let device = format!("{}:{}", config.device.host, config.device.port);
    let mut client = GivEnergyClient::new(&config.device);
    if let Err(e) = client.connect().await {
        // The transport reconnects on the next request
        warn!("Initial connection failed: {}", e);
    }

    let planner = RequestPlanner::new(
        Box::new(client),
        RetryPolicy::new(config.retry.read_attempts),
    )
    .with_device(device);
    let mut coordinator = Coordinator::new(planner, &config.polling);
    let shutdown = coordinator.shutdown_handle();

    let mut updates = WatchStream::new(coordinator.subscribe());
    let reporter = tokio::spawn(async move {
        while let Some(status) = updates.next().await {
            match (&status.state, &status.snapshot) {
                (givenergy_local::CoordinatorState::Ready, Some(snapshot)) => {
                    info!("Snapshot: {}", snapshot.summary());
                }
                (givenergy_local::CoordinatorState::Failed(reason), _) => {
                    error!(
                        "Poll failed ({} of {} polls failed, stale: {}): {}",
                        status.failed_polls, status.total_polls, status.stale, reason
                    );
                }
                _ => {}
            }
        }
    });

    let poller = tokio::spawn(async move {
        coordinator.run().await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down");
    shutdown.send(()).ok();

    poller.await.context("Polling task panicked")?;
    reporter.abort();
    info!("Shutdown complete");
    Ok(())
}
