use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use lorawan_ns_core::context::{NetworkServerConfig, RuntimeContext};
use lorawan_ns_core::error::NsError;
use lorawan_ns_core::interfaces::GatewayBackend;
use lorawan_ns_core::scheduler::{DownlinkCandidateSource, DownlinkOpportunity, SchedulerConfig};
use lorawan_ns_core::store::SessionStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lorawan-ns-core")]
#[command(about = "Device MAC session and downlink planning core of a LoRaWAN network server")]
struct Cli {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    #[arg(long, env = "REDIS_URL")]
    redis_url: String,
    #[arg(long, default_value_t = 5)]
    scheduler_interval_secs: u64,
    #[arg(long, default_value_t = 50)]
    scheduler_batch_size: usize,
}

/// Demo gateway backend: logs every frame instead of opening a real
/// packet-forwarder connection, since that transport is an external
/// collaborator (§1).
struct LoggingGatewayBackend;

#[async_trait]
impl GatewayBackend for LoggingGatewayBackend {
    async fn send_downlink(
        &self,
        frame: &lorawan_ns_core::downlink_assembler::AssembledDownlink,
    ) -> Result<(), NsError> {
        info!(gateway_id = %frame.gateway_id, window = ?frame.window, "would emit downlink frame");
        Ok(())
    }
}

/// Demo candidate source: always empty. A real deployment supplies one
/// that tracks Class A holding contexts, Class B ping-slot windows, and
/// Class C queued data (§4.6).
struct NoCandidates;

#[async_trait]
impl DownlinkCandidateSource for NoCandidates {
    async fn next_batch(&self, _max: usize) -> Vec<DownlinkOpportunity> {
        Vec::new()
    }
}

async fn run(cli: Cli) -> Result<(), NsError> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&cli.database_url)
        .await
        .map_err(|e| NsError::Transient(format!("postgres connect: {e}")))?;
    let redis_client = redis::Client::open(cli.redis_url.as_str())
        .map_err(|e| NsError::Transient(format!("redis client: {e}")))?;
    let cache = redis::aio::ConnectionManager::new(redis_client)
        .await
        .map_err(|e| NsError::Transient(format!("redis connect: {e}")))?;
    let store = SessionStore::new(pool, cache, Duration::from_secs(3600));

    let config = NetworkServerConfig {
        scheduler: SchedulerConfig {
            scheduler_interval: Duration::from_secs(cli.scheduler_interval_secs),
            scheduler_batch_size: cli.scheduler_batch_size,
        },
        device_session_ttl: Duration::from_secs(86_400),
        adr_enabled: true,
        rx1_delay: 1,
        rx2_dr: 0,
        rx2_frequency: 869_525_000,
        duty_cycle_window: Duration::from_secs(3600),
        duty_cycle_limit_fraction: 0.01,
    };

    let context = RuntimeContext::new(
        config,
        store,
        Arc::new(LoggingGatewayBackend),
        Arc::new(NoCandidates),
    );

    let cancellation = CancellationToken::new();
    let scheduler = context.scheduler.clone();
    let scheduler_cancellation = cancellation.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_cancellation).await });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| NsError::Internal(format!("signal handler: {e}")))?;
    info!("shutdown signal received, draining in-flight scheduler work");
    cancellation.cancel();

    if let Err(e) = scheduler_task.await {
        warn!(error = %e, "scheduler task did not shut down cleanly");
    }

    context.locks.sweep_idle();
    info!("shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() {
    lorawan_ns_core::init_logger();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(NsError::Transient(msg)) => {
            eprintln!("unrecoverable backend connection loss at startup: {msg}");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("configuration or runtime error: {e}");
            std::process::exit(1);
        }
    }
}
