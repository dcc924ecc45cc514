//! # Runtime context
//!
//! Per Design Note "Global singletons → explicit runtime context" (§9):
//! the crate's one intentional global is the EU868 [`Region`] returned
//! by [`crate::band::region`]; everything else an operation needs is
//! constructed once by the embedding binary and threaded explicitly,
//! instead of living behind `lazy_static!`/module-level statics the way
//! the teacher's `instrumentation::stats` module does.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::band::{self, Region};
use crate::concurrency::DeviceLockRegistry;
use crate::duty_cycle::DutyCycleTracker;
use crate::interfaces::GatewayBackend;
use crate::mac_engine::MacCommandEngine;
use crate::scheduler::{DownlinkCandidateSource, Scheduler, SchedulerConfig};
use crate::store::SessionStore;

/// Tenant-wide defaults and scheduler tuning, loaded by an
/// (out-of-scope) config loader and handed in whole — this crate has no
/// opinion on whether that came from a file, environment variables, or
/// a remote config service.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkServerConfig {
    pub scheduler: SchedulerConfig,
    #[serde(with = "duration_secs")]
    pub device_session_ttl: Duration,
    pub adr_enabled: bool,
    pub rx1_delay: u8,
    pub rx2_dr: u8,
    pub rx2_frequency: u32,
    /// Duty-cycle accounting window and fractional limit (§4.5).
    #[serde(with = "duration_secs")]
    pub duty_cycle_window: Duration,
    pub duty_cycle_limit_fraction: f32,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Everything one running network server instance needs, constructed
/// once at startup and shared behind `Arc` by every concurrently
/// running operation (uplink handling, the scheduler, TX-ack
/// reconciliation).
pub struct RuntimeContext {
    pub config: NetworkServerConfig,
    pub region: &'static Region,
    pub store: Arc<SessionStore>,
    pub mac_engine: Arc<MacCommandEngine>,
    pub duty_cycle: Arc<DutyCycleTracker>,
    pub locks: Arc<DeviceLockRegistry>,
    pub scheduler: Arc<Scheduler>,
}

impl RuntimeContext {
    /// Wires every component together. `gateway`/`candidates` are
    /// supplied by the embedding binary since this crate ships no
    /// concrete transport or eligibility implementation.
    pub fn new(
        config: NetworkServerConfig,
        store: SessionStore,
        gateway: Arc<dyn GatewayBackend>,
        candidates: Arc<dyn DownlinkCandidateSource>,
    ) -> Self {
        let region = band::region();
        let store = Arc::new(store);
        let mac_engine = Arc::new(MacCommandEngine::with_defaults());
        let duty_cycle = Arc::new(DutyCycleTracker::new(
            config.duty_cycle_window,
            config.duty_cycle_limit_fraction,
        ));
        let locks = Arc::new(DeviceLockRegistry::new());
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler,
            region,
            duty_cycle.clone(),
            locks.clone(),
            store.clone(),
            gateway,
            candidates,
        ));
        Self {
            config,
            region,
            store,
            mac_engine,
            duty_cycle,
            locks,
            scheduler,
        }
    }
}
