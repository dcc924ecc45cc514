//! # Telemetry (C8)
//!
//! Per-device and global counters for the embedding binary to scrape.
//! Generalized from the teacher's unified instrumentation model
//! (`instrumentation/stats.rs`'s windowed per-device counters and global
//! registry): same "global registry of per-device stats behind a
//! `Mutex`" shape, keyed by `DevEui` instead of a manufacturer device id
//! string, with `once_cell::sync::Lazy` standing in for the teacher's
//! `lazy_static!`. This is carried even though the admin/HTTP surface is
//! out of scope — the non-goal excludes an external scrape endpoint, not
//! the counters themselves.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::model::DevEui;

static DEVICE_TELEMETRY: Lazy<Mutex<HashMap<DevEui, DeviceTelemetry>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static SCHEDULER_TELEMETRY: Lazy<Mutex<SchedulerTelemetry>> =
    Lazy::new(|| Mutex::new(SchedulerTelemetry::default()));

/// Counters maintained for one device across the lifetime of the
/// process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    pub uplinks_handled: u64,
    pub mac_commands_dispatched: u64,
    pub protocol_faults: u64,
    pub downlinks_sent: u64,
}

/// Global, cross-device scheduler counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerTelemetry {
    pub ticks_run: u64,
    pub batches_processed: u64,
    pub opportunities_seen: u64,
    pub assembly_failures: u64,
    #[serde(with = "duration_millis")]
    pub last_batch_latency: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Records that an uplink was handled for `dev_eui`, incrementing its
/// per-device counter.
pub fn record_uplink_handled(dev_eui: DevEui) {
    let mut registry = DEVICE_TELEMETRY.lock().unwrap();
    registry.entry(dev_eui).or_default().uplinks_handled += 1;
}

/// Records that a MAC command was dispatched for `dev_eui`.
pub fn record_mac_command_dispatched(dev_eui: DevEui) {
    let mut registry = DEVICE_TELEMETRY.lock().unwrap();
    registry.entry(dev_eui).or_default().mac_commands_dispatched += 1;
}

/// Records a protocol fault (MIC failure, counter regression, malformed
/// MAC command) attributed to `dev_eui`.
pub fn record_protocol_fault(dev_eui: DevEui) {
    let mut registry = DEVICE_TELEMETRY.lock().unwrap();
    registry.entry(dev_eui).or_default().protocol_faults += 1;
}

/// Records that a downlink was handed to the gateway backend for
/// `dev_eui`.
pub fn record_downlink_sent(dev_eui: DevEui) {
    let mut registry = DEVICE_TELEMETRY.lock().unwrap();
    registry.entry(dev_eui).or_default().downlinks_sent += 1;
}

/// Records one completed scheduler tick: batch size and how long
/// assembling the batch took.
pub fn record_scheduler_tick(batch_size: usize, assembly_failures: usize, latency: Duration) {
    let mut telemetry = SCHEDULER_TELEMETRY.lock().unwrap();
    telemetry.ticks_run += 1;
    telemetry.batches_processed += 1;
    telemetry.opportunities_seen += batch_size as u64;
    telemetry.assembly_failures += assembly_failures as u64;
    telemetry.last_batch_latency = latency;
}

/// Snapshot of one device's counters, for scraping.
pub fn device_snapshot(dev_eui: DevEui) -> DeviceTelemetry {
    DEVICE_TELEMETRY.lock().unwrap().get(&dev_eui).cloned().unwrap_or_default()
}

/// Snapshot of every device with recorded telemetry.
pub fn all_device_snapshots() -> HashMap<DevEui, DeviceTelemetry> {
    DEVICE_TELEMETRY.lock().unwrap().clone()
}

/// Snapshot of the global scheduler counters.
pub fn scheduler_snapshot() -> SchedulerTelemetry {
    SCHEDULER_TELEMETRY.lock().unwrap().clone()
}
