//! Per-gateway downlink duty-cycle accounting (§4.5 step 6).
//!
//! Adapted from the teacher's single-radio `TransmissionWindow`
//! (`wmbus/radio/lora/duty_cycle.rs`): a rolling window of transmission
//! events and a `can_transmit` admission check, here keyed per gateway
//! instead of tracking one local radio.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::model::GatewayId;

struct TransmissionWindow {
    window_duration: Duration,
    transmissions: Vec<(Instant, Duration)>,
}

impl TransmissionWindow {
    fn new(window_duration: Duration) -> Self {
        Self { window_duration, transmissions: Vec::new() }
    }

    fn duty_cycle_fraction(&mut self, now: Instant) -> f32 {
        let cutoff = now.checked_sub(self.window_duration).unwrap_or(now);
        self.transmissions.retain(|(t, _)| *t > cutoff);
        let total: Duration = self.transmissions.iter().map(|(_, d)| *d).sum();
        total.as_secs_f32() / self.window_duration.as_secs_f32()
    }

    fn can_transmit(&mut self, now: Instant, time_on_air: Duration, limit_fraction: f32) -> bool {
        let current = self.duty_cycle_fraction(now);
        let projected = current + time_on_air.as_secs_f32() / self.window_duration.as_secs_f32();
        projected <= limit_fraction
    }

    fn record(&mut self, now: Instant, time_on_air: Duration) {
        self.transmissions.push((now, time_on_air));
    }
}

/// Tracks downlink duty-cycle headroom across all gateways. One instance
/// shared across the scheduler.
pub struct DutyCycleTracker {
    window_duration: Duration,
    limit_fraction: f32,
    windows: Mutex<HashMap<GatewayId, TransmissionWindow>>,
}

impl DutyCycleTracker {
    pub fn new(window_duration: Duration, limit_fraction: f32) -> Self {
        Self { window_duration, limit_fraction, windows: Mutex::new(HashMap::new()) }
    }

    /// Whether `gateway_id` has headroom to transmit for `time_on_air`
    /// right now.
    pub fn has_headroom(&self, gateway_id: GatewayId, time_on_air: Duration, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap();
        let window = windows
            .entry(gateway_id)
            .or_insert_with(|| TransmissionWindow::new(self.window_duration));
        window.can_transmit(now, time_on_air, self.limit_fraction)
    }

    /// Records a committed transmission against `gateway_id`'s window.
    pub fn record_transmission(&self, gateway_id: GatewayId, time_on_air: Duration, now: Instant) {
        let mut windows = self.windows.lock().unwrap();
        windows
            .entry(gateway_id)
            .or_insert_with(|| TransmissionWindow::new(self.window_duration))
            .record(now, time_on_air);
    }

    /// Picks the best-headroom gateway (by RSSI/SNR order as supplied by
    /// the caller) that still has duty-cycle room for `time_on_air`.
    pub fn select_gateway(
        &self,
        candidates_by_quality: &[GatewayId],
        time_on_air: Duration,
        now: Instant,
    ) -> Option<GatewayId> {
        candidates_by_quality
            .iter()
            .copied()
            .find(|gw| self.has_headroom(*gw, time_on_air, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_transmission_within_limit() {
        let tracker = DutyCycleTracker::new(Duration::from_secs(3600), 0.01);
        let gw = GatewayId([1; 8]);
        let now = Instant::now();
        assert!(tracker.has_headroom(gw, Duration::from_millis(100), now));
    }

    #[test]
    fn rejects_transmission_once_budget_exhausted() {
        let tracker = DutyCycleTracker::new(Duration::from_secs(3600), 0.01);
        let gw = GatewayId([1; 8]);
        let now = Instant::now();
        // 1% of 3600s = 36s of airtime budget.
        tracker.record_transmission(gw, Duration::from_secs(35), now);
        assert!(!tracker.has_headroom(gw, Duration::from_secs(2), now));
    }

    #[test]
    fn select_gateway_skips_exhausted_candidates() {
        let tracker = DutyCycleTracker::new(Duration::from_secs(3600), 0.01);
        let now = Instant::now();
        let exhausted = GatewayId([1; 8]);
        let fresh = GatewayId([2; 8]);
        tracker.record_transmission(exhausted, Duration::from_secs(35), now);
        let chosen = tracker.select_gateway(&[exhausted, fresh], Duration::from_secs(1), now);
        assert_eq!(chosen, Some(fresh));
    }
}
