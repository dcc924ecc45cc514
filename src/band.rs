//! Region description and band singleton (C1): channel plan, data-rate
//! table, SNR floor table, and the LinkADR payload synthesizer.
//!
//! Data-rate and SNR tables are plain arrays indexed by data-rate /
//! spreading-factor index, in the style of the teacher's
//! `wmbus/radio/lora/params.rs` (`SpreadingFactor`, lookup-by-index
//! functions). Only EU868 is wired up; additional regions are meant to be
//! added as further `Region` constructors.

use once_cell::sync::OnceCell;

use crate::model::mac_command::LinkAdrReqPayload;

/// Spreading factor used by one data-rate index, for SNR-floor lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadingFactor {
    SF7,
    SF8,
    SF9,
    SF10,
    SF11,
    SF12,
}

/// Channel bandwidth, paired with a spreading factor to form one
/// data-rate table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    Bw125,
    Bw250,
    Bw500,
}

/// One row of the region's data-rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRate {
    pub spreading_factor: SpreadingFactor,
    pub bandwidth: Bandwidth,
}

/// SNR floor, in dB, below which a receiver at the given spreading
/// factor cannot demodulate — used to compute LinkCheck margin.
fn snr_floor_db(sf: SpreadingFactor) -> i8 {
    match sf {
        SpreadingFactor::SF7 => -7,
        SpreadingFactor::SF8 => -10,
        SpreadingFactor::SF9 => -12,
        SpreadingFactor::SF10 => -15,
        SpreadingFactor::SF11 => -17,
        SpreadingFactor::SF12 => -20,
    }
}

/// Immutable region description: channel plan, data-rate table, and the
/// LinkADR synthesizer. One instance per deployment, built once at
/// startup.
#[derive(Debug)]
pub struct Region {
    pub standard_channel_indices: Vec<u8>,
    pub custom_channel_indices: Vec<u8>,
    data_rate_table: Vec<DataRate>,
    channel_frequencies_hz: Vec<u32>,
}

impl Region {
    /// EU868: 3 standard (mandatory) channels plus 5 custom channels,
    /// DR0-DR6 (SF12..SF7 on 125 kHz, SF7 on 250 kHz for DR6).
    pub fn eu868() -> Self {
        Self {
            standard_channel_indices: vec![0, 1, 2],
            custom_channel_indices: vec![3, 4, 5, 6, 7],
            data_rate_table: vec![
                DataRate { spreading_factor: SpreadingFactor::SF12, bandwidth: Bandwidth::Bw125 },
                DataRate { spreading_factor: SpreadingFactor::SF11, bandwidth: Bandwidth::Bw125 },
                DataRate { spreading_factor: SpreadingFactor::SF10, bandwidth: Bandwidth::Bw125 },
                DataRate { spreading_factor: SpreadingFactor::SF9, bandwidth: Bandwidth::Bw125 },
                DataRate { spreading_factor: SpreadingFactor::SF8, bandwidth: Bandwidth::Bw125 },
                DataRate { spreading_factor: SpreadingFactor::SF7, bandwidth: Bandwidth::Bw125 },
                DataRate { spreading_factor: SpreadingFactor::SF7, bandwidth: Bandwidth::Bw250 },
            ],
            // Index-addressed, standard channels (0-2) then custom (3-7).
            channel_frequencies_hz: vec![
                868_100_000,
                868_300_000,
                868_500_000,
                867_100_000,
                867_300_000,
                867_500_000,
                867_700_000,
                867_900_000,
            ],
        }
    }

    /// All standard and custom channel indices, standard first.
    pub fn all_channel_indices(&self) -> impl Iterator<Item = u8> + '_ {
        self.standard_channel_indices
            .iter()
            .chain(self.custom_channel_indices.iter())
            .copied()
    }

    pub fn data_rate(&self, index: u8) -> Option<DataRate> {
        self.data_rate_table.get(index as usize).copied()
    }

    /// RX1 transmits on the uplink's own channel frequency, not RX2's
    /// fixed frequency — this is that lookup.
    pub fn channel_frequency(&self, index: u8) -> Option<u32> {
        self.channel_frequencies_hz.get(index as usize).copied()
    }

    /// Approximate LoRa time-on-air for `payload_len` bytes at
    /// `data_rate_index`, per the standard symbol-count formula (explicit
    /// header, CRC off for downlinks, rounded up to whole symbols).
    /// Adapted from the teacher's `lora_bitrate_hz` datasheet formula.
    pub fn time_on_air(&self, data_rate_index: u8, payload_len: usize) -> std::time::Duration {
        let dr = self.data_rate(data_rate_index).unwrap_or(DataRate {
            spreading_factor: SpreadingFactor::SF12,
            bandwidth: Bandwidth::Bw125,
        });
        let sf = match dr.spreading_factor {
            SpreadingFactor::SF7 => 7.0,
            SpreadingFactor::SF8 => 8.0,
            SpreadingFactor::SF9 => 9.0,
            SpreadingFactor::SF10 => 10.0,
            SpreadingFactor::SF11 => 11.0,
            SpreadingFactor::SF12 => 12.0,
        };
        let bw_hz = match dr.bandwidth {
            Bandwidth::Bw125 => 125_000.0,
            Bandwidth::Bw250 => 250_000.0,
            Bandwidth::Bw500 => 500_000.0,
        };
        let t_sym = (2f64.powf(sf)) / bw_hz;
        let preamble_symbols = 8.0 + 4.25;
        let payload_symbols = 8.0
            + (((8.0 * payload_len as f64 - 4.0 * sf + 28.0) / (4.0 * sf)).ceil() * 5.0)
                .max(0.0);
        let total_seconds = (preamble_symbols + payload_symbols) * t_sym;
        std::time::Duration::from_secs_f64(total_seconds.max(0.0))
    }

    /// `max(RxSNR) - floor(spreading_factor)`, clamped to [0, 254]
    /// (§4.3 LinkCheckReq handling).
    pub fn link_check_margin(&self, data_rate_index: u8, max_rx_snr_db: f32) -> u8 {
        let sf = self
            .data_rate(data_rate_index)
            .map(|dr| dr.spreading_factor)
            .unwrap_or(SpreadingFactor::SF12);
        let margin = max_rx_snr_db - snr_floor_db(sf) as f32;
        margin.round().clamp(0.0, 254.0) as u8
    }

    /// Minimal ordered sequence of LinkADRReq payloads reproducing
    /// `enabled` on a device, or an empty sequence if no change is
    /// required. Does not set TXPower, DataRate or NbRep — the caller
    /// fills those in on the last payload (§4.1).
    ///
    /// EU868's full channel plan fits in one 16-bit mask (ChMaskCntl 0),
    /// so this always synthesizes at most one payload; regions with a
    /// wider plan would page across several ChMaskCntl values here.
    pub fn link_adr_req_payloads_for_enabled_channels(
        &self,
        enabled: &crate::model::session::ChannelMask,
    ) -> Vec<LinkAdrReqPayload> {
        let mut ch_mask: u16 = 0;
        for index in self.all_channel_indices() {
            if enabled.contains(index) {
                ch_mask |= 1 << index;
            }
        }
        if ch_mask == 0 {
            return Vec::new();
        }
        vec![LinkAdrReqPayload {
            data_rate: 0,
            tx_power: 0,
            ch_mask,
            ch_mask_cntl: 0,
            nb_trans: 0,
        }]
    }
}

static REGION: OnceCell<Region> = OnceCell::new();

/// Returns the process-wide region singleton, initializing it to EU868
/// on first use. The region is immutable after initialization — the
/// crate's one intentional global.
pub fn region() -> &'static Region {
    REGION.get_or_init(Region::eu868)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::session::ChannelMask;

    #[test]
    fn link_check_margin_clamps_to_zero() {
        let region = Region::eu868();
        // DR5 = SF7/125kHz, floor -7dB. A very weak signal should clamp to 0.
        assert_eq!(region.link_check_margin(5, -50.0), 0);
    }

    #[test]
    fn link_check_margin_typical() {
        let region = Region::eu868();
        // floor(-7) margin for SNR of 3.0 => 10.
        assert_eq!(region.link_check_margin(5, 3.0), 10);
    }

    #[test]
    fn synthesizer_empty_mask_returns_empty_sequence() {
        let region = Region::eu868();
        let mask = ChannelMask::from_indices([]);
        assert!(region.link_adr_req_payloads_for_enabled_channels(&mask).is_empty());
    }

    #[test]
    fn synthesizer_produces_single_payload_for_eu868() {
        let region = Region::eu868();
        let mask = ChannelMask::from_indices([0, 1, 2, 3]);
        let payloads = region.link_adr_req_payloads_for_enabled_channels(&mask);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].ch_mask, 0b1111);
        assert_eq!(payloads[0].ch_mask_cntl, 0);
    }

    #[test]
    fn time_on_air_increases_with_payload_length() {
        let region = Region::eu868();
        let short = region.time_on_air(5, 10);
        let long = region.time_on_air(5, 100);
        assert!(long > short);
    }

    #[test]
    fn channel_frequency_distinguishes_standard_channels() {
        let region = Region::eu868();
        assert_eq!(region.channel_frequency(0), Some(868_100_000));
        assert_ne!(region.channel_frequency(0), region.channel_frequency(1));
        assert_eq!(region.channel_frequency(8), None);
    }

    #[test]
    fn region_singleton_is_stable() {
        let a = region() as *const Region;
        let b = region() as *const Region;
        assert_eq!(a, b);
    }
}
