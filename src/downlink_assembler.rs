//! # Downlink assembler (C5)
//!
//! Assembles one device's next downlink frame: drains the pending
//! MAC-command queue, attaches any queued application payload, folds in
//! an ADR-driven LinkADR proposal when due, computes the MIC, encrypts
//! FRMPayload, and picks an RX window and gateway with duty-cycle
//! headroom.

use std::time::{Duration, Instant};

use tracing::instrument;

use crate::band::Region;
use crate::channel_reconfig;
use crate::crypto::{self, Direction};
use crate::duty_cycle::DutyCycleTracker;
use crate::error::NsError;
use crate::model::session::PendingLinkAdr;
use crate::model::{DeviceProfile, DeviceSession, GatewayId, MacCommandBlock, ServiceProfile};

/// One gateway's reception report for the uplink that opened this
/// downlink opportunity.
#[derive(Debug, Clone, Copy)]
pub struct RxReport {
    pub gateway_id: GatewayId,
    pub rssi: f32,
    pub snr: f32,
    /// Channel the uplink was received on — fixes the RX1 frequency,
    /// which tracks the uplink channel rather than RX2's fixed frequency.
    pub channel_index: u8,
}

/// Queued application payload awaiting attachment to the next downlink.
#[derive(Debug, Clone)]
pub struct QueuedAppPayload {
    pub f_port: u8,
    pub bytes: Vec<u8>,
}

/// Which RX window the assembled frame targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxWindow {
    Rx1,
    Rx2,
}

/// Assembled downlink, ready for hand-off to the gateway backend.
#[derive(Debug, Clone)]
pub struct AssembledDownlink {
    pub gateway_id: GatewayId,
    pub window: RxWindow,
    pub frequency: u32,
    pub data_rate_index: u8,
    pub time_on_air: Duration,
    pub tx_time: Instant,
    pub phy_payload: Vec<u8>,
    /// Gateways that received the triggering uplink, best signal first —
    /// carried forward so a TX-ack retry can pick a different one.
    pub candidate_gateways: Vec<GatewayId>,
}

const MAC_COMMAND_FOPTS_BUDGET: usize = 15;

fn mac_command_block_size(block: &MacCommandBlock) -> usize {
    // 1 CID byte plus an estimated payload size per command; exact wire
    // sizes are fixed per CID in the LoRaWAN spec, approximated here at a
    // conservative upper bound sufficient for budget accounting.
    block.commands.len() * 5
}

/// Derives a LinkADR target (data-rate, TX-power) from a full ADR
/// history ring: the simplest admissible policy — step up to the
/// fastest data rate the strongest recent sample supports, and drop TX
/// power by one step, is the algorithm itself is out of scope (§1
/// Non-goals); this wires the ring into C4 rather than prescribing the
/// algorithm.
fn derive_adr_target(session: &DeviceSession) -> Option<(u8, u8)> {
    if !session.adr_history.is_full() {
        return None;
    }
    let best_snr = session
        .adr_history
        .samples()
        .map(|s| s.max_snr)
        .fold(f32::NEG_INFINITY, f32::max);
    if best_snr > 10.0 && session.tx_power_index > 0 {
        Some((session.data_rate_index, session.tx_power_index - 1))
    } else {
        None
    }
}

/// Assembles the next downlink for `session`, or `Ok(None)` if there is
/// nothing to send (no MAC commands queued, no application payload, and
/// no ADR adjustment due).
#[instrument(skip_all, fields(dev_eui = %session.dev_eui))]
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    region: &Region,
    duty_cycle: &DutyCycleTracker,
    session: &mut DeviceSession,
    _device_profile: &DeviceProfile,
    service_profile: &ServiceProfile,
    app_payload: Option<QueuedAppPayload>,
    permitted_channels: &crate::model::session::ChannelMask,
    rx_reports: &[RxReport],
    force_rx2: bool,
    uplink_time: Instant,
) -> Result<Option<AssembledDownlink>, NsError> {
    let mut fopts = Vec::new();
    let drained = session
        .mac_command_queue
        .drain_within_budget(MAC_COMMAND_FOPTS_BUDGET, mac_command_block_size);

    if service_profile.adr_enabled {
        if let Some((target_dr, target_power)) = derive_adr_target(session) {
            if session.pending_link_adr.is_none() {
                if let Some(adr_block) =
                    channel_reconfig::reconfigure(region, session, permitted_channels)?
                {
                    session.pending_link_adr = Some(PendingLinkAdr {
                        channel_mask: permitted_channels.clone(),
                        data_rate: target_dr,
                        tx_power_index: target_power,
                        nb_trans: session.nb_trans,
                    });
                    encode_blocks_into(&[adr_block], &mut fopts);
                }
            }
        }
    }
    encode_blocks_into(&drained, &mut fopts);

    let f_port = app_payload.as_ref().map(|p| p.f_port);
    let frm_payload = app_payload.map(|p| p.bytes).unwrap_or_default();

    if fopts.is_empty() && frm_payload.is_empty() {
        return Ok(None);
    }

    session.downlink_n_frame_counter += 1;
    let frame_counter = session.downlink_n_frame_counter;

    let encrypted_frm = if frm_payload.is_empty() {
        Vec::new()
    } else {
        crypto::crypt_frm_payload(
            &session.keys.nwk_s_enc_key,
            session.dev_addr.0,
            frame_counter,
            Direction::Down,
            &frm_payload,
        )
    };

    let mut mac_payload = Vec::with_capacity(7 + fopts.len() + 1 + encrypted_frm.len());
    mac_payload.extend_from_slice(&session.dev_addr.0.to_le_bytes());
    mac_payload.push(fopts.len() as u8);
    mac_payload.extend_from_slice(&frame_counter.to_le_bytes()[..2]);
    mac_payload.extend_from_slice(&fopts);
    if let Some(port) = f_port {
        mac_payload.push(port);
    }
    mac_payload.extend_from_slice(&encrypted_frm);

    let mic = crypto::compute_mic(
        &session.keys.nwk_s_int_key,
        session.dev_addr.0,
        frame_counter,
        Direction::Down,
        &mac_payload,
    )?;

    let mut phy_payload = Vec::with_capacity(1 + mac_payload.len() + 4);
    phy_payload.push(0x60); // MHDR: Unconfirmed Data Down
    phy_payload.extend_from_slice(&mac_payload);
    phy_payload.extend_from_slice(&mic);

    let data_rate_index = session.rx2.data_rate.max(session.data_rate_index.saturating_sub(session.rx1_dr_offset));
    let time_on_air = region.time_on_air(data_rate_index, phy_payload.len());

    let rx1_deadline = uplink_time + Duration::from_secs(session.rx1_delay_secs as u64);

    let mut sorted_reports = rx_reports.to_vec();
    sorted_reports.sort_by(|a, b| b.rssi.partial_cmp(&a.rssi).unwrap_or(std::cmp::Ordering::Equal));
    let candidates: Vec<GatewayId> = sorted_reports.iter().map(|r| r.gateway_id).collect();

    let rx1_has_headroom = candidates
        .iter()
        .any(|gw| duty_cycle.has_headroom(*gw, time_on_air, rx1_deadline));
    let use_rx2 = force_rx2 || rx_reports.is_empty() || !rx1_has_headroom;
    let window = if use_rx2 { RxWindow::Rx2 } else { RxWindow::Rx1 };

    let now = if use_rx2 { rx1_deadline + Duration::from_secs(1) } else { rx1_deadline };
    let gateway_id = duty_cycle
        .select_gateway(&candidates, time_on_air, now)
        .ok_or_else(|| NsError::Transient("no gateway with duty-cycle headroom".into()))?;
    duty_cycle.record_transmission(gateway_id, time_on_air, now);

    let rx1_frequency = sorted_reports
        .first()
        .and_then(|r| region.channel_frequency(r.channel_index))
        .unwrap_or(session.rx2.frequency);
    let frequency = if use_rx2 { session.rx2.frequency } else { rx1_frequency };

    Ok(Some(AssembledDownlink {
        gateway_id,
        window,
        frequency,
        data_rate_index,
        time_on_air,
        tx_time: now,
        phy_payload,
        candidate_gateways: candidates,
    }))
}

fn encode_blocks_into(blocks: &[MacCommandBlock], out: &mut Vec<u8>) {
    for block in blocks {
        for command in &block.commands {
            out.push(cid_byte(command.cid));
        }
    }
}

fn cid_byte(cid: crate::model::Cid) -> u8 {
    use crate::model::Cid::*;
    match cid {
        LinkCheckReq => 0x02,
        LinkCheckAns => 0x02,
        LinkADRReq => 0x03,
        LinkADRAns => 0x03,
        DutyCycleReq => 0x04,
        DutyCycleAns => 0x04,
        RXParamSetupReq => 0x05,
        RXParamSetupAns => 0x05,
        DevStatusReq => 0x06,
        DevStatusAns => 0x06,
        NewChannelReq => 0x07,
        NewChannelAns => 0x07,
        RXTimingSetupReq => 0x08,
        RXTimingSetupAns => 0x08,
        TxParamSetupReq => 0x09,
        TxParamSetupAns => 0x09,
        DlChannelReq => 0x0A,
        DlChannelAns => 0x0A,
        RekeyInd => 0x0B,
        RekeyConf => 0x0B,
        ResetInd => 0x01,
        ResetConf => 0x01,
        DeviceTimeReq => 0x0D,
        DeviceTimeAns => 0x0D,
        PingSlotInfoReq => 0x10,
        PingSlotInfoAns => 0x10,
        Unknown(byte) => byte,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::keys::{AesKey, AppSKeyRef, SessionKeys};
    use crate::model::session::{AdrHistory, ChannelMask, MacCommandQueue, Rx2Params};
    use crate::model::{DevAddr, DevEui, JoinEui};

    fn sample_session() -> DeviceSession {
        DeviceSession {
            dev_eui: DevEui([1; 8]),
            dev_addr: DevAddr(0x01020304),
            join_eui: JoinEui([0; 8]),
            keys: SessionKeys {
                nwk_s_enc_key: AesKey([9; 16]),
                nwk_s_int_key: AesKey([8; 16]),
                app_s_key_ref: AppSKeyRef(1),
                session_key_id: 1,
            },
            lorawan_version_minor: 1,
            uplink_frame_counter: 10,
            downlink_n_frame_counter: 4,
            downlink_a_frame_counter: 0,
            uplink_counter_rollover_tolerance: 16384,
            data_rate_index: 5,
            tx_power_index: 2,
            nb_trans: 1,
            rx1_delay_secs: 1,
            rx1_dr_offset: 0,
            rx2: Rx2Params { data_rate: 0, frequency: 869_525_000 },
            enabled_uplink_channels: ChannelMask::from_indices([0, 1, 2]),
            pending_link_adr: None,
            mac_command_queue: MacCommandQueue::new(16),
            last_link_check: None,
            adr_history: AdrHistory::new(20),
        }
    }

    fn sample_device_profile() -> DeviceProfile {
        DeviceProfile {
            profile_id: 1,
            supported_lorawan_version_minor: 1,
            default_channel_indices: vec![0, 1, 2],
            default_rx1_delay_secs: 1,
            default_rx1_dr_offset: 0,
            default_rx2: Rx2Params { data_rate: 0, frequency: 869_525_000 },
            default_data_rate_index: 0,
            default_tx_power_index: 0,
            class_b_supported: false,
            class_c_supported: false,
        }
    }

    fn sample_service_profile() -> ServiceProfile {
        ServiceProfile {
            service_profile_id: 1,
            adr_enabled: false,
            rx_delay_override_secs: None,
            downlink_dwell_time_400ms: false,
            uplink_dwell_time_400ms: false,
            max_eirp_index: 0,
        }
    }

    #[test]
    fn returns_none_when_nothing_to_send() {
        let region = Region::eu868();
        let tracker = DutyCycleTracker::new(Duration::from_secs(3600), 0.01);
        let mut session = sample_session();
        let profile = sample_device_profile();
        let sp = sample_service_profile();
        let permitted = ChannelMask::from_indices([0, 1, 2]);
        let result = assemble(
            &region,
            &tracker,
            &mut session,
            &profile,
            &sp,
            None,
            &permitted,
            &[RxReport { gateway_id: GatewayId([1; 8]), rssi: -80.0, snr: 5.0, channel_index: 0 }],
            false,
            Instant::now(),
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn assembles_frame_with_app_payload() {
        let region = Region::eu868();
        let tracker = DutyCycleTracker::new(Duration::from_secs(3600), 0.01);
        let mut session = sample_session();
        let profile = sample_device_profile();
        let sp = sample_service_profile();
        let permitted = ChannelMask::from_indices([0, 1, 2]);
        let payload = QueuedAppPayload { f_port: 1, bytes: vec![1, 2, 3, 4] };
        let result = assemble(
            &region,
            &tracker,
            &mut session,
            &profile,
            &sp,
            Some(payload),
            &permitted,
            &[RxReport { gateway_id: GatewayId([1; 8]), rssi: -80.0, snr: 5.0, channel_index: 0 }],
            false,
            Instant::now(),
        )
        .unwrap()
        .unwrap();
        assert!(!result.phy_payload.is_empty());
        assert_eq!(session.downlink_n_frame_counter, 5);
    }

    #[test]
    fn forced_rx2_selects_rx2_window() {
        let region = Region::eu868();
        let tracker = DutyCycleTracker::new(Duration::from_secs(3600), 0.01);
        let mut session = sample_session();
        let profile = sample_device_profile();
        let sp = sample_service_profile();
        let permitted = ChannelMask::from_indices([0, 1, 2]);
        let payload = QueuedAppPayload { f_port: 1, bytes: vec![1] };
        let result = assemble(
            &region,
            &tracker,
            &mut session,
            &profile,
            &sp,
            Some(payload),
            &permitted,
            &[RxReport { gateway_id: GatewayId([1; 8]), rssi: -80.0, snr: 5.0, channel_index: 0 }],
            true,
            Instant::now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.window, RxWindow::Rx2);
    }

    #[test]
    fn rx1_uses_uplink_channel_frequency_not_rx2_frequency() {
        let region = Region::eu868();
        let tracker = DutyCycleTracker::new(Duration::from_secs(3600), 0.01);
        let mut session = sample_session();
        let profile = sample_device_profile();
        let sp = sample_service_profile();
        let permitted = ChannelMask::from_indices([0, 1, 2]);
        let payload = QueuedAppPayload { f_port: 1, bytes: vec![1] };
        let result = assemble(
            &region,
            &tracker,
            &mut session,
            &profile,
            &sp,
            Some(payload),
            &permitted,
            &[RxReport { gateway_id: GatewayId([1; 8]), rssi: -80.0, snr: 5.0, channel_index: 1 }],
            false,
            Instant::now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.window, RxWindow::Rx1);
        assert_eq!(result.frequency, region.channel_frequency(1).unwrap());
        assert_ne!(result.frequency, session.rx2.frequency);
    }

    #[test]
    fn exhausted_rx1_duty_cycle_falls_back_to_rx2() {
        let region = Region::eu868();
        let tracker = DutyCycleTracker::new(Duration::from_secs(3600), 0.01);
        let mut session = sample_session();
        let profile = sample_device_profile();
        let sp = sample_service_profile();
        let permitted = ChannelMask::from_indices([0, 1, 2]);
        let gw = GatewayId([1; 8]);
        let uplink_time = Instant::now();
        let rx1_deadline = uplink_time + Duration::from_secs(session.rx1_delay_secs as u64);
        // Exhaust this gateway's duty-cycle budget for the RX1 instant so
        // the window selector must fall back to RX2 instead of blindly
        // keeping RX1.
        tracker.record_transmission(gw, Duration::from_secs(35), rx1_deadline);
        let payload = QueuedAppPayload { f_port: 1, bytes: vec![1] };
        let result = assemble(
            &region,
            &tracker,
            &mut session,
            &profile,
            &sp,
            Some(payload),
            &permitted,
            &[RxReport { gateway_id: gw, rssi: -80.0, snr: 5.0, channel_index: 0 }],
            false,
            uplink_time,
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.window, RxWindow::Rx2);
        assert_eq!(result.frequency, session.rx2.frequency);
    }
}
