//! # Uplink handling
//!
//! The other half of the data flow C5 anchors on the downlink side:
//! "an uplink arrives → session loaded via C2 → MAC blocks dispatched
//! through C3 (consulting C1, C4) → response blocks queued into the
//! session". PHY-payload framing (MHDR/FHDR bit-packing, the
//! packet-forwarder wire codec) is an external collaborator's concern;
//! this module picks up once a caller has already split an uplink into
//! its frame counter, MIC, FPort, FRMPayload, and decoded MAC-command
//! blocks (MAC-command decoding from FOpts/FPort-0 FRMPayload, which
//! requires NwkSEncKey, happens on that same external boundary).
//! FPort > 0 FRMPayload is encrypted under AppSKey, which this core
//! never holds (only an opaque `AppSKeyRef`, per §3); it is forwarded
//! to the application server untouched.

use tracing::{instrument, warn};

use crate::crypto::{self, Direction};
use crate::error::NsError;
use crate::mac_engine::{MacCommandEngine, UplinkContext};
use crate::model::mac_command::MacCommandBlock;
use crate::model::{DeviceProfile, DeviceSession, ServiceProfile};
use crate::telemetry;

/// One uplink frame's already-decoded pieces, ready for session
/// mutation and MAC-command dispatch.
pub struct UplinkFrame<'a> {
    pub f_cnt: u32,
    pub mic: [u8; 4],
    pub mic_message: &'a [u8],
    /// AppSKey-encrypted application payload, present only when
    /// `f_port` is `Some(n)` with `n > 0`.
    pub frm_payload: &'a [u8],
    pub f_port: Option<u8>,
    pub mac_blocks: Vec<MacCommandBlock>,
    pub rx_snr_db: Vec<f32>,
}

/// Outcome of successfully processing one uplink.
pub struct UplinkOutcome {
    /// Still-encrypted application payload, present when `f_port` was
    /// set and nonzero; forwarded to the application server as-is.
    pub app_payload: Option<Vec<u8>>,
    /// Response blocks produced by the MAC engine, to be drained into
    /// the next downlink by C5.
    pub response_blocks: Vec<MacCommandBlock>,
}

/// Verifies the MIC, accepts (or rejects) the frame counter, and
/// dispatches every MAC-command block through the engine, mutating
/// `session` in place. A MIC failure or counter regression is a
/// protocol fault (§7) and does not mutate `session`.
#[instrument(skip(session, device_profile, service_profile, engine, frame), fields(dev_eui = %session.dev_eui))]
pub fn handle_uplink(
    session: &mut DeviceSession,
    device_profile: &DeviceProfile,
    service_profile: &ServiceProfile,
    engine: &MacCommandEngine,
    frame: UplinkFrame<'_>,
) -> Result<UplinkOutcome, NsError> {
    let expected_mic = crypto::compute_mic(
        &session.keys.nwk_s_int_key,
        session.dev_addr.0,
        frame.f_cnt,
        Direction::Up,
        frame.mic_message,
    )?;
    if expected_mic != frame.mic {
        telemetry::record_protocol_fault(session.dev_eui);
        return Err(NsError::Protocol(format!(
            "MIC mismatch for {} at f_cnt {}",
            session.dev_eui, frame.f_cnt
        )));
    }

    if !session.accepts_uplink_counter(frame.f_cnt) {
        telemetry::record_protocol_fault(session.dev_eui);
        return Err(NsError::Protocol(format!(
            "uplink counter regression for {}: got {}, have {}",
            session.dev_eui, frame.f_cnt, session.uplink_frame_counter
        )));
    }
    session.uplink_frame_counter = frame.f_cnt;

    let ctx = UplinkContext { rx_snr_db: frame.rx_snr_db };
    let mut response_blocks = Vec::new();
    for block in &frame.mac_blocks {
        match engine.dispatch(&ctx, session, device_profile, service_profile, block) {
            Ok(responses) => response_blocks.extend(responses),
            Err(e) if e.is_frame_droppable() => {
                warn!(error = %e, cid = ?block.cid, "dropping malformed MAC command block");
                telemetry::record_protocol_fault(session.dev_eui);
            }
            Err(e) => return Err(e),
        }
    }

    for block in &response_blocks {
        session.mac_command_queue.push(block.clone());
    }

    telemetry::record_uplink_handled(session.dev_eui);

    let app_payload = match frame.f_port {
        Some(0) | None => None,
        Some(_) => Some(frame.frm_payload.to_vec()),
    };

    Ok(UplinkOutcome { app_payload, response_blocks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::compute_mic;
    use crate::model::keys::{AesKey, AppSKeyRef, SessionKeys};
    use crate::model::session::{ChannelMask, MacCommandQueue, PendingLinkAdr, Rx2Params, AdrHistory};
    use crate::model::{DevAddr, DevEui, JoinEui};

    fn sample_session() -> DeviceSession {
        DeviceSession {
            dev_eui: DevEui([9; 8]),
            dev_addr: DevAddr(0x0102_0304),
            join_eui: JoinEui([1; 8]),
            keys: SessionKeys {
                nwk_s_enc_key: AesKey([0x11; 16]),
                nwk_s_int_key: AesKey([0x11; 16]),
                app_s_key_ref: AppSKeyRef(1),
                session_key_id: 1,
            },
            lorawan_version_minor: 1,
            uplink_frame_counter: 5,
            downlink_n_frame_counter: 0,
            downlink_a_frame_counter: 0,
            uplink_counter_rollover_tolerance: 16,
            data_rate_index: 0,
            tx_power_index: 0,
            nb_trans: 1,
            rx1_delay_secs: 1,
            rx1_dr_offset: 0,
            rx2: Rx2Params { data_rate: 0, frequency: 869_525_000 },
            enabled_uplink_channels: ChannelMask::from_indices([0, 1, 2]),
            pending_link_adr: None::<PendingLinkAdr>,
            mac_command_queue: MacCommandQueue::new(16),
            last_link_check: None,
            adr_history: AdrHistory::new(20),
        }
    }

    #[test]
    fn mic_mismatch_is_rejected_without_mutating_counter() {
        let mut session = sample_session();
        let engine = MacCommandEngine::with_defaults();
        let frame = UplinkFrame {
            f_cnt: 6,
            mic: [0, 0, 0, 0],
            mic_message: b"irrelevant",
            frm_payload: &[],
            f_port: None,
            mac_blocks: vec![],
            rx_snr_db: vec![],
        };
        let result = handle_uplink(&mut session, &sample_device_profile(), &sample_service_profile(), &engine, frame);
        assert!(matches!(result, Err(NsError::Protocol(_))));
        assert_eq!(session.uplink_frame_counter, 5);
    }

    #[test]
    fn valid_mic_and_counter_advances_state() {
        let mut session = sample_session();
        let engine = MacCommandEngine::with_defaults();
        let msg = b"uplink-mic-message";
        let mic = compute_mic(&session.keys.nwk_s_int_key, session.dev_addr.0, 6, Direction::Up, msg).unwrap();
        let frame = UplinkFrame {
            f_cnt: 6,
            mic,
            mic_message: msg,
            frm_payload: &[0xAA, 0xBB],
            f_port: Some(1),
            mac_blocks: vec![],
            rx_snr_db: vec![7.0],
        };
        let outcome = handle_uplink(&mut session, &sample_device_profile(), &sample_service_profile(), &engine, frame).unwrap();
        assert_eq!(session.uplink_frame_counter, 6);
        assert!(outcome.app_payload.is_some());
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
}
