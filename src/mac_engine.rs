//! # MAC command engine (C3)
//!
//! A dispatch table keyed by CID, directly grounded on the vendor
//! extension registry pattern elsewhere in this crate (a
//! `Mutex<HashMap<_, Arc<dyn _>>>` with `register`/`get` and a
//! `with_defaults` constructor). Here the map is keyed by `Cid` instead
//! of manufacturer code, and each entry handles exactly one command
//! rather than covering several optional hooks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::band::region;
use crate::error::NsError;
use crate::model::mac_command::{
    Cid, LoRaWanVersionMinor, MacCommand, MacCommandBlock, MacCommandPayload,
};
use crate::model::{DeviceProfile, DeviceSession, ServiceProfile};

/// Per-dispatch context a handler needs beyond the session/profile
/// triple: the uplink's RX diagnostics, used by LinkCheckReq.
#[derive(Debug, Clone, Default)]
pub struct UplinkContext {
    /// One SNR reading per gateway that received the uplink.
    pub rx_snr_db: Vec<f32>,
}

impl UplinkContext {
    pub fn gw_cnt(&self) -> u8 {
        self.rx_snr_db.len().min(u8::MAX as usize) as u8
    }

    pub fn max_snr_db(&self) -> f32 {
        self.rx_snr_db.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}

/// One CID's handling logic: consumes the block, mutates the session in
/// place, and returns zero or more response blocks. Handlers must be
/// pure with respect to external I/O — any call back into the session
/// store happens through the caller, not the handler (§4.3).
pub trait MacCommandHandler: Send + Sync {
    fn handle(
        &self,
        ctx: &UplinkContext,
        session: &mut DeviceSession,
        device_profile: &DeviceProfile,
        service_profile: &ServiceProfile,
        block: &MacCommandBlock,
    ) -> Result<Vec<MacCommandBlock>, NsError>;
}

/// Requires exactly one command in the block and hands back its payload,
/// failing with *Malformed* otherwise — the "exactly one MAC command per
/// block" policy (§4.3).
fn single_command(block: &MacCommandBlock) -> Result<&MacCommand, NsError> {
    match block.commands.as_slice() {
        [only] => Ok(only),
        _ => Err(NsError::Malformed(format!(
            "expected exactly one {:?} command in block, found {}",
            block.cid,
            block.commands.len()
        ))),
    }
}

struct LinkCheckReqHandler;
impl MacCommandHandler for LinkCheckReqHandler {
    fn handle(
        &self,
        ctx: &UplinkContext,
        session: &mut DeviceSession,
        _device_profile: &DeviceProfile,
        _service_profile: &ServiceProfile,
        block: &MacCommandBlock,
    ) -> Result<Vec<MacCommandBlock>, NsError> {
        let cmd = single_command(block)?;
        if !matches!(cmd.payload, MacCommandPayload::LinkCheckReq) {
            return Err(NsError::Malformed("LinkCheckReq payload shape mismatch".into()));
        }
        let margin = region().link_check_margin(session.data_rate_index, ctx.max_snr_db());
        let gw_cnt = ctx.gw_cnt();
        session.last_link_check = Some(crate::model::session::LastLinkCheck { gw_cnt, margin });
        Ok(vec![MacCommandBlock::single(
            Cid::LinkCheckAns,
            MacCommandPayload::LinkCheckAns { gw_cnt, margin },
        )])
    }
}

struct LinkAdrAnsHandler;
impl MacCommandHandler for LinkAdrAnsHandler {
    fn handle(
        &self,
        _ctx: &UplinkContext,
        session: &mut DeviceSession,
        _device_profile: &DeviceProfile,
        _service_profile: &ServiceProfile,
        block: &MacCommandBlock,
    ) -> Result<Vec<MacCommandBlock>, NsError> {
        let cmd = single_command(block)?;
        let MacCommandPayload::LinkADRAns(status) = &cmd.payload else {
            return Err(NsError::Malformed("LinkADRAns payload shape mismatch".into()));
        };
        let Some(pending) = session.pending_link_adr.take() else {
            debug!("LinkADRAns received with no pending proposal, ignoring");
            return Ok(vec![]);
        };
        if status.all_accepted() {
            session.enabled_uplink_channels = pending.channel_mask;
            session.data_rate_index = pending.data_rate;
            session.tx_power_index = pending.tx_power_index;
            session.nb_trans = pending.nb_trans;
        } else {
            debug!(?status, "LinkADR proposal rejected, keeping live session state");
        }
        Ok(vec![])
    }
}

struct ResetIndHandler;
impl MacCommandHandler for ResetIndHandler {
    fn handle(
        &self,
        _ctx: &UplinkContext,
        session: &mut DeviceSession,
        device_profile: &DeviceProfile,
        _service_profile: &ServiceProfile,
        block: &MacCommandBlock,
    ) -> Result<Vec<MacCommandBlock>, NsError> {
        let cmd = single_command(block)?;
        let MacCommandPayload::ResetInd { dev_lorawan_version_minor } = &cmd.payload else {
            return Err(NsError::Malformed("ResetInd payload shape mismatch".into()));
        };
        let serv_minor = device_profile
            .supported_lorawan_version_minor
            .min(dev_lorawan_version_minor.0);

        session.uplink_frame_counter = 0;
        session.downlink_n_frame_counter = 0;
        session.downlink_a_frame_counter = 0;
        session.enabled_uplink_channels = device_profile.default_channel_indices.iter().copied().collect();
        session.rx1_delay_secs = device_profile.default_rx1_delay_secs;
        session.rx1_dr_offset = device_profile.default_rx1_dr_offset;
        session.rx2 = device_profile.default_rx2;
        session.data_rate_index = device_profile.default_data_rate_index;
        session.tx_power_index = device_profile.default_tx_power_index;
        session.pending_link_adr = None;

        Ok(vec![MacCommandBlock::single(
            Cid::ResetConf,
            MacCommandPayload::ResetConf {
                serv_lorawan_version_minor: LoRaWanVersionMinor(serv_minor),
            },
        )])
    }
}

struct RekeyIndHandler;
impl MacCommandHandler for RekeyIndHandler {
    fn handle(
        &self,
        _ctx: &UplinkContext,
        _session: &mut DeviceSession,
        device_profile: &DeviceProfile,
        _service_profile: &ServiceProfile,
        block: &MacCommandBlock,
    ) -> Result<Vec<MacCommandBlock>, NsError> {
        let cmd = single_command(block)?;
        let MacCommandPayload::RekeyInd { dev_lorawan_version_minor } = &cmd.payload else {
            return Err(NsError::Malformed("RekeyInd payload shape mismatch".into()));
        };
        let serv_minor = device_profile
            .supported_lorawan_version_minor
            .min(dev_lorawan_version_minor.0);
        Ok(vec![MacCommandBlock::single(
            Cid::RekeyConf,
            MacCommandPayload::RekeyConf {
                serv_lorawan_version_minor: LoRaWanVersionMinor(serv_minor),
            },
        )])
    }
}

struct DeviceTimeReqHandler;
impl MacCommandHandler for DeviceTimeReqHandler {
    fn handle(
        &self,
        _ctx: &UplinkContext,
        _session: &mut DeviceSession,
        _device_profile: &DeviceProfile,
        _service_profile: &ServiceProfile,
        block: &MacCommandBlock,
    ) -> Result<Vec<MacCommandBlock>, NsError> {
        let cmd = single_command(block)?;
        if !matches!(cmd.payload, MacCommandPayload::DeviceTimeReq) {
            return Err(NsError::Malformed("DeviceTimeReq payload shape mismatch".into()));
        }
        let now = Utc::now();
        Ok(vec![MacCommandBlock::single(
            Cid::DeviceTimeAns,
            MacCommandPayload::DeviceTimeAns {
                seconds: now.timestamp() as u32,
                frac_seconds: (now.timestamp_subsec_millis() / 4) as u8,
            },
        )])
    }
}

/// Acknowledgment-only handler for CIDs whose device-originated `*Ans`
/// carries no pending server-side state to commit beyond logging the
/// outcome (DutyCycleAns, RXParamSetupAns, NewChannelAns, DlChannelAns,
/// TxParamSetupAns). LinkADRAns is the one `*Ans` with real committed
/// state, handled separately above.
struct AckOnlyHandler {
    cid: Cid,
}

impl MacCommandHandler for AckOnlyHandler {
    fn handle(
        &self,
        _ctx: &UplinkContext,
        _session: &mut DeviceSession,
        _device_profile: &DeviceProfile,
        _service_profile: &ServiceProfile,
        block: &MacCommandBlock,
    ) -> Result<Vec<MacCommandBlock>, NsError> {
        let _ = single_command(block)?;
        debug!(cid = ?self.cid, "acknowledgment received, no further action");
        Ok(vec![])
    }
}

struct PingSlotInfoReqHandler;
impl MacCommandHandler for PingSlotInfoReqHandler {
    fn handle(
        &self,
        _ctx: &UplinkContext,
        _session: &mut DeviceSession,
        _device_profile: &DeviceProfile,
        _service_profile: &ServiceProfile,
        block: &MacCommandBlock,
    ) -> Result<Vec<MacCommandBlock>, NsError> {
        let cmd = single_command(block)?;
        if !matches!(cmd.payload, MacCommandPayload::PingSlotInfoReq { .. }) {
            return Err(NsError::Malformed("PingSlotInfoReq payload shape mismatch".into()));
        }
        Ok(vec![MacCommandBlock::single(Cid::PingSlotInfoAns, MacCommandPayload::PingSlotInfoAns)])
    }
}

/// CID-keyed dispatch table.
pub struct MacCommandEngine {
    handlers: Mutex<HashMap<Cid, Arc<dyn MacCommandHandler>>>,
}

impl MacCommandEngine {
    pub fn new() -> Self {
        Self { handlers: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, cid: Cid, handler: Arc<dyn MacCommandHandler>) {
        self.handlers.lock().unwrap().insert(cid, handler);
    }

    /// Builds the engine with every handler specified in §4.3 wired in.
    pub fn with_defaults() -> Self {
        let engine = Self::new();
        engine.register(Cid::LinkCheckReq, Arc::new(LinkCheckReqHandler));
        engine.register(Cid::LinkADRAns, Arc::new(LinkAdrAnsHandler));
        engine.register(Cid::ResetInd, Arc::new(ResetIndHandler));
        engine.register(Cid::RekeyInd, Arc::new(RekeyIndHandler));
        engine.register(Cid::DeviceTimeReq, Arc::new(DeviceTimeReqHandler));
        engine.register(Cid::DutyCycleAns, Arc::new(AckOnlyHandler { cid: Cid::DutyCycleAns }));
        engine.register(Cid::RXParamSetupAns, Arc::new(AckOnlyHandler { cid: Cid::RXParamSetupAns }));
        engine.register(Cid::NewChannelAns, Arc::new(AckOnlyHandler { cid: Cid::NewChannelAns }));
        engine.register(Cid::DlChannelAns, Arc::new(AckOnlyHandler { cid: Cid::DlChannelAns }));
        engine.register(Cid::TxParamSetupAns, Arc::new(AckOnlyHandler { cid: Cid::TxParamSetupAns }));
        engine.register(Cid::PingSlotInfoReq, Arc::new(PingSlotInfoReqHandler));
        engine
    }

    /// Dispatches one block. An unsupported/unregistered CID is ignored
    /// with a warning, not treated as fatal (§4.3).
    #[instrument(skip(self, ctx, session, device_profile, service_profile, block))]
    pub fn dispatch(
        &self,
        ctx: &UplinkContext,
        session: &mut DeviceSession,
        device_profile: &DeviceProfile,
        service_profile: &ServiceProfile,
        block: &MacCommandBlock,
    ) -> Result<Vec<MacCommandBlock>, NsError> {
        let handler = self.handlers.lock().unwrap().get(&block.cid).cloned();
        match handler {
            Some(handler) => {
                let result = handler.handle(ctx, session, device_profile, service_profile, block);
                crate::telemetry::record_mac_command_dispatched(session.dev_eui);
                result
            }
            None => {
                warn!(cid = ?block.cid, "unsupported MAC command CID, ignoring");
                Ok(vec![])
            }
        }
    }
}

impl Default for MacCommandEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}
