//! MAC command identifiers, payload variants, and the block type the MAC
//! command engine (C3) consumes and emits.
//!
//! The original Go implementation carries MAC command payloads as an
//! opaque `interface{}`, type-asserted per CID at the call site. Per
//! Design Note "Dynamic payload typing" this crate replaces that with a
//! tagged-variant payload (`MacCommandPayload`) matched with `match`
//! instead of a type assertion.

use crate::model::ids::DevEui;

/// One byte identifying a MAC command, per the LoRaWAN specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Cid {
    LinkCheckReq,
    LinkCheckAns,
    LinkADRReq,
    LinkADRAns,
    DutyCycleReq,
    DutyCycleAns,
    RXParamSetupReq,
    RXParamSetupAns,
    DevStatusReq,
    DevStatusAns,
    NewChannelReq,
    NewChannelAns,
    RXTimingSetupReq,
    RXTimingSetupAns,
    TxParamSetupReq,
    TxParamSetupAns,
    DlChannelReq,
    DlChannelAns,
    RekeyInd,
    RekeyConf,
    ResetInd,
    ResetConf,
    DeviceTimeReq,
    DeviceTimeAns,
    PingSlotInfoReq,
    PingSlotInfoAns,
    /// Reserved or vendor-specific CID that this build does not implement.
    Unknown(u8),
}

impl Cid {
    /// True for CIDs this engine carries a handler table entry for.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Cid::Unknown(_))
    }
}

/// Three accept/reject status bits carried by LinkADRAns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct LinkAdrAnsStatus {
    pub channel_mask_ack: bool,
    pub data_rate_ack: bool,
    pub power_ack: bool,
}

impl LinkAdrAnsStatus {
    /// §4.3: all three bits must be set for the proposal to commit.
    pub fn all_accepted(&self) -> bool {
        self.channel_mask_ack && self.data_rate_ack && self.power_ack
    }
}

/// One LinkADRReq payload (one "page" of a ChMaskCntl sequence).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinkAdrReqPayload {
    pub data_rate: u8,
    pub tx_power: u8,
    pub ch_mask: u16,
    pub ch_mask_cntl: u8,
    pub nb_trans: u8,
}

/// LoRaWAN minor version carried by ResetInd/ResetConf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LoRaWanVersionMinor(pub u8);

/// Tagged-variant MAC command payload, replacing the dynamic-typing
/// pattern the original implementation uses.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MacCommandPayload {
    LinkCheckReq,
    LinkCheckAns { gw_cnt: u8, margin: u8 },
    LinkADRReq(LinkAdrReqPayload),
    LinkADRAns(LinkAdrAnsStatus),
    ResetInd { dev_lorawan_version_minor: LoRaWanVersionMinor },
    ResetConf { serv_lorawan_version_minor: LoRaWanVersionMinor },
    RekeyInd { dev_lorawan_version_minor: LoRaWanVersionMinor },
    RekeyConf { serv_lorawan_version_minor: LoRaWanVersionMinor },
    DeviceTimeReq,
    DeviceTimeAns { seconds: u32, frac_seconds: u8 },
    DutyCycleReq { max_duty_cycle: u8 },
    DutyCycleAns,
    RXParamSetupReq { rx1_dr_offset: u8, rx2_data_rate: u8, frequency: u32 },
    RXParamSetupAns { channel_ack: bool, rx2_dr_ack: bool, rx1_dr_offset_ack: bool },
    NewChannelReq { ch_index: u8, freq: u32, min_dr: u8, max_dr: u8 },
    NewChannelAns { channel_freq_ok: bool, dr_range_ok: bool },
    DlChannelReq { ch_index: u8, freq: u32 },
    DlChannelAns { channel_freq_ok: bool, uplink_freq_exists: bool },
    TxParamSetupReq { downlink_dwell_time: bool, uplink_dwell_time: bool, max_eirp: u8 },
    TxParamSetupAns,
    PingSlotInfoReq { periodicity: u8 },
    PingSlotInfoAns,
    /// Payload for an unsupported/reserved CID, carried opaquely.
    Raw(Vec<u8>),
}

/// One MAC command: a CID plus its payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MacCommand {
    pub cid: Cid,
    pub payload: MacCommandPayload,
}

/// A command-identifier plus a non-empty ordered sequence of MAC commands
/// sharing that CID — the unit C3 consumes and emits. Wire serialization
/// preserves in-block order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MacCommandBlock {
    pub cid: Cid,
    pub commands: Vec<MacCommand>,
}

impl MacCommandBlock {
    /// Builds a block, checking the non-empty and shared-CID invariants.
    pub fn new(cid: Cid, commands: Vec<MacCommand>) -> Result<Self, crate::error::NsError> {
        if commands.is_empty() {
            return Err(crate::error::NsError::Malformed(
                "MAC command block must not be empty".into(),
            ));
        }
        if commands.iter().any(|c| c.cid != cid) {
            return Err(crate::error::NsError::Malformed(
                "all commands in a block must share the block's CID".into(),
            ));
        }
        Ok(Self { cid, commands })
    }

    /// Single-command convenience constructor, the common case for every
    /// response block the MAC engine emits.
    pub fn single(cid: Cid, payload: MacCommandPayload) -> Self {
        Self {
            cid,
            commands: vec![MacCommand { cid, payload }],
        }
    }
}

/// Context identifying which device a MAC command block was received from
/// or is destined to, used for logging (correlates with `DevEui`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MacCommandTarget(pub DevEui);
