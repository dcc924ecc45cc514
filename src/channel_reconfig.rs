//! # Channel reconfigurator (C4)
//!
//! Ported from the original network server's channel-reconfiguration
//! function (see `examples/original_source/internal/channels/channels.go`):
//! compares a session's enabled uplink channel set against the
//! operator-permitted set, and if they differ, asks the band module (C1)
//! to synthesize the LinkADRReq sequence that reproduces the permitted
//! set on the device.

use tracing::debug;

use crate::band::Region;
use crate::error::NsError;
use crate::model::session::ChannelMask;
use crate::model::{Cid, DeviceSession, MacCommandBlock};

/// Computes the LinkADR block needed to align `session`'s enabled
/// uplink channels with `permitted`, or `None` if no change is required.
///
/// Reproduces the original's "ugly workaround": if any of the three
/// default channels (indices 0, 1, 2) is absent from the session's
/// *current* enabled set, the region's synthesizer cannot emit a mask
/// that disables them, so this returns `None` and relies on separate
/// NewChannelReq commands to reconcile per-channel state instead
/// (§4.4).
pub fn reconfigure(
    region: &Region,
    session: &DeviceSession,
    permitted: &ChannelMask,
) -> Result<Option<MacCommandBlock>, NsError> {
    if session.enabled_uplink_channels.default_channel_count() != 3 {
        debug!("default channel missing from current enabled set, skipping LinkADR synthesis");
        return Ok(None);
    }

    let mut payloads = region.link_adr_req_payloads_for_enabled_channels(permitted);
    if payloads.is_empty() {
        return Ok(None);
    }

    let last = payloads.last_mut().expect("non-empty checked above");
    last.tx_power = session.tx_power_index;
    last.data_rate = session.data_rate_index;
    last.nb_trans = session.nb_trans;

    let commands = payloads
        .into_iter()
        .map(|payload| crate::model::MacCommand {
            cid: Cid::LinkADRReq,
            payload: crate::model::MacCommandPayload::LinkADRReq(payload),
        })
        .collect();

    Ok(Some(MacCommandBlock::new(Cid::LinkADRReq, commands)?))
}
