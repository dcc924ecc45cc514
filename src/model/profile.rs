//! Slow-changing, read-mostly device and tenant policy. Both profiles are
//! mutated only by the external provisioning collaborator (§2); the core
//! treats them as read-only inputs to the MAC engine and downlink
//! assembler.

use crate::model::session::Rx2Params;

/// Boot parameters a device resets to on ResetInd (§4.3), plus the
/// region-default channel set applied at Reset and at initial activation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeviceProfile {
    pub profile_id: u32,
    pub supported_lorawan_version_minor: u8,
    pub default_channel_indices: Vec<u8>,
    pub default_rx1_delay_secs: u8,
    pub default_rx1_dr_offset: u8,
    pub default_rx2: Rx2Params,
    pub default_data_rate_index: u8,
    pub default_tx_power_index: u8,
    pub class_b_supported: bool,
    pub class_c_supported: bool,
}

/// Tenant-level policy applied uniformly across that tenant's devices.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServiceProfile {
    pub service_profile_id: u32,
    pub adr_enabled: bool,
    pub rx_delay_override_secs: Option<u8>,
    pub downlink_dwell_time_400ms: bool,
    pub uplink_dwell_time_400ms: bool,
    pub max_eirp_index: u8,
}

impl ServiceProfile {
    /// The RX1 delay to apply, honoring a tenant override over the
    /// device profile's default.
    pub fn effective_rx1_delay_secs(&self, device_default: u8) -> u8 {
        self.rx_delay_override_secs.unwrap_or(device_default)
    }
}
