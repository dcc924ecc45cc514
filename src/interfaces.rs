//! # External interfaces
//!
//! Capability interfaces the core depends on but does not implement: the
//! gateway bridge, the application server, the join server, and the
//! roaming backhaul. Each is an `async_trait` so the core stays
//! transport-agnostic; this crate ships no real network implementation
//! of any of them, only the trait boundary plus in-memory test fakes.

use async_trait::async_trait;

use crate::downlink_assembler::AssembledDownlink;
use crate::error::NsError;
use crate::model::downlink::TxAckStatus;
use crate::model::{DevEui, GatewayId};

/// Hands an assembled downlink to the gateway bridge for transmission.
#[async_trait]
pub trait GatewayBackend: Send + Sync {
    async fn send_downlink(&self, frame: &AssembledDownlink) -> Result<(), NsError>;
}

/// Delivers decoded uplink application payloads upstream.
#[async_trait]
pub trait ApplicationServerClient: Send + Sync {
    async fn deliver_uplink(&self, dev_eui: DevEui, f_port: u8, payload: &[u8]) -> Result<(), NsError>;
}

/// Resolves session keys for a device during activation.
#[async_trait]
pub trait JoinServerClient: Send + Sync {
    async fn resolve_session_keys(
        &self,
        dev_eui: DevEui,
        join_eui: crate::model::JoinEui,
    ) -> Result<crate::model::SessionKeys, NsError>;
}

/// Roaming partner's home-network-server backhaul: the entry point for
/// `HandleRoamingTxAck` (§6).
#[async_trait]
pub trait RoamingBackhaul: Send + Sync {
    async fn handle_roaming_tx_ack(
        &self,
        gateway_id: GatewayId,
        token: u32,
        status: TxAckStatus,
        error: Option<String>,
    ) -> Result<(), NsError>;
}
