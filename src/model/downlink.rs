//! `PendingDownlink`: an assembled frame awaiting gateway acknowledgement,
//! and the TX-ack status vocabulary the reconciler (C7) translates.

use std::time::Instant;

use crate::model::ids::{DevEui, GatewayId};

/// Token uniquely identifying a PendingDownlink within one gateway, for
/// the reconciliation horizon (§3 invariants: exactly one PendingDownlink
/// per (gateway, token) at any time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DownlinkToken(pub u32);

/// Gateway-reported outcome of a downlink transmission attempt, carried
/// by a DownlinkTXAck (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAckStatus {
    Ok,
    TooLate,
    TooEarly,
    CollisionPacket,
    CollisionBeacon,
    TxFreq,
    TxPower,
    GpsUnlocked,
    QueueFull,
    InternalError,
}

impl TxAckStatus {
    /// Statuses the reconciler treats as transient: worth retrying on a
    /// different gateway if the pending slot still permits it (§6).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TxAckStatus::TooLate
                | TxAckStatus::TooEarly
                | TxAckStatus::CollisionPacket
                | TxAckStatus::CollisionBeacon
                | TxAckStatus::QueueFull
        )
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, TxAckStatus::Ok)
    }
}

/// An assembled frame waiting for a gateway's acknowledgement.
///
/// Removed from the table on a positive ack; marked failed on a negative
/// ack or on deadline expiry, whichever the sweeper or the reconciler
/// observes first.
#[derive(Debug, Clone)]
pub struct PendingDownlink {
    pub dev_eui: DevEui,
    pub gateway_id: GatewayId,
    pub token: DownlinkToken,
    pub deadline: Instant,
    pub retry_count: u8,
    pub max_retries: u8,
    pub payload: Vec<u8>,
    /// Gateways that received the triggering uplink, best signal first —
    /// a retry picks the next one instead of re-targeting `gateway_id`.
    pub candidate_gateways: Vec<GatewayId>,
}

impl PendingDownlink {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Whether the reconciler may still retry this slot on another
    /// gateway after a transient negative ack.
    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
