//! The `DeviceSession` — authoritative runtime state for one activated
//! end-device — plus its satellite bounded collections (channel mask,
//! ADR history ring, pending MAC-command queue).

use std::collections::{BTreeSet, VecDeque};

use crate::model::ids::{DevAddr, DevEui, JoinEui};
use crate::model::keys::SessionKeys;
use crate::model::mac_command::{Cid, MacCommandBlock};

/// Ordered set of enabled uplink channel indices. Backed by a `BTreeSet`
/// so iteration is always index-ascending, matching the wire order
/// LinkADR payloads are built in.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChannelMask(BTreeSet<u8>);

impl ChannelMask {
    pub fn from_indices(indices: impl IntoIterator<Item = u8>) -> Self {
        Self(indices.into_iter().collect())
    }

    pub fn contains(&self, index: u8) -> bool {
        self.0.contains(&index)
    }

    pub fn indices(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// How many of the region's default channels (0, 1, 2) are enabled.
    /// Used by the channel reconfigurator's edge case (§4.4).
    pub fn default_channel_count(&self) -> usize {
        [0u8, 1, 2].iter().filter(|i| self.0.contains(i)).count()
    }
}

impl FromIterator<u8> for ChannelMask {
    fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
        Self::from_indices(iter)
    }
}

/// A proposed but not-yet-confirmed LinkADR change: channel mask, data
/// rate, TX power. Lives separately from the live session state until a
/// LinkADRAns with all three status bits set commits it (§3 invariants).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PendingLinkAdr {
    pub channel_mask: ChannelMask,
    pub data_rate: u8,
    pub tx_power_index: u8,
    pub nb_trans: u8,
}

/// One (data-rate, max-SNR) ADR history sample.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdrSample {
    pub data_rate: u8,
    pub max_snr: f32,
}

/// Fixed-capacity ring of the last N ADR samples.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdrHistory {
    capacity: usize,
    samples: VecDeque<AdrSample>,
}

impl AdrHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: AdrSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.samples.len() == self.capacity
    }

    pub fn samples(&self) -> impl Iterator<Item = &AdrSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Bounded, per-CID-coalescing queue of MAC command blocks awaiting
/// piggyback on the next downlink. A newly queued block with a CID
/// already present replaces the existing entry for that CID rather than
/// appending, keeping the queue from growing unbounded under repeated
/// ADR churn.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MacCommandQueue {
    capacity: usize,
    blocks: VecDeque<MacCommandBlock>,
}

impl MacCommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            blocks: VecDeque::new(),
        }
    }

    /// Enqueues a block, coalescing on CID and dropping the oldest
    /// non-matching block if the queue is at capacity.
    pub fn push(&mut self, block: MacCommandBlock) {
        if let Some(pos) = self.blocks.iter().position(|b| b.cid == block.cid) {
            self.blocks[pos] = block;
            return;
        }
        if self.blocks.len() == self.capacity && self.capacity > 0 {
            self.blocks.pop_front();
        }
        self.blocks.push_back(block);
    }

    /// Drains as many queued blocks as fit within `budget_bytes` of
    /// serialized payload, in FIFO order, removing them from the queue.
    pub fn drain_within_budget(
        &mut self,
        budget_bytes: usize,
        size_of: impl Fn(&MacCommandBlock) -> usize,
    ) -> Vec<MacCommandBlock> {
        let mut drained = Vec::new();
        let mut used = 0;
        while let Some(front) = self.blocks.front() {
            let size = size_of(front);
            if used + size > budget_bytes {
                break;
            }
            used += size;
            drained.push(self.blocks.pop_front().unwrap());
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains_cid(&self, cid: Cid) -> bool {
        self.blocks.iter().any(|b| b.cid == cid)
    }
}

/// Metadata about the most recent LinkCheckReq reception, kept so the
/// engine can answer diagnostic queries without a fresh uplink.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LastLinkCheck {
    pub gw_cnt: u8,
    pub margin: u8,
}

/// RX2 parameters (data rate + frequency), also the target of
/// RXParamSetupReq/Ans.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Rx2Params {
    pub data_rate: u8,
    pub frequency: u32,
}

/// Authoritative runtime state for one activated end-device (§3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeviceSession {
    // Identity
    pub dev_eui: DevEui,
    pub dev_addr: DevAddr,
    pub join_eui: JoinEui,

    // Cryptographic material
    pub keys: SessionKeys,

    // LoRaWAN version minor, used for Reset back-negotiation (§4.3).
    pub lorawan_version_minor: u8,

    // Frame counters
    pub uplink_frame_counter: u32,
    pub downlink_n_frame_counter: u32,
    pub downlink_a_frame_counter: u32,
    /// Tolerance window (in counter units) for uplink rollover (§3, §8).
    pub uplink_counter_rollover_tolerance: u32,

    // Radio parameters
    pub data_rate_index: u8,
    pub tx_power_index: u8,
    pub nb_trans: u8,
    pub rx1_delay_secs: u8,
    pub rx1_dr_offset: u8,
    pub rx2: Rx2Params,

    // Channel mask: live (last-accepted) state and any in-flight proposal.
    pub enabled_uplink_channels: ChannelMask,
    pub pending_link_adr: Option<PendingLinkAdr>,

    // MAC state
    pub mac_command_queue: MacCommandQueue,
    pub last_link_check: Option<LastLinkCheck>,

    // ADR history
    pub adr_history: AdrHistory,
}

impl DeviceSession {
    /// True when `next_counter` is an acceptable continuation of
    /// `self.uplink_frame_counter`: non-decreasing, or a wraparound within
    /// `uplink_counter_rollover_tolerance` of u32::MAX (§3, §8).
    pub fn accepts_uplink_counter(&self, next_counter: u32) -> bool {
        if next_counter >= self.uplink_frame_counter {
            return true;
        }
        // Potential rollover: next_counter wrapped past u32::MAX back to
        // something small. Accept only if the "distance travelled"
        // through the wrap is within tolerance.
        let distance_through_wrap =
            (u32::MAX - self.uplink_frame_counter) as u64 + 1 + next_counter as u64;
        distance_through_wrap <= self.uplink_counter_rollover_tolerance as u64
    }
}
