//! # lorawan-ns-core
//!
//! Device MAC session and downlink planning core of a LoRaWAN network
//! server: per-device session state, MAC-command dispatch, channel and
//! duty-cycle accounting, downlink assembly, and TX-ack reconciliation.
//! Packet-forwarder wire codecs, the application server, the join
//! server, and roaming partners are modeled as capability traits
//! ([`interfaces`]) rather than implemented here.
//!
//! ## Modules
//!
//! - [`band`] — region parameters, data rates, time-on-air.
//! - [`store`] — durable (Postgres) plus cached (Redis) session storage.
//! - [`mac_engine`] — MAC-command dispatch registry.
//! - [`channel_reconfig`] — enabled-channel mask reconciliation.
//! - [`downlink_assembler`], [`crypto`], [`duty_cycle`] — downlink
//!   construction, MIC/encryption, per-gateway duty-cycle tracking.
//! - [`scheduler`] — the periodic downlink-opportunity driver.
//! - [`tx_ack_reconciler`] — local and roaming TX-ack handling.
//! - [`uplink`] — uplink MIC/counter acceptance and MAC dispatch.
//! - [`interfaces`], [`marshal`] — external capability traits and wire
//!   encoding.
//! - [`telemetry`] — per-device and scheduler counters.
//! - [`context`] — runtime wiring (`NetworkServerConfig`, `RuntimeContext`).

pub mod band;
pub mod channel_reconfig;
pub mod concurrency;
pub mod context;
pub mod correlation;
pub mod crypto;
pub mod downlink_assembler;
pub mod duty_cycle;
pub mod error;
pub mod interfaces;
pub mod logging;
pub mod mac_engine;
pub mod marshal;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod tx_ack_reconciler;
pub mod uplink;

pub use crate::context::{NetworkServerConfig, RuntimeContext};
pub use crate::error::NsError;
pub use crate::logging::init_logger;
