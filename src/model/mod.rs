//! Core data model: identity, cryptographic material, device session
//! state, profiles, MAC commands, and in-flight downlinks.

pub mod downlink;
pub mod ids;
pub mod keys;
pub mod mac_command;
pub mod profile;
pub mod session;

pub use downlink::{DownlinkToken, PendingDownlink, TxAckStatus};
pub use ids::{DevAddr, DevEui, GatewayId, JoinEui};
pub use keys::{AesKey, AppSKeyRef, SessionKeys};
pub use mac_command::{Cid, MacCommand, MacCommandBlock, MacCommandPayload, MacCommandTarget};
pub use profile::{DeviceProfile, ServiceProfile};
pub use session::{AdrHistory, AdrSample, ChannelMask, DeviceSession, MacCommandQueue, PendingLinkAdr, Rx2Params};
