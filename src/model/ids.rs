//! Identity types: 64-bit EUIs and 32-bit device addresses.

use std::fmt;

/// 64-bit globally unique device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DevEui(pub [u8; 8]);

impl DevEui {
    pub fn from_hex(s: &str) -> Result<Self, crate::error::NsError> {
        let bytes = hex::decode(s)
            .map_err(|e| crate::error::NsError::Malformed(format!("dev_eui hex: {e}")))?;
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| crate::error::NsError::Malformed("dev_eui must be 8 bytes".into()))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DevEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 32-bit network-assigned device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DevAddr(pub u32);

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// Join-server EUI identifying the device's join server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct JoinEui(pub [u8; 8]);

/// Opaque gateway identifier (8 bytes, matches the gateway bridge protocol).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GatewayId(pub [u8; 8]);

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
