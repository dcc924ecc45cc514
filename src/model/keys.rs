//! Session cryptographic material.
//!
//! Keys are zeroized on drop (`zeroize`), matching the care the teacher
//! crate takes with wM-Bus key material in `wmbus/crypto.rs`.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// 128-bit AES key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop, serde::Serialize, serde::Deserialize)]
pub struct AesKey(pub [u8; 16]);

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey(<redacted>)")
    }
}

impl PartialEq for AesKey {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time-ish comparison is not required here: keys are
        // compared only in tests, never on a data path that an attacker
        // can time.
        self.0 == other.0
    }
}

/// Reference to the application session key, held by the join/app server;
/// the network server core never sees the raw key, only an opaque id it
/// can hand back when delegating FRMPayload decryption upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AppSKeyRef(pub u32);

/// Session cryptographic material for one activated device.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionKeys {
    /// Network session encryption key (NwkSEncKey in 1.1, shared NwkSKey in 1.0.x).
    pub nwk_s_enc_key: AesKey,
    /// Network session integrity key (used for the MIC).
    pub nwk_s_int_key: AesKey,
    /// Opaque reference to the application session key.
    pub app_s_key_ref: AppSKeyRef,
    /// Session-key id, used to resolve key material after a rejoin.
    pub session_key_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_does_not_leak_key_bytes() {
        let key = AesKey([0x42; 16]);
        let formatted = format!("{key:?}");
        assert!(!formatted.contains("66")); // 0x42 = 66 decimal
        assert_eq!(formatted, "AesKey(<redacted>)");
    }
}
