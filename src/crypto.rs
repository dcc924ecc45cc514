//! LoRaWAN frame cryptography: AES-128-CMAC for the MIC, and the
//! counter-mode keystream construction LoRaWAN §4.3 uses to encrypt
//! FRMPayload.
//!
//! Promoted from the optional, feature-gated crypto path this crate
//! carries for wM-Bus payloads to an always-available module: the
//! downlink assembler's core job requires it unconditionally.

use aes::Aes128;
use cipher::{BlockEncrypt, KeyInit};
use cmac::{Cmac, Mac};

use crate::error::NsError;
use crate::model::keys::AesKey;

/// Uplink/downlink direction byte used in the A_i/B_0 block construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up = 0,
    Down = 1,
}

fn block_cipher(key: &AesKey) -> Aes128 {
    Aes128::new_from_slice(&key.0).expect("AES-128 key is always 16 bytes")
}

/// Encrypts or decrypts FRMPayload in place (the construction is its own
/// inverse): generates keystream blocks `A_i` for `i = 1..=ceil(len/16)`,
/// AES-128-ECB-encrypts each under `key`, and XORs them over the payload.
pub fn crypt_frm_payload(
    key: &AesKey,
    dev_addr: u32,
    frame_counter: u32,
    direction: Direction,
    payload: &[u8],
) -> Vec<u8> {
    let cipher = block_cipher(key);
    let mut out = Vec::with_capacity(payload.len());

    for (block_index, chunk) in payload.chunks(16).enumerate() {
        let i = (block_index + 1) as u32;
        let mut a = [0u8; 16];
        a[0] = 0x01;
        a[5] = direction as u8;
        a[6..10].copy_from_slice(&dev_addr.to_le_bytes());
        a[10..14].copy_from_slice(&frame_counter.to_le_bytes());
        a[15] = i as u8;

        let mut block = a.into();
        cipher.encrypt_block(&mut block);

        for (b, k) in chunk.iter().zip(block.iter()) {
            out.push(b ^ k);
        }
    }
    out
}

/// Computes the 4-byte MIC over the canonical block: `B_0 || msg`, using
/// the network session integrity key, truncated to the first 4 bytes of
/// the CMAC tag (LoRaWAN §4.4).
pub fn compute_mic(
    nwk_s_int_key: &AesKey,
    dev_addr: u32,
    frame_counter: u32,
    direction: Direction,
    msg: &[u8],
) -> Result<[u8; 4], NsError> {
    let mut b0 = [0u8; 16];
    b0[0] = 0x49;
    b0[5] = direction as u8;
    b0[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    b0[10..14].copy_from_slice(&frame_counter.to_le_bytes());
    b0[15] = msg.len() as u8;

    let mut mac = Cmac::<Aes128>::new_from_slice(&nwk_s_int_key.0)
        .map_err(|e| NsError::Internal(format!("CMAC key setup failed: {e}")))?;
    mac.update(&b0);
    mac.update(msg);
    let tag = mac.finalize().into_bytes();

    let mut mic = [0u8; 4];
    mic.copy_from_slice(&tag[..4]);
    Ok(mic)
}
