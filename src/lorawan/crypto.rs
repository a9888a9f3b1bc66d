//! # LoRaWAN 1.0 Frame Cryptography
//!
//! Implements the three cryptographic primitives the frame codec needs:
//!
//! - **MIC**: AES-CMAC over a B0 block plus the frame bytes, truncated to
//!   4 bytes (data frames), and the plain CMAC variants used by the join
//!   handshake.
//! - **FRMPayload encryption**: the AES-CTR-style keystream built from
//!   A_i blocks, XORed over the payload. Encryption and decryption are the
//!   same operation.
//! - **JoinAccept encryption**: the deliberately inverted scheme where the
//!   network encrypts with an AES *decrypt* operation so that constrained
//!   devices only ever need the encrypt direction.
//!
//! All operations are synchronous and allocation-light; callers hold the
//! relevant session key (NwkSKey for data frames, AppKey for the join
//! handshake).

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

use super::types::{Aes128Key, DevAddr};

/// Frame direction as used in B0/A_i blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Uplink,
    Downlink,
}

impl Direction {
    fn as_byte(self) -> u8 {
        match self {
            Direction::Uplink => 0x00,
            Direction::Downlink => 0x01,
        }
    }
}

/// Compute the 4-byte MIC for a data frame.
///
/// `msg` is the serialized MHDR | FHDR | FPort | FRMPayload (everything
/// except the MIC itself). The 16-bit wire FCnt must already be expanded
/// to the full 32-bit counter.
pub fn data_mic(
    key: &Aes128Key,
    dir: Direction,
    dev_addr: DevAddr,
    fcnt: u32,
    msg: &[u8],
) -> [u8; 4] {
    let mut b0 = [0u8; 16];
    b0[0] = 0x49;
    // b0[1..5] zero
    b0[5] = dir.as_byte();
    b0[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    b0[10..14].copy_from_slice(&fcnt.to_le_bytes());
    // b0[14] zero
    b0[15] = msg.len() as u8;

    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(key.as_bytes()));
    mac.update(&b0);
    mac.update(msg);
    truncate_mic(mac.finalize().into_bytes().as_slice())
}

/// Compute the 4-byte MIC for a join-request or join-accept frame.
///
/// `msg` is the serialized MHDR plus the (plaintext) join payload. The
/// join handshake uses the plain CMAC without a B0 block.
pub fn join_mic(key: &Aes128Key, msg: &[u8]) -> [u8; 4] {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(key.as_bytes()));
    mac.update(msg);
    truncate_mic(mac.finalize().into_bytes().as_slice())
}

fn truncate_mic(full: &[u8]) -> [u8; 4] {
    let mut mic = [0u8; 4];
    mic.copy_from_slice(&full[0..4]);
    mic
}

/// Encrypt or decrypt an FRMPayload in place.
///
/// The keystream block A_i carries the direction, the device address and
/// the full 32-bit frame counter, so the same call works for both
/// directions of the transformation.
pub fn crypt_frm_payload(
    key: &Aes128Key,
    dir: Direction,
    dev_addr: DevAddr,
    fcnt: u32,
    payload: &mut [u8],
) {
    if payload.is_empty() {
        return;
    }

    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));

    let mut a = [0u8; 16];
    a[0] = 0x01;
    // a[1..5] zero
    a[5] = dir.as_byte();
    a[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    a[10..14].copy_from_slice(&fcnt.to_le_bytes());
    // a[14] zero

    for (i, chunk) in payload.chunks_mut(16).enumerate() {
        a[15] = (i + 1) as u8;
        let mut block = GenericArray::clone_from_slice(&a);
        cipher.encrypt_block(&mut block);
        for (b, k) in chunk.iter_mut().zip(block.iter()) {
            *b ^= k;
        }
    }
}

/// Encrypt a JoinAccept body (payload bytes plus trailing MIC) for the
/// device, using the AES decrypt operation.
///
/// The input must be a whole number of 16-byte blocks (JoinAccept bodies
/// are 16 or 32 bytes).
pub fn encrypt_join_accept(key: &Aes128Key, body: &mut [u8]) {
    debug_assert!(body.len() % 16 == 0);
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    for chunk in body.chunks_mut(16) {
        let block = GenericArray::from_mut_slice(chunk);
        cipher.decrypt_block(block);
    }
}

/// Recover a JoinAccept body that was encrypted with
/// [`encrypt_join_accept`], using the AES encrypt operation.
pub fn decrypt_join_accept(key: &Aes128Key, body: &mut [u8]) {
    debug_assert!(body.len() % 16 == 0);
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    for chunk in body.chunks_mut(16) {
        let block = GenericArray::from_mut_slice(chunk);
        cipher.encrypt_block(block);
    }
}
