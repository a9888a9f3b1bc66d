//! # LoRaWAN PHY Payload Codec
//!
//! Parsing and generation of LoRaWAN 1.0 PHY payloads:
//!
//! ```text
//! ┌──────────┬──────────────────────────────────────────────┬──────────┐
//! │  MHDR    │  MACPayload / JoinRequest / JoinAccept       │  MIC     │
//! │  (1 B)   │  (variable)                                  │  (4 B)   │
//! ├──────────┴──────────────────────────────────────────────┴──────────┤
//! │  MACPayload = DevAddr(4) FCtrl(1) FCnt(2) FOpts(0..15)             │
//! │               [FPort(1) FRMPayload(0..N)]                          │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Multi-byte fields travel little-endian. The FCnt field carries only the
//! 16 LSB of the session counter on the wire; [`Fhdr::f_cnt`] holds the
//! full 32-bit value so that MIC computation and FRMPayload encryption use
//! the expanded counter. Parsing leaves the upper 16 bits zero; session
//! lookup expands them before MIC verification.

use thiserror::Error;

use super::crypto::{self, Direction};
use super::types::{Aes128Key, DevAddr, Eui64, NetId, TypeError};

/// Maximum FOpts length per the LoRaWAN MAC specification.
pub const MAX_FOPTS_LEN: usize = 15;

/// Maximum number of extra channel frequencies in a CFList.
pub const MAX_CFLIST_CHANNELS: usize = 5;

/// Errors for PHY payload parsing and generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("invalid payload length for {mtype:?}: {len} bytes")]
    InvalidPayloadLength { mtype: MType, len: usize },
    #[error("FOpts exceeds {MAX_FOPTS_LEN} bytes: {0}")]
    FOptsTooLong(usize),
    #[error("FRMPayload present without FPort")]
    FPortRequired,
    #[error("expected {expected} payload, got {actual}")]
    UnexpectedPayload {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("identifier error: {0}")]
    Type(#[from] TypeError),
}

/// Message type, the top 3 bits of the MHDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RejoinRequest,
    Proprietary,
}

impl MType {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => MType::JoinRequest,
            1 => MType::JoinAccept,
            2 => MType::UnconfirmedDataUp,
            3 => MType::UnconfirmedDataDown,
            4 => MType::ConfirmedDataUp,
            5 => MType::ConfirmedDataDown,
            6 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            MType::JoinRequest => 0,
            MType::JoinAccept => 1,
            MType::UnconfirmedDataUp => 2,
            MType::UnconfirmedDataDown => 3,
            MType::ConfirmedDataUp => 4,
            MType::ConfirmedDataDown => 5,
            MType::RejoinRequest => 6,
            MType::Proprietary => 7,
        }
    }

    /// Frame direction implied by the message type. Join-requests count as
    /// uplink, join-accepts as downlink.
    pub fn direction(self) -> Direction {
        match self {
            MType::JoinRequest
            | MType::UnconfirmedDataUp
            | MType::ConfirmedDataUp
            | MType::RejoinRequest => Direction::Uplink,
            MType::JoinAccept
            | MType::UnconfirmedDataDown
            | MType::ConfirmedDataDown
            | MType::Proprietary => Direction::Downlink,
        }
    }
}

/// LoRaWAN major version (only R1 exists).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Major {
    #[default]
    LoRaWanR1,
}

/// MAC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mhdr {
    pub mtype: MType,
    pub major: Major,
}

impl Mhdr {
    pub fn new(mtype: MType) -> Self {
        Mhdr {
            mtype,
            major: Major::LoRaWanR1,
        }
    }

    fn to_byte(self) -> u8 {
        self.mtype.to_bits() << 5
    }

    fn from_byte(b: u8) -> Self {
        Mhdr {
            mtype: MType::from_bits(b >> 5),
            major: Major::LoRaWanR1,
        }
    }
}

/// Frame control octet. Bit 4 is FPending for downlinks and reserved for
/// uplinks; both views are kept and the direction picks at serialize time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FCtrl {
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub f_pending: bool,
}

impl FCtrl {
    fn to_byte(self, f_opts_len: usize) -> u8 {
        let mut b = f_opts_len as u8 & 0x0f;
        if self.adr {
            b |= 0x80;
        }
        if self.adr_ack_req {
            b |= 0x40;
        }
        if self.ack {
            b |= 0x20;
        }
        if self.f_pending {
            b |= 0x10;
        }
        b
    }

    fn from_byte(b: u8) -> (Self, usize) {
        (
            FCtrl {
                adr: b & 0x80 != 0,
                adr_ack_req: b & 0x40 != 0,
                ack: b & 0x20 != 0,
                f_pending: b & 0x10 != 0,
            },
            (b & 0x0f) as usize,
        )
    }
}

/// Frame header of a data frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fhdr {
    pub dev_addr: DevAddr,
    pub f_ctrl: FCtrl,
    /// Full 32-bit frame counter; only the 16 LSB go on the wire.
    pub f_cnt: u32,
    /// Raw MAC commands riding in the header (plaintext, ≤ 15 bytes).
    pub f_opts: Vec<u8>,
}

/// MACPayload of a data frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MacPayload {
    pub fhdr: Fhdr,
    pub f_port: Option<u8>,
    pub frm_payload: Vec<u8>,
}

/// Join-request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequestPayload {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    pub dev_nonce: u16,
}

/// Optional list of up to five extra channel frequencies (Hz) pushed in a
/// JoinAccept. On the wire each entry is frequency/100 in 3 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CfList(pub [u32; MAX_CFLIST_CHANNELS]);

/// Join-accept payload (plaintext form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAcceptPayload {
    pub app_nonce: [u8; 3],
    pub net_id: NetId,
    pub dev_addr: DevAddr,
    pub rx1_dr_offset: u8,
    pub rx2_dr: u8,
    pub rx_delay: u8,
    pub cf_list: Option<CfList>,
}

/// The payload variants a PHY frame can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Mac(MacPayload),
    JoinRequest(JoinRequestPayload),
    JoinAccept(JoinAcceptPayload),
    /// Proprietary and rejoin frames pass through opaque.
    Raw(Vec<u8>),
}

impl Payload {
    fn kind(&self) -> &'static str {
        match self {
            Payload::Mac(_) => "MACPayload",
            Payload::JoinRequest(_) => "JoinRequestPayload",
            Payload::JoinAccept(_) => "JoinAcceptPayload",
            Payload::Raw(_) => "raw payload",
        }
    }
}

/// A complete PHY frame: MHDR, payload and MIC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyPayload {
    pub mhdr: Mhdr,
    pub payload: Payload,
    pub mic: [u8; 4],
}

impl PhyPayload {
    /// Parse a PHY frame from raw bytes. Malformed input yields an error,
    /// never a panic.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        // MHDR + MIC is the absolute floor
        if raw.len() < 5 {
            return Err(FrameError::TooShort(raw.len()));
        }

        let mhdr = Mhdr::from_byte(raw[0]);
        let body = &raw[1..raw.len() - 4];
        let mut mic = [0u8; 4];
        mic.copy_from_slice(&raw[raw.len() - 4..]);

        let payload = match mhdr.mtype {
            MType::JoinRequest => Payload::JoinRequest(Self::parse_join_request(mhdr.mtype, body)?),
            MType::JoinAccept => Payload::JoinAccept(Self::parse_join_accept(mhdr.mtype, body)?),
            MType::UnconfirmedDataUp
            | MType::UnconfirmedDataDown
            | MType::ConfirmedDataUp
            | MType::ConfirmedDataDown => Payload::Mac(Self::parse_mac_payload(mhdr.mtype, body)?),
            MType::RejoinRequest | MType::Proprietary => Payload::Raw(body.to_vec()),
        };

        Ok(PhyPayload { mhdr, payload, mic })
    }

    fn parse_join_request(mtype: MType, body: &[u8]) -> Result<JoinRequestPayload, FrameError> {
        if body.len() != 18 {
            return Err(FrameError::InvalidPayloadLength {
                mtype,
                len: body.len(),
            });
        }
        Ok(JoinRequestPayload {
            app_eui: Eui64::from_le_slice(&body[0..8])?,
            dev_eui: Eui64::from_le_slice(&body[8..16])?,
            dev_nonce: u16::from_le_bytes([body[16], body[17]]),
        })
    }

    fn parse_join_accept(mtype: MType, body: &[u8]) -> Result<JoinAcceptPayload, FrameError> {
        // 12 bytes plain, 28 with CFList (both exclude the MIC)
        if body.len() != 12 && body.len() != 28 {
            return Err(FrameError::InvalidPayloadLength {
                mtype,
                len: body.len(),
            });
        }

        let cf_list = if body.len() == 28 {
            let mut freqs = [0u32; MAX_CFLIST_CHANNELS];
            for (i, freq) in freqs.iter_mut().enumerate() {
                let off = 12 + i * 3;
                *freq =
                    u32::from_le_bytes([body[off], body[off + 1], body[off + 2], 0]) * 100;
            }
            Some(CfList(freqs))
        } else {
            None
        };

        Ok(JoinAcceptPayload {
            app_nonce: [body[0], body[1], body[2]],
            net_id: NetId::from_bytes([body[5], body[4], body[3]]),
            dev_addr: DevAddr::from_le_slice(&body[6..10])?,
            rx1_dr_offset: (body[10] >> 4) & 0x07,
            rx2_dr: body[10] & 0x0f,
            rx_delay: body[11] & 0x0f,
            cf_list,
        })
    }

    fn parse_mac_payload(mtype: MType, body: &[u8]) -> Result<MacPayload, FrameError> {
        // DevAddr(4) + FCtrl(1) + FCnt(2)
        if body.len() < 7 {
            return Err(FrameError::InvalidPayloadLength {
                mtype,
                len: body.len(),
            });
        }

        let dev_addr = DevAddr::from_le_slice(&body[0..4])?;
        let (f_ctrl, f_opts_len) = FCtrl::from_byte(body[4]);
        let f_cnt = u16::from_le_bytes([body[5], body[6]]) as u32;

        if body.len() < 7 + f_opts_len {
            return Err(FrameError::InvalidPayloadLength {
                mtype,
                len: body.len(),
            });
        }
        let f_opts = body[7..7 + f_opts_len].to_vec();

        let rest = &body[7 + f_opts_len..];
        let (f_port, frm_payload) = match rest.len() {
            0 => (None, Vec::new()),
            _ => (Some(rest[0]), rest[1..].to_vec()),
        };

        Ok(MacPayload {
            fhdr: Fhdr {
                dev_addr,
                f_ctrl,
                f_cnt,
                f_opts,
            },
            f_port,
            frm_payload,
        })
    }

    /// Serialize the frame, MIC included.
    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        let mut out = self.serialize_without_mic()?;
        out.extend_from_slice(&self.mic);
        Ok(out)
    }

    fn serialize_without_mic(&self) -> Result<Vec<u8>, FrameError> {
        let mut out = vec![self.mhdr.to_byte()];
        match &self.payload {
            Payload::JoinRequest(jr) => {
                out.extend_from_slice(&jr.app_eui.to_le_bytes());
                out.extend_from_slice(&jr.dev_eui.to_le_bytes());
                out.extend_from_slice(&jr.dev_nonce.to_le_bytes());
            }
            Payload::JoinAccept(ja) => {
                out.extend_from_slice(&ja.app_nonce);
                let n = ja.net_id.as_bytes();
                out.extend_from_slice(&[n[2], n[1], n[0]]);
                out.extend_from_slice(&ja.dev_addr.to_le_bytes());
                out.push(((ja.rx1_dr_offset & 0x07) << 4) | (ja.rx2_dr & 0x0f));
                out.push(ja.rx_delay & 0x0f);
                if let Some(cf) = &ja.cf_list {
                    for freq in cf.0 {
                        let enc = (freq / 100).to_le_bytes();
                        out.extend_from_slice(&enc[0..3]);
                    }
                    out.push(0x00); // CFListType RFU
                }
            }
            Payload::Mac(mac) => {
                if mac.fhdr.f_opts.len() > MAX_FOPTS_LEN {
                    return Err(FrameError::FOptsTooLong(mac.fhdr.f_opts.len()));
                }
                if mac.f_port.is_none() && !mac.frm_payload.is_empty() {
                    return Err(FrameError::FPortRequired);
                }
                out.extend_from_slice(&mac.fhdr.dev_addr.to_le_bytes());
                out.push(mac.fhdr.f_ctrl.to_byte(mac.fhdr.f_opts.len()));
                out.extend_from_slice(&(mac.fhdr.f_cnt as u16).to_le_bytes());
                out.extend_from_slice(&mac.fhdr.f_opts);
                if let Some(port) = mac.f_port {
                    out.push(port);
                    out.extend_from_slice(&mac.frm_payload);
                }
            }
            Payload::Raw(raw) => out.extend_from_slice(raw),
        }
        Ok(out)
    }

    /// Compute and store the MIC under the given key (NwkSKey for data
    /// frames, AppKey for the join handshake).
    pub fn set_mic(&mut self, key: &Aes128Key) -> Result<(), FrameError> {
        self.mic = self.compute_mic(key)?;
        Ok(())
    }

    /// Verify the stored MIC under the given key. A malformed frame
    /// verifies as false rather than erroring.
    pub fn verify_mic(&self, key: &Aes128Key) -> bool {
        match self.compute_mic(key) {
            Ok(mic) => mic == self.mic,
            Err(_) => false,
        }
    }

    fn compute_mic(&self, key: &Aes128Key) -> Result<[u8; 4], FrameError> {
        let msg = self.serialize_without_mic()?;
        match &self.payload {
            Payload::Mac(mac) => Ok(crypto::data_mic(
                key,
                self.mhdr.mtype.direction(),
                mac.fhdr.dev_addr,
                mac.fhdr.f_cnt,
                &msg,
            )),
            Payload::JoinRequest(_) | Payload::JoinAccept(_) => Ok(crypto::join_mic(key, &msg)),
            Payload::Raw(_) => Ok(crypto::join_mic(key, &msg)),
        }
    }

    /// Encrypt the FRMPayload in place. FPort 0 payloads use the NwkSKey,
    /// everything else the AppSKey (which this server never holds; the
    /// application server encrypts those).
    pub fn encrypt_frm_payload(&mut self, key: &Aes128Key) -> Result<(), FrameError> {
        self.crypt_frm_payload(key)
    }

    /// Decrypt the FRMPayload in place (the keystream XOR is symmetric).
    pub fn decrypt_frm_payload(&mut self, key: &Aes128Key) -> Result<(), FrameError> {
        self.crypt_frm_payload(key)
    }

    fn crypt_frm_payload(&mut self, key: &Aes128Key) -> Result<(), FrameError> {
        let dir = self.mhdr.mtype.direction();
        let mac = match &mut self.payload {
            Payload::Mac(mac) => mac,
            other => {
                return Err(FrameError::UnexpectedPayload {
                    expected: "MACPayload",
                    actual: other.kind(),
                })
            }
        };
        crypto::crypt_frm_payload(
            key,
            dir,
            mac.fhdr.dev_addr,
            mac.fhdr.f_cnt,
            &mut mac.frm_payload,
        );
        Ok(())
    }

    /// Borrow the MACPayload, or fail with a typed error when the frame
    /// carries something else.
    pub fn mac_payload(&self) -> Result<&MacPayload, FrameError> {
        match &self.payload {
            Payload::Mac(mac) => Ok(mac),
            other => Err(FrameError::UnexpectedPayload {
                expected: "MACPayload",
                actual: other.kind(),
            }),
        }
    }

    /// Borrow the JoinRequestPayload, or fail with a typed error.
    pub fn join_request_payload(&self) -> Result<&JoinRequestPayload, FrameError> {
        match &self.payload {
            Payload::JoinRequest(jr) => Ok(jr),
            other => Err(FrameError::UnexpectedPayload {
                expected: "JoinRequestPayload",
                actual: other.kind(),
            }),
        }
    }
}

/// Decrypt a serialized JoinAccept frame with the AppKey and parse it.
///
/// The MHDR stays plaintext on the wire; the body and MIC are encrypted
/// as one unit.
pub fn decrypt_join_accept(raw: &[u8], key: &Aes128Key) -> Result<PhyPayload, FrameError> {
    if raw.len() < 17 || (raw.len() - 1) % 16 != 0 {
        return Err(FrameError::TooShort(raw.len()));
    }
    let mut buf = raw.to_vec();
    crypto::decrypt_join_accept(key, &mut buf[1..]);
    PhyPayload::parse(&buf)
}

/// Encrypt a plaintext JoinAccept frame (MIC already set) for the device.
pub fn encrypt_join_accept(phy: &PhyPayload, key: &Aes128Key) -> Result<Vec<u8>, FrameError> {
    let mut buf = phy.serialize()?;
    crypto::encrypt_join_accept(key, &mut buf[1..]);
    Ok(buf)
}
