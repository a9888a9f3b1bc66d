//! # MAC Command Codec
//!
//! Encoding and decoding of the LoRaWAN 1.0 MAC-layer control commands
//! (CID 0x02..=0x08). Commands ride either in the plaintext FOpts field or
//! in an FPort-0 FRMPayload encrypted with the NwkSKey; this module only
//! deals with the command bytes themselves.
//!
//! Command payload layout differs per direction (a `0x02` is LinkCheckReq
//! coming from the device but LinkCheckAns going to it), so decoding takes
//! the frame direction.

use thiserror::Error;

use super::crypto::Direction;

/// Errors for MAC command decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacCommandError {
    #[error("truncated MAC command: CID 0x{cid:02x} needs {needed} more byte(s)")]
    Truncated { cid: u8, needed: usize },
}

/// LinkADRReq payload: requested data-rate/TX-power, channel mask and
/// redundancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAdrReqPayload {
    pub data_rate: u8,
    pub tx_power: u8,
    pub ch_mask: u16,
    pub ch_mask_cntl: u8,
    pub nb_rep: u8,
}

/// LinkADRAns status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAdrAnsPayload {
    pub channel_mask_ack: bool,
    pub data_rate_ack: bool,
    pub power_ack: bool,
}

impl LinkAdrAnsPayload {
    pub fn all_ack(&self) -> bool {
        self.channel_mask_ack && self.data_rate_ack && self.power_ack
    }
}

/// RXParamSetupReq payload: RX1 offset, RX2 data rate and RX2 frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxParamSetupReqPayload {
    pub rx1_dr_offset: u8,
    pub rx2_dr: u8,
    /// RX2 frequency in Hz.
    pub frequency: u32,
}

/// RXParamSetupAns status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxParamSetupAnsPayload {
    pub channel_ack: bool,
    pub rx2_dr_ack: bool,
    pub rx1_dr_offset_ack: bool,
}

impl RxParamSetupAnsPayload {
    pub fn all_ack(&self) -> bool {
        self.channel_ack && self.rx2_dr_ack && self.rx1_dr_offset_ack
    }
}

/// NewChannelReq payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewChannelReqPayload {
    pub ch_index: u8,
    /// Channel frequency in Hz.
    pub frequency: u32,
    pub min_dr: u8,
    pub max_dr: u8,
}

/// A single decoded MAC command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacCommand {
    LinkCheckReq,
    LinkCheckAns { margin: u8, gw_cnt: u8 },
    LinkAdrReq(LinkAdrReqPayload),
    LinkAdrAns(LinkAdrAnsPayload),
    DutyCycleReq { max_duty_cycle: u8 },
    DutyCycleAns,
    RxParamSetupReq(RxParamSetupReqPayload),
    RxParamSetupAns(RxParamSetupAnsPayload),
    DevStatusReq,
    DevStatusAns { battery: u8, margin: u8 },
    NewChannelReq(NewChannelReqPayload),
    NewChannelAns { dr_range_ok: bool, freq_ok: bool },
    RxTimingSetupReq { delay: u8 },
    RxTimingSetupAns,
    /// Proprietary (0x80..) or unrecognised commands. Framing beyond the
    /// CID is vendor-defined, so the remainder of the stream is captured.
    Proprietary { cid: u8, payload: Vec<u8> },
}

impl MacCommand {
    /// The command identifier byte.
    pub fn cid(&self) -> u8 {
        match self {
            MacCommand::LinkCheckReq | MacCommand::LinkCheckAns { .. } => 0x02,
            MacCommand::LinkAdrReq(_) | MacCommand::LinkAdrAns(_) => 0x03,
            MacCommand::DutyCycleReq { .. } | MacCommand::DutyCycleAns => 0x04,
            MacCommand::RxParamSetupReq(_) | MacCommand::RxParamSetupAns(_) => 0x05,
            MacCommand::DevStatusReq | MacCommand::DevStatusAns { .. } => 0x06,
            MacCommand::NewChannelReq(_) | MacCommand::NewChannelAns { .. } => 0x07,
            MacCommand::RxTimingSetupReq { .. } | MacCommand::RxTimingSetupAns => 0x08,
            MacCommand::Proprietary { cid, .. } => *cid,
        }
    }

    /// Encoded length, CID byte included.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            MacCommand::LinkCheckReq
            | MacCommand::DutyCycleAns
            | MacCommand::DevStatusReq
            | MacCommand::RxTimingSetupAns => 0,
            MacCommand::LinkCheckAns { .. } | MacCommand::DevStatusAns { .. } => 2,
            MacCommand::LinkAdrReq(_) | MacCommand::RxParamSetupReq(_) => 4,
            MacCommand::LinkAdrAns(_)
            | MacCommand::DutyCycleReq { .. }
            | MacCommand::RxParamSetupAns(_)
            | MacCommand::NewChannelAns { .. }
            | MacCommand::RxTimingSetupReq { .. } => 1,
            MacCommand::NewChannelReq(_) => 5,
            MacCommand::Proprietary { payload, .. } => payload.len(),
        }
    }

    /// Append the encoded command to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.cid());
        match self {
            MacCommand::LinkCheckReq
            | MacCommand::DutyCycleAns
            | MacCommand::DevStatusReq
            | MacCommand::RxTimingSetupAns => {}
            MacCommand::LinkCheckAns { margin, gw_cnt } => {
                out.push(*margin);
                out.push(*gw_cnt);
            }
            MacCommand::LinkAdrReq(p) => {
                out.push(((p.data_rate & 0x0f) << 4) | (p.tx_power & 0x0f));
                out.extend_from_slice(&p.ch_mask.to_le_bytes());
                out.push(((p.ch_mask_cntl & 0x07) << 4) | (p.nb_rep & 0x0f));
            }
            MacCommand::LinkAdrAns(p) => {
                let mut b = 0u8;
                if p.channel_mask_ack {
                    b |= 0x01;
                }
                if p.data_rate_ack {
                    b |= 0x02;
                }
                if p.power_ack {
                    b |= 0x04;
                }
                out.push(b);
            }
            MacCommand::DutyCycleReq { max_duty_cycle } => out.push(max_duty_cycle & 0x0f),
            MacCommand::RxParamSetupReq(p) => {
                out.push(((p.rx1_dr_offset & 0x07) << 4) | (p.rx2_dr & 0x0f));
                let enc = (p.frequency / 100).to_le_bytes();
                out.extend_from_slice(&enc[0..3]);
            }
            MacCommand::RxParamSetupAns(p) => {
                let mut b = 0u8;
                if p.channel_ack {
                    b |= 0x01;
                }
                if p.rx2_dr_ack {
                    b |= 0x02;
                }
                if p.rx1_dr_offset_ack {
                    b |= 0x04;
                }
                out.push(b);
            }
            MacCommand::DevStatusAns { battery, margin } => {
                out.push(*battery);
                out.push(*margin);
            }
            MacCommand::NewChannelReq(p) => {
                out.push(p.ch_index);
                let enc = (p.frequency / 100).to_le_bytes();
                out.extend_from_slice(&enc[0..3]);
                out.push(((p.max_dr & 0x0f) << 4) | (p.min_dr & 0x0f));
            }
            MacCommand::NewChannelAns {
                dr_range_ok,
                freq_ok,
            } => {
                let mut b = 0u8;
                if *freq_ok {
                    b |= 0x01;
                }
                if *dr_range_ok {
                    b |= 0x02;
                }
                out.push(b);
            }
            MacCommand::RxTimingSetupReq { delay } => out.push(delay & 0x0f),
            MacCommand::Proprietary { payload, .. } => out.extend_from_slice(payload),
        }
    }

    /// Encode to a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }
}

/// Decode a stream of MAC commands (FOpts or FPort-0 FRMPayload contents).
///
/// `dir` is the direction of the carrying frame. Unknown CIDs swallow the
/// remainder of the stream as a [`MacCommand::Proprietary`] entry since
/// their framing is not known; a truncated standard command is an error.
pub fn decode_commands(dir: Direction, bytes: &[u8]) -> Result<Vec<MacCommand>, MacCommandError> {
    let mut out = Vec::new();
    let mut rest = bytes;

    while let Some((&cid, tail)) = rest.split_first() {
        let needed = match (cid, dir) {
            (0x02, Direction::Uplink) => 0,   // LinkCheckReq
            (0x02, Direction::Downlink) => 2, // LinkCheckAns
            (0x03, Direction::Uplink) => 1,   // LinkADRAns
            (0x03, Direction::Downlink) => 4, // LinkADRReq
            (0x04, Direction::Uplink) => 0,   // DutyCycleAns
            (0x04, Direction::Downlink) => 1, // DutyCycleReq
            (0x05, Direction::Uplink) => 1,   // RXParamSetupAns
            (0x05, Direction::Downlink) => 4, // RXParamSetupReq
            (0x06, Direction::Uplink) => 2,   // DevStatusAns
            (0x06, Direction::Downlink) => 0, // DevStatusReq
            (0x07, Direction::Uplink) => 1,   // NewChannelAns
            (0x07, Direction::Downlink) => 5, // NewChannelReq
            (0x08, Direction::Uplink) => 0,   // RXTimingSetupAns
            (0x08, Direction::Downlink) => 1, // RXTimingSetupReq
            _ => {
                out.push(MacCommand::Proprietary {
                    cid,
                    payload: tail.to_vec(),
                });
                return Ok(out);
            }
        };

        if tail.len() < needed {
            return Err(MacCommandError::Truncated {
                cid,
                needed: needed - tail.len(),
            });
        }
        let (pl, next) = tail.split_at(needed);
        rest = next;

        out.push(match (cid, dir) {
            (0x02, Direction::Uplink) => MacCommand::LinkCheckReq,
            (0x02, Direction::Downlink) => MacCommand::LinkCheckAns {
                margin: pl[0],
                gw_cnt: pl[1],
            },
            (0x03, Direction::Uplink) => MacCommand::LinkAdrAns(LinkAdrAnsPayload {
                channel_mask_ack: pl[0] & 0x01 != 0,
                data_rate_ack: pl[0] & 0x02 != 0,
                power_ack: pl[0] & 0x04 != 0,
            }),
            (0x03, Direction::Downlink) => MacCommand::LinkAdrReq(LinkAdrReqPayload {
                data_rate: pl[0] >> 4,
                tx_power: pl[0] & 0x0f,
                ch_mask: u16::from_le_bytes([pl[1], pl[2]]),
                ch_mask_cntl: (pl[3] >> 4) & 0x07,
                nb_rep: pl[3] & 0x0f,
            }),
            (0x04, Direction::Uplink) => MacCommand::DutyCycleAns,
            (0x04, Direction::Downlink) => MacCommand::DutyCycleReq {
                max_duty_cycle: pl[0] & 0x0f,
            },
            (0x05, Direction::Uplink) => MacCommand::RxParamSetupAns(RxParamSetupAnsPayload {
                channel_ack: pl[0] & 0x01 != 0,
                rx2_dr_ack: pl[0] & 0x02 != 0,
                rx1_dr_offset_ack: pl[0] & 0x04 != 0,
            }),
            (0x05, Direction::Downlink) => MacCommand::RxParamSetupReq(RxParamSetupReqPayload {
                rx1_dr_offset: (pl[0] >> 4) & 0x07,
                rx2_dr: pl[0] & 0x0f,
                frequency: u32::from_le_bytes([pl[1], pl[2], pl[3], 0]) * 100,
            }),
            (0x06, Direction::Uplink) => MacCommand::DevStatusAns {
                battery: pl[0],
                margin: pl[1],
            },
            (0x06, Direction::Downlink) => MacCommand::DevStatusReq,
            (0x07, Direction::Uplink) => MacCommand::NewChannelAns {
                freq_ok: pl[0] & 0x01 != 0,
                dr_range_ok: pl[0] & 0x02 != 0,
            },
            (0x07, Direction::Downlink) => MacCommand::NewChannelReq(NewChannelReqPayload {
                ch_index: pl[0],
                frequency: u32::from_le_bytes([pl[1], pl[2], pl[3], 0]) * 100,
                min_dr: pl[4] & 0x0f,
                max_dr: pl[4] >> 4,
            }),
            (0x08, Direction::Uplink) => MacCommand::RxTimingSetupAns,
            (0x08, Direction::Downlink) => MacCommand::RxTimingSetupReq {
                delay: pl[0] & 0x0f,
            },
            _ => unreachable!(),
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_uplink_stream() {
        let cmds = vec![
            MacCommand::LinkCheckReq,
            MacCommand::LinkAdrAns(LinkAdrAnsPayload {
                channel_mask_ack: true,
                data_rate_ack: true,
                power_ack: false,
            }),
            MacCommand::DevStatusAns {
                battery: 200,
                margin: 12,
            },
        ];
        let mut buf = Vec::new();
        for c in &cmds {
            c.encode(&mut buf);
        }
        assert_eq!(buf.len(), 1 + 2 + 3);
        let decoded = decode_commands(Direction::Uplink, &buf).unwrap();
        assert_eq!(decoded, cmds);
    }

    #[test]
    fn test_encode_decode_downlink_stream() {
        let cmds = vec![
            MacCommand::DevStatusReq,
            MacCommand::LinkAdrReq(LinkAdrReqPayload {
                data_rate: 5,
                tx_power: 1,
                ch_mask: 0x0007,
                ch_mask_cntl: 0,
                nb_rep: 1,
            }),
            MacCommand::RxParamSetupReq(RxParamSetupReqPayload {
                rx1_dr_offset: 1,
                rx2_dr: 3,
                frequency: 869_525_000,
            }),
        ];
        let mut buf = Vec::new();
        for c in &cmds {
            c.encode(&mut buf);
        }
        let decoded = decode_commands(Direction::Downlink, &buf).unwrap();
        assert_eq!(decoded, cmds);
    }

    #[test]
    fn test_encoded_len_matches_encode() {
        let cmds = [
            MacCommand::LinkCheckAns {
                margin: 20,
                gw_cnt: 3,
            },
            MacCommand::DutyCycleReq { max_duty_cycle: 2 },
            MacCommand::NewChannelReq(NewChannelReqPayload {
                ch_index: 3,
                frequency: 867_100_000,
                min_dr: 0,
                max_dr: 5,
            }),
            MacCommand::RxTimingSetupReq { delay: 4 },
        ];
        for c in &cmds {
            assert_eq!(c.to_bytes().len(), c.encoded_len(), "{c:?}");
        }
    }

    #[test]
    fn test_truncated_command_is_error() {
        // DevStatusAns needs 2 payload bytes
        let err = decode_commands(Direction::Uplink, &[0x06, 0xff]).unwrap_err();
        assert_eq!(err, MacCommandError::Truncated { cid: 0x06, needed: 1 });
    }

    #[test]
    fn test_unknown_cid_swallows_tail() {
        let decoded = decode_commands(Direction::Uplink, &[0x02, 0x81, 1, 2, 3]).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], MacCommand::LinkCheckReq);
        assert_eq!(
            decoded[1],
            MacCommand::Proprietary {
                cid: 0x81,
                payload: vec![1, 2, 3],
            }
        );
    }

    #[test]
    fn test_frequency_encoding_is_100hz_steps() {
        let cmd = MacCommand::RxParamSetupReq(RxParamSetupReqPayload {
            rx1_dr_offset: 0,
            rx2_dr: 0,
            frequency: 869_525_000,
        });
        let bytes = cmd.to_bytes();
        let raw = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], 0]);
        assert_eq!(raw, 8_695_250);
    }
}
