//! # Regional Band Configuration
//!
//! Process-wide immutable tables describing the regional ISM band
//! parameters the downlink scheduler needs: the data-rate list, the
//! RX1 data-rate and frequency mappings, the RX2 defaults, per-data-rate
//! payload ceilings and the receive/join timing constants.
//!
//! Tables are built once behind `once_cell::Lazy` and handed out as
//! `&'static Band`; nothing here is mutable after startup.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors for band table lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BandError {
    #[error("invalid data-rate: {0}")]
    InvalidDataRate(usize),
    #[error("data-rate parameters not in the band plan")]
    UnknownDataRateParameters,
    #[error("invalid RX1 data-rate offset: {0}")]
    InvalidRx1DrOffset(usize),
    #[error("frequency {0} Hz does not match an uplink channel")]
    UnknownUplinkFrequency(u32),
    #[error("unknown band: {0}")]
    UnknownBand(String),
}

/// Radio modulation of a data-rate entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modulation {
    Lora,
    Fsk,
}

/// A regional data-rate entry. For LoRa rows the spread factor and
/// bandwidth are set; for FSK rows the bit rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRate {
    pub modulation: Modulation,
    pub spread_factor: u8,
    /// Bandwidth in kHz (LoRa only).
    pub bandwidth: u32,
    /// Bit rate in bit/s (FSK only).
    pub bit_rate: u32,
}

impl DataRate {
    const fn lora(spread_factor: u8, bandwidth: u32) -> Self {
        DataRate {
            modulation: Modulation::Lora,
            spread_factor,
            bandwidth,
            bit_rate: 0,
        }
    }

    const fn fsk(bit_rate: u32) -> Self {
        DataRate {
            modulation: Modulation::Fsk,
            spread_factor: 0,
            bandwidth: 0,
            bit_rate,
        }
    }
}

/// Maximum payload sizes for one data-rate: `m` is the whole MACPayload,
/// `n` the application payload (FRMPayload).
#[derive(Debug, Clone, Copy)]
pub struct MaxPayloadSize {
    pub m: usize,
    pub n: usize,
}

/// An uplink channel definition.
#[derive(Debug, Clone, Copy)]
pub struct Channel {
    pub frequency: u32,
    pub min_dr: u8,
    pub max_dr: u8,
}

/// Immutable per-region band description.
pub struct Band {
    pub name: &'static str,
    pub data_rates: Vec<DataRate>,
    pub max_payload_size: Vec<MaxPayloadSize>,
    /// `rx1_dr_table[uplink_dr][rx1_dr_offset]` = downlink data-rate.
    rx1_dr_table: Vec<Vec<u8>>,
    pub uplink_channels: Vec<Channel>,
    /// Downlink channels; empty when downlinks mirror the uplink channel.
    pub downlink_channels: Vec<Channel>,
    pub rx2_frequency: u32,
    pub rx2_data_rate: u8,
    /// Default gateway TX power in dBm.
    pub default_tx_power: i32,
    pub receive_delay1: Duration,
    pub receive_delay2: Duration,
    pub join_accept_delay1: Duration,
    pub join_accept_delay2: Duration,
    /// Largest tolerated gap between two valid uplink frame counters.
    pub max_fcnt_gap: u32,
}

impl Band {
    /// Resolve a wire-level data-rate description to its regional index.
    pub fn get_data_rate(&self, dr: &DataRate) -> Result<u8, BandError> {
        self.data_rates
            .iter()
            .position(|d| d == dr)
            .map(|i| i as u8)
            .ok_or(BandError::UnknownDataRateParameters)
    }

    /// Data-rate parameters for a regional index.
    pub fn data_rate(&self, dr: u8) -> Result<&DataRate, BandError> {
        self.data_rates
            .get(dr as usize)
            .ok_or(BandError::InvalidDataRate(dr as usize))
    }

    /// The RX1 downlink data-rate for an uplink data-rate and the
    /// session's RX1 offset.
    pub fn rx1_data_rate(&self, uplink_dr: u8, offset: u8) -> Result<u8, BandError> {
        let row = self
            .rx1_dr_table
            .get(uplink_dr as usize)
            .ok_or(BandError::InvalidDataRate(uplink_dr as usize))?;
        row.get(offset as usize)
            .copied()
            .ok_or(BandError::InvalidRx1DrOffset(offset as usize))
    }

    /// The RX1 downlink frequency for an uplink frequency.
    pub fn rx1_frequency(&self, uplink_frequency: u32) -> Result<u32, BandError> {
        if self.downlink_channels.is_empty() {
            return Ok(uplink_frequency);
        }
        let ch = self
            .uplink_channels
            .iter()
            .position(|c| c.frequency == uplink_frequency)
            .ok_or(BandError::UnknownUplinkFrequency(uplink_frequency))?;
        Ok(self.downlink_channels[ch % self.downlink_channels.len()].frequency)
    }

    /// The FRMPayload ceiling for a data-rate.
    pub fn max_payload_size(&self, dr: u8) -> Result<usize, BandError> {
        self.max_payload_size
            .get(dr as usize)
            .map(|s| s.n)
            .ok_or(BandError::InvalidDataRate(dr as usize))
    }
}

static EU868: Lazy<Band> = Lazy::new(|| Band {
    name: "EU868",
    data_rates: vec![
        DataRate::lora(12, 125),
        DataRate::lora(11, 125),
        DataRate::lora(10, 125),
        DataRate::lora(9, 125),
        DataRate::lora(8, 125),
        DataRate::lora(7, 125),
        DataRate::lora(7, 250),
        DataRate::fsk(50_000),
    ],
    max_payload_size: vec![
        MaxPayloadSize { m: 59, n: 51 },
        MaxPayloadSize { m: 59, n: 51 },
        MaxPayloadSize { m: 59, n: 51 },
        MaxPayloadSize { m: 123, n: 115 },
        MaxPayloadSize { m: 230, n: 222 },
        MaxPayloadSize { m: 230, n: 222 },
        MaxPayloadSize { m: 230, n: 222 },
        MaxPayloadSize { m: 230, n: 222 },
    ],
    rx1_dr_table: vec![
        vec![0, 0, 0, 0, 0, 0],
        vec![1, 0, 0, 0, 0, 0],
        vec![2, 1, 0, 0, 0, 0],
        vec![3, 2, 1, 0, 0, 0],
        vec![4, 3, 2, 1, 0, 0],
        vec![5, 4, 3, 2, 1, 0],
        vec![6, 5, 4, 3, 2, 1],
        vec![7, 6, 5, 4, 3, 2],
    ],
    uplink_channels: vec![
        Channel {
            frequency: 868_100_000,
            min_dr: 0,
            max_dr: 5,
        },
        Channel {
            frequency: 868_300_000,
            min_dr: 0,
            max_dr: 5,
        },
        Channel {
            frequency: 868_500_000,
            min_dr: 0,
            max_dr: 5,
        },
    ],
    downlink_channels: vec![],
    rx2_frequency: 869_525_000,
    rx2_data_rate: 0,
    default_tx_power: 14,
    receive_delay1: Duration::from_secs(1),
    receive_delay2: Duration::from_secs(2),
    join_accept_delay1: Duration::from_secs(5),
    join_accept_delay2: Duration::from_secs(6),
    max_fcnt_gap: 16_384,
});

static US915: Lazy<Band> = Lazy::new(|| {
    let mut uplink_channels = Vec::with_capacity(72);
    // 64 × 125 kHz channels, 902.3 MHz + n × 200 kHz
    for n in 0u32..64 {
        uplink_channels.push(Channel {
            frequency: 902_300_000 + n * 200_000,
            min_dr: 0,
            max_dr: 3,
        });
    }
    // 8 × 500 kHz channels, 903.0 MHz + n × 1.6 MHz
    for n in 0u32..8 {
        uplink_channels.push(Channel {
            frequency: 903_000_000 + n * 1_600_000,
            min_dr: 4,
            max_dr: 4,
        });
    }
    // 8 downlink channels, 923.3 MHz + n × 600 kHz
    let downlink_channels = (0u32..8)
        .map(|n| Channel {
            frequency: 923_300_000 + n * 600_000,
            min_dr: 8,
            max_dr: 13,
        })
        .collect();

    Band {
        name: "US915",
        data_rates: vec![
            DataRate::lora(10, 125),
            DataRate::lora(9, 125),
            DataRate::lora(8, 125),
            DataRate::lora(7, 125),
            DataRate::lora(8, 500),
            DataRate::fsk(0), // DR5..7 reserved
            DataRate::fsk(0),
            DataRate::fsk(0),
            DataRate::lora(12, 500),
            DataRate::lora(11, 500),
            DataRate::lora(10, 500),
            DataRate::lora(9, 500),
            DataRate::lora(8, 500),
            DataRate::lora(7, 500),
        ],
        max_payload_size: vec![
            MaxPayloadSize { m: 19, n: 11 },
            MaxPayloadSize { m: 61, n: 53 },
            MaxPayloadSize { m: 133, n: 125 },
            MaxPayloadSize { m: 250, n: 242 },
            MaxPayloadSize { m: 250, n: 242 },
            MaxPayloadSize { m: 0, n: 0 },
            MaxPayloadSize { m: 0, n: 0 },
            MaxPayloadSize { m: 0, n: 0 },
            MaxPayloadSize { m: 41, n: 33 },
            MaxPayloadSize { m: 117, n: 109 },
            MaxPayloadSize { m: 230, n: 222 },
            MaxPayloadSize { m: 230, n: 222 },
            MaxPayloadSize { m: 230, n: 222 },
            MaxPayloadSize { m: 230, n: 222 },
        ],
        rx1_dr_table: vec![
            vec![10, 9, 8, 8],
            vec![11, 10, 9, 8],
            vec![12, 11, 10, 9],
            vec![13, 12, 11, 10],
            vec![13, 13, 12, 11],
        ],
        uplink_channels,
        downlink_channels,
        rx2_frequency: 923_300_000,
        rx2_data_rate: 8,
        default_tx_power: 20,
        receive_delay1: Duration::from_secs(1),
        receive_delay2: Duration::from_secs(2),
        join_accept_delay1: Duration::from_secs(5),
        join_accept_delay2: Duration::from_secs(6),
        max_fcnt_gap: 16_384,
    }
});

/// The EU 863–870 MHz band.
pub fn eu868() -> &'static Band {
    &EU868
}

/// The US 902–928 MHz band.
pub fn us915() -> &'static Band {
    &US915
}

/// Look up a band by its configuration name.
pub fn by_name(name: &str) -> Result<&'static Band, BandError> {
    match name.to_ascii_uppercase().as_str() {
        "EU868" => Ok(eu868()),
        "US915" => Ok(us915()),
        other => Err(BandError::UnknownBand(other.to_string())),
    }
}
