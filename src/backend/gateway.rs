//! # Gateway Transport Models
//!
//! Wire-level structures exchanged with the gateway transport adapter:
//! received radio frames with their per-gateway reception metadata,
//! frames to transmit with their radio parameters, and periodic gateway
//! statistics. The adapter itself (MQTT, UDP packet-forwarder, ...) lives
//! outside this crate; [`Gateway`] is the contract it implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::band::DataRate;
use crate::lorawan::Eui64;

/// Errors from the gateway transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway transport closed")]
    Closed,
}

/// Reception metadata for a single gateway that heard a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxInfo {
    /// MAC address of the receiving gateway.
    pub mac: Eui64,
    /// Gateway-local concentrator timestamp in microseconds. Wraps.
    pub timestamp: u32,
    /// Center frequency in Hz.
    pub frequency: u32,
    pub data_rate: DataRate,
    /// e.g. "4/5".
    pub code_rate: String,
    pub rssi: i32,
    pub lora_snr: f64,
    /// 1 = CRC OK, -1 = CRC fail, 0 = no CRC.
    pub crc_status: i8,
}

/// A frame as received from one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxPacket {
    pub rx_info: RxInfo,
    pub phy_payload: Vec<u8>,
}

/// Transmission parameters for a downlink frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInfo {
    /// MAC address of the gateway that must transmit.
    pub mac: Eui64,
    /// Transmit immediately, ignoring the timestamp.
    pub immediately: bool,
    /// Gateway-local concentrator timestamp in microseconds at which the
    /// frame must air.
    pub timestamp: u32,
    pub frequency: u32,
    /// TX power in dBm.
    pub power: i32,
    pub data_rate: DataRate,
    pub code_rate: String,
}

/// A frame handed to a gateway for transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxPacket {
    pub tx_info: TxInfo,
    pub phy_payload: Vec<u8>,
}

/// Periodic statistics published by a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatsPacket {
    pub mac: Eui64,
    pub rx_packets_received: u32,
    pub rx_packets_received_ok: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

/// Inbound events from the gateway transport.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Rx(RxPacket),
    Stats(GatewayStatsPacket),
}

/// Outbound contract of the gateway transport adapter.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Enqueue a frame on the addressed gateway's transmission scheduler.
    async fn send_tx_packet(&self, packet: TxPacket) -> Result<(), GatewayError>;
}

/// Channel-backed [`Gateway`] for in-process wiring: transmitted packets
/// land on a tokio channel the other side of which is the test harness or
/// the demo loop.
pub struct ChannelGateway {
    tx: mpsc::UnboundedSender<TxPacket>,
}

impl ChannelGateway {
    /// Create the gateway and the receiving end of its downlink path.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TxPacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelGateway { tx }, rx)
    }
}

#[async_trait]
impl Gateway for ChannelGateway {
    async fn send_tx_packet(&self, packet: TxPacket) -> Result<(), GatewayError> {
        self.tx.send(packet).map_err(|_| GatewayError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band;

    #[tokio::test]
    async fn test_channel_gateway_delivers() {
        let (gw, mut rx) = ChannelGateway::new();
        let packet = TxPacket {
            tx_info: TxInfo {
                mac: "0102030405060708".parse().unwrap(),
                immediately: false,
                timestamp: 5_000_000,
                frequency: 868_100_000,
                power: 14,
                data_rate: *band::eu868().data_rate(0).unwrap(),
                code_rate: "4/5".to_string(),
            },
            phy_payload: vec![0x20, 1, 2, 3],
        };
        gw.send_tx_packet(packet.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), packet);
    }

    #[tokio::test]
    async fn test_channel_gateway_closed() {
        let (gw, rx) = ChannelGateway::new();
        drop(rx);
        let packet = TxPacket {
            tx_info: TxInfo {
                mac: Eui64::default(),
                immediately: true,
                timestamp: 0,
                frequency: 0,
                power: 0,
                data_rate: *band::eu868().data_rate(0).unwrap(),
                code_rate: String::new(),
            },
            phy_payload: vec![],
        };
        assert_eq!(
            gw.send_tx_packet(packet).await,
            Err(GatewayError::Closed)
        );
    }
}
