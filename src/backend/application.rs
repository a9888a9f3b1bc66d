//! # Application-Server Client Contract
//!
//! The application server owns the AppKey and AppSKey: it authenticates
//! join-requests, derives session keys, receives (still encrypted)
//! application payloads and queues downlink data. The network server only
//! talks to it through this trait; a gRPC client implements it in a real
//! deployment.

use async_trait::async_trait;
use thiserror::Error;

use crate::band::DataRate;
use crate::lorawan::{Aes128Key, DevAddr, Eui64, NetId};
use crate::storage::session::RxWindow;

/// Errors from backend RPC clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("rpc deadline exceeded")]
    DeadlineExceeded,
}

/// Error classes reported to the application server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Otaa,
    DataUp,
    DataDown,
}

/// Join-request forwarded for authentication and key derivation.
#[derive(Debug, Clone)]
pub struct JoinRequestRequest {
    /// Raw join-request PHY payload as received.
    pub phy_payload: Vec<u8>,
    /// The DevAddr this network proposes to assign.
    pub dev_addr: DevAddr,
    pub net_id: NetId,
}

/// Accepted join: the JoinAccept frame to transmit verbatim plus the
/// session parameters to install.
#[derive(Debug, Clone)]
pub struct JoinRequestResponse {
    pub phy_payload: Vec<u8>,
    pub nwk_s_key: Aes128Key,
    pub rx_delay: u8,
    pub rx1_dr_offset: u8,
    pub rx2_dr: u8,
    pub rx_window: RxWindow,
    /// Extra channel frequencies in Hz, at most five.
    pub cf_list: Vec<u32>,
    pub relax_fcnt: bool,
    /// Newer alias for `relax_fcnt`; either flag relaxes the
    /// frame-counter check.
    pub disable_f_cnt_check: bool,
    pub adr_interval: u32,
    pub installation_margin: f64,
}

/// An uplink application payload (ciphertext; the AppSKey stays with the
/// application server).
#[derive(Debug, Clone, PartialEq)]
pub struct HandleDataUpRequest {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    pub f_cnt: u32,
    pub f_port: u8,
    pub data: Vec<u8>,
    /// Number of gateways that received the frame.
    pub gateway_count: u32,
    /// RSSI of the best reception.
    pub rssi: i32,
    pub data_rate: DataRate,
}

/// Downlink queue poll.
#[derive(Debug, Clone, PartialEq)]
pub struct GetDataDownRequest {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    /// FRMPayload budget for the selected data-rate.
    pub max_payload_size: usize,
    /// The frame-counter the downlink will use.
    pub f_cnt: u32,
}

/// Downlink payload, if the application has one queued.
#[derive(Debug, Clone, PartialEq)]
pub struct GetDataDownResponse {
    pub data: Vec<u8>,
    pub confirmed: bool,
    pub more_data: bool,
    pub f_port: u8,
}

/// Confirmed-downlink acknowledgement observed on an uplink.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleDataDownAckRequest {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    pub f_cnt: u32,
}

/// Error notification.
#[derive(Debug, Clone)]
pub struct HandleErrorRequest {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    pub error_type: ErrorType,
    pub error: String,
}

/// The application-server RPC surface the network server depends on.
#[async_trait]
pub trait ApplicationServer: Send + Sync {
    /// Authenticate a join-request and derive the session. An `Err`
    /// rejects the join (bad MIC, replayed DevNonce, unknown device).
    async fn join_request(
        &self,
        req: JoinRequestRequest,
    ) -> Result<JoinRequestResponse, BackendError>;

    /// Deliver an uplink application payload.
    async fn handle_data_up(&self, req: HandleDataUpRequest) -> Result<(), BackendError>;

    /// Poll the downlink queue. `Ok(None)` means nothing queued.
    async fn get_data_down(
        &self,
        req: GetDataDownRequest,
    ) -> Result<Option<GetDataDownResponse>, BackendError>;

    /// Report that a confirmed downlink was acknowledged.
    async fn handle_data_down_ack(
        &self,
        req: HandleDataDownAckRequest,
    ) -> Result<(), BackendError>;

    /// Report a device-scoped error.
    async fn handle_error(&self, req: HandleErrorRequest) -> Result<(), BackendError>;
}
