//! # Network-Controller Client Contract
//!
//! The network controller observes MAC-layer traffic: it receives the MAC
//! commands the server does not consume itself, and error notifications
//! for malformed or unhandled commands.

use async_trait::async_trait;

use super::application::BackendError;
use crate::lorawan::Eui64;

/// An uplink MAC command forwarded to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleDataUpMacCommandRequest {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    /// Whether the command arrived encrypted in the FRMPayload (FPort 0)
    /// rather than in the FOpts field.
    pub frm_payload: bool,
    /// The raw command bytes, CID included.
    pub data: Vec<u8>,
}

/// MAC-layer error notification.
#[derive(Debug, Clone)]
pub struct ControllerErrorRequest {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    pub error: String,
}

/// The network-controller RPC surface.
#[async_trait]
pub trait NetworkController: Send + Sync {
    async fn handle_data_up_mac_command(
        &self,
        req: HandleDataUpMacCommandRequest,
    ) -> Result<(), BackendError>;

    async fn handle_error(&self, req: ControllerErrorRequest) -> Result<(), BackendError>;
}
