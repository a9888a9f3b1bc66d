//! Downlink scheduling: uplink responses, unsolicited pushes and the
//! join-accept transmission, each within the device's receive window.

pub mod data;
pub mod join;

pub use data::{push_data_down, send_uplink_response, DownlinkError, RpcCode};
pub use join::send_join_accept_response;
