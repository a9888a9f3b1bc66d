//! MAC-command engine: the per-device downlink command queue and the
//! dispatch of commands received on uplinks.

pub mod handler;
pub mod queue;

pub use handler::handle_uplink_mac_commands;
pub use queue::{filter_items, QueueError, QueueItem};
