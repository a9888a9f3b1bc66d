//! External collaborators, named by their contracts: the gateway
//! transport, the application server and the network controller. Real
//! deployments implement these traits over their transport of choice
//! (MQTT, gRPC); the [`mock`] module provides in-process implementations
//! for tests and the demo binary.

pub mod application;
pub mod controller;
pub mod gateway;
pub mod mock;

pub use application::{ApplicationServer, BackendError, ErrorType};
pub use controller::NetworkController;
pub use gateway::{Gateway, GatewayEvent, RxInfo, RxPacket, TxInfo, TxPacket};
