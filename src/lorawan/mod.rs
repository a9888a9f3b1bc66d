//! LoRaWAN 1.0 frame codec: PHY payload parsing and generation, MIC
//! computation, payload encryption and the MAC-command wire format.

pub mod crypto;
pub mod maccommands;
pub mod phy;
pub mod types;

pub use crypto::Direction;
pub use phy::{
    CfList, FCtrl, Fhdr, FrameError, JoinAcceptPayload, JoinRequestPayload, MType, MacPayload,
    Mhdr, Payload, PhyPayload,
};
pub use types::{Aes128Key, DevAddr, Eui64, NetId};
