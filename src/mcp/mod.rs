mod bridge;

pub use bridge::{BridgeClient, BridgeError};
