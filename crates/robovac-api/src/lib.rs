// robovac-api: Async Rust client for the Tuya v3.3 local protocol (Eufy RoboVac)

pub mod cipher;
pub mod discovery;
pub mod dps;
pub mod error;
pub mod frame;
pub mod session;
pub mod transport;

pub use cipher::{Cipher, DeviceKey};
pub use discovery::{DiscoveredDevice, decode_datagram};
pub use dps::{DpsMap, DpsValue};
pub use error::Error;
pub use frame::{CommandCode, Frame, FrameDecoder};
pub use session::{ConnectionState, FrameKind, InboundFrame, Session, SessionEvent};
pub use transport::{DEFAULT_PORT, SessionConfig};
