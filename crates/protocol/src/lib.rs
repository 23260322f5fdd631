//! chorus-protocol – Binaeres Netzwerkprotokoll
//!
//! Dieses Crate definiert alle Pakete die zwischen Client und Server
//! ausgetauscht werden, deren binaere Kodierung, das Framing fuer die
//! Control-Verbindung (TCP) und den Umschlag fuer Voice-Datagramme (UDP).

pub mod codec;
pub mod envelope;
pub mod error;
pub mod field;
pub mod packet;
pub mod registry;
pub mod wire;

pub use codec::PacketCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use packet::Packet;
pub use registry::PacketRegistry;
pub use wire::ControlFrameCodec;
