//! Network Layer
//!
//! Reliable UDP between the two peers and the state machines riding on it.
//! This layer is **non-deterministic** (arrival order, loss); all match
//! rules live in `game/`.

pub mod protocol;
pub mod codec;
pub mod socket;
pub mod transport;
pub mod session;
pub mod field;
pub mod peer;

pub use protocol::{
    Envelope, Scope, PhaseName, PlayerState, Packet, PacketError,
    LobbyPacket, MapSelectorPacket, FieldPacket, InputPopupPacket,
};
pub use codec::{Codec, CodecError, JsonCodec};
pub use socket::{DatagramSocket, UdpDatagramSocket, MemoryNetwork, MemorySocket, discover_local_ip};
pub use transport::{ReliableTransport, TransportError, Received, Polled};
pub use session::{Session, SessionConfig, SessionError, SessionEvent, Phase, Role, Outgoing};
pub use field::{MatchField, FieldError};
pub use peer::{Peer, TickReport};
