//! Socket.IO channel to the conversation service: wire codec, typed events, websocket transport.

pub mod packet;
pub mod protocol;
mod transport;

pub use protocol::{ClientEvent, ProtocolError, ServerEvent};
pub use transport::{
    socket_url, SocketError, SocketIoTransport, SocketOptions, Transport, TransportError,
    TransportEvent,
};
