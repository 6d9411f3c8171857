pub mod channel;
pub mod connection;
pub mod resolver;
pub mod sip_addr;
pub mod stream;
pub mod tcp;
pub mod tcp_listener;
pub mod tls;
pub mod transport_layer;
pub mod udp;
pub mod websocket;
pub use connection::SipConnection;
pub use connection::TransportEvent;
pub use resolver::{DnsTarget, Resolver, SipResolver, StaticResolver};
pub use sip_addr::SipAddr;
pub use tcp_listener::TcpListenerConnection;
pub use tls::{TlsConfig, TlsListenerConnection};
pub use transport_layer::TransportLayer;
pub use websocket::WebSocketListenerConnection;

/// Largest message sent over a datagram channel before the stack demands
/// a reliable transport (RFC 3261 §18.1.1 path-MTU rule).
pub const CONGESTION_THRESHOLD: usize = 1300;

/// Hard receive limit for a single datagram (RFC 3261 §18.1.1).
pub const MAX_DATAGRAM_SIZE: usize = 65527;

#[cfg(test)]
pub mod tests;
