use super::{sip_addr::SipAddr, tcp::TcpConnection, udp::UdpConnection};
use crate::sip::{Host, HostPort, Param, SipMessage, Transport, Via};
use crate::transport::channel::ChannelConnection;
use crate::transport::stream::StreamConnection;
use crate::transport::websocket::{WebSocketConnection, WebSocketListenerConnection};
use crate::transport::{
    tcp_listener::TcpListenerConnection,
    tls::{TlsConnection, TlsListenerConnection},
};
use crate::Result;
use get_if_addrs::IfAddr;
use std::net::{IpAddr, Ipv4Addr};
use std::{fmt, net::SocketAddr};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Events flowing up from the channels to the endpoint.
#[derive(Debug)]
pub enum TransportEvent {
    /// A parsed SIP message with the connection it arrived on and the
    /// peer address it came from.
    Incoming(SipMessage, SipConnection, SipAddr),
    New(SipConnection),
    Closed(SipConnection),
}

pub type TransportReceiver = UnboundedReceiver<TransportEvent>;
pub type TransportSender = UnboundedSender<TransportEvent>;

pub const KEEPALIVE_REQUEST: &[u8] = b"\r\n\r\n";
pub const KEEPALIVE_RESPONSE: &[u8] = b"\r\n";

/// Uniform capability surface over the channel kinds: send a message,
/// run the receive loop, report the local binding and reliability.
///
/// Reliability decides retransmission behavior upstairs: datagram
/// channels need the RFC 3261 retransmission timers, stream channels do
/// not. Via `received`/`rport` stamping for inbound requests lives here
/// because every channel kind shares it.
#[derive(Clone, Debug)]
pub enum SipConnection {
    Channel(ChannelConnection),
    Udp(UdpConnection),
    Tcp(TcpConnection),
    TcpListener(TcpListenerConnection),
    Tls(TlsConnection),
    TlsListener(TlsListenerConnection),
    WebSocket(WebSocketConnection),
    WebSocketListener(WebSocketListenerConnection),
}

impl SipConnection {
    pub fn is_reliable(&self) -> bool {
        !matches!(self, SipConnection::Udp(_) | SipConnection::Channel(_))
    }

    pub fn transport(&self) -> Option<Transport> {
        self.get_addr().r#type
    }

    pub fn cancel_token(&self) -> Option<CancellationToken> {
        match self {
            SipConnection::Tcp(transport) => transport.cancel_token(),
            SipConnection::Tls(transport) => transport.cancel_token(),
            SipConnection::WebSocket(transport) => transport.cancel_token(),
            _ => None,
        }
    }

    pub fn get_addr(&self) -> &SipAddr {
        match self {
            SipConnection::Channel(transport) => transport.get_addr(),
            SipConnection::Udp(transport) => transport.get_addr(),
            SipConnection::Tcp(transport) => transport.get_addr(),
            SipConnection::TcpListener(transport) => transport.get_addr(),
            SipConnection::Tls(transport) => transport.get_addr(),
            SipConnection::TlsListener(transport) => transport.get_addr(),
            SipConnection::WebSocket(transport) => transport.get_addr(),
            SipConnection::WebSocketListener(transport) => transport.get_addr(),
        }
    }

    pub async fn send(&self, msg: SipMessage, destination: Option<&SipAddr>) -> Result<()> {
        match self {
            SipConnection::Channel(transport) => transport.send(msg).await,
            SipConnection::Udp(transport) => transport.send(msg, destination).await,
            SipConnection::Tcp(transport) => transport.send_message(msg).await,
            SipConnection::Tls(transport) => transport.send_message(msg).await,
            SipConnection::WebSocket(transport) => transport.send_message(msg).await,
            SipConnection::TcpListener(_)
            | SipConnection::TlsListener(_)
            | SipConnection::WebSocketListener(_) => {
                debug!("SipConnection::send: listener connections cannot send");
                Ok(())
            }
        }
    }

    pub async fn serve_loop(&self, sender: TransportSender) -> Result<()> {
        match self {
            SipConnection::Channel(transport) => transport.serve_loop(sender).await,
            SipConnection::Udp(transport) => transport.serve_loop(sender).await,
            SipConnection::Tcp(transport) => transport.serve_loop(sender).await,
            SipConnection::Tls(transport) => transport.serve_loop(sender).await,
            SipConnection::WebSocket(transport) => transport.serve_loop(sender).await,
            SipConnection::TcpListener(_)
            | SipConnection::TlsListener(_)
            | SipConnection::WebSocketListener(_) => {
                debug!("SipConnection::serve_loop: listeners are served by the transport layer");
                Ok(())
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            SipConnection::Channel(transport) => transport.close().await,
            SipConnection::Udp(_) => Ok(()), // UDP has no connection state
            SipConnection::Tcp(transport) => transport.close().await,
            SipConnection::TcpListener(transport) => transport.close().await,
            SipConnection::Tls(transport) => transport.close().await,
            SipConnection::TlsListener(transport) => transport.close().await,
            SipConnection::WebSocket(transport) => transport.close().await,
            SipConnection::WebSocketListener(transport) => transport.close().await,
        }
    }
}

impl SipConnection {
    /// Stamps `received=` / `rport=` on the top Via of an inbound request
    /// when the source address disagrees with the sent-by (RFC 3261
    /// §18.2.1, RFC 3581). Responses pass through untouched.
    pub fn update_msg_received(
        msg: SipMessage,
        addr: SocketAddr,
        transport: Transport,
    ) -> Result<SipMessage> {
        match msg {
            SipMessage::Request(mut req) => {
                let via = req.via_mut()?;
                Self::build_via_received(via, addr, transport);
                Ok(req.into())
            }
            SipMessage::Response(_) => Ok(msg),
        }
    }

    pub fn build_via_received(via: &mut Via, addr: SocketAddr, transport: Transport) {
        let rport_requested = matches!(via.rport(), Some(None));

        let sent_by_matches = match (&via.sent_by.host, via.sent_by.port) {
            (Host::Ip(ip), Some(port)) => *ip == addr.ip() && port == addr.port(),
            (Host::Ip(ip), None) => *ip == addr.ip(),
            _ => false,
        };
        if sent_by_matches && !rport_requested {
            return;
        }

        // Only stamp `received` when the source differs; reliable
        // transports additionally skip it when only the port moved.
        let host_matches = matches!(&via.sent_by.host, Host::Ip(ip) if *ip == addr.ip());
        let should_add_received = match transport {
            Transport::Udp => !sent_by_matches,
            _ => !host_matches,
        };

        via.params.retain(|p| {
            !matches!(p, Param::Received(_)) && !p.name().eq_ignore_ascii_case("rport")
        });
        if should_add_received {
            via.params.push(Param::Received(addr.ip().to_string()));
        }
        if rport_requested || transport == Transport::Udp {
            via.params.push(Param::Rport(Some(addr.port())));
        }
    }

    /// Destination for a response, derived from the top Via per RFC 3261
    /// §18.2.2: `received`/`rport` win over the sent-by.
    pub fn parse_target_from_via(via: &Via) -> (Transport, HostPort) {
        let mut host_port = via.sent_by.clone();
        let mut transport = via.transport;
        for param in &via.params {
            match param {
                Param::Received(addr) => {
                    if let Ok(ip) = addr.parse::<IpAddr>() {
                        host_port.host = Host::Ip(ip);
                    }
                }
                Param::Rport(Some(port)) => {
                    host_port.port = Some(*port);
                }
                Param::Transport(t) => {
                    transport = *t;
                }
                _ => {}
            }
        }
        (transport, host_port)
    }

    /// Where a message should be transmitted: request-URI for requests,
    /// top-Via target for responses.
    pub fn get_destination(msg: &SipMessage) -> Result<SocketAddr> {
        match msg {
            SipMessage::Request(req) => {
                let host_port = &req.uri.host_port;
                SocketAddr::try_from(host_port).map_err(Into::into)
            }
            SipMessage::Response(resp) => {
                let (_, host_port) = Self::parse_target_from_via(resp.via()?);
                SocketAddr::try_from(&host_port).map_err(Into::into)
            }
        }
    }

    /// Picks a concrete local address for wildcard binds so Via and
    /// Contact headers carry a routable host.
    pub fn resolve_bind_address(addr: SocketAddr) -> SocketAddr {
        let ip = addr.ip();
        if ip.is_unspecified() {
            let interfaces = match get_if_addrs::get_if_addrs() {
                Ok(interfaces) => interfaces,
                Err(_) => return addr,
            };
            for interface in interfaces {
                if interface.is_loopback() {
                    continue;
                }
                match interface.addr {
                    IfAddr::V4(v4addr) => {
                        return SocketAddr::new(IpAddr::V4(v4addr.ip), addr.port());
                    }
                    // TODO: consider advertising IPv6 binds once Contact
                    // selection understands address families
                    _ => continue,
                }
            }
            return SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), addr.port());
        }
        addr
    }
}

impl fmt::Display for SipConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipConnection::Channel(t) => write!(f, "{}", t),
            SipConnection::Udp(t) => write!(f, "{}", t),
            SipConnection::Tcp(t) => write!(f, "{}", t),
            SipConnection::TcpListener(t) => write!(f, "TCP LISTEN {}", t),
            SipConnection::Tls(t) => write!(f, "{}", t),
            SipConnection::TlsListener(t) => write!(f, "TLS LISTEN {}", t),
            SipConnection::WebSocket(t) => write!(f, "{}", t),
            SipConnection::WebSocketListener(t) => write!(f, "WS LISTEN {}", t),
        }
    }
}

impl From<ChannelConnection> for SipConnection {
    fn from(connection: ChannelConnection) -> Self {
        SipConnection::Channel(connection)
    }
}

impl From<UdpConnection> for SipConnection {
    fn from(connection: UdpConnection) -> Self {
        SipConnection::Udp(connection)
    }
}

impl From<TcpConnection> for SipConnection {
    fn from(connection: TcpConnection) -> Self {
        SipConnection::Tcp(connection)
    }
}

impl From<TcpListenerConnection> for SipConnection {
    fn from(connection: TcpListenerConnection) -> Self {
        SipConnection::TcpListener(connection)
    }
}

impl From<TlsConnection> for SipConnection {
    fn from(connection: TlsConnection) -> Self {
        SipConnection::Tls(connection)
    }
}

impl From<TlsListenerConnection> for SipConnection {
    fn from(connection: TlsListenerConnection) -> Self {
        SipConnection::TlsListener(connection)
    }
}

impl From<WebSocketConnection> for SipConnection {
    fn from(connection: WebSocketConnection) -> Self {
        SipConnection::WebSocket(connection)
    }
}

impl From<WebSocketListenerConnection> for SipConnection {
    fn from(connection: WebSocketListenerConnection) -> Self {
        SipConnection::WebSocketListener(connection)
    }
}
