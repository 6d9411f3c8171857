use super::{
    connection::{TransportSender, KEEPALIVE_REQUEST, KEEPALIVE_RESPONSE},
    SipAddr, SipConnection, TransportEvent,
};
use crate::{
    sip::{parse_message, SipMessage, Transport},
    transport::MAX_DATAGRAM_SIZE,
    Result,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::UdpSocket;
use tracing::{error, info, trace};

struct UdpInner {
    conn: UdpSocket,
    addr: SipAddr,
}

/// Connectionless datagram channel: one message per datagram.
#[derive(Clone)]
pub struct UdpConnection {
    inner: Arc<UdpInner>,
}

impl UdpConnection {
    /// Binds a UDP socket. `external` advertises a NAT-mapped address in
    /// Via/Contact instead of the local binding.
    pub async fn create_connection(
        local: SocketAddr,
        external: Option<SocketAddr>,
    ) -> Result<Self> {
        let conn = UdpSocket::bind(local).await?;
        let advertised = external
            .unwrap_or(SipConnection::resolve_bind_address(conn.local_addr()?));
        let addr = SipAddr {
            r#type: Some(Transport::Udp),
            addr: advertised.into(),
        };
        let t = UdpConnection {
            inner: Arc::new(UdpInner { conn, addr }),
        };
        info!("created UDP connection: {}", t);
        Ok(t)
    }

    pub async fn serve_loop(&self, sender: TransportSender) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, addr) = match self.inner.conn.recv_from(&mut buf).await {
                Ok((len, addr)) => (len, addr),
                Err(e) => {
                    error!("error receiving UDP packet: {}", e);
                    continue;
                }
            };

            let datagram = &buf[..len];
            if datagram.is_empty() || datagram == KEEPALIVE_RESPONSE {
                continue;
            }
            if datagram == KEEPALIVE_REQUEST {
                self.inner.conn.send_to(KEEPALIVE_RESPONSE, addr).await.ok();
                continue;
            }

            let msg = match parse_message(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    info!("dropping malformed datagram from {}: {}", addr, e);
                    continue;
                }
            };
            let msg = match SipConnection::update_msg_received(msg, addr, Transport::Udp) {
                Ok(msg) => msg,
                Err(e) => {
                    info!("error updating via from {}: {}", addr, e);
                    continue;
                }
            };

            trace!("received {} bytes {} -> {}", len, addr, self.get_addr());

            let source = SipAddr {
                r#type: Some(Transport::Udp),
                addr: addr.into(),
            };
            sender.send(TransportEvent::Incoming(
                msg,
                SipConnection::Udp(self.clone()),
                source,
            ))?;
        }
    }

    pub async fn send(&self, msg: SipMessage, destination: Option<&SipAddr>) -> Result<()> {
        let target = match destination {
            Some(addr) => addr.get_socketaddr()?,
            None => SipConnection::get_destination(&msg)?,
        };
        let buf = msg.to_bytes();

        trace!(
            "sending {} bytes {} -> {}",
            buf.len(),
            self.get_addr(),
            target
        );

        self.inner
            .conn
            .send_to(&buf, target)
            .await
            .map_err(|e| {
                crate::Error::TransportLayerError(e.to_string(), self.get_addr().to_owned())
            })
            .map(|_| ())
    }

    pub fn get_addr(&self) -> &SipAddr {
        &self.inner.addr
    }
}

impl std::fmt::Display for UdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get_addr())
    }
}

impl std::fmt::Debug for UdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
