use super::{
    connection::TransportSender,
    resolver::{Resolver, SipResolver},
    tcp::TcpConnection,
    tls::{TlsConfig, TlsConnection},
    websocket::WebSocketConnection,
    SipAddr, SipConnection, TransportEvent,
};
use crate::{
    sip::{Host, HostPort, Transport, Uri},
    Result,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct TransportLayerInner {
    pub cancel_token: CancellationToken,
    /// Local listen bindings, keyed by (transport, host:port). These
    /// supply Via/Contact addresses and the shared datagram channel.
    listens: Mutex<HashMap<SipAddr, SipConnection>>,
    /// Established outbound/accepted stream connections, keyed by the
    /// remote (transport, host:port) for reuse.
    connections: Mutex<HashMap<SipAddr, SipConnection>>,
    sender: Mutex<Option<TransportSender>>,
    resolver: Mutex<Option<Arc<dyn Resolver>>>,
    tls_config: Mutex<TlsConfig>,
}

pub type TransportLayerInnerRef = Arc<TransportLayerInner>;

/// Owns the channels and picks the outbound destination for each
/// request: URI transport parameter, then sips ⇒ TLS, then DNS
/// (NAPTR/SRV/A), then the UDP default.
pub struct TransportLayer {
    /// When set, all outbound traffic goes through this address
    /// (outbound-proxy style), bypassing per-request resolution.
    pub outbound: Option<SipAddr>,
    pub inner: TransportLayerInnerRef,
}

impl TransportLayer {
    pub fn new(cancel_token: CancellationToken) -> Self {
        let inner = TransportLayerInner {
            cancel_token,
            listens: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            sender: Mutex::new(None),
            resolver: Mutex::new(None),
            tls_config: Mutex::new(TlsConfig::default()),
        };
        Self {
            outbound: None,
            inner: Arc::new(inner),
        }
    }

    /// Installs a DNS resolver; without one, domain targets resolve via
    /// the operating system's lookup only.
    pub fn set_resolver(&self, resolver: Arc<dyn Resolver>) {
        self.inner.resolver.lock().unwrap().replace(resolver);
    }

    /// Enables RFC 3263 NAPTR/SRV resolution with the system DNS.
    pub fn enable_srv_resolution(&self) -> Result<()> {
        let resolver = SipResolver::from_system()?;
        self.set_resolver(Arc::new(resolver));
        Ok(())
    }

    pub fn set_tls_config(&self, config: TlsConfig) {
        *self.inner.tls_config.lock().unwrap() = config;
    }

    /// Adds a listen binding (bound socket or listener).
    pub fn add_transport(&self, connection: SipConnection) {
        self.inner
            .listens
            .lock()
            .unwrap()
            .insert(connection.get_addr().to_owned(), connection);
    }

    pub fn del_transport(&self, addr: &SipAddr) {
        self.inner.listens.lock().unwrap().remove(addr);
    }

    pub fn get_addrs(&self) -> Vec<SipAddr> {
        self.inner.listens.lock().unwrap().keys().cloned().collect()
    }

    /// First local binding matching the transport, used for Via and
    /// Contact construction. Established connections never leak in
    /// here: their keys are remote addresses.
    pub fn first_addr(&self, transport: Option<Transport>) -> Option<SipAddr> {
        let listens = self.inner.listens.lock().unwrap();
        match transport {
            Some(t) => listens
                .keys()
                .find(|addr| addr.r#type == Some(t))
                .cloned(),
            None => listens
                .keys()
                .find(|addr| addr.r#type == Some(Transport::Udp))
                .or_else(|| listens.keys().next())
                .cloned(),
        }
    }

    /// Finds or establishes the connection for a request URI and
    /// returns it with the concrete destination address.
    pub async fn lookup(&self, uri: &Uri) -> Result<(SipConnection, SipAddr)> {
        self.inner.lookup(uri, self.outbound.as_ref()).await
    }

    pub async fn serve_listens(&self, sender: TransportSender) -> Result<()> {
        self.inner.serve_listens(sender).await
    }
}

impl TransportLayerInner {
    pub fn add_connection(&self, connection: SipConnection) {
        self.connections
            .lock()
            .unwrap()
            .insert(connection.get_addr().to_owned(), connection);
    }

    pub fn del_connection(&self, addr: &SipAddr) {
        self.connections.lock().unwrap().remove(addr);
    }

    /// Registers an established connection and runs its receive loop
    /// until it closes, then drops it from the pool.
    pub fn serve_connection(self: &Arc<Self>, connection: SipConnection, sender: TransportSender) {
        self.add_connection(connection.clone());
        let inner = self.clone();
        let sub_token = self.cancel_token.child_token();
        tokio::spawn(async move {
            select! {
                _ = sub_token.cancelled() => {}
                _ = connection.serve_loop(sender.clone()) => {}
            }
            inner.del_connection(connection.get_addr());
            warn!("connection serve loop exited: {}", connection.get_addr());
            sender.send(TransportEvent::Closed(connection)).ok();
        });
    }

    async fn lookup(
        self: &Arc<Self>,
        uri: &Uri,
        outbound: Option<&SipAddr>,
    ) -> Result<(SipConnection, SipAddr)> {
        let target = match outbound {
            Some(addr) => addr.clone(),
            None => {
                let transport = if uri.is_secure() {
                    uri.transport().unwrap_or(Transport::Tls)
                } else {
                    uri.transport().unwrap_or(Transport::Udp)
                };
                SipAddr {
                    r#type: Some(transport),
                    addr: uri.host_port.clone(),
                }
            }
        };

        info!("lookup target: {} -> {}", uri, target);

        // Domain hosts without an outbound proxy go through DNS; each
        // candidate is tried until one yields a connection.
        if outbound.is_none() && target.addr.host.is_domain() {
            let resolver = self.resolver.lock().unwrap().clone();
            if let Some(resolver) = resolver {
                let candidates = resolver.resolve(uri).await?;
                let mut last_err = None;
                for candidate in candidates {
                    let addr = SipAddr {
                        r#type: Some(candidate.transport),
                        addr: HostPort {
                            host: match candidate.host.parse() {
                                Ok(ip) => Host::Ip(ip),
                                Err(_) => Host::Domain(candidate.host.clone()),
                            },
                            port: Some(candidate.port),
                        },
                    };
                    match self.connection_for(addr).await {
                        Ok(found) => return Ok(found),
                        Err(e) => last_err = Some(e),
                    }
                }
                return Err(last_err.unwrap_or_else(|| {
                    crate::Error::TransportLayerError("unreachable".to_string(), target)
                }));
            }
        }

        self.connection_for(target).await
    }

    /// Finds an existing connection for the address or creates one for
    /// connection-oriented transports. The returned address is the
    /// concrete transmission destination.
    async fn connection_for(
        self: &Arc<Self>,
        target: SipAddr,
    ) -> Result<(SipConnection, SipAddr)> {
        let destination = self.resolve_destination(&target).await?;

        if let Some(connection) = self.listens.lock().unwrap().get(&destination) {
            return Ok((connection.clone(), destination));
        }
        if let Some(connection) = self.connections.lock().unwrap().get(&destination) {
            return Ok((connection.clone(), destination));
        }

        match destination.r#type {
            Some(Transport::Udp) | None => {
                // Datagram traffic shares the bound socket.
                let listens = self.listens.lock().unwrap();
                for connection in listens.values() {
                    if connection.get_addr().r#type == Some(Transport::Udp) {
                        return Ok((connection.clone(), destination));
                    }
                }
                Err(crate::Error::TransportLayerError(
                    "no UDP channel bound".to_string(),
                    destination,
                ))
            }
            Some(Transport::Tcp) => {
                let connection = TcpConnection::connect(
                    &destination,
                    Some(self.cancel_token.child_token()),
                )
                .await?;
                let connection = SipConnection::Tcp(connection);
                self.serve_established(connection.clone());
                Ok((connection, destination))
            }
            Some(Transport::Tls) => {
                let config = self.tls_config.lock().unwrap().clone();
                let connection = TlsConnection::connect(&destination, &config).await?;
                let connection = SipConnection::Tls(connection);
                self.serve_established(connection.clone());
                Ok((connection, destination))
            }
            Some(Transport::Ws) | Some(Transport::Wss) => {
                let connection = WebSocketConnection::connect(
                    &destination,
                    Some(self.cancel_token.child_token()),
                )
                .await?;
                let connection = SipConnection::WebSocket(connection);
                self.serve_established(connection.clone());
                Ok((connection, destination))
            }
        }
    }

    fn serve_established(self: &Arc<Self>, connection: SipConnection) {
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some(sender) => self.serve_connection(connection, sender),
            // Not serving yet: register only; serve_listens will pick
            // it up.
            None => self.add_connection(connection),
        }
    }

    /// Resolves a domain destination to a socket address via the OS
    /// resolver, keeping the transport kind.
    async fn resolve_destination(&self, target: &SipAddr) -> Result<SipAddr> {
        let transport = target.r#type.unwrap_or(Transport::Udp);
        match &target.addr.host {
            Host::Ip(_) => Ok(SipAddr {
                r#type: Some(transport),
                addr: HostPort {
                    host: target.addr.host.clone(),
                    port: Some(target.addr.port_or(transport.default_port())),
                },
            }),
            Host::Domain(domain) => {
                let port = target.addr.port_or(transport.default_port());
                let addr = tokio::net::lookup_host(format!("{}:{}", domain, port))
                    .await?
                    .next()
                    .ok_or_else(|| crate::Error::DnsResolutionError(domain.clone()))?;
                Ok(SipAddr {
                    r#type: Some(transport),
                    addr: addr.into(),
                })
            }
        }
    }

    async fn serve_listens(self: &Arc<Self>, sender: TransportSender) -> Result<()> {
        self.sender.lock().unwrap().replace(sender.clone());
        let mut serving = self.listens.lock().unwrap().clone();
        serving.extend(self.connections.lock().unwrap().clone());
        for (_, connection) in serving {
            match &connection {
                SipConnection::TcpListener(listener) => {
                    listener.serve_listener(self.clone(), sender.clone()).await?;
                }
                SipConnection::TlsListener(listener) => {
                    listener.serve_listener(self.clone(), sender.clone()).await?;
                }
                SipConnection::WebSocketListener(listener) => {
                    listener.serve_listener(self.clone(), sender.clone()).await?;
                }
                _ => {
                    let sub_token = self.cancel_token.child_token();
                    let sender_clone = sender.clone();
                    let inner = self.clone();
                    let connection = connection.clone();
                    tokio::spawn(async move {
                        select! {
                            _ = sub_token.cancelled() => {}
                            _ = connection.serve_loop(sender_clone.clone()) => {}
                        }
                        inner.listens.lock().unwrap().remove(connection.get_addr());
                        inner.del_connection(connection.get_addr());
                        warn!("transport serve_loop exited: {}", connection.get_addr());
                        sender_clone.send(TransportEvent::Closed(connection)).ok();
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{transport::udp::UdpConnection, Result};

    #[tokio::test]
    async fn test_lookup() -> Result<()> {
        let mut tl = super::TransportLayer::new(tokio_util::sync::CancellationToken::new());

        let first_uri = crate::sip::Uri::parse("sip:bob@127.0.0.1:5060").expect("parse uri");
        assert!(tl.lookup(&first_uri).await.is_err());

        let udp_peer = UdpConnection::create_connection("127.0.0.1:0".parse()?, None).await?;
        let udp_peer_addr = udp_peer.get_addr().to_owned();
        tl.add_transport(udp_peer.into());

        let (connection, _) = tl.lookup(&first_uri).await?;
        assert_eq!(connection.get_addr(), &udp_peer_addr);

        // test outbound
        let outbound_peer = UdpConnection::create_connection("127.0.0.1:0".parse()?, None).await?;
        let outbound = outbound_peer.get_addr().to_owned();
        tl.add_transport(outbound_peer.into());
        tl.outbound = Some(outbound.clone());

        // must return the outbound transport
        let (connection, destination) = tl.lookup(&first_uri).await?;
        assert_eq!(connection.get_addr(), &outbound);
        assert_eq!(destination, outbound);
        Ok(())
    }
}
