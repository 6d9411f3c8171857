use crate::sip::{Host, SipMessage, Transport};
use crate::transport::connection::TransportSender;
use crate::transport::stream::{StreamConnection, StreamConnectionInner};
use crate::transport::transport_layer::TransportLayerInnerRef;
use crate::transport::{SipAddr, SipConnection};
use crate::{error::Error, Result};
use rustls::client::danger::ServerCertVerifier;
use std::{fmt, net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{
    rustls::{pki_types, ClientConfig, RootCertStore, ServerConfig},
    TlsAcceptor, TlsConnector, TlsStream,
};
use tracing::{error, info, warn};

/// TLS material and validation policy for the encrypted stream channel.
///
/// `verifier` injects a custom certificate validation callback; when
/// absent, validation uses the `ca_certs` roots (or fails closed against
/// an empty store).
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    /// Server certificate chain in PEM format
    pub cert: Option<Vec<u8>>,
    /// Server private key in PEM format
    pub key: Option<Vec<u8>>,
    /// Root CA certificates in PEM format
    pub ca_certs: Option<Vec<u8>>,
    /// Custom certificate validation callback
    pub verifier: Option<Arc<dyn ServerCertVerifier>>,
}

type TlsInner = StreamConnectionInner<
    tokio::io::ReadHalf<TlsStream<TcpStream>>,
    tokio::io::WriteHalf<TlsStream<TcpStream>>,
>;

#[derive(Clone)]
pub struct TlsConnection {
    inner: Arc<TlsInner>,
    cancel_token: Option<tokio_util::sync::CancellationToken>,
}

impl TlsConnection {
    /// Connects to a remote TLS server and completes the handshake.
    pub async fn connect(remote: &SipAddr, config: &TlsConfig) -> Result<Self> {
        let mut root_store = RootCertStore::empty();
        if let Some(ca_certs) = &config.ca_certs {
            let mut reader = std::io::BufReader::new(&ca_certs[..]);
            for cert in rustls_pemfile::certs(&mut reader).flatten() {
                root_store.add(cert).ok();
            }
        }

        let mut client_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        if let Some(verifier) = &config.verifier {
            client_config
                .dangerous()
                .set_certificate_verifier(verifier.clone());
        }

        let connector = TlsConnector::from(Arc::new(client_config));

        let socket_addr = match &remote.addr.host {
            Host::Domain(domain) => {
                let port = remote.addr.port_or(Transport::Tls.default_port());
                tokio::net::lookup_host(format!("{}:{}", domain, port))
                    .await?
                    .next()
                    .ok_or_else(|| Error::DnsResolutionError(domain.clone()))?
            }
            Host::Ip(ip) => SocketAddr::new(*ip, remote.addr.port_or(Transport::Tls.default_port())),
        };

        let server_name_text = match &remote.addr.host {
            Host::Domain(domain) => domain.clone(),
            Host::Ip(ip) => ip.to_string(),
        };
        let server_name = pki_types::ServerName::try_from(server_name_text.as_str())
            .map_err(|_| Error::Error(format!("Invalid TLS server name: {}", server_name_text)))?
            .to_owned();

        let stream = TcpStream::connect(socket_addr).await?;
        let local = SipAddr {
            r#type: Some(Transport::Tls),
            addr: SipConnection::resolve_bind_address(stream.local_addr()?).into(),
        };
        let tls_stream = connector.connect(server_name, stream).await?;

        let (read_half, write_half) = tokio::io::split(TlsStream::Client(tls_stream));
        let connection = TlsConnection {
            inner: Arc::new(StreamConnectionInner::new(
                local.clone(),
                remote.clone(),
                read_half,
                write_half,
            )),
            cancel_token: None,
        };
        info!("created TLS client connection: {} -> {}", local, remote);
        Ok(connection)
    }

    pub fn from_accepted(
        stream: TlsStream<TcpStream>,
        local_addr: SipAddr,
        remote_addr: SocketAddr,
        cancel_token: Option<tokio_util::sync::CancellationToken>,
    ) -> Self {
        let remote = SipAddr {
            r#type: Some(Transport::Tls),
            addr: remote_addr.into(),
        };
        let (read_half, write_half) = tokio::io::split(stream);
        TlsConnection {
            inner: Arc::new(StreamConnectionInner::new(
                local_addr,
                remote,
                read_half,
                write_half,
            )),
            cancel_token,
        }
    }

    pub fn cancel_token(&self) -> Option<tokio_util::sync::CancellationToken> {
        self.cancel_token.clone()
    }
}

#[async_trait::async_trait]
impl StreamConnection for TlsConnection {
    fn get_addr(&self) -> &SipAddr {
        &self.inner.remote_addr
    }

    async fn send_message(&self, msg: SipMessage) -> Result<()> {
        self.inner.send_message(msg).await
    }

    async fn send_raw(&self, data: &[u8]) -> Result<()> {
        self.inner.send_raw(data).await
    }

    async fn serve_loop(&self, sender: TransportSender) -> Result<()> {
        let sip_connection = SipConnection::Tls(self.clone());
        self.inner.serve_loop(sender, sip_connection).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Display for TlsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TLS {} -> {}",
            self.inner.local_addr, self.inner.remote_addr
        )
    }
}

impl fmt::Debug for TlsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

pub struct TlsListenerConnectionInner {
    pub local_addr: SipAddr,
    pub external: Option<SipAddr>,
    pub config: TlsConfig,
}

#[derive(Clone)]
pub struct TlsListenerConnection {
    pub inner: Arc<TlsListenerConnectionInner>,
}

impl TlsListenerConnection {
    pub async fn new(
        local_addr: SipAddr,
        external: Option<SocketAddr>,
        config: TlsConfig,
    ) -> Result<Self> {
        Ok(TlsListenerConnection {
            inner: Arc::new(TlsListenerConnectionInner {
                local_addr,
                external: external.map(|addr| SipAddr {
                    r#type: Some(Transport::Tls),
                    addr: addr.into(),
                }),
                config,
            }),
        })
    }

    pub async fn serve_listener(
        &self,
        transport_layer_inner: TransportLayerInnerRef,
        sender: TransportSender,
    ) -> Result<()> {
        let certs = {
            let pem = self.inner.config.cert.as_ref().ok_or_else(|| {
                Error::Error("TLS listener requires a certificate".to_string())
            })?;
            let mut reader = std::io::BufReader::new(&pem[..]);
            rustls_pemfile::certs(&mut reader)
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        let key = {
            let pem = self
                .inner
                .config
                .key
                .as_ref()
                .ok_or_else(|| Error::Error("TLS listener requires a private key".to_string()))?;
            let mut reader = std::io::BufReader::new(&pem[..]);
            rustls_pemfile::private_key(&mut reader)?
                .ok_or_else(|| Error::Error("no private key found in PEM".to_string()))?
        };
        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind(self.inner.local_addr.get_socketaddr()?).await?;
        let advertised = self.get_addr().clone();
        tokio::spawn(async move {
            loop {
                let (stream, remote_addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("failed to accept TLS connection: {:?}", e);
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let advertised = advertised.clone();
                let transport_layer_inner = transport_layer_inner.clone();
                let sender = sender.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(tls_stream) => TlsStream::Server(tls_stream),
                        Err(e) => {
                            error!(%remote_addr, "TLS handshake failed: {:?}", e);
                            return;
                        }
                    };
                    let connection = TlsConnection::from_accepted(
                        tls_stream,
                        advertised,
                        remote_addr,
                        Some(transport_layer_inner.cancel_token.child_token()),
                    );
                    let sip_connection = SipConnection::Tls(connection);
                    info!(%remote_addr, "new inbound tls connection");
                    sender
                        .send(crate::transport::TransportEvent::New(sip_connection.clone()))
                        .ok();
                    transport_layer_inner.serve_connection(sip_connection, sender);
                });
            }
        });
        Ok(())
    }

    pub fn get_addr(&self) -> &SipAddr {
        self.inner.external.as_ref().unwrap_or(&self.inner.local_addr)
    }

    pub async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Display for TlsListenerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TLS Listener {}", self.get_addr())
    }
}

impl fmt::Debug for TlsListenerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
