use crate::sip::Transport;
use crate::transport::connection::TransportSender;
use crate::transport::tcp::TcpConnection;
use crate::transport::transport_layer::TransportLayerInnerRef;
use crate::transport::SipAddr;
use crate::transport::SipConnection;
use crate::Result;
use std::fmt;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub struct TcpListenerConnectionInner {
    pub local_addr: SipAddr,
    pub external: Option<SipAddr>,
}

#[derive(Clone)]
pub struct TcpListenerConnection {
    pub inner: Arc<TcpListenerConnectionInner>,
}

impl TcpListenerConnection {
    pub async fn new(local_addr: SipAddr, external: Option<SocketAddr>) -> Result<Self> {
        let inner = TcpListenerConnectionInner {
            local_addr,
            external: external.map(|addr| SipAddr {
                r#type: Some(Transport::Tcp),
                addr: addr.into(),
            }),
        };
        Ok(TcpListenerConnection {
            inner: Arc::new(inner),
        })
    }

    /// Accepts inbound connections, registers each with the transport
    /// layer and runs its receive loop.
    pub async fn serve_listener(
        &self,
        transport_layer_inner: TransportLayerInnerRef,
        sender: TransportSender,
    ) -> Result<()> {
        let listener = TcpListener::bind(self.inner.local_addr.get_socketaddr()?).await?;
        let advertised = self.get_addr().clone();
        tokio::spawn(async move {
            loop {
                let (stream, remote_addr) = match listener.accept().await {
                    Ok((stream, remote_addr)) => (stream, remote_addr),
                    Err(e) => {
                        warn!("failed to accept connection: {:?}", e);
                        continue;
                    }
                };
                let tcp_connection = match TcpConnection::from_stream(
                    stream,
                    advertised.clone(),
                    Some(transport_layer_inner.cancel_token.child_token()),
                ) {
                    Ok(tcp_connection) => tcp_connection,
                    Err(e) => {
                        error!("failed to create TCP connection: {:?}", e);
                        continue;
                    }
                };
                let sip_connection = SipConnection::Tcp(tcp_connection);
                info!(%remote_addr, "new inbound tcp connection");
                sender.send(crate::transport::TransportEvent::New(sip_connection.clone())).ok();
                transport_layer_inner.serve_connection(sip_connection, sender.clone());
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

impl fmt::Display for TcpListenerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TCP Listener {}", self.get_addr())
    }
}

impl fmt::Debug for TcpListenerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
