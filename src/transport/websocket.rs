use crate::{
    sip::{parse_message, Host, SipMessage, Transport},
    transport::{
        connection::{TransportSender, KEEPALIVE_REQUEST, KEEPALIVE_RESPONSE},
        sip_addr::SipAddr,
        stream::StreamConnection,
        transport_layer::TransportLayerInnerRef,
        SipConnection, TransportEvent,
    },
    Result,
};
use futures_util::{SinkExt, StreamExt};
use std::{fmt, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, select, sync::Mutex};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{Request, Response},
        protocol::Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsRead =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

pub struct WebSocketListenerConnectionInner {
    pub local_addr: SipAddr,
    pub external: Option<SipAddr>,
    pub is_secure: bool,
}

/// Listener for SIP over WebSocket (RFC 7118). Negotiates the `sip`
/// subprotocol during the handshake; one SIP message per WS frame.
#[derive(Clone)]
pub struct WebSocketListenerConnection {
    pub inner: Arc<WebSocketListenerConnectionInner>,
}

impl WebSocketListenerConnection {
    pub async fn new(
        local_addr: SipAddr,
        external: Option<SocketAddr>,
        is_secure: bool,
    ) -> Result<Self> {
        let transport_type = if is_secure {
            Transport::Wss
        } else {
            Transport::Ws
        };

        let inner = WebSocketListenerConnectionInner {
            local_addr,
            external: external.map(|addr| SipAddr {
                r#type: Some(transport_type),
                addr: addr.into(),
            }),
            is_secure,
        };
        Ok(WebSocketListenerConnection {
            inner: Arc::new(inner),
        })
    }

    pub async fn serve_listener(
        &self,
        transport_layer_inner: TransportLayerInnerRef,
        sender: TransportSender,
    ) -> Result<()> {
        let listener = TcpListener::bind(self.inner.local_addr.get_socketaddr()?).await?;
        let transport_type = if self.inner.is_secure {
            Transport::Wss
        } else {
            Transport::Ws
        };
        let advertised = self.get_addr().clone();

        info!("starting WebSocket listener on {}", self.inner.local_addr);

        tokio::spawn(async move {
            loop {
                let (stream, remote_addr) = match listener.accept().await {
                    Ok((stream, remote_addr)) => (stream, remote_addr),
                    Err(e) => {
                        warn!("failed to accept WebSocket connection: {:?}", e);
                        continue;
                    }
                };

                debug!("new WebSocket connection from {}", remote_addr);

                let remote_sip_addr = SipAddr {
                    r#type: Some(transport_type),
                    addr: remote_addr.into(),
                };

                let sender_clone = sender.clone();
                let cancel_token = transport_layer_inner.cancel_token.child_token();
                let advertised = advertised.clone();

                tokio::spawn(async move {
                    let maybe_tls_stream = MaybeTlsStream::Plain(stream);

                    // Echo the `sip` subprotocol back when offered.
                    let callback = |req: &Request, mut response: Response| {
                        if let Some(protocols) = req.headers().get("sec-websocket-protocol") {
                            if let Ok(protocols_str) = protocols.to_str() {
                                if protocols_str.contains("sip") {
                                    response
                                        .headers_mut()
                                        .insert("sec-websocket-protocol", "sip".parse().unwrap());
                                }
                            }
                        }
                        Ok(response)
                    };

                    let ws_stream =
                        match tokio_tungstenite::accept_hdr_async(maybe_tls_stream, callback).await
                        {
                            Ok(ws) => ws,
                            Err(e) => {
                                error!("error upgrading to WebSocket: {}", e);
                                return;
                            }
                        };

                    let (ws_sink, ws_read) = ws_stream.split();

                    let connection = WebSocketConnection {
                        inner: Arc::new(WebSocketInner {
                            local_addr: advertised,
                            remote_addr: remote_sip_addr,
                            ws_sink: Mutex::new(ws_sink),
                            ws_read: Mutex::new(Some(ws_read)),
                        }),
                        cancel_token: Some(cancel_token.clone()),
                    };
                    let sip_connection = SipConnection::WebSocket(connection.clone());

                    sender_clone
                        .send(TransportEvent::New(sip_connection.clone()))
                        .ok();

                    select! {
                        _ = cancel_token.cancelled() => {}
                        _ = connection.serve_loop(sender_clone.clone()) => {}
                    }
                    sender_clone
                        .send(TransportEvent::Closed(sip_connection))
                        .ok();
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

impl fmt::Display for WebSocketListenerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = if self.inner.is_secure { "WSS" } else { "WS" };
        write!(f, "{} Listener {}", transport, self.get_addr())
    }
}

impl fmt::Debug for WebSocketListenerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

pub struct WebSocketInner {
    pub local_addr: SipAddr,
    pub remote_addr: SipAddr,
    pub ws_sink: Mutex<WsSink>,
    pub ws_read: Mutex<Option<WsRead>>,
}

#[derive(Clone)]
pub struct WebSocketConnection {
    pub inner: Arc<WebSocketInner>,
    cancel_token: Option<CancellationToken>,
}

impl WebSocketConnection {
    pub async fn connect(
        remote: &SipAddr,
        cancel_token: Option<CancellationToken>,
    ) -> Result<Self> {
        let transport = remote.r#type.unwrap_or(Transport::Ws);
        let scheme = match transport {
            Transport::Wss => "wss",
            _ => "ws",
        };

        let host = match &remote.addr.host {
            Host::Domain(domain) => domain.to_string(),
            Host::Ip(ip) => ip.to_string(),
        };
        let port = remote.addr.port_or(transport.default_port());

        let url = format!("{}://{}:{}/", scheme, host, port);
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("sec-websocket-protocol", "sip".parse().unwrap());

        let (ws_stream, _) = connect_async(request).await?;
        let (ws_sink, ws_read) = ws_stream.split();

        let local_addr = SipAddr {
            r#type: Some(transport),
            addr: remote.addr.clone(),
        };

        let connection = WebSocketConnection {
            inner: Arc::new(WebSocketInner {
                local_addr,
                remote_addr: remote.clone(),
                ws_sink: Mutex::new(ws_sink),
                ws_read: Mutex::new(Some(ws_read)),
            }),
            cancel_token,
        };

        info!(
            "created WebSocket client connection: {} -> {}",
            connection.get_addr(),
            remote
        );

        Ok(connection)
    }

    pub fn cancel_token(&self) -> Option<CancellationToken> {
        self.cancel_token.clone()
    }

    fn handle_frame(
        &self,
        data: &[u8],
        sip_connection: &SipConnection,
        sender: &TransportSender,
    ) {
        match parse_message(data) {
            Ok(msg) => {
                let msg = match self.inner.remote_addr.get_socketaddr() {
                    Ok(addr) => {
                        let transport = self.inner.remote_addr.r#type.unwrap_or(Transport::Ws);
                        match SipConnection::update_msg_received(msg, addr, transport) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!("error updating via: {}", e);
                                return;
                            }
                        }
                    }
                    Err(_) => msg,
                };
                sender
                    .send(TransportEvent::Incoming(
                        msg,
                        sip_connection.clone(),
                        self.inner.remote_addr.clone(),
                    ))
                    .ok();
            }
            Err(e) => {
                warn!("error parsing SIP message from WebSocket: {}", e);
            }
        }
    }
}

#[async_trait::async_trait]
impl StreamConnection for WebSocketConnection {
    fn get_addr(&self) -> &SipAddr {
        &self.inner.local_addr
    }

    async fn send_message(&self, msg: SipMessage) -> Result<()> {
        let data = msg.to_bytes();
        let mut sink = self.inner.ws_sink.lock().await;
        sink.send(Message::Text(
            String::from_utf8_lossy(&data).into_owned().into(),
        ))
        .await?;
        Ok(())
    }

    async fn send_raw(&self, data: &[u8]) -> Result<()> {
        let mut sink = self.inner.ws_sink.lock().await;
        sink.send(Message::Binary(data.to_vec().into())).await?;
        Ok(())
    }

    async fn serve_loop(&self, sender: TransportSender) -> Result<()> {
        let sip_connection = SipConnection::WebSocket(self.clone());

        let mut ws_read = match self.inner.ws_read.lock().await.take() {
            Some(ws_read) => ws_read,
            None => {
                error!("WebSocket serve_loop called twice");
                return Ok(());
            }
        };
        while let Some(msg) = ws_read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    self.handle_frame(text.as_bytes(), &sip_connection, &sender);
                }
                Ok(Message::Binary(bin)) => {
                    if bin.as_ref() == KEEPALIVE_REQUEST {
                        self.send_raw(KEEPALIVE_RESPONSE).await.ok();
                        continue;
                    }
                    self.handle_frame(&bin, &sip_connection, &sender);
                }
                Ok(Message::Ping(data)) => {
                    let mut sink = self.inner.ws_sink.lock().await;
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        error!("error sending pong: {}", e);
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket read error: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.inner.ws_sink.lock().await;
        sink.send(Message::Close(None)).await.ok();
        Ok(())
    }
}

impl fmt::Display for WebSocketConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.inner
                .remote_addr
                .r#type
                .unwrap_or(Transport::Ws),
            self.inner.local_addr.addr,
            self.inner.remote_addr.addr
        )
    }
}

impl fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
