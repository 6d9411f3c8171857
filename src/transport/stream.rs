use crate::{
    sip::{parse_message, SipMessage},
    transport::{
        connection::{TransportSender, KEEPALIVE_REQUEST, KEEPALIVE_RESPONSE},
        SipAddr, SipConnection, TransportEvent,
    },
    Result,
};
use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, warn};

const MAX_SIP_MESSAGE_SIZE: usize = 65535;

/// Content-Length framing for stream transports.
///
/// A message is complete once the CRLFCRLF header terminator has been
/// seen and Content-Length more bytes have arrived. Framing violations
/// (missing terminator past the size limit, unparseable Content-Length)
/// are fatal to the connection.
pub struct SipCodec {
    max_size: usize,
}

impl SipCodec {
    pub fn new() -> Self {
        Self {
            max_size: MAX_SIP_MESSAGE_SIZE,
        }
    }
}

impl Default for SipCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SipCodec {
    type Item = SipMessage;
    type Error = crate::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() >= 4 && &src[0..4] == KEEPALIVE_REQUEST {
            src.advance(4);
            return Err(crate::Error::Keepalive);
        }

        if src.len() >= 2 && &src[0..2] == KEEPALIVE_RESPONSE {
            src.advance(2);
            return Err(crate::Error::Keepalive);
        }

        let head_end = match find_crlfcrlf(src) {
            Some(pos) => pos,
            None => {
                if src.len() > self.max_size {
                    return Err(crate::Error::Error(
                        "SIP message header section too large".to_string(),
                    ));
                }
                return Ok(None);
            }
        };

        let content_length = declared_content_length(&src[..head_end])?;
        let total = head_end + 4 + content_length;
        if total > self.max_size {
            return Err(crate::Error::Error("SIP message too large".to_string()));
        }
        if src.len() < total {
            return Ok(None);
        }

        let frame = &src[..total];
        let result = parse_message(frame);
        src.advance(total);
        match result {
            Ok(msg) => Ok(Some(msg)),
            Err(e) => Err(crate::Error::SipMessageError(e)),
        }
    }
}

impl Encoder<SipMessage> for SipCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: SipMessage, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&item.to_bytes());
        Ok(())
    }
}

fn find_crlfcrlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Scans the raw header section for Content-Length (or compact `l`).
/// Absent means 0 for stream framing; unparseable is a framing error.
fn declared_content_length(head: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(head)
        .map_err(|_| crate::Error::Error("non-UTF8 header section".to_string()))?;
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("l") {
            return value.trim().parse().map_err(|_| {
                crate::Error::Error(format!("bad Content-Length in stream frame: {}", value))
            });
        }
    }
    Ok(0)
}

/// Common behavior of connection-oriented channels.
#[async_trait::async_trait]
pub trait StreamConnection: Send + Sync + 'static {
    fn get_addr(&self) -> &SipAddr;

    async fn send_message(&self, msg: SipMessage) -> Result<()>;

    async fn send_raw(&self, data: &[u8]) -> Result<()>;

    async fn serve_loop(&self, sender: TransportSender) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Shared read/write plumbing for TCP and TLS connections.
pub struct StreamConnectionInner<R, W> {
    pub local_addr: SipAddr,
    pub remote_addr: SipAddr,
    read_half: Mutex<Option<R>>,
    write_half: Mutex<W>,
}

impl<R, W> StreamConnectionInner<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(local_addr: SipAddr, remote_addr: SipAddr, read_half: R, write_half: W) -> Self {
        Self {
            local_addr,
            remote_addr,
            read_half: Mutex::new(Some(read_half)),
            write_half: Mutex::new(write_half),
        }
    }

    pub async fn send_message(&self, msg: SipMessage) -> Result<()> {
        self.send_raw(&msg.to_bytes()).await
    }

    pub async fn send_raw(&self, data: &[u8]) -> Result<()> {
        let mut lock = self.write_half.lock().await;
        lock.write_all(data).await?;
        lock.flush().await?;
        Ok(())
    }

    /// Reads and frames messages until EOF or a framing error, emitting
    /// each parsed message upward. Parse failures of a well-framed
    /// message drop the message; framing failures reset the connection.
    pub async fn serve_loop(
        &self,
        sender: TransportSender,
        connection: SipConnection,
    ) -> Result<()> {
        let mut read_half = self
            .read_half
            .lock()
            .await
            .take()
            .ok_or_else(|| crate::Error::Error("serve_loop called twice".to_string()))?;

        let mut codec = SipCodec::new();
        let mut buffer = BytesMut::with_capacity(4096);
        let mut read_buf = [0u8; 4096];

        loop {
            match read_half.read(&mut read_buf).await {
                Ok(0) => {
                    debug!("connection closed: {}", self.remote_addr);
                    break;
                }
                Ok(n) => {
                    buffer.extend_from_slice(&read_buf[0..n]);
                    loop {
                        match codec.decode(&mut buffer) {
                            Ok(Some(msg)) => {
                                let msg = match stamp_received(msg, &self.remote_addr) {
                                    Ok(msg) => msg,
                                    Err(e) => {
                                        warn!("error updating via: {}", e);
                                        continue;
                                    }
                                };
                                sender.send(TransportEvent::Incoming(
                                    msg,
                                    connection.clone(),
                                    self.remote_addr.clone(),
                                ))?;
                            }
                            Ok(None) => break,
                            Err(crate::Error::Keepalive) => {
                                self.send_raw(KEEPALIVE_RESPONSE).await?;
                            }
                            Err(crate::Error::SipMessageError(e)) => {
                                info!("dropping unparseable message from {}: {}", self.remote_addr, e);
                            }
                            Err(e) => {
                                warn!("resetting {}: {}", self.remote_addr, e);
                                sender.send(TransportEvent::Closed(connection.clone())).ok();
                                return Err(e);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("error reading from {}: {}", self.remote_addr, e);
                    break;
                }
            }
        }

        sender.send(TransportEvent::Closed(connection)).ok();
        Ok(())
    }
}

fn stamp_received(msg: SipMessage, remote: &SipAddr) -> Result<SipMessage> {
    let transport = remote.r#type.unwrap_or(crate::sip::Transport::Tcp);
    match remote.get_socketaddr() {
        Ok(addr) => SipConnection::update_msg_received(msg, addr, transport),
        Err(_) => Ok(msg),
    }
}
