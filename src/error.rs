use crate::{
    dialog::DialogId, sip::SipParseError, transaction::key::TransactionKey, transport::SipAddr,
};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("SIP message error: {0}")]
    SipMessageError(#[from] SipParseError),

    #[error("DNS resolution error: {0}")]
    DnsResolutionError(String),

    #[error("Transport layer error: {0}: {1}")]
    TransportLayerError(String, SipAddr),

    /// The serialized request exceeds the datagram congestion threshold;
    /// the caller should retry over a reliable transport with a fresh
    /// branch (RFC 3261 §18.1.1).
    #[error("message of {0} bytes requires a reliable transport")]
    CongestionRequiresReliable(usize),

    #[error("Transaction error: {0}: {1}")]
    TransactionError(String, TransactionKey),

    #[error("Transaction timeout: {0}")]
    TransactionTimeout(TransactionKey),

    #[error("Endpoint error: {0}")]
    EndpointError(String),

    #[error("Dialog error: {0}: {1}")]
    DialogError(String, DialogId),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Format error: {0}")]
    FormatError(#[from] std::fmt::Error),

    #[error("Address parse error: {0}")]
    AddrParseError(#[from] std::net::AddrParseError),

    #[error("TLS error: {0}")]
    TlsError(#[from] tokio_rustls::rustls::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Channel send error: {0}")]
    ChannelSendError(String),

    /// Internal marker for CRLF keepalive frames on stream transports.
    #[error("keepalive")]
    Keepalive,

    #[error("Error: {0}")]
    Error(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelSendError(e.to_string())
    }
}
