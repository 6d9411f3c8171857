//! SIP message model and wire codec.
//!
//! Messages are parsed once into typed, immutable-by-convention structures
//! and serialized back to canonical wire form. Structured headers are a
//! tagged [`Header`] variant; free-form extension headers round-trip
//! verbatim through [`Header::Other`].

pub mod address;
pub mod auth;
pub mod headers;
pub mod host;
pub mod message;
pub mod method;
pub mod param;
pub mod parse;
pub mod status;
pub mod transport;
pub mod uri;
pub mod via;

pub use address::NameAddr;
pub use headers::{CSeq, Header, Headers};
pub use host::{Host, HostPort};
pub use message::{Request, Response, SipMessage, Version};
pub use method::Method;
pub use param::Param;
pub use parse::{parse_message, SipParseError};
pub use status::{StatusCode, StatusKind};
pub use transport::Transport;
pub use uri::{Scheme, Uri};
pub use via::Via;

/// Magic cookie every RFC 3261 branch parameter starts with.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";
