use super::{
    address::NameAddr,
    headers::{CSeq, Header, Headers},
    method::Method,
    parse::SipParseError,
    status::StatusCode,
    uri::Uri,
    via::Via,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    #[default]
    V2,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        "SIP/2.0"
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A SIP request. Parsed messages are treated as immutable; the mutable
/// accessors exist for the layers that legitimately rewrite a copy
/// (branch regeneration, Via stamping, CSeq bumps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// A SIP response. `reason_phrase` of `None` serializes the canonical
/// phrase for the status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: StatusCode,
    pub reason_phrase: Option<String>,
    pub version: Version,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

fn missing(name: &'static str) -> SipParseError {
    SipParseError::MissingMandatoryHeader(name)
}

macro_rules! shared_header_accessors {
    () => {
        pub fn via(&self) -> Result<&Via, SipParseError> {
            self.headers.via().ok_or(missing("Via"))
        }

        pub fn via_mut(&mut self) -> Result<&mut Via, SipParseError> {
            self.headers.via_mut().ok_or(missing("Via"))
        }

        pub fn from(&self) -> Result<&NameAddr, SipParseError> {
            self.headers.from().ok_or(missing("From"))
        }

        pub fn to(&self) -> Result<&NameAddr, SipParseError> {
            self.headers.to().ok_or(missing("To"))
        }

        pub fn to_mut(&mut self) -> Result<&mut NameAddr, SipParseError> {
            self.headers.to_mut().ok_or(missing("To"))
        }

        pub fn call_id(&self) -> Result<&str, SipParseError> {
            self.headers.call_id().ok_or(missing("Call-ID"))
        }

        pub fn cseq(&self) -> Result<&CSeq, SipParseError> {
            self.headers.cseq().ok_or(missing("CSeq"))
        }

        pub fn cseq_mut(&mut self) -> Result<&mut CSeq, SipParseError> {
            self.headers.cseq_mut().ok_or(missing("CSeq"))
        }

        pub fn contact(&self) -> Result<&NameAddr, SipParseError> {
            self.headers.contact().ok_or(missing("Contact"))
        }
    };
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Request {
            method,
            uri,
            version: Version::V2,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    shared_header_accessors!();

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = serialize_start_and_headers(
            format!("{} {} {}\r\n", self.method, self.uri, self.version),
            &self.headers,
            self.body.len(),
        );
        out.extend_from_slice(&self.body);
        out
    }
}

impl Response {
    pub fn new(status_code: StatusCode) -> Self {
        Response {
            status_code,
            reason_phrase: None,
            version: Version::V2,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    shared_header_accessors!();

    pub fn reason(&self) -> &str {
        self.reason_phrase
            .as_deref()
            .unwrap_or_else(|| self.status_code.default_reason())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = serialize_start_and_headers(
            format!(
                "{} {} {}\r\n",
                self.version,
                self.status_code,
                self.reason()
            ),
            &self.headers,
            self.body.len(),
        );
        out.extend_from_slice(&self.body);
        out
    }
}

impl SipMessage {
    pub fn is_request(&self) -> bool {
        matches!(self, SipMessage::Request(_))
    }

    pub fn headers(&self) -> &Headers {
        match self {
            SipMessage::Request(req) => &req.headers,
            SipMessage::Response(resp) => &resp.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            SipMessage::Request(req) => &mut req.headers,
            SipMessage::Response(resp) => &mut resp.headers,
        }
    }

    pub fn body(&self) -> &[u8] {
        match self {
            SipMessage::Request(req) => &req.body,
            SipMessage::Response(resp) => &resp.body,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            SipMessage::Request(req) => req.to_bytes(),
            SipMessage::Response(resp) => resp.to_bytes(),
        }
    }
}

impl From<Request> for SipMessage {
    fn from(req: Request) -> Self {
        SipMessage::Request(req)
    }
}

impl From<Response> for SipMessage {
    fn from(resp: Response) -> Self {
        SipMessage::Response(resp)
    }
}

/// Canonical serialization: start line, then Via / Route / From / To /
/// Call-ID / CSeq / Max-Forwards / Contact, then the remaining headers in
/// their stored order, then a Content-Length recomputed from the body.
fn serialize_start_and_headers(start_line: String, headers: &Headers, body_len: usize) -> Vec<u8> {
    use std::fmt::Write;

    let mut buf = start_line;

    let mut emitted = vec![false; headers.len()];
    let mut emit_matching = |buf: &mut String, emitted: &mut [bool], pred: &dyn Fn(&Header) -> bool| {
        for (i, header) in headers.iter().enumerate() {
            if !emitted[i] && pred(header) {
                emitted[i] = true;
                let _ = write!(buf, "{}\r\n", header);
            }
        }
    };

    emit_matching(&mut buf, &mut emitted, &|h| matches!(h, Header::Via(_)));
    emit_matching(&mut buf, &mut emitted, &|h| matches!(h, Header::Route(_)));
    emit_matching(&mut buf, &mut emitted, &|h| matches!(h, Header::From(_)));
    emit_matching(&mut buf, &mut emitted, &|h| matches!(h, Header::To(_)));
    emit_matching(&mut buf, &mut emitted, &|h| matches!(h, Header::CallId(_)));
    emit_matching(&mut buf, &mut emitted, &|h| matches!(h, Header::CSeq(_)));
    emit_matching(&mut buf, &mut emitted, &|h| {
        matches!(h, Header::MaxForwards(_))
    });
    emit_matching(&mut buf, &mut emitted, &|h| matches!(h, Header::Contact(_)));
    emit_matching(&mut buf, &mut emitted, &|h| {
        !matches!(h, Header::ContentLength(_))
    });

    let _ = write!(buf, "Content-Length: {}\r\n\r\n", body_len);

    let mut out = Vec::with_capacity(buf.len() + body_len);
    out.extend_from_slice(buf.as_bytes());
    out
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}

impl std::fmt::Display for SipMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SipMessage::Request(req) => req.fmt(f),
            SipMessage::Response(resp) => resp.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_in_canonical_order() {
        let mut req = Request::new(Method::Invite, Uri::parse("sip:bob@biloxi.com").unwrap());
        // Deliberately scrambled insertion order.
        req.headers.push(Header::CallId("a84b4c76@pc33".to_string()));
        req.headers.push(Header::ContentLength(999));
        req.headers.push(Header::From(
            NameAddr::parse("Alice <sip:alice@atlanta.com>;tag=1928301774").unwrap(),
        ));
        req.headers.push(Header::MaxForwards(70));
        req.headers.push(Header::To(
            NameAddr::parse("Bob <sip:bob@biloxi.com>").unwrap(),
        ));
        req.headers.push(Header::Via(
            Via::parse("SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds").unwrap(),
        ));
        req.headers.push(Header::CSeq(CSeq {
            seq: 314159,
            method: Method::Invite,
        }));
        req.body = b"v=0\r\n".to_vec();

        let wire = String::from_utf8(req.to_bytes()).unwrap();
        let via_pos = wire.find("Via:").unwrap();
        let from_pos = wire.find("From:").unwrap();
        let to_pos = wire.find("To:").unwrap();
        let cl_pos = wire.find("Content-Length:").unwrap();
        assert!(via_pos < from_pos && from_pos < to_pos && to_pos < cl_pos);
        // Stored Content-Length is overridden by the recomputed value.
        assert!(wire.contains("Content-Length: 5\r\n"));
        assert!(wire.ends_with("\r\n\r\nv=0\r\n"));
    }

    #[test]
    fn response_reason_defaults() {
        let resp = Response::new(StatusCode::REQUEST_TERMINATED);
        assert_eq!(resp.reason(), "Request Terminated");
        let custom = Response {
            reason_phrase: Some("Gone Fishing".to_string()),
            ..Response::new(StatusCode::OK)
        };
        assert!(String::from_utf8(custom.to_bytes())
            .unwrap()
            .starts_with("SIP/2.0 200 Gone Fishing\r\n"));
    }
}
