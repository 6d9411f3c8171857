use super::{endpoint::EndpointInner, make_call_id};
use crate::sip::{
    CSeq, Header, Method, NameAddr, Request, Response, StatusCode, Uri, Version, Via,
};

impl EndpointInner {
    /// Out-of-dialog request skeleton: Via, fresh Call-ID, From/To,
    /// CSeq, Max-Forwards and the endpoint's User-Agent.
    pub fn make_request(
        &self,
        method: Method,
        req_uri: Uri,
        via: Via,
        from: NameAddr,
        to: NameAddr,
        seq: u32,
    ) -> Request {
        let domain = match &from.uri.host_port.host {
            crate::sip::Host::Domain(domain) if !domain.is_empty() => Some(domain.as_str()),
            _ => None,
        };
        let headers = vec![
            Header::Via(via),
            Header::CallId(make_call_id(domain)),
            Header::From(from),
            Header::To(to),
            Header::CSeq(CSeq { seq, method: method.clone() }),
            Header::MaxForwards(self.option.max_forwards),
            Header::UserAgent(self.user_agent.clone()),
        ];
        Request {
            method,
            uri: req_uri,
            headers: headers.into(),
            body: vec![],
            version: Version::V2,
        }
    }

    /// Response skeleton per RFC 3261 §8.2.6: Via, From, To, Call-ID and
    /// CSeq copied from the request. To-tag handling is the dialog
    /// layer's concern.
    pub fn make_response(
        &self,
        req: &Request,
        status_code: StatusCode,
        body: Option<Vec<u8>>,
    ) -> Response {
        let mut headers = req.headers.clone();
        headers.retain(|h| {
            matches!(
                h,
                Header::Via(_)
                    | Header::CallId(_)
                    | Header::From(_)
                    | Header::To(_)
                    | Header::CSeq(_)
            )
        });
        headers.unique_push(Header::UserAgent(self.user_agent.clone()));
        Response {
            status_code,
            reason_phrase: None,
            version: req.version,
            headers,
            body: body.unwrap_or_default(),
        }
    }
}
