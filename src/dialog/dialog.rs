use super::{
    authenticate::{handle_client_authenticate, Credential},
    client_dialog::ClientInviteDialog,
    server_dialog::ServerInviteDialog,
    DialogId,
};
use crate::sip::{
    CSeq, Header, Method, NameAddr, Request, Response, StatusCode, StatusKind, Uri, Version,
};
use crate::transaction::{
    endpoint::EndpointInnerRef,
    key::{TransactionKey, TransactionRole},
    transaction::{Transaction, TransactionEventSender},
};
use crate::transport::SipAddr;
use crate::Result;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Dialog lifecycle states surfaced to the application.
///
/// `Early`/`WaitAck`/`Confirmed` carry the response that caused the
/// transition; the mid-dialog request states (`Updated`, `Notify`,
/// `Info`, `Options`, `Refer`) carry the request and do not change the
/// stored lifecycle state.
#[derive(Clone)]
pub enum DialogState {
    Calling(DialogId),
    Trying(DialogId),
    Early(DialogId, Response),
    WaitAck(DialogId, Response),
    Confirmed(DialogId, Response),
    Updated(DialogId, Request),
    Notify(DialogId, Request),
    Info(DialogId, Request),
    Options(DialogId, Request),
    Refer(DialogId, Request),
    Terminated(DialogId, TerminatedReason),
}

#[derive(Debug, Clone)]
pub enum TerminatedReason {
    Timeout,
    UacCancel,
    UacBye,
    UasBye,
    UacBusy,
    UasBusy,
    UasDecline,
    ProxyAuthRequired,
    UacOther(StatusCode),
    UasOther(StatusCode),
}

/// A dialog in either role.
#[derive(Clone)]
pub enum Dialog {
    ServerInvite(ServerInviteDialog),
    ClientInvite(ClientInviteDialog),
}

pub type DialogStateReceiver = UnboundedReceiver<DialogState>;
pub type DialogStateSender = UnboundedSender<DialogState>;

pub(super) type DialogInnerRef = Arc<DialogInner>;

/// State shared between the client and server dialog views: identifiers,
/// CSeq counters, the frozen route set, the remote target, and the
/// factories for in-dialog requests and responses.
pub struct DialogInner {
    pub role: TransactionRole,
    pub cancel_token: CancellationToken,
    pub id: Mutex<DialogId>,
    pub state: Mutex<DialogState>,

    pub local_seq: AtomicU32,
    pub remote_seq: AtomicU32,

    pub local_contact: Option<Uri>,
    pub remote_contact: Mutex<Option<NameAddr>>,
    /// Current remote target (Contact of the peer), the request-URI for
    /// in-dialog requests under loose routing.
    pub remote_target: Mutex<Uri>,

    pub from: NameAddr,
    pub to: Mutex<NameAddr>,

    pub credential: Option<Credential>,
    /// Record-Route set frozen at dialog establishment, stored in the
    /// order this side emits Route headers.
    pub route_set: Mutex<Vec<NameAddr>>,

    pub(super) endpoint_inner: EndpointInnerRef,
    pub(super) state_sender: DialogStateSender,
    /// Live INVITE server transaction mailbox, used by accept/reject.
    pub(super) tu_sender: Mutex<Option<TransactionEventSender>>,
    pub(super) initial_request: Request,
}

impl DialogState {
    pub fn id(&self) -> &DialogId {
        match self {
            DialogState::Calling(id)
            | DialogState::Trying(id)
            | DialogState::Early(id, _)
            | DialogState::WaitAck(id, _)
            | DialogState::Confirmed(id, _)
            | DialogState::Updated(id, _)
            | DialogState::Notify(id, _)
            | DialogState::Info(id, _)
            | DialogState::Options(id, _)
            | DialogState::Refer(id, _)
            | DialogState::Terminated(id, _) => id,
        }
    }

    /// A CANCEL is only meaningful before a final response.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            DialogState::Calling(_) | DialogState::Trying(_) | DialogState::Early(_, _)
        )
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, DialogState::Confirmed(_, _))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, DialogState::Terminated(_, _))
    }
}

impl std::fmt::Display for DialogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogState::Calling(id) => write!(f, "{}(Calling)", id),
            DialogState::Trying(id) => write!(f, "{}(Trying)", id),
            DialogState::Early(id, _) => write!(f, "{}(Early)", id),
            DialogState::WaitAck(id, _) => write!(f, "{}(WaitAck)", id),
            DialogState::Confirmed(id, _) => write!(f, "{}(Confirmed)", id),
            DialogState::Updated(id, _) => write!(f, "{}(Updated)", id),
            DialogState::Notify(id, _) => write!(f, "{}(Notify)", id),
            DialogState::Info(id, _) => write!(f, "{}(Info)", id),
            DialogState::Options(id, _) => write!(f, "{}(Options)", id),
            DialogState::Refer(id, _) => write!(f, "{}(Refer)", id),
            DialogState::Terminated(id, reason) => write!(f, "{}(Terminated {:?})", id, reason),
        }
    }
}

#[allow(clippy::too_many_arguments)]
impl DialogInner {
    pub fn new(
        role: TransactionRole,
        id: DialogId,
        initial_request: Request,
        endpoint_inner: EndpointInnerRef,
        state_sender: DialogStateSender,
        credential: Option<Credential>,
        local_contact: Option<Uri>,
        remote_contact: Option<NameAddr>,
    ) -> Result<Self> {
        let cseq = initial_request.cseq()?.seq;

        let remote_target = match role {
            TransactionRole::Client => initial_request.uri.clone(),
            TransactionRole::Server => remote_contact
                .as_ref()
                .map(|c| c.uri.base())
                .unwrap_or_else(|| initial_request.uri.clone()),
        };

        let from = initial_request.from()?.clone();
        let mut to = initial_request.to()?.clone();
        if to.tag().is_none() && !id.to_tag.is_empty() {
            to.set_tag(id.to_tag.clone());
        }

        // Record-Route learned from the dialog-forming request applies
        // in reverse for the UAC; the UAS uses it as received.
        let mut route_set: Vec<NameAddr> = initial_request.headers.record_routes().cloned().collect();
        if role == TransactionRole::Client {
            route_set.reverse();
        }

        Ok(Self {
            role,
            cancel_token: CancellationToken::new(),
            id: Mutex::new(id.clone()),
            state: Mutex::new(DialogState::Calling(id)),
            local_seq: AtomicU32::new(cseq),
            remote_seq: AtomicU32::new(match role {
                TransactionRole::Client => 0,
                TransactionRole::Server => cseq,
            }),
            local_contact,
            remote_contact: Mutex::new(remote_contact),
            remote_target: Mutex::new(remote_target),
            from,
            to: Mutex::new(to),
            credential,
            route_set: Mutex::new(route_set),
            endpoint_inner,
            state_sender,
            tu_sender: Mutex::new(None),
            initial_request,
        })
    }

    pub fn can_cancel(&self) -> bool {
        self.state.lock().unwrap().can_cancel()
    }

    pub fn is_confirmed(&self) -> bool {
        self.state.lock().unwrap().is_confirmed()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().unwrap().is_terminated()
    }

    pub fn get_local_seq(&self) -> u32 {
        self.local_seq.load(Ordering::Relaxed)
    }

    pub fn increment_local_seq(&self) -> u32 {
        self.local_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn update_remote_tag(&self, tag: &str) {
        self.id.lock().unwrap().to_tag = tag.to_string();
        if !tag.is_empty() {
            self.to.lock().unwrap().set_tag(tag);
        }
    }

    /// Refreshes the remote target and Contact, as a 2xx or re-INVITE
    /// response may move the peer.
    pub fn set_remote_target(&self, uri: Uri, contact: Option<NameAddr>) {
        *self.remote_target.lock().unwrap() = uri;
        *self.remote_contact.lock().unwrap() = contact;
    }

    /// Replaces the route set from a response's Record-Route headers.
    pub fn update_route_set_from_response(&self, resp: &Response) {
        let mut route_set: Vec<NameAddr> = resp.headers.record_routes().cloned().collect();
        if self.role == TransactionRole::Client {
            route_set.reverse();
        }
        *self.route_set.lock().unwrap() = route_set;
    }

    /// Builds an in-dialog request. Strict/loose routing per RFC 3261
    /// §12.2.1.1: with a loose-routing first hop, the request-URI is the
    /// remote target and the route set travels in Route headers; with a
    /// strict-routing first hop, the first route becomes the
    /// request-URI and the remote target is appended as the last Route.
    pub(super) fn make_request(
        &self,
        method: Method,
        cseq: Option<u32>,
        headers: Option<Vec<Header>>,
        body: Option<Vec<u8>>,
    ) -> Result<Request> {
        let mut headers = headers.unwrap_or_default();
        let seq = cseq.unwrap_or_else(|| self.increment_local_seq());

        let via = self.endpoint_inner.get_via(None, None)?;
        headers.push(Header::Via(via));
        headers.push(Header::CallId(self.id.lock().unwrap().call_id.clone()));

        let local = self.from.clone();
        let remote = self.to.lock().unwrap().clone();
        match self.role {
            TransactionRole::Client => {
                headers.push(Header::From(local));
                headers.push(Header::To(remote));
            }
            TransactionRole::Server => {
                headers.push(Header::From(remote));
                headers.push(Header::To(local));
            }
        }
        headers.push(Header::CSeq(CSeq {
            seq,
            method: method.clone(),
        }));
        headers.push(Header::UserAgent(self.endpoint_inner.user_agent.clone()));

        if let Some(contact) = self.local_contact.as_ref() {
            headers.push(Header::Contact(NameAddr::new(contact.clone())));
        }

        let remote_target = self.remote_target.lock().unwrap().clone();
        let route_set = self.route_set.lock().unwrap().clone();
        let request_uri = match route_set.first() {
            None => remote_target,
            Some(first) if first.uri.is_loose_router() => {
                for route in &route_set {
                    headers.push(Header::Route(route.clone()));
                }
                remote_target
            }
            Some(first) => {
                for route in route_set.iter().skip(1) {
                    headers.push(Header::Route(route.clone()));
                }
                headers.push(Header::Route(NameAddr::new(remote_target)));
                first.uri.clone()
            }
        };

        headers.push(Header::MaxForwards(self.endpoint_inner.option.max_forwards));

        Ok(Request {
            method,
            uri: request_uri,
            headers: headers.into(),
            body: body.unwrap_or_default(),
            version: Version::V2,
        })
    }

    /// Builds a response to an in-dialog request, tagging To for
    /// anything but 100 Trying.
    pub(super) fn make_response(
        &self,
        request: &Request,
        status: StatusCode,
        headers: Option<Vec<Header>>,
        body: Option<Vec<u8>>,
    ) -> Response {
        let mut resp_headers = crate::sip::Headers::new();

        for header in request.headers.iter() {
            match header {
                Header::Via(_) | Header::From(_) | Header::CSeq(_) | Header::CallId(_) => {
                    resp_headers.push(header.clone());
                }
                Header::To(to) => {
                    let mut to = to.clone();
                    if status != StatusCode::TRYING && to.tag().is_none() {
                        let to_tag = self.id.lock().unwrap().to_tag.clone();
                        if !to_tag.is_empty() {
                            to.set_tag(to_tag);
                        }
                    }
                    resp_headers.push(Header::To(to));
                }
                Header::RecordRoute(rr) => {
                    // Record-Route is echoed into dialog-forming
                    // responses so the route set freezes identically on
                    // both sides.
                    resp_headers.push(Header::RecordRoute(rr.clone()));
                }
                _ => {}
            }
        }

        if let Some(contact) = self.local_contact.as_ref() {
            resp_headers.push(Header::Contact(NameAddr::new(contact.clone())));
        }

        if let Some(headers) = headers {
            for header in headers {
                resp_headers.unique_push(header);
            }
        }

        resp_headers.unique_push(Header::UserAgent(self.endpoint_inner.user_agent.clone()));

        Response {
            status_code: status,
            reason_phrase: None,
            version: request.version,
            headers: resp_headers,
            body: body.unwrap_or_default(),
        }
    }

    /// Sends an in-dialog request through a fresh client transaction,
    /// following the route set for the destination and retrying once on
    /// a 401/407 challenge.
    pub(super) async fn do_request(&self, request: Request) -> Result<Option<Response>> {
        let method = request.method.clone();
        let key = TransactionKey::from_request(&request, TransactionRole::Client)?;
        let mut tx = Transaction::new_client(key, request, self.endpoint_inner.clone(), None);

        if let Some(first_route) = tx.original.headers.routes().next() {
            tx.destination = SipAddr::try_from(&first_route.uri).ok();
        }

        match tx.send().await {
            Ok(_) => {
                info!(
                    id = %self.id.lock().unwrap(),
                    method = %method,
                    key = %tx.key,
                    "request sent",
                );
            }
            Err(e) => {
                warn!(
                    id = %self.id.lock().unwrap(),
                    method = %method,
                    "failed to send request: {}",
                    e
                );
                return Err(e);
            }
        }

        let mut auth_sent = false;
        while let Some(msg) = tx.receive().await {
            let resp = match msg {
                crate::sip::SipMessage::Response(resp) => resp,
                _ => break,
            };
            let status = resp.status_code;
            if status == StatusCode::TRYING {
                continue;
            }
            if status.kind() == StatusKind::Provisional {
                self.transition(DialogState::Early(self.id.lock().unwrap().clone(), resp))?;
                continue;
            }
            if matches!(
                status,
                StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED
            ) {
                let id = self.id.lock().unwrap().clone();
                if auth_sent {
                    info!(id = %id, "challenge repeated after auth sent: {}", status);
                    self.transition(DialogState::Terminated(
                        id,
                        TerminatedReason::ProxyAuthRequired,
                    ))?;
                    break;
                }
                auth_sent = true;
                match &self.credential {
                    Some(credential) => {
                        let new_seq = match method {
                            Method::Cancel => self.get_local_seq(),
                            _ => self.increment_local_seq(),
                        };
                        tx = handle_client_authenticate(new_seq, tx, resp, credential).await?;
                        tx.send().await?;
                        continue;
                    }
                    None => {
                        info!(id = %id, "challenge received without credential");
                        self.transition(DialogState::Terminated(
                            id,
                            TerminatedReason::ProxyAuthRequired,
                        ))?;
                        break;
                    }
                }
            }
            debug!(
                id = %self.id.lock().unwrap(),
                method = %method,
                "in-dialog request done: {}", status
            );
            return Ok(Some(resp));
        }
        Ok(None)
    }

    /// Publishes a state change. Mid-dialog request states are events
    /// only; lifecycle states replace the stored state, and a
    /// terminated dialog never leaves that state.
    pub(super) fn transition(&self, state: DialogState) -> Result<()> {
        self.state_sender.send(state.clone()).ok();

        match state {
            DialogState::Updated(_, _)
            | DialogState::Notify(_, _)
            | DialogState::Info(_, _)
            | DialogState::Options(_, _)
            | DialogState::Refer(_, _) => {
                return Ok(());
            }
            _ => {}
        }
        let mut old_state = self.state.lock().unwrap();
        if let DialogState::Terminated(id, _) = &*old_state {
            warn!(%id, "dialog already terminated, ignoring transition to {}", state);
            return Ok(());
        }
        debug!("transitioning state: {} -> {}", old_state, state);
        *old_state = state;
        Ok(())
    }
}

impl Dialog {
    pub fn id(&self) -> DialogId {
        match self {
            Dialog::ServerInvite(d) => d.inner.id.lock().unwrap().clone(),
            Dialog::ClientInvite(d) => d.inner.id.lock().unwrap().clone(),
        }
    }

    fn inner(&self) -> &DialogInnerRef {
        match self {
            Dialog::ServerInvite(d) => &d.inner,
            Dialog::ClientInvite(d) => &d.inner,
        }
    }

    pub fn remote_contact(&self) -> Option<Uri> {
        self.inner()
            .remote_contact
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.uri.clone())
    }

    /// Routes a mid-dialog request to the owning dialog view.
    pub async fn handle(&mut self, tx: Transaction) -> Result<()> {
        match self {
            Dialog::ServerInvite(d) => d.handle_in_dialog(tx).await,
            Dialog::ClientInvite(d) => d.handle(tx).await,
        }
    }

    pub fn on_remove(&self) {
        self.inner().cancel_token.cancel();
    }

    pub async fn hangup(&self) -> Result<()> {
        match self {
            Dialog::ServerInvite(d) => d.bye().await,
            Dialog::ClientInvite(d) => d.hangup().await,
        }
    }

    pub fn can_cancel(&self) -> bool {
        self.inner().can_cancel()
    }
}
