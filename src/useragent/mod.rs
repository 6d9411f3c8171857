//! The user-agent layer: call primitives over the dialog and
//! transaction machinery, plus the inbound call stream and the typed
//! event feed the application consumes.

pub mod media;
pub use media::{MediaAdapter, StaticMediaAdapter};

use crate::dialog::authenticate::Credential;
use crate::dialog::client_dialog::ClientInviteDialog;
use crate::dialog::dialog::{Dialog, DialogState, DialogStateReceiver, DialogStateSender, TerminatedReason};
use crate::dialog::dialog_layer::DialogLayer;
use crate::dialog::invitation::InviteOption;
use crate::dialog::registration::Registration;
use crate::dialog::server_dialog::ServerInviteDialog;
use crate::dialog::DialogId;
use crate::sip::{Header, Method, NameAddr, Request, StatusCode, StatusKind, Uri};
use crate::transaction::endpoint::Endpoint;
use crate::transaction::TransactionReceiver;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::select;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a placed call settled.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Established,
    Rejected(StatusCode, String),
    Timeout,
    Cancelled,
    TransportFailure(String),
}

/// Typed events surfaced to the embedding application.
pub enum UserAgentEvent {
    IncomingCall(IncomingCall),
    CallProgress(DialogId, StatusCode),
    CallAnswered(DialogId),
    CallEnded(DialogId, TerminatedReason),
    /// DTMF digit received via INFO `application/dtmf-relay`.
    Dtmf(DialogId, char),
    /// The peer asked us to transfer the call to this target.
    TransferRequested(DialogId, Uri),
    /// NOTIFY progress for a transfer we initiated (sipfrag status).
    TransferProgress(DialogId, StatusCode),
    RegisterResult {
        server: String,
        status: StatusCode,
        expires: Option<u32>,
    },
}

/// An incoming INVITE awaiting a decision.
pub struct IncomingCall {
    pub dialog: ServerInviteDialog,
    pub from: Option<NameAddr>,
    /// Opaque remote offer (SDP) from the INVITE body.
    pub offer: Option<Vec<u8>>,
    media: Option<Arc<dyn MediaAdapter>>,
}

impl IncomingCall {
    pub fn id(&self) -> DialogId {
        self.dialog.id()
    }

    pub fn ringing(&self) -> Result<()> {
        self.dialog.ringing()
    }

    pub fn progress(&self, status: StatusCode) -> Result<()> {
        self.dialog.progress(status, None)
    }

    /// Accepts with the provided answer, or one from the media adapter.
    pub async fn accept(&self, answer: Option<Vec<u8>>) -> Result<()> {
        let answer = match answer {
            Some(answer) => answer,
            None => match &self.media {
                Some(media) => media.create_answer(self.offer.as_deref()).await?,
                None => Vec::new(),
            },
        };
        let headers = vec![Header::ContentType("application/sdp".to_string())];
        self.dialog.accept(Some(headers), Some(answer))
    }

    pub fn reject(&self, status: Option<StatusCode>) -> Result<()> {
        self.dialog.reject(status)
    }

    pub fn redirect(&self, target: Uri) -> Result<()> {
        self.dialog.redirect(target)
    }
}

/// A settled outgoing call. `dialog` is absent when the attempt never
/// left the local host (transport failure).
pub struct ActiveCall {
    dialog: Option<ClientInviteDialog>,
    pub outcome: CallOutcome,
    media: Option<Arc<dyn MediaAdapter>>,
}

impl ActiveCall {
    pub fn id(&self) -> Option<DialogId> {
        self.dialog.as_ref().map(|d| d.id())
    }

    pub fn dialog(&self) -> Option<&ClientInviteDialog> {
        self.dialog.as_ref()
    }

    pub fn is_established(&self) -> bool {
        matches!(self.outcome, CallOutcome::Established)
    }

    fn require_dialog(&self) -> Result<&ClientInviteDialog> {
        self.dialog
            .as_ref()
            .ok_or_else(|| Error::Error("call has no dialog".to_string()))
    }

    pub async fn hangup(&self) -> Result<()> {
        match &self.dialog {
            Some(dialog) => dialog.hangup().await,
            None => Ok(()),
        }
    }

    /// Puts the call on or off hold with a re-INVITE carrying a
    /// media-adapter offer.
    pub async fn hold(&self, on: bool) -> Result<()> {
        let offer = match &self.media {
            Some(media) => media.create_offer(on).await?,
            None => {
                return Err(Error::Error(
                    "hold requires a media adapter to build the offer".to_string(),
                ))
            }
        };
        let headers = vec![Header::ContentType("application/sdp".to_string())];
        self.require_dialog()?
            .reinvite(Some(headers), Some(offer))
            .await?;
        Ok(())
    }

    /// Blind transfer to `target` via REFER; NOTIFY progress arrives as
    /// [`UserAgentEvent::TransferProgress`].
    pub async fn transfer(&self, target: Uri) -> Result<()> {
        let resp = self.require_dialog()?.refer(target).await?;
        match resp {
            Some(resp) if resp.status_code.kind() == StatusKind::Success => Ok(()),
            Some(resp) => Err(Error::Error(format!(
                "transfer refused with {}",
                resp.status_code
            ))),
            None => Err(Error::Error("transfer got no response".to_string())),
        }
    }

    /// Attended transfer: replaces `consultation`'s dialog at the
    /// transfer target.
    pub async fn transfer_attended(&self, target: Uri, consultation: &ActiveCall) -> Result<()> {
        let consultation_id = consultation
            .require_dialog()?
            .id();
        let resp = self
            .require_dialog()?
            .refer_with_replaces(target, &consultation_id)
            .await?;
        match resp {
            Some(resp) if resp.status_code.kind() == StatusKind::Success => Ok(()),
            Some(resp) => Err(Error::Error(format!(
                "transfer refused with {}",
                resp.status_code
            ))),
            None => Err(Error::Error("transfer got no response".to_string())),
        }
    }
}

pub struct UserAgentBuilder {
    endpoint: Option<Endpoint>,
    media: Option<Arc<dyn MediaAdapter>>,
    local_uri: Option<Uri>,
    display_name: Option<String>,
}

impl Default for UserAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UserAgentBuilder {
    pub fn new() -> Self {
        UserAgentBuilder {
            endpoint: None,
            media: None,
            local_uri: None,
            display_name: None,
        }
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaAdapter>) -> Self {
        self.media = Some(media);
        self
    }

    /// The local address-of-record used in From headers.
    pub fn local_uri(mut self, uri: Uri) -> Self {
        self.local_uri = Some(uri);
        self
    }

    pub fn display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    pub fn build(mut self) -> Result<UserAgent> {
        let endpoint = Arc::new(
            self.endpoint
                .take()
                .ok_or_else(|| Error::EndpointError("endpoint is required".to_string()))?,
        );
        let dialog_layer = Arc::new(DialogLayer::new(endpoint.inner.clone()));
        let (state_sender, state_receiver) = unbounded_channel();
        let (event_sender, event_receiver) = unbounded_channel();

        let contact = endpoint
            .inner
            .transport_layer
            .first_addr(None)
            .map(|addr| {
                let mut uri: Uri = (&addr).into();
                if let Some(local) = &self.local_uri {
                    uri.user = local.user.clone();
                }
                uri
            });

        Ok(UserAgent {
            endpoint,
            dialog_layer,
            media: self.media,
            local_uri: self.local_uri,
            display_name: self.display_name,
            contact,
            state_sender,
            state_receiver: Mutex::new(Some(state_receiver)),
            event_sender,
            event_receiver: Mutex::new(Some(event_receiver)),
            registrations: tokio::sync::Mutex::new(HashMap::new()),
        })
    }
}

/// A SIP user agent: originates and receives calls, registers with
/// registrars, and reports everything through a typed event stream.
pub struct UserAgent {
    pub endpoint: Arc<Endpoint>,
    pub dialog_layer: Arc<DialogLayer>,
    media: Option<Arc<dyn MediaAdapter>>,
    local_uri: Option<Uri>,
    display_name: Option<String>,
    contact: Option<Uri>,
    state_sender: DialogStateSender,
    state_receiver: Mutex<Option<DialogStateReceiver>>,
    event_sender: UnboundedSender<UserAgentEvent>,
    event_receiver: Mutex<Option<UnboundedReceiver<UserAgentEvent>>>,
    registrations: tokio::sync::Mutex<HashMap<String, Registration>>,
}

impl UserAgent {
    /// The application's event feed. Take it once, before `serve`.
    pub fn events(&self) -> Option<UnboundedReceiver<UserAgentEvent>> {
        self.event_receiver.lock().unwrap().take()
    }

    fn contact_uri(&self) -> Result<Uri> {
        self.contact
            .clone()
            .ok_or_else(|| Error::EndpointError("no local transport bound".to_string()))
    }

    fn local_name_addr(&self) -> Result<Uri> {
        self.local_uri
            .clone()
            .ok_or_else(|| Error::EndpointError("local_uri is not configured".to_string()))
    }

    /// Runs the agent until the endpoint is cancelled: the transport and
    /// timer machinery, inbound transaction dispatch, and dialog state
    /// fan-out.
    pub async fn serve(&self) {
        let incoming = self.endpoint.incoming_transactions();
        let state_receiver = match self.state_receiver.lock().unwrap().take() {
            Some(receiver) => receiver,
            None => {
                warn!("user agent already serving");
                return;
            }
        };
        select! {
            _ = self.endpoint.serve() => {},
            _ = self.process_incoming(incoming) => {},
            _ = self.process_dialog_states(state_receiver) => {},
        }
        info!("user agent stopped");
    }

    pub fn shutdown(&self) {
        self.endpoint.shutdown();
    }

    /// Places a call and waits for it to settle. Cancelling the token
    /// CANCELs a still-provisional INVITE; a 200 that wins the race is
    /// answered and immediately torn down with BYE (so no dialog leaks
    /// either way).
    pub async fn place_call(
        &self,
        target: Uri,
        offer: Option<Vec<u8>>,
        credential: Option<Credential>,
        cancel_token: Option<CancellationToken>,
    ) -> Result<ActiveCall> {
        let offer = match offer {
            Some(offer) => Some(offer),
            None => match &self.media {
                Some(media) => Some(media.create_offer(false).await?),
                None => None,
            },
        };

        let mut caller = self.local_name_addr()?;
        if caller.user.is_none() {
            caller.user = target.user.clone();
        }
        let opt = InviteOption {
            caller,
            caller_display_name: self.display_name.clone(),
            callee: target,
            content_type: offer.is_some().then(|| "application/sdp".to_string()),
            offer,
            contact: self.contact_uri()?,
            credential,
            headers: None,
            cancel_token: cancel_token.clone(),
        };

        let result = self
            .dialog_layer
            .do_invite(opt, self.state_sender.clone())
            .await;

        let (dialog, final_response) = match result {
            Ok(settled) => settled,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e @ Error::TransportLayerError(..))
            | Err(e @ Error::DnsResolutionError(..))
            | Err(e @ Error::CongestionRequiresReliable(..))
            | Err(e @ Error::IoError(..)) => {
                return Ok(ActiveCall {
                    dialog: None,
                    outcome: CallOutcome::TransportFailure(e.to_string()),
                    media: self.media.clone(),
                })
            }
            Err(e) => return Err(e),
        };

        // CANCEL/200 race: a 2xx that won the race still establishes the
        // dialog, which a cancelled caller immediately releases.
        if let Some(token) = &cancel_token {
            if token.is_cancelled() {
                if dialog.state().is_confirmed() {
                    dialog.bye().await.ok();
                }
                return Ok(ActiveCall {
                    dialog: Some(dialog),
                    outcome: CallOutcome::Cancelled,
                    media: self.media.clone(),
                });
            }
        }

        let outcome = match &final_response {
            Some(resp) if resp.status_code.is_success() => CallOutcome::Established,
            Some(resp) if resp.status_code == StatusCode::REQUEST_TIMEOUT => CallOutcome::Timeout,
            Some(resp) if resp.status_code == StatusCode::REQUEST_TERMINATED => {
                CallOutcome::Cancelled
            }
            Some(resp) => {
                CallOutcome::Rejected(resp.status_code, resp.reason().to_string())
            }
            None => CallOutcome::Timeout,
        };

        if matches!(outcome, CallOutcome::Established) {
            if let (Some(media), Some(resp)) = (&self.media, &final_response) {
                if !resp.body.is_empty() {
                    media.apply_answer(&resp.body).await.ok();
                }
            }
        }

        Ok(ActiveCall {
            dialog: Some(dialog),
            outcome,
            media: self.media.clone(),
        })
    }

    /// Registers at `server`, reusing CSeq numbering and cached nonces
    /// across refreshes. Emits a [`UserAgentEvent::RegisterResult`].
    pub async fn register(
        &self,
        server: &str,
        credential: Option<Credential>,
        expires: Option<u32>,
    ) -> Result<u32> {
        let mut registrations = self.registrations.lock().await;
        let registration = registrations
            .entry(server.to_string())
            .or_insert_with(|| Registration::new(self.endpoint.clone(), credential));

        let resp = registration.register(server, expires).await?;
        let granted = registration.expires();
        self.event_sender
            .send(UserAgentEvent::RegisterResult {
                server: server.to_string(),
                status: resp.status_code,
                expires: resp.headers.expires().or(Some(granted)),
            })
            .ok();
        if resp.status_code != StatusCode::OK {
            return Err(Error::EndpointError(format!(
                "registration failed with {}",
                resp.status_code
            )));
        }
        Ok(granted)
    }

    pub async fn unregister(&self, server: &str) -> Result<()> {
        let mut registrations = self.registrations.lock().await;
        if let Some(registration) = registrations.get_mut(server) {
            registration.unregister(server).await?;
            registrations.remove(server);
        }
        Ok(())
    }

    async fn process_incoming(&self, mut incoming: TransactionReceiver) -> Result<()> {
        while let Some(mut tx) = incoming.recv().await {
            debug!("received transaction: {}", tx.key);
            match tx.original.method {
                Method::Ack => {
                    // End-to-end ACK for a 2xx: confirm the dialog.
                    if let Some(Dialog::ServerInvite(dialog)) =
                        self.dialog_layer.match_dialog(&tx.original)
                    {
                        dialog.on_ack(&tx.original).ok();
                    }
                }
                Method::Invite if !has_to_tag(&tx.original) => {
                    self.on_new_invite(tx).await.ok();
                }
                _ if has_to_tag(&tx.original) => {
                    match self.dialog_layer.match_dialog(&tx.original) {
                        Some(Dialog::ServerInvite(mut dialog)) => {
                            tokio::spawn(async move {
                                dialog.handle_in_dialog(tx).await.ok();
                            });
                        }
                        Some(Dialog::ClientInvite(mut dialog)) => {
                            tokio::spawn(async move {
                                dialog.handle(tx).await.ok();
                            });
                        }
                        None => {
                            tx.reply(StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST)
                                .await
                                .ok();
                        }
                    }
                }
                Method::Options => {
                    // Out-of-dialog capability query.
                    let allow = Header::Allow(
                        "INVITE, ACK, BYE, CANCEL, OPTIONS, INFO, UPDATE, REFER, NOTIFY"
                            .to_string(),
                    );
                    tx.reply_with(StatusCode::OK, vec![allow], None).await.ok();
                }
                _ => {
                    tx.reply(StatusCode::METHOD_NOT_ALLOWED).await.ok();
                }
            }
        }
        Ok(())
    }

    async fn on_new_invite(&self, mut tx: crate::transaction::transaction::Transaction) -> Result<()> {
        let dialog = match self.dialog_layer.get_or_create_server_invite(
            &tx,
            self.state_sender.clone(),
            None,
            self.contact.clone(),
        ) {
            Ok(dialog) => dialog,
            Err(e) => {
                info!("rejecting undialogable INVITE: {}", e);
                tx.reply(StatusCode::BAD_REQUEST).await.ok();
                return Ok(());
            }
        };

        let offer = (!tx.original.body.is_empty()).then(|| tx.original.body.clone());
        let call = IncomingCall {
            from: tx.original.from().ok().cloned(),
            dialog: dialog.clone(),
            offer,
            media: self.media.clone(),
        };
        self.event_sender
            .send(UserAgentEvent::IncomingCall(call))
            .ok();

        let mut dialog = dialog;
        tokio::spawn(async move {
            dialog.handle(tx).await.ok();
        });
        Ok(())
    }

    async fn process_dialog_states(&self, mut receiver: DialogStateReceiver) -> Result<()> {
        while let Some(state) = receiver.recv().await {
            match state {
                DialogState::Early(id, resp) => {
                    self.event_sender
                        .send(UserAgentEvent::CallProgress(id, resp.status_code))
                        .ok();
                }
                DialogState::Confirmed(id, _) => {
                    self.event_sender
                        .send(UserAgentEvent::CallAnswered(id))
                        .ok();
                }
                DialogState::Terminated(id, reason) => {
                    self.dialog_layer.remove_dialog(&id);
                    self.event_sender
                        .send(UserAgentEvent::CallEnded(id, reason))
                        .ok();
                }
                DialogState::Info(id, req) => {
                    if let Some(digit) = parse_dtmf(&req) {
                        self.event_sender
                            .send(UserAgentEvent::Dtmf(id, digit))
                            .ok();
                    }
                }
                DialogState::Refer(id, req) => {
                    if let Some(refer_to) = req.headers.refer_to() {
                        self.event_sender
                            .send(UserAgentEvent::TransferRequested(
                                id,
                                refer_to.uri.clone(),
                            ))
                            .ok();
                    }
                }
                DialogState::Notify(id, req) => {
                    if let Some(status) = parse_sipfrag_status(&req) {
                        self.event_sender
                            .send(UserAgentEvent::TransferProgress(id, status))
                            .ok();
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn has_to_tag(req: &Request) -> bool {
    req.to().map(|to| to.tag().is_some()).unwrap_or(false)
}

/// `Signal=5` out of an `application/dtmf-relay` INFO body.
fn parse_dtmf(req: &Request) -> Option<char> {
    let content_type = req.headers.content_type()?;
    if !content_type.to_ascii_lowercase().contains("dtmf") {
        return None;
    }
    let body = std::str::from_utf8(&req.body).ok()?;
    for line in body.lines() {
        if let Some((name, value)) = line.split_once('=') {
            if name.trim().eq_ignore_ascii_case("signal") {
                return value.trim().chars().next();
            }
        }
    }
    None
}

/// Status line out of a `message/sipfrag` NOTIFY body (RFC 3515 §2.4.5).
fn parse_sipfrag_status(req: &Request) -> Option<StatusCode> {
    let is_refer_notify = req
        .headers
        .value_of("Event")
        .map(|event| event.to_ascii_lowercase().starts_with("refer"))
        .unwrap_or(false);
    if !is_refer_notify {
        return None;
    }
    let body = std::str::from_utf8(&req.body).ok()?;
    let first = body.lines().next()?;
    let mut parts = first.split_whitespace();
    let version = parts.next()?;
    if !version.eq_ignore_ascii_case("SIP/2.0") {
        return None;
    }
    let code: u16 = parts.next()?.parse().ok()?;
    StatusCode::is_valid(code).then_some(StatusCode(code))
}
