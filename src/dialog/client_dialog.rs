use super::dialog::{DialogInnerRef, DialogState, TerminatedReason};
use super::{authenticate::handle_client_authenticate, DialogId};
use crate::sip::{
    Header, Method, NameAddr, Request, Response, SipMessage, StatusCode, StatusKind, Uri,
};
use crate::transaction::transaction::Transaction;
use crate::Result;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

/// Client-side INVITE dialog (UAC): drives call setup via
/// [`ClientInviteDialog::process_invite`], then in-dialog requests
/// (re-INVITE, UPDATE, INFO, REFER) and teardown (CANCEL before a final,
/// BYE after).
///
/// Cloneable and shareable across tasks; all state lives behind the
/// shared inner.
#[derive(Clone)]
pub struct ClientInviteDialog {
    pub(super) inner: DialogInnerRef,
}

impl ClientInviteDialog {
    pub fn id(&self) -> DialogId {
        self.inner.id.lock().unwrap().clone()
    }

    pub fn state(&self) -> DialogState {
        self.inner.state.lock().unwrap().clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel_token
    }

    /// CANCEL while the call is still provisional, BYE once confirmed.
    pub async fn hangup(&self) -> Result<()> {
        if self.inner.can_cancel() {
            self.cancel().await
        } else {
            self.bye().await
        }
    }

    pub async fn bye(&self) -> Result<()> {
        if !self.inner.is_confirmed() {
            return Ok(());
        }
        let request = self.inner.make_request(Method::Bye, None, None, None)?;
        match self.inner.do_request(request).await {
            Ok(_) => {}
            Err(e) => {
                info!("bye error: {}", e);
            }
        }
        self.inner
            .transition(DialogState::Terminated(self.id(), TerminatedReason::UacBye))?;
        Ok(())
    }

    /// CANCEL reuses the INVITE's branch and CSeq number so the peer
    /// matches it to the INVITE server transaction (RFC 3261 §9.1).
    pub async fn cancel(&self) -> Result<()> {
        if self.inner.is_confirmed() {
            return Ok(());
        }
        info!(id = %self.id(), "sending cancel request");
        let mut cancel_request = self.inner.initial_request.clone();
        cancel_request.method = Method::Cancel;
        cancel_request.body = vec![];
        cancel_request.headers.retain(|h| {
            !matches!(h, Header::ContentLength(_) | Header::ContentType(_))
        });
        {
            let cseq = cancel_request.cseq_mut()?;
            cseq.method = Method::Cancel;
        }
        self.inner.do_request(cancel_request).await?;
        Ok(())
    }

    /// Session modification once confirmed; the body is the new offer.
    pub async fn reinvite(
        &self,
        headers: Option<Vec<Header>>,
        body: Option<Vec<u8>>,
    ) -> Result<Option<Response>> {
        if !self.inner.is_confirmed() {
            return Ok(None);
        }
        info!(id = %self.id(), "sending re-invite request");
        let request = self
            .inner
            .make_request(Method::Invite, None, headers, body)?;
        let resp = self.inner.do_request(request.clone()).await;
        if let Ok(Some(resp)) = &resp {
            if resp.status_code == StatusCode::OK {
                // A 2xx to re-INVITE needs its end-to-end ACK too.
                self.ack_reinvite(resp).await.ok();
                self.inner
                    .transition(DialogState::Updated(self.id(), request))?;
            }
        }
        resp
    }

    async fn ack_reinvite(&self, resp: &Response) -> Result<()> {
        let cseq = resp.cseq()?.seq;
        let ack = self
            .inner
            .make_request(Method::Ack, Some(cseq), None, None)?;
        let key = crate::transaction::key::TransactionKey::from_request(
            &ack,
            crate::transaction::key::TransactionRole::Client,
        )?;
        let mut tx = Transaction::new_client(key, ack, self.inner.endpoint_inner.clone(), None);
        tx.send().await
    }

    pub async fn update(
        &self,
        headers: Option<Vec<Header>>,
        body: Option<Vec<u8>>,
    ) -> Result<Option<Response>> {
        if !self.inner.is_confirmed() {
            return Ok(None);
        }
        info!(id = %self.id(), "sending update request");
        let request = self
            .inner
            .make_request(Method::Update, None, headers, body)?;
        self.inner.do_request(request).await
    }

    pub async fn info(
        &self,
        headers: Option<Vec<Header>>,
        body: Option<Vec<u8>>,
    ) -> Result<Option<Response>> {
        if !self.inner.is_confirmed() {
            return Ok(None);
        }
        info!(id = %self.id(), "sending info request");
        let request = self.inner.make_request(Method::Info, None, headers, body)?;
        self.inner.do_request(request).await
    }

    pub async fn options(
        &self,
        headers: Option<Vec<Header>>,
        body: Option<Vec<u8>>,
    ) -> Result<Option<Response>> {
        if !self.inner.is_confirmed() {
            return Ok(None);
        }
        let request = self
            .inner
            .make_request(Method::Options, None, headers, body)?;
        self.inner.do_request(request).await
    }

    /// Blind transfer (RFC 3515): REFER with the transfer target in
    /// Refer-To. The implicit subscription's NOTIFYs arrive as
    /// [`DialogState::Notify`] events carrying sipfrag progress.
    pub async fn refer(&self, target: Uri) -> Result<Option<Response>> {
        self.send_refer(NameAddr::new(target)).await
    }

    /// Attended transfer: the Refer-To target carries a Replaces header
    /// identifying the consultation dialog to replace.
    pub async fn refer_with_replaces(
        &self,
        target: Uri,
        replaces: &DialogId,
    ) -> Result<Option<Response>> {
        let mut target = target;
        target.headers.push((
            "Replaces".to_string(),
            format!(
                "{}%3Bto-tag%3D{}%3Bfrom-tag%3D{}",
                replaces.call_id, replaces.to_tag, replaces.from_tag
            ),
        ));
        self.send_refer(NameAddr::new(target)).await
    }

    async fn send_refer(&self, refer_to: NameAddr) -> Result<Option<Response>> {
        if !self.inner.is_confirmed() {
            return Ok(None);
        }
        info!(id = %self.id(), refer_to = %refer_to, "sending refer request");
        let headers = vec![
            Header::ReferTo(refer_to),
            Header::ReferredBy(self.inner.from.clone()),
        ];
        let request = self
            .inner
            .make_request(Method::Refer, None, Some(headers), None)?;
        self.inner.do_request(request).await
    }

    /// Handles a mid-dialog request routed to this dialog, enforcing
    /// CSeq monotonicity per direction.
    pub async fn handle(&mut self, mut tx: Transaction) -> Result<()> {
        trace!(
            id = %self.id(),
            "handle request: {} state: {}",
            tx.original.method,
            self.inner.state.lock().unwrap()
        );

        let cseq = tx.original.cseq()?.seq;
        let remote_seq = self.inner.remote_seq.load(Ordering::Relaxed);
        if remote_seq > 0 && cseq <= remote_seq && tx.original.method != Method::Ack {
            info!(id = %self.id(), "stale in-dialog request cseq {} <= {}", cseq, remote_seq);
            tx.reply(StatusCode::SERVER_INTERNAL_ERROR).await?;
            return Ok(());
        }
        self.inner.remote_seq.store(cseq, Ordering::Relaxed);

        if self.inner.is_terminated() {
            tx.reply(StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST).await?;
            return Ok(());
        }

        match tx.original.method {
            Method::Bye => self.handle_bye(tx).await,
            Method::Info => self.handle_event(tx, DialogState::Info).await,
            Method::Options => self.handle_event(tx, DialogState::Options).await,
            Method::Update => self.handle_event(tx, DialogState::Updated).await,
            Method::Notify => self.handle_event(tx, DialogState::Notify).await,
            Method::Refer => self.handle_event(tx, DialogState::Refer).await,
            // re-INVITE from the peer: surface the new offer and accept
            // at the protocol level.
            Method::Invite => self.handle_event(tx, DialogState::Updated).await,
            _ => {
                info!(id = %self.id(), "unexpected in-dialog method: {}", tx.original.method);
                tx.reply(StatusCode::METHOD_NOT_ALLOWED).await?;
                Ok(())
            }
        }
    }

    async fn handle_bye(&mut self, mut tx: Transaction) -> Result<()> {
        info!(id = %self.id(), "received bye");
        self.inner
            .transition(DialogState::Terminated(self.id(), TerminatedReason::UasBye))?;
        tx.reply(StatusCode::OK).await?;
        Ok(())
    }

    async fn handle_event(
        &mut self,
        mut tx: Transaction,
        state: fn(DialogId, Request) -> DialogState,
    ) -> Result<()> {
        self.inner.transition(state(self.id(), tx.original.clone()))?;
        tx.reply(StatusCode::OK).await?;
        Ok(())
    }

    /// Drives the initial INVITE transaction to a final answer,
    /// establishing the dialog on 2xx. Returns the settled dialog id and
    /// the final response.
    pub async fn process_invite(
        &self,
        mut tx: Transaction,
    ) -> Result<(DialogId, Option<Response>)> {
        self.inner.transition(DialogState::Calling(self.id()))?;
        let mut auth_sent = false;
        tx.send().await?;

        let mut dialog_id = self.id();
        let mut final_response = None;

        while let Some(msg) = tx.receive().await {
            let resp = match msg {
                SipMessage::Response(resp) => resp,
                SipMessage::Request(_) => continue,
            };
            match resp.status_code {
                StatusCode::TRYING => {
                    self.inner.transition(DialogState::Trying(self.id()))?;
                    continue;
                }
                status if status.kind() == StatusKind::Provisional => {
                    if let Some(tag) = resp.to()?.tag() {
                        self.inner.update_remote_tag(tag);
                    }
                    self.inner
                        .transition(DialogState::Early(self.id(), resp))?;
                    continue;
                }
                StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                    if auth_sent {
                        info!(id = %self.id(), "challenge repeated after auth sent");
                        final_response = Some(resp);
                        self.inner.transition(DialogState::Terminated(
                            self.id(),
                            TerminatedReason::ProxyAuthRequired,
                        ))?;
                        break;
                    }
                    auth_sent = true;
                    match &self.inner.credential {
                        Some(credential) => {
                            tx = handle_client_authenticate(
                                self.inner.increment_local_seq(),
                                tx,
                                resp,
                                credential,
                            )
                            .await?;
                            tx.send().await?;
                            self.inner.update_remote_tag("");
                            continue;
                        }
                        None => {
                            info!(id = %self.id(), "challenge received without credential");
                            final_response = Some(resp);
                            self.inner.transition(DialogState::Terminated(
                                self.id(),
                                TerminatedReason::ProxyAuthRequired,
                            ))?;
                            break;
                        }
                    }
                }
                _ => {}
            }

            final_response = Some(resp.clone());
            if let Some(tag) = resp.to()?.tag() {
                self.inner.update_remote_tag(tag);
            }
            if let Ok(id) = DialogId::try_from(&resp) {
                dialog_id = id;
            }

            match resp.status_code.kind() {
                StatusKind::Success => {
                    // 2xx to INVITE always carries the peer's Contact:
                    // it becomes the remote target for in-dialog
                    // requests.
                    if let Ok(contact) = resp.contact() {
                        self.inner
                            .set_remote_target(contact.uri.base(), Some(contact.clone()));
                    }
                    self.inner.update_route_set_from_response(&resp);

                    let ack = self.inner.make_request(
                        Method::Ack,
                        Some(resp.cseq()?.seq),
                        None,
                        None,
                    )?;
                    tx.send_ack(ack).await?;
                    self.inner
                        .transition(DialogState::Confirmed(dialog_id.clone(), resp))?;
                }
                _ => {
                    let reason = match resp.status_code {
                        StatusCode::REQUEST_TERMINATED => TerminatedReason::UacCancel,
                        StatusCode::BUSY_HERE => TerminatedReason::UasBusy,
                        StatusCode::DECLINE => TerminatedReason::UasDecline,
                        status => TerminatedReason::UasOther(status),
                    };
                    self.inner
                        .transition(DialogState::Terminated(self.id(), reason))?;
                }
            }
            break;
        }
        Ok((dialog_id, final_response))
    }
}
