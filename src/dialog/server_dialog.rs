use super::dialog::{DialogInnerRef, DialogState, TerminatedReason};
use super::DialogId;
use crate::sip::{Header, Method, Request, StatusCode};
use crate::transaction::transaction::{Transaction, TransactionEvent};
use crate::{Error, Result};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

/// Server-side INVITE dialog (UAS): ring/accept/reject an incoming
/// INVITE, then handle in-dialog traffic and teardown.
///
/// `accept`/`reject`/`ringing` are synchronous: they queue the response
/// into the INVITE transaction, which [`ServerInviteDialog::handle`]
/// is driving on its own task.
#[derive(Clone)]
pub struct ServerInviteDialog {
    pub(super) inner: DialogInnerRef,
}

impl ServerInviteDialog {
    pub fn id(&self) -> DialogId {
        self.inner.id.lock().unwrap().clone()
    }

    pub fn state(&self) -> DialogState {
        self.inner.state.lock().unwrap().clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel_token
    }

    pub fn initial_request(&self) -> &Request {
        &self.inner.initial_request
    }

    /// Queues a provisional response (180 by default via
    /// [`ServerInviteDialog::ringing`]).
    pub fn progress(&self, status: StatusCode, body: Option<Vec<u8>>) -> Result<()> {
        if !status.is_provisional() {
            return Err(Error::DialogError(
                "progress requires a 1xx status".to_string(),
                self.id(),
            ));
        }
        self.queue_response(status, None, body)
    }

    pub fn ringing(&self) -> Result<()> {
        self.progress(StatusCode::RINGING, None)
    }

    /// Accepts the INVITE with a 2xx carrying the answer body. The
    /// dialog waits in `WaitAck` until the peer's ACK confirms it.
    pub fn accept(&self, headers: Option<Vec<Header>>, body: Option<Vec<u8>>) -> Result<()> {
        let resp = self.inner.make_response(
            &self.inner.initial_request,
            StatusCode::OK,
            headers,
            body,
        );
        let queued = self.send_via_transaction(resp.clone());
        if queued.is_ok() {
            self.inner
                .transition(DialogState::WaitAck(self.id(), resp))?;
        }
        queued
    }

    /// Rejects the INVITE; defaults to 603 Decline.
    pub fn reject(&self, status: Option<StatusCode>) -> Result<()> {
        let status = status.unwrap_or(StatusCode::DECLINE);
        let queued = self.queue_response(status, None, None);
        if queued.is_ok() {
            let reason = match status {
                StatusCode::BUSY_HERE => TerminatedReason::UasBusy,
                _ => TerminatedReason::UasDecline,
            };
            self.inner
                .transition(DialogState::Terminated(self.id(), reason))?;
        }
        queued
    }

    /// Redirects the caller to another contact with a 302.
    pub fn redirect(&self, target: crate::sip::Uri) -> Result<()> {
        let contact = Header::Contact(crate::sip::NameAddr::new(target));
        let queued = self.queue_response(StatusCode::MOVED_TEMPORARILY, Some(vec![contact]), None);
        if queued.is_ok() {
            self.inner.transition(DialogState::Terminated(
                self.id(),
                TerminatedReason::UasOther(StatusCode::MOVED_TEMPORARILY),
            ))?;
        }
        queued
    }

    fn queue_response(
        &self,
        status: StatusCode,
        headers: Option<Vec<Header>>,
        body: Option<Vec<u8>>,
    ) -> Result<()> {
        let resp = self
            .inner
            .make_response(&self.inner.initial_request, status, headers, body);
        self.send_via_transaction(resp)
    }

    fn send_via_transaction(&self, resp: crate::sip::Response) -> Result<()> {
        match self.inner.tu_sender.lock().unwrap().as_ref() {
            Some(sender) => {
                sender.send(TransactionEvent::Respond(resp))?;
                Ok(())
            }
            None => Err(Error::DialogError(
                "INVITE transaction is already terminated".to_string(),
                self.id(),
            )),
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

    pub async fn reinvite(
        &self,
        headers: Option<Vec<Header>>,
        body: Option<Vec<u8>>,
    ) -> Result<Option<crate::sip::Response>> {
        if !self.inner.is_confirmed() {
            return Ok(None);
        }
        let request = self
            .inner
            .make_request(Method::Invite, None, headers, body)?;
        self.inner.do_request(request).await
    }

    pub async fn info(
        &self,
        headers: Option<Vec<Header>>,
        body: Option<Vec<u8>>,
    ) -> Result<Option<crate::sip::Response>> {
        if !self.inner.is_confirmed() {
            return Ok(None);
        }
        let request = self.inner.make_request(Method::Info, None, headers, body)?;
        self.inner.do_request(request).await
    }

    /// Drives the INVITE server transaction: absorbs the CANCEL race,
    /// waits for the deferred accept/reject, and runs until the
    /// transaction terminates.
    pub async fn handle(&mut self, mut tx: Transaction) -> Result<()> {
        trace!(id = %self.id(), "driving INVITE server transaction {}", tx.key);
        self.inner
            .tu_sender
            .lock()
            .unwrap()
            .replace(tx.tu_sender.clone());

        while let Some(msg) = tx.receive().await {
            if let crate::sip::SipMessage::Request(req) = msg {
                if req.method == Method::Cancel {
                    info!(id = %self.id(), "INVITE cancelled by peer");
                    tx.reply(StatusCode::REQUEST_TERMINATED).await.ok();
                    self.inner.transition(DialogState::Terminated(
                        self.id(),
                        TerminatedReason::UacCancel,
                    ))?;
                    break;
                }
            }
        }

        self.inner.tu_sender.lock().unwrap().take();
        Ok(())
    }

    /// Confirms the dialog on the end-to-end ACK for our 2xx.
    pub fn on_ack(&self, ack: &Request) -> Result<()> {
        if let Ok(cseq) = ack.cseq() {
            self.inner.remote_seq.store(cseq.seq, Ordering::Relaxed);
        }
        let state = self.inner.state.lock().unwrap().clone();
        if let DialogState::WaitAck(id, resp) = state {
            self.inner.transition(DialogState::Confirmed(id, resp))?;
        }
        Ok(())
    }

    /// Handles a mid-dialog request routed to this dialog.
    pub async fn handle_in_dialog(&mut self, mut tx: Transaction) -> Result<()> {
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
            Method::Bye => {
                info!(id = %self.id(), "received bye");
                self.inner.transition(DialogState::Terminated(
                    self.id(),
                    TerminatedReason::UacBye,
                ))?;
                tx.reply(StatusCode::OK).await?;
            }
            Method::Info => {
                self.inner
                    .transition(DialogState::Info(self.id(), tx.original.clone()))?;
                tx.reply(StatusCode::OK).await?;
            }
            Method::Options => {
                self.inner
                    .transition(DialogState::Options(self.id(), tx.original.clone()))?;
                tx.reply(StatusCode::OK).await?;
            }
            Method::Update => {
                self.inner
                    .transition(DialogState::Updated(self.id(), tx.original.clone()))?;
                tx.reply(StatusCode::OK).await?;
            }
            Method::Notify => {
                self.inner
                    .transition(DialogState::Notify(self.id(), tx.original.clone()))?;
                tx.reply(StatusCode::OK).await?;
            }
            Method::Refer => {
                // Transfer request: accepted at the protocol level, the
                // application decides whether to follow it.
                self.inner
                    .transition(DialogState::Refer(self.id(), tx.original.clone()))?;
                tx.reply(StatusCode::ACCEPTED).await?;
            }
            Method::Invite => {
                // re-INVITE: surface the new offer; answering is the
                // application's job via accept-like responses.
                self.inner
                    .transition(DialogState::Updated(self.id(), tx.original.clone()))?;
                tx.reply(StatusCode::OK).await?;
            }
            _ => {
                tx.reply(StatusCode::METHOD_NOT_ALLOWED).await?;
            }
        }
        Ok(())
    }
}
