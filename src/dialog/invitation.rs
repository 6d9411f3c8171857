use super::{
    authenticate::Credential,
    client_dialog::ClientInviteDialog,
    dialog::{Dialog, DialogInner, DialogStateSender},
    dialog_layer::DialogLayer,
    DialogId,
};
use crate::sip::{Header, Method, NameAddr, Param, Response, Uri};
use crate::transaction::{
    key::{TransactionKey, TransactionRole},
    make_tag, make_via_branch,
    transaction::Transaction,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Everything needed to originate a call.
pub struct InviteOption {
    pub caller: Uri,
    pub caller_display_name: Option<String>,
    pub callee: Uri,
    pub content_type: Option<String>,
    /// Opaque session offer (SDP) carried as the INVITE body.
    pub offer: Option<Vec<u8>>,
    pub contact: Uri,
    pub credential: Option<Credential>,
    pub headers: Option<Vec<Header>>,
    pub cancel_token: Option<CancellationToken>,
}

impl DialogLayer {
    pub fn make_invite_request(&self, opt: &InviteOption) -> Result<crate::sip::Request> {
        let last_seq = self.increment_last_seq();
        let to = NameAddr::new(opt.callee.clone());
        let recipient = to.uri.clone();

        let mut from = NameAddr::new(opt.caller.clone()).with_tag(make_tag());
        from.display_name = opt.caller_display_name.clone();

        let via = self.endpoint.get_via(None, None)?;
        let mut request = self
            .endpoint
            .make_request(Method::Invite, recipient, via, from, to, last_seq);

        request
            .headers
            .unique_push(Header::Contact(NameAddr::new(opt.contact.clone())));
        request.headers.unique_push(Header::ContentType(
            opt.content_type
                .clone()
                .unwrap_or_else(|| "application/sdp".to_string()),
        ));
        if let Some(extra) = &opt.headers {
            for header in extra.clone() {
                request.headers.unique_push(header);
            }
        }
        Ok(request)
    }

    /// Originates an INVITE dialog and drives it to a final answer.
    /// An oversized request refused by the datagram channel is retried
    /// once over TCP with a regenerated branch.
    pub async fn do_invite(
        &self,
        opt: InviteOption,
        state_sender: DialogStateSender,
    ) -> Result<(ClientInviteDialog, Option<Response>)> {
        let mut request = self.make_invite_request(&opt)?;
        request.body = opt.offer.unwrap_or_default();

        let id = DialogId::try_from(&request)?;
        let dlg_inner = DialogInner::new(
            TransactionRole::Client,
            id.clone(),
            request.clone(),
            self.endpoint.clone(),
            state_sender,
            opt.credential,
            Some(opt.contact),
            None,
        )?;

        let key = TransactionKey::from_request(&request, TransactionRole::Client)?;
        let tx = Transaction::new_client(key, request.clone(), self.endpoint.clone(), None);

        let dialog = ClientInviteDialog {
            inner: Arc::new(dlg_inner),
        };
        self.insert_dialog(id.clone(), Dialog::ClientInvite(dialog.clone()));
        info!("client invite dialog created: {}", id);

        // External cancellation CANCELs a still-provisional INVITE; if a
        // 2xx wins the race the caller observes the established dialog
        // and tears it down with BYE.
        if let Some(token) = opt.cancel_token.clone() {
            let dialog = dialog.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        dialog.cancel().await.ok();
                    }
                    // Dialog torn down: nothing left to cancel.
                    _ = dialog.inner.cancel_token.cancelled() => {}
                }
            });
        }

        let mut result = dialog.process_invite(tx).await;

        if let Err(Error::CongestionRequiresReliable(len)) = &result {
            // Too large for UDP (RFC 3261 §18.1.1): force TCP on the
            // request-URI and retry with a fresh branch.
            info!(%id, "request of {} bytes exceeds datagram limit, retrying over TCP", len);
            let mut retry_request = request.clone();
            retry_request
                .uri
                .params
                .retain(|p| !matches!(p, Param::Transport(_)));
            retry_request
                .uri
                .params
                .push(Param::Transport(crate::sip::Transport::Tcp));
            if let Ok(via) = retry_request.via_mut() {
                via.transport = crate::sip::Transport::Tcp;
                via.params.retain(|p| !matches!(p, Param::Branch(_)));
                via.params.push(make_via_branch());
            }
            *dialog.inner.remote_target.lock().unwrap() = retry_request.uri.clone();
            let key = TransactionKey::from_request(&retry_request, TransactionRole::Client)?;
            let tx = Transaction::new_client(key, retry_request, self.endpoint.clone(), None);
            result = dialog.process_invite(tx).await;
        }

        match result {
            Ok((new_dialog_id, final_response)) => {
                debug!("client invite dialog settled: {} => {}", id, new_dialog_id);
                {
                    let mut dialogs = self.inner.dialogs.write().unwrap();
                    dialogs.remove(&id);
                    // A dialog that died during setup must not reappear
                    // under its settled id.
                    if !dialog.inner.is_terminated() {
                        dialogs.insert(new_dialog_id, Dialog::ClientInvite(dialog.clone()));
                    }
                }
                Ok((dialog, final_response))
            }
            Err(e) => {
                info!("client invite dialog failed: {}", e);
                self.remove_dialog(&id);
                Err(e)
            }
        }
    }
}
