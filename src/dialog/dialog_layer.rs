use super::authenticate::Credential;
use super::dialog::{Dialog, DialogInner, DialogStateSender};
use super::{server_dialog::ServerInviteDialog, DialogId};
use crate::sip::{Request, Uri};
use crate::transaction::key::TransactionRole;
use crate::transaction::{endpoint::EndpointInnerRef, make_tag, transaction::Transaction};
use crate::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use tracing::debug;

pub struct DialogLayerInner {
    pub(super) dialogs: RwLock<HashMap<DialogId, Dialog>>,
}
pub type DialogLayerInnerRef = Arc<DialogLayerInner>;

/// Tracks established dialogs by (Call-ID, local tag, remote tag) and
/// creates the server side of dialogs for incoming INVITEs.
pub struct DialogLayer {
    pub endpoint: EndpointInnerRef,
    pub inner: DialogLayerInnerRef,
    last_seq: AtomicU32,
}

impl DialogLayer {
    pub fn new(endpoint: EndpointInnerRef) -> Self {
        Self {
            endpoint,
            inner: Arc::new(DialogLayerInner {
                dialogs: RwLock::new(HashMap::new()),
            }),
            last_seq: AtomicU32::new(1),
        }
    }

    pub fn increment_last_seq(&self) -> u32 {
        self.last_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the server dialog for an incoming INVITE transaction,
    /// creating it (and the local tag) on first sight.
    pub fn get_or_create_server_invite(
        &self,
        tx: &Transaction,
        state_sender: DialogStateSender,
        credential: Option<Credential>,
        contact: Option<Uri>,
    ) -> Result<ServerInviteDialog> {
        let mut id = DialogId::try_from(&tx.original)?;
        if !id.to_tag.is_empty() {
            // Re-INVITE for an existing dialog.
            let dialog = self.inner.dialogs.read().unwrap().get(&id).cloned();
            match dialog {
                Some(Dialog::ServerInvite(dialog)) => return Ok(dialog),
                _ => {
                    return Err(crate::Error::DialogError(
                        "dialog not found".to_string(),
                        id,
                    ))
                }
            }
        }
        id.to_tag = make_tag();

        let remote_contact = tx.original.contact().ok().cloned();
        let dlg_inner = DialogInner::new(
            TransactionRole::Server,
            id.clone(),
            tx.original.clone(),
            self.endpoint.clone(),
            state_sender,
            credential,
            contact,
            remote_contact,
        )?;
        // Wired up immediately so accept/reject work even before the
        // transaction-driving task starts.
        dlg_inner
            .tu_sender
            .lock()
            .unwrap()
            .replace(tx.tu_sender.clone());

        let dialog = ServerInviteDialog {
            inner: Arc::new(dlg_inner),
        };
        self.inner
            .dialogs
            .write()
            .unwrap()
            .insert(id.clone(), Dialog::ServerInvite(dialog.clone()));
        debug!("added server dialog: {}", id);
        Ok(dialog)
    }

    pub fn get_dialog(&self, id: &DialogId) -> Option<Dialog> {
        self.inner.dialogs.read().unwrap().get(id).cloned()
    }

    /// Resolves the dialog an in-dialog request belongs to.
    pub fn match_dialog(&self, req: &Request) -> Option<Dialog> {
        let id = DialogId::try_from(req).ok()?;
        self.get_dialog(&id)
    }

    pub fn insert_dialog(&self, id: DialogId, dialog: Dialog) {
        self.inner.dialogs.write().unwrap().insert(id, dialog);
    }

    pub fn remove_dialog(&self, id: &DialogId) {
        debug!("removing dialog: {}", id);
        if let Some(dialog) = self.inner.dialogs.write().unwrap().remove(id) {
            dialog.on_remove();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.dialogs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
