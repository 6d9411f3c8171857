use super::endpoint::EndpointInnerRef;
use super::key::TransactionKey;
use super::{TimerSettings, TransactionState, TransactionTimer, TransactionType};
use crate::sip::{
    Header, Method, Request, Response, SipMessage, StatusCode, StatusKind,
};
use crate::transport::{SipAddr, SipConnection, CONGESTION_THRESHOLD};
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

/// Events serialized into a transaction's mailbox. The receive loop is
/// the only place state transitions run, so at most one handler executes
/// per transaction at a time.
pub enum TransactionEvent {
    Received(SipMessage, Option<SipConnection>),
    Timer(TransactionTimer),
    Respond(Response),
    Terminate,
}

pub type TransactionEventReceiver = UnboundedReceiver<TransactionEvent>;
pub type TransactionEventSender = UnboundedSender<TransactionEvent>;

/// One RFC 3261 transaction: the original request, its responses, and
/// the timers that drive retransmission and cleanup. Behavior follows
/// one of the four §17 state machines according to `transaction_type`.
pub struct Transaction {
    pub transaction_type: TransactionType,
    pub key: TransactionKey,
    pub original: Request,
    pub state: TransactionState,
    pub endpoint_inner: EndpointInnerRef,
    pub connection: Option<SipConnection>,
    /// Concrete transmission destination; `None` sends to the
    /// request-URI / top-Via target.
    pub destination: Option<SipAddr>,
    pub last_response: Option<Response>,
    pub last_ack: Option<Request>,
    /// T1/T2/T4/T6 for this transaction; copied from the endpoint and
    /// overridable before `send`.
    pub timer_settings: TimerSettings,
    /// Suppresses the A/E/G retransmission timers entirely (test
    /// harnesses, links with their own reliability). Timeout and
    /// quiet-time timers still run.
    pub retransmission_disabled: bool,
    pub(crate) tu_receiver: TransactionEventReceiver,
    pub(crate) tu_sender: TransactionEventSender,
    timer_retransmit: Option<u64>,
    timer_timeout: Option<u64>,
    timer_quiet: Option<u64>,
    timer_auto_100: Option<u64>,
}

impl Transaction {
    fn new(
        transaction_type: TransactionType,
        key: TransactionKey,
        original: Request,
        connection: Option<SipConnection>,
        endpoint_inner: EndpointInnerRef,
    ) -> Self {
        let (tu_sender, tu_receiver) = unbounded_channel();
        let state = match transaction_type {
            TransactionType::ClientInvite | TransactionType::ClientNonInvite => {
                TransactionState::Nothing
            }
            TransactionType::ServerInvite => TransactionState::Proceeding,
            TransactionType::ServerNonInvite => TransactionState::Trying,
        };
        let timer_settings = endpoint_inner.option.timer_settings;
        let retransmission_disabled = endpoint_inner.option.retransmission_disabled;
        Self {
            transaction_type,
            key,
            original,
            state,
            endpoint_inner,
            connection,
            destination: None,
            last_response: None,
            last_ack: None,
            timer_settings,
            retransmission_disabled,
            tu_receiver,
            tu_sender,
            timer_retransmit: None,
            timer_timeout: None,
            timer_quiet: None,
            timer_auto_100: None,
        }
    }

    pub fn new_client(
        key: TransactionKey,
        original: Request,
        endpoint_inner: EndpointInnerRef,
        connection: Option<SipConnection>,
    ) -> Self {
        let tx_type = match original.method {
            Method::Invite => TransactionType::ClientInvite,
            _ => TransactionType::ClientNonInvite,
        };
        Transaction::new(tx_type, key, original, connection, endpoint_inner)
    }

    /// Builds a server transaction and registers it with the endpoint.
    /// ACK is carried as a transaction object for uniform delivery but
    /// never registered: ACK receives no response.
    pub fn new_server(
        key: TransactionKey,
        original: Request,
        endpoint_inner: EndpointInnerRef,
        connection: Option<SipConnection>,
        destination: Option<SipAddr>,
    ) -> Self {
        let tx_type = match original.method {
            Method::Invite => TransactionType::ServerInvite,
            _ => TransactionType::ServerNonInvite,
        };
        let mut tx = Transaction::new(tx_type, key, original, connection, endpoint_inner);
        tx.destination = destination;
        if tx.original.method == Method::Ack {
            return tx;
        }
        tx.endpoint_inner
            .attach_transaction(&tx.key, tx.tu_sender.clone());
        if tx_type == TransactionType::ServerInvite && tx.endpoint_inner.option.auto_trying {
            let timer_id = tx.endpoint_inner.timers.timeout(
                Duration::from_millis(200),
                TransactionTimer::Timer100(tx.key.clone()),
            );
            tx.timer_auto_100.replace(timer_id);
        }
        tx
    }

    /// Transmits the client request and enters the state machine.
    pub async fn send(&mut self) -> Result<()> {
        if !self.transaction_type.is_client() {
            return Err(Error::TransactionError(
                "send is only valid for client transactions".to_string(),
                self.key.clone(),
            ));
        }

        if self.connection.is_none() {
            // A pre-set destination (the first Route of a dialog's route
            // set) wins over the request-URI for transport selection.
            let lookup_uri = match &self.destination {
                Some(dest) => {
                    let mut uri = crate::sip::Uri::from(dest);
                    if let Some(transport) = dest.r#type {
                        if !transport.is_secure() {
                            uri.params.push(crate::sip::Param::Transport(transport));
                        }
                    }
                    uri
                }
                None => self.original.uri.clone(),
            };
            let (connection, destination) = self
                .endpoint_inner
                .transport_layer
                .lookup(&lookup_uri)
                .await?;
            self.connection.replace(connection);
            let keep_existing = matches!(
                &self.destination,
                Some(dest) if !dest.addr.host.is_domain()
            );
            if !keep_existing {
                self.destination.replace(destination);
            }
        }

        let connection = self.connection.as_ref().ok_or(Error::TransactionError(
            "no connection found".to_string(),
            self.key.clone(),
        ))?;

        // Oversized requests must not go out on a datagram channel
        // (RFC 3261 §18.1.1); the caller retries over a stream with a
        // fresh branch.
        let wire_len = self.original.to_bytes().len();
        if !connection.is_reliable()
            && wire_len > CONGESTION_THRESHOLD
            && self.original.method != Method::Ack
        {
            return Err(Error::CongestionRequiresReliable(wire_len));
        }

        connection
            .send(self.original.clone().into(), self.destination.as_ref())
            .await?;
        self.endpoint_inner
            .attach_transaction(&self.key, self.tu_sender.clone());
        match self.transaction_type {
            TransactionType::ClientInvite => self.transition(TransactionState::Calling),
            _ => self.transition(TransactionState::Trying),
        }
        .map(|_| ())
    }

    /// Sends a server response and advances the state machine.
    pub async fn respond(&mut self, response: Response) -> Result<()> {
        if self.transaction_type.is_client() {
            return Err(Error::TransactionError(
                "respond is only valid for server transactions".to_string(),
                self.key.clone(),
            ));
        }
        if self.state == TransactionState::Terminated {
            return Err(Error::TransactionError(
                "transaction already terminated".to_string(),
                self.key.clone(),
            ));
        }

        let connection = self.connection.as_ref().ok_or(Error::TransactionError(
            "no connection found".to_string(),
            self.key.clone(),
        ))?;

        connection
            .send(response.clone().into(), self.destination.as_ref())
            .await?;

        let kind = response.status_code.kind();
        self.last_response.replace(response);
        match kind {
            StatusKind::Provisional => {
                if self.transaction_type == TransactionType::ServerNonInvite {
                    self.transition(TransactionState::Proceeding).map(|_| ())
                } else {
                    Ok(())
                }
            }
            StatusKind::Success if self.transaction_type == TransactionType::ServerInvite => {
                // 2xx to INVITE is owned end-to-end by the TU; the
                // transaction ends immediately (§13.3.1.4).
                self.transition(TransactionState::Terminated).map(|_| ())
            }
            _ => self.transition(TransactionState::Completed).map(|_| ()),
        }
    }

    /// Convenience reply built from the original request.
    pub async fn reply(&mut self, status: StatusCode) -> Result<()> {
        let response = self
            .endpoint_inner
            .make_response(&self.original, status, None);
        self.respond(response).await
    }

    pub async fn reply_with(
        &mut self,
        status: StatusCode,
        headers: Vec<Header>,
        body: Option<Vec<u8>>,
    ) -> Result<()> {
        let mut response = self
            .endpoint_inner
            .make_response(&self.original, status, body);
        for header in headers {
            response.headers.unique_push(header);
        }
        self.respond(response).await
    }

    /// Transmits an ACK for a 2xx on the transaction's connection. The
    /// engine retransmits nothing here: 2xx ACKs are owned by the TU,
    /// which calls this again when a retransmitted 2xx arrives.
    pub async fn send_ack(&mut self, ack: Request) -> Result<()> {
        if self.transaction_type != TransactionType::ClientInvite {
            return Err(Error::TransactionError(
                "send_ack is only valid for client invite transactions".to_string(),
                self.key.clone(),
            ));
        }

        let connection = self.connection.as_ref().ok_or(Error::TransactionError(
            "no connection found".to_string(),
            self.key.clone(),
        ))?;

        connection
            .send(ack.clone().into(), self.destination.as_ref())
            .await?;
        self.last_ack.replace(ack);
        if self.state != TransactionState::Terminated {
            self.transition(TransactionState::Terminated)?;
        }
        Ok(())
    }

    /// Awaits the next message this transaction surfaces to its user:
    /// responses for client transactions, in-transaction requests
    /// (CANCEL) for server transactions. Returns `None` once terminated.
    pub async fn receive(&mut self) -> Option<SipMessage> {
        while let Some(event) = self.tu_receiver.recv().await {
            match event {
                TransactionEvent::Received(msg, connection) => {
                    if let Some(msg) = match msg {
                        SipMessage::Request(req) => {
                            self.on_received_request(req, connection).await
                        }
                        SipMessage::Response(resp) => self.on_received_response(resp).await,
                    } {
                        return Some(msg);
                    }
                }
                TransactionEvent::Timer(t) => {
                    if let Ok(Some(msg)) = self.on_timer(t).await {
                        return Some(msg);
                    }
                }
                TransactionEvent::Respond(response) => {
                    if let Err(e) = self.respond(response).await {
                        warn!(key = %self.key, "deferred respond failed: {}", e);
                    }
                }
                TransactionEvent::Terminate => {
                    return None;
                }
            }
        }
        None
    }

    async fn on_received_request(
        &mut self,
        req: Request,
        connection: Option<SipConnection>,
    ) -> Option<SipMessage> {
        if self.transaction_type.is_client() {
            return None;
        }
        if let Some(connection) = connection {
            self.connection.replace(connection);
        }

        match req.method {
            Method::Ack => {
                // ACK for a non-2xx final absorbed by the transaction
                // (§17.2.1); ACK for 2xx never matches a transaction and
                // is delivered via the endpoint instead.
                if self.state == TransactionState::Completed {
                    self.last_ack.replace(req);
                    self.transition(TransactionState::Confirmed).ok();
                }
                None
            }
            Method::Cancel => Some(SipMessage::Request(req)),
            _ if req.method == self.original.method => {
                // Retransmitted request: replay the latest response.
                match self.state {
                    TransactionState::Proceeding | TransactionState::Completed => {
                        if let (Some(response), Some(connection)) =
                            (self.last_response.clone(), self.connection.as_ref())
                        {
                            connection
                                .send(response.into(), self.destination.as_ref())
                                .await
                                .ok();
                        }
                    }
                    _ => {}
                }
                None
            }
            _ => None,
        }
    }

    async fn on_received_response(&mut self, resp: Response) -> Option<SipMessage> {
        if !self.transaction_type.is_client() {
            return None;
        }
        let kind = resp.status_code.kind();
        match self.state {
            TransactionState::Calling | TransactionState::Trying => match kind {
                StatusKind::Provisional => {
                    self.last_response.replace(resp.clone());
                    self.transition(TransactionState::Proceeding).ok();
                    Some(SipMessage::Response(resp))
                }
                _ => self.on_final_response(resp).await,
            },
            TransactionState::Proceeding => match kind {
                StatusKind::Provisional => Some(SipMessage::Response(resp)),
                _ => self.on_final_response(resp).await,
            },
            TransactionState::Completed => {
                // Retransmitted final on an INVITE client transaction:
                // re-ACK without re-delivering to the TU (§17.1.1.2).
                if self.transaction_type == TransactionType::ClientInvite
                    && kind != StatusKind::Provisional
                    && kind != StatusKind::Success
                {
                    if let Some(ack) = self.last_ack.clone() {
                        if let Some(connection) = self.connection.as_ref() {
                            connection
                                .send(ack.into(), self.destination.as_ref())
                                .await
                                .ok();
                        }
                    }
                }
                None
            }
            _ => None,
        }
    }

    async fn on_final_response(&mut self, resp: Response) -> Option<SipMessage> {
        let kind = resp.status_code.kind();
        self.last_response.replace(resp.clone());
        match self.transaction_type {
            TransactionType::ClientInvite => match kind {
                StatusKind::Success => {
                    // 2xx bypasses the transaction: deliver and end, the
                    // dialog layer ACKs end-to-end.
                    self.transition(TransactionState::Terminated).ok();
                    Some(SipMessage::Response(resp))
                }
                _ => {
                    self.ack_non_2xx(&resp).await.ok();
                    self.transition(TransactionState::Completed).ok();
                    Some(SipMessage::Response(resp))
                }
            },
            _ => {
                self.transition(TransactionState::Completed).ok();
                Some(SipMessage::Response(resp))
            }
        }
    }

    /// ACK for a non-2xx final, generated inside the transaction per
    /// §17.1.1.3: same branch, same CSeq number, To copied from the
    /// response.
    async fn ack_non_2xx(&mut self, resp: &Response) -> Result<()> {
        let mut ack = Request::new(Method::Ack, self.original.uri.clone());
        for header in self.original.headers.iter() {
            match header {
                Header::Via(_) | Header::From(_) | Header::CallId(_) | Header::Route(_)
                | Header::MaxForwards(_) => {
                    ack.headers.push(header.clone());
                }
                Header::CSeq(cseq) => {
                    ack.headers.push(Header::CSeq(crate::sip::CSeq {
                        seq: cseq.seq,
                        method: Method::Ack,
                    }));
                }
                _ => {}
            }
        }
        ack.headers
            .push(Header::To(resp.to()?.clone()));

        if let Some(connection) = self.connection.as_ref() {
            connection
                .send(ack.clone().into(), self.destination.as_ref())
                .await?;
        }
        self.last_ack.replace(ack);
        Ok(())
    }

    /// Handles a timer event; a returned message (the synthetic 408 of
    /// timers B/F) is surfaced to the transaction user.
    async fn on_timer(&mut self, timer: TransactionTimer) -> Result<Option<SipMessage>> {
        match timer {
            TransactionTimer::TimerA(key, duration) | TransactionTimer::TimerE(key, duration) => {
                if matches!(
                    self.state,
                    TransactionState::Calling | TransactionState::Trying
                ) {
                    if let Some(connection) = self.connection.as_ref() {
                        connection
                            .send(self.original.clone().into(), self.destination.as_ref())
                            .await?;
                    }
                    let duration = (duration * 2).min(self.timer_settings.t2);
                    let timer = match self.transaction_type {
                        TransactionType::ClientInvite => TransactionTimer::TimerA(key, duration),
                        _ => TransactionTimer::TimerE(key, duration),
                    };
                    let timer_id = self.endpoint_inner.timers.timeout(duration, timer);
                    self.timer_retransmit.replace(timer_id);
                }
                Ok(None)
            }
            TransactionTimer::TimerB(_) | TransactionTimer::TimerF(_) => {
                if matches!(
                    self.state,
                    TransactionState::Calling
                        | TransactionState::Trying
                        | TransactionState::Proceeding
                ) {
                    // Surface the timeout as a synthetic 408 so callers
                    // waiting on receive() observe a response.
                    let timeout_response = self.endpoint_inner.make_response(
                        &self.original,
                        StatusCode::REQUEST_TIMEOUT,
                        None,
                    );
                    self.last_response.replace(timeout_response.clone());
                    self.transition(TransactionState::Terminated)?;
                    return Ok(Some(SipMessage::Response(timeout_response)));
                }
                Ok(None)
            }
            TransactionTimer::TimerG(key, duration) => {
                if self.state == TransactionState::Completed {
                    if let (Some(response), Some(connection)) =
                        (self.last_response.clone(), self.connection.as_ref())
                    {
                        connection
                            .send(response.into(), self.destination.as_ref())
                            .await?;
                    }
                    let duration = (duration * 2).min(self.timer_settings.t2);
                    let timer_id = self
                        .endpoint_inner
                        .timers
                        .timeout(duration, TransactionTimer::TimerG(key, duration));
                    self.timer_retransmit.replace(timer_id);
                }
                Ok(None)
            }
            TransactionTimer::TimerH(_) => {
                if self.state == TransactionState::Completed {
                    debug!(key = %self.key, "no ACK before timer H, terminating");
                    self.transition(TransactionState::Terminated)?;
                }
                Ok(None)
            }
            TransactionTimer::TimerD(_)
            | TransactionTimer::TimerI(_)
            | TransactionTimer::TimerJ(_)
            | TransactionTimer::TimerK(_) => {
                if matches!(
                    self.state,
                    TransactionState::Completed | TransactionState::Confirmed
                ) {
                    self.transition(TransactionState::Terminated)?;
                }
                Ok(None)
            }
            TransactionTimer::Timer100(_) => {
                if self.transaction_type == TransactionType::ServerInvite
                    && self.last_response.is_none()
                    && self.state == TransactionState::Proceeding
                {
                    self.reply(StatusCode::TRYING).await.ok();
                }
                Ok(None)
            }
            TransactionTimer::TimerCleanup(_) => Ok(None),
        }
    }

    fn transition(&mut self, state: TransactionState) -> Result<TransactionState> {
        if self.state == state {
            return Ok(state);
        }
        let settings = self.timer_settings;
        let reliable = self
            .connection
            .as_ref()
            .map(|c| c.is_reliable())
            .unwrap_or(false);
        let timers = &self.endpoint_inner.timers;

        match state {
            TransactionState::Nothing => {}
            TransactionState::Calling => {
                if !reliable && !self.retransmission_disabled {
                    let timer_id = timers.timeout(
                        settings.t1,
                        TransactionTimer::TimerA(self.key.clone(), settings.t1),
                    );
                    self.timer_retransmit.replace(timer_id);
                }
                let timer_id =
                    timers.timeout(settings.t6, TransactionTimer::TimerB(self.key.clone()));
                self.timer_timeout.replace(timer_id);
            }
            TransactionState::Trying => {
                if self.transaction_type == TransactionType::ClientNonInvite {
                    if !reliable && !self.retransmission_disabled {
                        let timer_id = timers.timeout(
                            settings.t1,
                            TransactionTimer::TimerE(self.key.clone(), settings.t1),
                        );
                        self.timer_retransmit.replace(timer_id);
                    }
                    let timer_id =
                        timers.timeout(settings.t6, TransactionTimer::TimerF(self.key.clone()));
                    self.timer_timeout.replace(timer_id);
                }
            }
            TransactionState::Proceeding => {
                // A provisional stops request retransmission; the
                // timeout timer keeps running until a final arrives.
                if let Some(id) = self.timer_retransmit.take() {
                    timers.cancel(id);
                }
            }
            TransactionState::Completed => {
                if let Some(id) = self.timer_retransmit.take() {
                    timers.cancel(id);
                }
                if let Some(id) = self.timer_timeout.take() {
                    timers.cancel(id);
                }
                match self.transaction_type {
                    TransactionType::ClientInvite => {
                        let duration = if reliable { Duration::ZERO } else { settings.t6 };
                        let timer_id =
                            timers.timeout(duration, TransactionTimer::TimerD(self.key.clone()));
                        self.timer_quiet.replace(timer_id);
                    }
                    TransactionType::ClientNonInvite => {
                        let duration = if reliable { Duration::ZERO } else { settings.t4 };
                        let timer_id =
                            timers.timeout(duration, TransactionTimer::TimerK(self.key.clone()));
                        self.timer_quiet.replace(timer_id);
                    }
                    TransactionType::ServerInvite => {
                        if !reliable && !self.retransmission_disabled {
                            let timer_id = timers.timeout(
                                settings.t1,
                                TransactionTimer::TimerG(self.key.clone(), settings.t1),
                            );
                            self.timer_retransmit.replace(timer_id);
                        }
                        let timer_id =
                            timers.timeout(settings.t6, TransactionTimer::TimerH(self.key.clone()));
                        self.timer_timeout.replace(timer_id);
                    }
                    TransactionType::ServerNonInvite => {
                        let duration = if reliable { Duration::ZERO } else { settings.t6 };
                        let timer_id =
                            timers.timeout(duration, TransactionTimer::TimerJ(self.key.clone()));
                        self.timer_quiet.replace(timer_id);
                    }
                }
            }
            TransactionState::Confirmed => {
                if let Some(id) = self.timer_retransmit.take() {
                    timers.cancel(id);
                }
                if let Some(id) = self.timer_timeout.take() {
                    timers.cancel(id);
                }
                let duration = if reliable { Duration::ZERO } else { settings.t4 };
                let timer_id =
                    timers.timeout(duration, TransactionTimer::TimerI(self.key.clone()));
                self.timer_quiet.replace(timer_id);
            }
            TransactionState::Terminated => {
                self.cleanup();
                self.tu_sender.send(TransactionEvent::Terminate).ok();
            }
        }
        trace!(key = %self.key, "transition: {} -> {}", self.state, state);
        self.state = state.clone();
        Ok(state)
    }

    fn cancel_all_timers(&mut self) {
        for id in [
            self.timer_retransmit.take(),
            self.timer_timeout.take(),
            self.timer_quiet.take(),
            self.timer_auto_100.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.endpoint_inner.timers.cancel(id);
        }
    }

    fn cleanup(&mut self) {
        if matches!(self.state, TransactionState::Nothing) {
            return;
        }
        self.cancel_all_timers();
        let last_message = match self.transaction_type {
            // Cached so the endpoint answers late retransmissions after
            // the transaction object is gone.
            TransactionType::ClientInvite => self.last_ack.take().map(SipMessage::Request),
            TransactionType::ServerInvite | TransactionType::ServerNonInvite => {
                self.last_response.take().map(SipMessage::Response)
            }
            TransactionType::ClientNonInvite => None,
        };
        self.endpoint_inner
            .detach_transaction(&self.key, last_message);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.cleanup();
    }
}
