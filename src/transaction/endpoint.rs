use super::key::{TransactionKey, TransactionRole};
use super::timer::Timer;
use super::transaction::{Transaction, TransactionEvent, TransactionEventSender};
use super::{TimerSettings, TransactionReceiver, TransactionSender, TransactionTimer};
use crate::sip::{Method, Param, Response, Scheme, SipMessage, StatusCode, Transport, Via};
use crate::transport::{
    connection::TransportReceiver, SipAddr, SipConnection, TransportEvent, TransportLayer,
};
use crate::Result;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use std::{collections::HashMap, sync::Arc};
use tokio::select;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const USER_AGENT: &str = "sipstack/0.2";
const TIMER_INTERVAL: Duration = Duration::from_millis(20);

/// Endpoint-wide behavior switches (spec'd configuration surface).
#[derive(Clone)]
pub struct EndpointOption {
    pub timer_settings: TimerSettings,
    pub timer_interval: Duration,
    pub max_forwards: u32,
    /// Automatically send 100 Trying for INVITE server transactions
    /// still unanswered after 200 ms.
    pub auto_trying: bool,
    /// Default for the per-transaction retransmission-disable flag.
    pub retransmission_disabled: bool,
}

impl Default for EndpointOption {
    fn default() -> Self {
        EndpointOption {
            timer_settings: TimerSettings::default(),
            timer_interval: TIMER_INTERVAL,
            max_forwards: 70,
            auto_trying: true,
            retransmission_disabled: false,
        }
    }
}

/// Shared core of the endpoint: the transaction table, the timer wheel
/// and the transport layer. Transactions and dialogs hold an
/// `EndpointInnerRef`; ownership flows endpoint → transaction only, the
/// transport finds transactions by key on inbound.
pub struct EndpointInner {
    pub user_agent: String,
    pub timers: Timer<TransactionTimer>,
    pub transport_layer: TransportLayer,
    pub option: EndpointOption,
    pub transactions: Mutex<HashMap<TransactionKey, TransactionEventSender>>,
    /// Terminated transactions kept for their quiet time so late
    /// retransmissions are answered with the cached final message.
    pub finished_transactions: Mutex<HashMap<TransactionKey, Option<SipMessage>>>,
    incoming_sender: Mutex<Option<TransactionSender>>,
    cancel_token: CancellationToken,
}

pub type EndpointInnerRef = Arc<EndpointInner>;

pub struct EndpointBuilder {
    user_agent: String,
    transport_layer: Option<TransportLayer>,
    cancel_token: Option<CancellationToken>,
    option: EndpointOption,
}

/// The transaction engine facade: hand it a transport layer, call
/// [`Endpoint::serve`], create client transactions and consume inbound
/// server transactions.
pub struct Endpoint {
    pub inner: EndpointInnerRef,
    cancel_token: CancellationToken,
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointBuilder {
    pub fn new() -> Self {
        EndpointBuilder {
            user_agent: USER_AGENT.to_string(),
            transport_layer: None,
            cancel_token: None,
            option: EndpointOption::default(),
        }
    }

    pub fn user_agent(&mut self, user_agent: &str) -> &mut Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn transport_layer(&mut self, transport_layer: TransportLayer) -> &mut Self {
        self.transport_layer.replace(transport_layer);
        self
    }

    pub fn cancel_token(&mut self, cancel_token: CancellationToken) -> &mut Self {
        self.cancel_token.replace(cancel_token);
        self
    }

    pub fn timer_settings(&mut self, timer_settings: TimerSettings) -> &mut Self {
        self.option.timer_settings = timer_settings;
        self
    }

    pub fn timer_interval(&mut self, timer_interval: Duration) -> &mut Self {
        self.option.timer_interval = timer_interval;
        self
    }

    pub fn option(&mut self, option: EndpointOption) -> &mut Self {
        self.option = option;
        self
    }

    pub fn build(&mut self) -> Endpoint {
        let transport_layer = self
            .transport_layer
            .take()
            .expect("transport_layer is required");

        let cancel_token = self.cancel_token.take().unwrap_or_default();

        let inner = Arc::new(EndpointInner {
            user_agent: self.user_agent.clone(),
            timers: Timer::new(),
            transport_layer,
            option: self.option.clone(),
            transactions: Mutex::new(HashMap::new()),
            finished_transactions: Mutex::new(HashMap::new()),
            incoming_sender: Mutex::new(None),
            cancel_token: cancel_token.child_token(),
        });

        Endpoint {
            inner,
            cancel_token,
        }
    }
}

impl Endpoint {
    /// Runs the endpoint until cancelled: transport receive loops, the
    /// timer wheel and inbound dispatch.
    pub async fn serve(&self) {
        let (sender, receiver) = unbounded_channel();
        if let Err(e) = self.inner.transport_layer.serve_listens(sender.clone()).await {
            warn!("failed to start transport listens: {}", e);
        }
        select! {
            _ = self.cancel_token.cancelled() => {
                info!("endpoint cancelled");
            },
            _ = self.inner.clone().process_timer() => {},
            _ = self.inner.clone().process_transport(receiver) => {},
        }
        info!("endpoint shutdown");
    }

    pub fn shutdown(&self) {
        info!("endpoint shutdown requested");
        self.cancel_token.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Builds a client transaction for an outbound request.
    pub fn client_transaction(&self, request: crate::sip::Request) -> Result<Transaction> {
        let key = TransactionKey::from_request(&request, TransactionRole::Client)?;
        Ok(Transaction::new_client(key, request, self.inner.clone(), None))
    }

    /// Stream of inbound server transactions (plus transaction-less ACKs
    /// for 2xx, delivered for dialog confirmation).
    pub fn incoming_transactions(&self) -> TransactionReceiver {
        let (sender, receiver) = unbounded_channel();
        self.inner.incoming_sender.lock().unwrap().replace(sender);
        receiver
    }
}

impl EndpointInner {
    pub(super) fn attach_transaction(&self, key: &TransactionKey, sender: TransactionEventSender) {
        trace!("attach transaction: {}", key);
        self.transactions.lock().unwrap().insert(key.clone(), sender);
    }

    pub(crate) fn detach_transaction(
        &self,
        key: &TransactionKey,
        last_message: Option<SipMessage>,
    ) {
        trace!("detach transaction: {}", key);
        self.transactions.lock().unwrap().remove(key);

        if let Some(msg) = last_message {
            if self
                .finished_transactions
                .lock()
                .unwrap()
                .contains_key(key)
            {
                return;
            }
            let quiet = match msg {
                // Cached ACK outlives the client transaction by T4; a
                // cached final response stays for the full timeout.
                SipMessage::Request(_) => self.option.timer_settings.t4,
                SipMessage::Response(_) => self.option.timer_settings.t6,
            };
            self.timers
                .timeout(quiet, TransactionTimer::TimerCleanup(key.clone()));
            self.finished_transactions
                .lock()
                .unwrap()
                .insert(key.clone(), Some(msg));
        }
    }

    pub async fn process_timer(self: Arc<Self>) -> Result<()> {
        while !self.cancel_token.is_cancelled() {
            for timer in self.timers.poll(Instant::now()) {
                if let TransactionTimer::TimerCleanup(key) = &timer {
                    self.transactions.lock().unwrap().remove(key);
                    self.finished_transactions.lock().unwrap().remove(key);
                    continue;
                }
                let sender = self
                    .transactions
                    .lock()
                    .unwrap()
                    .get(timer.key())
                    .cloned();
                if let Some(sender) = sender {
                    if let Err(e) = sender.send(TransactionEvent::Timer(timer)) {
                        if let TransactionEvent::Timer(timer) = e.0 {
                            self.detach_transaction(timer.key(), None);
                        }
                    }
                }
            }
            tokio::time::sleep(self.option.timer_interval).await;
        }
        Ok(())
    }

    pub async fn process_transport(self: Arc<Self>, mut receiver: TransportReceiver) -> Result<()> {
        while let Some(event) = receiver.recv().await {
            match event {
                TransportEvent::Incoming(msg, connection, source) => {
                    if let Err(e) = self.on_incoming(msg, connection, source).await {
                        warn!("error handling incoming message: {}", e);
                    }
                }
                TransportEvent::New(connection) => {
                    debug!("new connection: {}", connection);
                }
                TransportEvent::Closed(connection) => {
                    debug!("connection closed: {}", connection);
                }
            }
        }
        Ok(())
    }

    async fn on_incoming(
        self: &Arc<Self>,
        msg: SipMessage,
        connection: SipConnection,
        source: SipAddr,
    ) -> Result<()> {
        match msg {
            SipMessage::Request(req) => self.on_incoming_request(req, connection, source).await,
            SipMessage::Response(resp) => self.on_incoming_response(resp, connection).await,
        }
    }

    async fn on_incoming_request(
        self: &Arc<Self>,
        req: crate::sip::Request,
        connection: SipConnection,
        source: SipAddr,
    ) -> Result<()> {
        trace!(%source, "incoming request {} {}", req.method, req.uri);

        // Request validation that precedes any transaction (§16.3-ish
        // UAS checks): unsupported scheme and exhausted Max-Forwards get
        // stateless replies; ACK never gets a reply.
        if req.method != Method::Ack {
            if matches!(req.uri.scheme, Scheme::Other(_)) {
                return self
                    .respond_stateless(&req, &connection, &source, StatusCode::UNSUPPORTED_URI_SCHEME)
                    .await;
            }
            if req.headers.max_forwards() == Some(0) {
                return self
                    .respond_stateless(&req, &connection, &source, StatusCode::TOO_MANY_HOPS)
                    .await;
            }
        }

        let key = TransactionKey::from_request(&req, TransactionRole::Server)?;

        // Existing transaction: retransmission, ACK-for-final or CANCEL
        // bound for a live transaction.
        let sender = self.transactions.lock().unwrap().get(&key).cloned();
        if let Some(sender) = sender {
            sender
                .send(TransactionEvent::Received(
                    SipMessage::Request(req),
                    Some(connection),
                ))
                .ok();
            return Ok(());
        }

        // Terminated transaction still in quiet time: replay the cached
        // final response exactly once per retransmission.
        let finished = self
            .finished_transactions
            .lock()
            .unwrap()
            .get(&key)
            .cloned();
        if let Some(last) = finished {
            if req.method != Method::Ack {
                if let Some(SipMessage::Response(response)) = last {
                    debug!(%key, "replaying final response for retransmitted request");
                    connection.send(response.into(), Some(&source)).await?;
                }
            }
            return Ok(());
        }

        match req.method {
            Method::Cancel => {
                // CANCEL matches the INVITE server transaction by
                // identity with only the method swapped (§9.2).
                let invite_key = key.with_method(Method::Invite);
                let invite_sender = self.transactions.lock().unwrap().get(&invite_key).cloned();
                match invite_sender {
                    Some(invite_sender) => {
                        let mut cancel_tx = Transaction::new_server(
                            key,
                            req.clone(),
                            self.clone(),
                            Some(connection),
                            Some(source),
                        );
                        cancel_tx.reply(StatusCode::OK).await.ok();
                        invite_sender
                            .send(TransactionEvent::Received(SipMessage::Request(req), None))
                            .ok();
                    }
                    None => {
                        self.respond_stateless(
                            &req,
                            &connection,
                            &source,
                            StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST,
                        )
                        .await?;
                    }
                }
                Ok(())
            }
            _ => {
                let tx = Transaction::new_server(
                    key,
                    req,
                    self.clone(),
                    Some(connection),
                    Some(source),
                );
                let incoming = self.incoming_sender.lock().unwrap().clone();
                match incoming {
                    Some(incoming) => {
                        incoming.send(tx).ok();
                    }
                    None => {
                        debug!("no consumer for incoming transaction, dropping");
                    }
                }
                Ok(())
            }
        }
    }

    async fn on_incoming_response(
        self: &Arc<Self>,
        resp: Response,
        connection: SipConnection,
    ) -> Result<()> {
        let key = TransactionKey::from_response(&resp, TransactionRole::Client)?;
        let sender = self.transactions.lock().unwrap().get(&key).cloned();
        if let Some(sender) = sender {
            sender
                .send(TransactionEvent::Received(
                    SipMessage::Response(resp),
                    Some(connection),
                ))
                .ok();
            return Ok(());
        }

        // A retransmitted 2xx after the INVITE client transaction ended:
        // replay the cached end-to-end ACK (§13.2.2.4).
        let finished = self
            .finished_transactions
            .lock()
            .unwrap()
            .get(&key)
            .cloned();
        if let Some(Some(SipMessage::Request(ack))) = finished {
            if resp.status_code.is_success() {
                debug!(%key, "re-answering retransmitted 2xx with cached ACK");
                connection.send(ack.into(), None).await?;
            }
            return Ok(());
        }

        debug!(%key, "dropping response without matching transaction");
        Ok(())
    }

    async fn respond_stateless(
        &self,
        req: &crate::sip::Request,
        connection: &SipConnection,
        source: &SipAddr,
        status: StatusCode,
    ) -> Result<()> {
        let response = self.make_response(req, status, None);
        connection.send(response.into(), Some(source)).await
    }

    /// A Via for outbound requests: top local binding of the requested
    /// transport, fresh branch, rport requested.
    pub fn get_via(&self, transport: Option<Transport>, branch: Option<Param>) -> Result<Via> {
        let addr = self
            .transport_layer
            .first_addr(transport)
            .ok_or_else(|| crate::Error::EndpointError("no local transport bound".to_string()))?;
        let mut via = Via::new(
            addr.r#type.unwrap_or(Transport::Udp),
            addr.addr.clone(),
        );
        via.params
            .push(branch.unwrap_or_else(super::make_via_branch));
        via.params.push(Param::Rport(None));
        Ok(via)
    }
}
