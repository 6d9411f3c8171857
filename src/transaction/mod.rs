use crate::sip::Param;
use key::TransactionKey;
use std::time::Duration;

pub mod endpoint;
pub mod key;
pub mod message;
mod timer;
pub mod transaction;
pub use endpoint::Endpoint;
pub use endpoint::EndpointBuilder;
pub use timer::Timer;

#[cfg(test)]
mod tests;

pub const TO_TAG_LEN: usize = 8;
pub const BRANCH_LEN: usize = 12;
pub const CNONCE_LEN: usize = 8;
pub const CALL_ID_LEN: usize = 22;

pub type TransactionReceiver = tokio::sync::mpsc::UnboundedReceiver<transaction::Transaction>;
pub type TransactionSender = tokio::sync::mpsc::UnboundedSender<transaction::Transaction>;

/// RFC 3261 retransmission and quiet-time constants, configurable per
/// endpoint and overridable per transaction.
///
/// * T1 — RTT estimate, initial retransmission interval (500 ms)
/// * T2 — retransmission interval cap (4 s)
/// * T4 — maximum lifetime of a message in the network (5 s)
/// * T6 — 64×T1, the transaction timeout (32 s)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    pub t1: Duration,
    pub t2: Duration,
    pub t4: Duration,
    pub t6: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        let t1 = Duration::from_millis(500);
        TimerSettings {
            t1,
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            t6: t1 * 64,
        }
    }
}

impl TimerSettings {
    pub fn with_t1(mut self, t1: Duration) -> Self {
        self.t1 = t1;
        self.t6 = t1 * 64;
        self
    }
}

/// Transaction state shared by the four RFC 3261 §17 state machines.
///
/// * `Nothing` — client transaction created, request not yet sent
/// * `Calling` — INVITE client request sent
/// * `Trying` — non-INVITE client request sent, or non-INVITE server
///   request received and not yet answered
/// * `Proceeding` — provisional response received/sent (INVITE server
///   transactions start here)
/// * `Completed` — final response received/sent, absorbing
///   retransmissions until the quiet-time timer fires
/// * `Confirmed` — INVITE server transaction received the ACK
/// * `Terminated` — transaction finished, awaiting removal
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionState {
    Nothing,
    Calling,
    Trying,
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Nothing => write!(f, "Nothing"),
            TransactionState::Calling => write!(f, "Calling"),
            TransactionState::Trying => write!(f, "Trying"),
            TransactionState::Proceeding => write!(f, "Proceeding"),
            TransactionState::Completed => write!(f, "Completed"),
            TransactionState::Confirmed => write!(f, "Confirmed"),
            TransactionState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Which of the four RFC 3261 state machines drives a transaction.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum TransactionType {
    ClientInvite,
    ClientNonInvite,
    ServerInvite,
    ServerNonInvite,
}

impl TransactionType {
    pub fn is_client(&self) -> bool {
        matches!(
            self,
            TransactionType::ClientInvite | TransactionType::ClientNonInvite
        )
    }

    pub fn is_invite(&self) -> bool {
        matches!(
            self,
            TransactionType::ClientInvite | TransactionType::ServerInvite
        )
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::ClientInvite => write!(f, "ClientInvite"),
            TransactionType::ClientNonInvite => write!(f, "ClientNonInvite"),
            TransactionType::ServerInvite => write!(f, "ServerInvite"),
            TransactionType::ServerNonInvite => write!(f, "ServerNonInvite"),
        }
    }
}

/// The RFC 3261 timer alphabet, each carrying the key of the transaction
/// it drives. Retransmission timers (A/E/G) also carry their current
/// interval, doubling on every firing up to T2.
///
/// | timer | machine | role |
/// |---|---|---|
/// | A | INVITE client | request retransmission (unreliable) |
/// | B | INVITE client | transaction timeout |
/// | D | INVITE client | response-retransmission quiet time |
/// | E | non-INVITE client | request retransmission (unreliable) |
/// | F | non-INVITE client | transaction timeout |
/// | G | INVITE server | final-response retransmission (unreliable) |
/// | H | INVITE server | ACK wait timeout |
/// | I | INVITE server | ACK-retransmission quiet time |
/// | J | non-INVITE server | request-retransmission quiet time |
/// | K | non-INVITE client | response-retransmission quiet time |
pub enum TransactionTimer {
    TimerA(TransactionKey, Duration),
    TimerB(TransactionKey),
    TimerD(TransactionKey),
    TimerE(TransactionKey, Duration),
    TimerF(TransactionKey),
    TimerG(TransactionKey, Duration),
    TimerH(TransactionKey),
    TimerI(TransactionKey),
    TimerJ(TransactionKey),
    TimerK(TransactionKey),
    /// Automatic 100 Trying for INVITE server transactions still
    /// unanswered 200 ms after receipt.
    Timer100(TransactionKey),
    TimerCleanup(TransactionKey),
}

impl TransactionTimer {
    pub fn key(&self) -> &TransactionKey {
        match self {
            TransactionTimer::TimerA(key, _)
            | TransactionTimer::TimerB(key)
            | TransactionTimer::TimerD(key)
            | TransactionTimer::TimerE(key, _)
            | TransactionTimer::TimerF(key)
            | TransactionTimer::TimerG(key, _)
            | TransactionTimer::TimerH(key)
            | TransactionTimer::TimerI(key)
            | TransactionTimer::TimerJ(key)
            | TransactionTimer::TimerK(key)
            | TransactionTimer::Timer100(key)
            | TransactionTimer::TimerCleanup(key) => key,
        }
    }
}

impl std::fmt::Display for TransactionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionTimer::TimerA(key, duration) => {
                write!(f, "TimerA: {} {}ms", key, duration.as_millis())
            }
            TransactionTimer::TimerB(key) => write!(f, "TimerB: {}", key),
            TransactionTimer::TimerD(key) => write!(f, "TimerD: {}", key),
            TransactionTimer::TimerE(key, duration) => {
                write!(f, "TimerE: {} {}ms", key, duration.as_millis())
            }
            TransactionTimer::TimerF(key) => write!(f, "TimerF: {}", key),
            TransactionTimer::TimerG(key, duration) => {
                write!(f, "TimerG: {} {}ms", key, duration.as_millis())
            }
            TransactionTimer::TimerH(key) => write!(f, "TimerH: {}", key),
            TransactionTimer::TimerI(key) => write!(f, "TimerI: {}", key),
            TransactionTimer::TimerJ(key) => write!(f, "TimerJ: {}", key),
            TransactionTimer::TimerK(key) => write!(f, "TimerK: {}", key),
            TransactionTimer::Timer100(key) => write!(f, "Timer100: {}", key),
            TransactionTimer::TimerCleanup(key) => write!(f, "TimerCleanup: {}", key),
        }
    }
}

/// A fresh branch parameter with the RFC 3261 magic cookie. Branch
/// uniqueness across the process is what keys transactions apart.
pub fn make_via_branch() -> Param {
    Param::Branch(format!(
        "{}{}",
        crate::sip::BRANCH_MAGIC_COOKIE,
        random_text(BRANCH_LEN)
    ))
}

pub fn make_call_id(domain: Option<&str>) -> String {
    format!(
        "{}@{}",
        random_text(CALL_ID_LEN),
        domain.unwrap_or("localhost")
    )
}

pub fn make_tag() -> String {
    random_text(TO_TAG_LEN)
}

pub fn random_text(count: usize) -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(count)
        .map(char::from)
        .collect()
}
