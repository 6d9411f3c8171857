use crate::Result;

/// Opaque SDP negotiation callback.
///
/// The stack never inspects session descriptions: it asks the adapter
/// for offers and answers and hands remote descriptions over verbatim.
/// Media setup, ICE, codecs and transport of the actual audio are all
/// on the adapter's side of this seam.
#[async_trait::async_trait]
pub trait MediaAdapter: Send + Sync {
    /// Produces the local offer for an outgoing INVITE or re-INVITE.
    /// `hold` requests an offer that pauses sending media.
    async fn create_offer(&self, hold: bool) -> Result<Vec<u8>>;

    /// Produces the local answer for an incoming offer.
    async fn create_answer(&self, remote_offer: Option<&[u8]>) -> Result<Vec<u8>>;

    /// Applies the remote answer to a previously created offer.
    async fn apply_answer(&self, remote_answer: &[u8]) -> Result<()>;
}

/// Adapter that echoes canned descriptions; used by tests and signaling-
/// only deployments.
#[derive(Default)]
pub struct StaticMediaAdapter {
    offer: Vec<u8>,
    answer: Vec<u8>,
}

impl StaticMediaAdapter {
    pub fn new(offer: Vec<u8>, answer: Vec<u8>) -> Self {
        Self { offer, answer }
    }
}

#[async_trait::async_trait]
impl MediaAdapter for StaticMediaAdapter {
    async fn create_offer(&self, _hold: bool) -> Result<Vec<u8>> {
        Ok(self.offer.clone())
    }

    async fn create_answer(&self, _remote_offer: Option<&[u8]>) -> Result<Vec<u8>> {
        Ok(self.answer.clone())
    }

    async fn apply_answer(&self, _remote_answer: &[u8]) -> Result<()> {
        Ok(())
    }
}
