use super::authenticate::{handle_client_authenticate, Credential, NonceCache};
use crate::sip::{Header, Method, NameAddr, Param, Response, SipMessage, StatusCode, Uri};
use crate::transaction::{endpoint::Endpoint, make_tag};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// REGISTER client: binds a contact at a registrar, answers digest
/// challenges and tracks the granted expiry for refresh scheduling.
pub struct Registration {
    pub last_seq: u32,
    pub endpoint: Arc<Endpoint>,
    pub credential: Option<Credential>,
    pub contact: Option<NameAddr>,
    /// Nonces cached per realm for the lifetime of this registration.
    pub nonce_cache: NonceCache,
    granted_expires: Option<u32>,
}

impl Registration {
    pub fn new(endpoint: Arc<Endpoint>, credential: Option<Credential>) -> Self {
        Self {
            last_seq: 0,
            endpoint,
            credential,
            contact: None,
            nonce_cache: NonceCache::new(),
            granted_expires: None,
        }
    }

    /// Seconds until the binding lapses; used to schedule the refresh.
    pub fn expires(&self) -> u32 {
        self.contact
            .as_ref()
            .and_then(|c| c.expires())
            .or(self.granted_expires)
            .unwrap_or(50)
    }

    pub async fn register(&mut self, server: &str, expires: Option<u32>) -> Result<Response> {
        self.request_binding(server, expires, false).await
    }

    /// Removes the binding with a wildcard-free Contact and Expires 0.
    pub async fn unregister(&mut self, server: &str) -> Result<Response> {
        self.request_binding(server, Some(0), true).await
    }

    async fn request_binding(
        &mut self,
        server: &str,
        expires: Option<u32>,
        removing: bool,
    ) -> Result<Response> {
        self.last_seq += 1;

        let recipient = Uri::parse(&format!("sip:{}", server))?;

        let mut to = NameAddr::new(recipient.clone());
        if let Some(cred) = &self.credential {
            to.uri.user = Some(cred.username.clone());
        }

        let from = NameAddr::new(to.uri.clone()).with_tag(make_tag());

        let contact = self.contact.clone().unwrap_or_else(|| {
            let contact_uri = self
                .endpoint
                .inner
                .transport_layer
                .first_addr(None)
                .map(|addr| {
                    let mut uri: Uri = (&addr).into();
                    uri.user = self
                        .credential
                        .as_ref()
                        .map(|cred| cred.username.clone());
                    uri
                })
                .unwrap_or_else(|| to.uri.clone());
            NameAddr::new(contact_uri)
        });

        let via = self.endpoint.inner.get_via(None, None)?;
        let mut request = self.endpoint.inner.make_request(
            Method::Register,
            recipient,
            via,
            from,
            to,
            self.last_seq,
        );

        let contact = if removing {
            contact.with_param(Param::Expires(0))
        } else {
            contact
        };
        request.headers.unique_push(Header::Contact(contact));
        if let Some(expires) = expires {
            request.headers.unique_push(Header::Expires(expires));
        }

        // Pre-authenticate from the per-realm nonce cache before the
        // registrar has to challenge again.
        if let Some(cred) = &self.credential {
            if let Some(realm) = self.realm_for(server) {
                if let Some((header, _)) = self.nonce_cache.authorization_for(
                    &realm,
                    cred,
                    &Method::Register,
                    &request.uri,
                ) {
                    request.headers.unique_push(header);
                }
            }
        }

        let mut tx = self.endpoint.client_transaction(request)?;
        tx.send().await?;
        let mut auth_sent = false;

        while let Some(msg) = tx.receive().await {
            let resp = match msg {
                SipMessage::Response(resp) => resp,
                _ => break,
            };
            match resp.status_code {
                StatusCode::TRYING => continue,
                status if status.is_provisional() => continue,
                StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                    if auth_sent {
                        info!("authentication rejected after retry: {}", resp.status_code);
                        return Err(Error::AuthenticationFailed(format!(
                            "registrar rejected credentials with {}",
                            resp.status_code
                        )));
                    }

                    match &self.credential {
                        Some(cred) => {
                            let proxy =
                                resp.status_code == StatusCode::PROXY_AUTHENTICATION_REQUIRED;
                            let challenge = if proxy {
                                resp.headers.proxy_authenticate().cloned()
                            } else {
                                resp.headers.www_authenticate().cloned()
                            };
                            if let Some(challenge) = challenge {
                                self.nonce_cache.store(challenge, proxy);
                            }
                            self.last_seq += 1;
                            tx = handle_client_authenticate(self.last_seq, tx, resp, cred).await?;
                            tx.send().await?;
                            auth_sent = true;
                            continue;
                        }
                        None => {
                            info!("received {} without credential", resp.status_code);
                            return Ok(resp);
                        }
                    }
                }
                _ => {
                    info!("registration done: {}", resp.status_code);
                    if resp.status_code == StatusCode::OK {
                        if let Ok(contact) = resp.contact() {
                            self.contact = Some(contact.clone());
                        }
                        self.granted_expires = resp.headers.expires();
                        if removing {
                            self.contact = None;
                            self.granted_expires = None;
                        }
                    }
                    return Ok(resp);
                }
            }
        }
        Err(Error::EndpointError(
            "registration transaction terminated without a final response".to_string(),
        ))
    }

    fn realm_for(&self, server: &str) -> Option<String> {
        // The registrar's realm conventionally matches its domain.
        Some(server.split(':').next()?.to_string())
    }
}
