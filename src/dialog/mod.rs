use crate::sip::{Request, Response};
use crate::{Error, Result};

pub mod authenticate;
pub mod client_dialog;
pub mod dialog;
pub mod dialog_layer;
pub mod invitation;
pub mod registration;
pub mod server_dialog;

#[cfg(test)]
mod tests;

/// Dialog identifier per RFC 3261 §12: Call-ID plus both tags.
///
/// Equality and hashing are direction-insensitive so the same wire
/// dialog resolves to one entry whether a message travels UAC→UAS or
/// back. `to_tag` is empty for a dialog still waiting for the peer's
/// tag.
#[derive(Clone, Debug)]
pub struct DialogId {
    pub call_id: String,
    pub from_tag: String,
    pub to_tag: String,
}

impl PartialEq for DialogId {
    fn eq(&self, other: &DialogId) -> bool {
        if self.call_id != other.call_id {
            return false;
        }
        (self.from_tag == other.from_tag && self.to_tag == other.to_tag)
            || (self.from_tag == other.to_tag && self.to_tag == other.from_tag)
    }
}

impl Eq for DialogId {}

impl std::hash::Hash for DialogId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.call_id.hash(state);
        if self.from_tag > self.to_tag {
            self.from_tag.hash(state);
            self.to_tag.hash(state);
        } else {
            self.to_tag.hash(state);
            self.from_tag.hash(state);
        }
    }
}

impl TryFrom<&Request> for DialogId {
    type Error = crate::Error;

    fn try_from(request: &Request) -> Result<Self> {
        let call_id = request.call_id()?.to_string();

        let from_tag = match request.from()?.tag() {
            Some(tag) => tag.to_string(),
            None => {
                return Err(Error::Error("from tag not found".to_string()));
            }
        };

        let to_tag = request
            .to()?
            .tag()
            .map(str::to_string)
            .unwrap_or_default();

        Ok(DialogId {
            call_id,
            from_tag,
            to_tag,
        })
    }
}

impl TryFrom<&Response> for DialogId {
    type Error = crate::Error;

    fn try_from(resp: &Response) -> Result<Self> {
        let call_id = resp.call_id()?.to_string();

        let from_tag = match resp.from()?.tag() {
            Some(tag) => tag.to_string(),
            None => {
                return Err(Error::Error("from tag not found".to_string()));
            }
        };

        let to_tag = match resp.to()?.tag() {
            Some(tag) => tag.to_string(),
            None => {
                return Err(Error::Error("to tag not found".to_string()));
            }
        };

        Ok(DialogId {
            call_id,
            from_tag,
            to_tag,
        })
    }
}

impl std::fmt::Display for DialogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.from_tag > self.to_tag {
            write!(f, "{}-{}-{}", self.call_id, self.from_tag, self.to_tag)
        } else {
            write!(f, "{}-{}-{}", self.call_id, self.to_tag, self.from_tag)
        }
    }
}
