//! Digest authentication types and response computation (RFC 7616).

use super::{method::Method, parse::SipParseError, uri::Uri};
use sha2::{Digest as _, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Md5,
    Sha256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Sha256 => "SHA-256",
        }
    }

    pub fn from_token(token: &str) -> Option<Algorithm> {
        match token.to_ascii_uppercase().as_str() {
            "MD5" => Some(Algorithm::Md5),
            "SHA-256" => Some(Algorithm::Sha256),
            _ => None,
        }
    }

    fn hash(&self, data: &[u8]) -> String {
        match self {
            Algorithm::Md5 => format!("{:x}", md5::compute(data)),
            Algorithm::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Client-side qop state carried into the digest computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthQop {
    Auth { cnonce: String, nc: u32 },
    AuthInt { cnonce: String, nc: u32 },
}

impl AuthQop {
    pub fn token(&self) -> &'static str {
        match self {
            AuthQop::Auth { .. } => "auth",
            AuthQop::AuthInt { .. } => "auth-int",
        }
    }

    pub fn cnonce(&self) -> &str {
        match self {
            AuthQop::Auth { cnonce, .. } | AuthQop::AuthInt { cnonce, .. } => cnonce,
        }
    }

    pub fn nc(&self) -> u32 {
        match self {
            AuthQop::Auth { nc, .. } | AuthQop::AuthInt { nc, .. } => *nc,
        }
    }
}

/// A WWW-Authenticate / Proxy-Authenticate challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<Algorithm>,
    pub qop: Vec<String>,
    pub stale: bool,
}

impl Challenge {
    pub fn parse(input: &str) -> Result<Challenge, SipParseError> {
        let input = input.trim();
        let rest = input.strip_prefix("Digest").ok_or_else(bad_auth)?;
        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = None;
        let mut qop = Vec::new();
        let mut stale = false;

        for (name, value) in split_auth_params(rest) {
            match name.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Algorithm::from_token(&value),
                "qop" => {
                    qop = value
                        .split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect()
                }
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        Ok(Challenge {
            realm: realm.ok_or_else(bad_auth)?,
            nonce: nonce.ok_or_else(bad_auth)?,
            opaque,
            algorithm,
            qop,
            stale,
        })
    }

    pub fn supports_qop_auth(&self) -> bool {
        self.qop.iter().any(|q| q.eq_ignore_ascii_case("auth"))
    }
}

impl std::fmt::Display for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest realm=\"{}\", nonce=\"{}\"", self.realm, self.nonce)?;
        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{}\"", opaque)?;
        }
        if let Some(algorithm) = &self.algorithm {
            write!(f, ", algorithm={}", algorithm)?;
        }
        if !self.qop.is_empty() {
            write!(f, ", qop=\"{}\"", self.qop.join(","))?;
        }
        if self.stale {
            write!(f, ", stale=true")?;
        }
        Ok(())
    }
}

/// An Authorization / Proxy-Authorization credentials header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: Uri,
    pub response: String,
    pub algorithm: Option<Algorithm>,
    pub opaque: Option<String>,
    pub qop: Option<AuthQop>,
}

impl Authorization {
    pub fn parse(input: &str) -> Result<Authorization, SipParseError> {
        let rest = input.trim().strip_prefix("Digest").ok_or_else(bad_auth)?;
        let mut username = None;
        let mut realm = None;
        let mut nonce = None;
        let mut uri = None;
        let mut response = None;
        let mut algorithm = None;
        let mut opaque = None;
        let mut qop_token = None;
        let mut cnonce = None;
        let mut nc = None;

        for (name, value) in split_auth_params(rest) {
            match name.to_ascii_lowercase().as_str() {
                "username" => username = Some(value),
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "uri" => uri = Some(Uri::parse(&value)?),
                "response" => response = Some(value),
                "algorithm" => algorithm = Algorithm::from_token(&value),
                "opaque" => opaque = Some(value),
                "qop" => qop_token = Some(value),
                "cnonce" => cnonce = Some(value),
                "nc" => nc = u32::from_str_radix(value.trim(), 16).ok(),
                _ => {}
            }
        }

        let qop = match qop_token.as_deref() {
            Some(token) => {
                let cnonce = cnonce.unwrap_or_default();
                let nc = nc.unwrap_or(1);
                if token.eq_ignore_ascii_case("auth-int") {
                    Some(AuthQop::AuthInt { cnonce, nc })
                } else {
                    Some(AuthQop::Auth { cnonce, nc })
                }
            }
            None => None,
        };

        Ok(Authorization {
            username: username.ok_or_else(bad_auth)?,
            realm: realm.ok_or_else(bad_auth)?,
            nonce: nonce.ok_or_else(bad_auth)?,
            uri: uri.ok_or_else(bad_auth)?,
            response: response.ok_or_else(bad_auth)?,
            algorithm,
            opaque,
            qop,
        })
    }
}

impl std::fmt::Display for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            self.username, self.realm, self.nonce, self.uri, self.response
        )?;
        if let Some(algorithm) = &self.algorithm {
            write!(f, ", algorithm={}", algorithm)?;
        }
        if let Some(qop) = &self.qop {
            write!(
                f,
                ", qop={}, cnonce=\"{}\", nc={:08x}",
                qop.token(),
                qop.cnonce(),
                qop.nc()
            )?;
        }
        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{}\"", opaque)?;
        }
        Ok(())
    }
}

/// Computes the digest response hash for one request.
pub struct DigestGenerator<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub algorithm: Algorithm,
    pub nonce: &'a str,
    pub method: &'a Method,
    pub qop: Option<&'a AuthQop>,
    pub uri: &'a Uri,
    pub realm: &'a str,
}

impl DigestGenerator<'_> {
    pub fn compute(&self) -> String {
        self.compute_with_body(&[])
    }

    pub fn compute_with_body(&self, body: &[u8]) -> String {
        let uri = self.uri.to_string();
        let ha1 = self.algorithm.hash(
            format!("{}:{}:{}", self.username, self.realm, self.password).as_bytes(),
        );
        let ha2_input = match self.qop {
            Some(AuthQop::AuthInt { .. }) => format!(
                "{}:{}:{}",
                self.method.as_str(),
                uri,
                self.algorithm.hash(body)
            ),
            _ => format!("{}:{}", self.method.as_str(), uri),
        };
        let ha2 = self.algorithm.hash(ha2_input.as_bytes());

        let input = match self.qop {
            Some(qop) => format!(
                "{}:{}:{:08x}:{}:{}:{}",
                ha1,
                self.nonce,
                qop.nc(),
                qop.cnonce(),
                qop.token(),
                ha2
            ),
            None => format!("{}:{}:{}", ha1, self.nonce, ha2),
        };
        self.algorithm.hash(input.as_bytes())
    }
}

fn bad_auth() -> SipParseError {
    SipParseError::BadHeaderSyntax {
        name: "Authorization".to_string(),
        offset: 0,
    }
}

/// Splits `key="value", key=token` parameter lists, honoring quotes.
fn split_auth_params(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let Some((name, after)) = rest.split_once('=') else {
            break;
        };
        let name = name.trim().trim_start_matches(',').trim().to_string();
        let after = after.trim_start();
        let (value, remainder) = if let Some(stripped) = after.strip_prefix('"') {
            let mut end = None;
            let mut escaped = false;
            for (i, c) in stripped.char_indices() {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    end = Some(i);
                    break;
                }
            }
            match end {
                Some(end) => (
                    stripped[..end].replace("\\\"", "\"").replace("\\\\", "\\"),
                    &stripped[end + 1..],
                ),
                None => (stripped.to_string(), ""),
            }
        } else {
            match after.find(',') {
                Some(comma) => (after[..comma].trim().to_string(), &after[comma..]),
                None => (after.trim().to_string(), ""),
            }
        };
        out.push((name, value));
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_challenge() {
        let challenge = Challenge::parse(
            "Digest realm=\"atlanta.com\", nonce=\"84a4cc6f3082121f32b42a2187831a9e\", qop=\"auth\", algorithm=MD5",
        )
        .unwrap();
        assert_eq!(challenge.realm, "atlanta.com");
        assert_eq!(challenge.nonce, "84a4cc6f3082121f32b42a2187831a9e");
        assert!(challenge.supports_qop_auth());
        assert_eq!(challenge.algorithm, Some(Algorithm::Md5));
    }

    #[test]
    fn digest_without_qop_matches_rfc2617_shape() {
        // HA1/HA2/response layering check against a known MD5 vector.
        let uri = Uri::parse("sip:bob@biloxi.com").unwrap();
        let method = Method::Invite;
        let generator = DigestGenerator {
            username: "bob",
            password: "zanzibar",
            algorithm: Algorithm::Md5,
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            method: &method,
            qop: None,
            uri: &uri,
            realm: "biloxi.com",
        };
        let response = generator.compute();
        let ha1 = format!("{:x}", md5::compute(b"bob:biloxi.com:zanzibar"));
        let ha2 = format!("{:x}", md5::compute(b"INVITE:sip:bob@biloxi.com"));
        let expected = format!(
            "{:x}",
            md5::compute(format!("{}:dcd98b7102dd2f0e8b11d0f600bfb0c093:{}", ha1, ha2).as_bytes())
        );
        assert_eq!(response, expected);
    }

    #[test]
    fn authorization_round_trip() {
        let value = "Digest username=\"alice\", realm=\"atlanta.com\", nonce=\"abc\", uri=\"sip:registrar.atlanta.com\", response=\"deadbeef\", algorithm=SHA-256, qop=auth, cnonce=\"0a4f113b\", nc=00000001";
        let auth = Authorization::parse(value).unwrap();
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.algorithm, Some(Algorithm::Sha256));
        assert_eq!(auth.qop.as_ref().map(|q| q.nc()), Some(1));

        let reparsed = Authorization::parse(&auth.to_string()).unwrap();
        assert_eq!(auth, reparsed);
    }

    #[test]
    fn sha256_differs_from_md5() {
        let uri = Uri::parse("sip:bob@biloxi.com").unwrap();
        let method = Method::Register;
        let md5_hash = DigestGenerator {
            username: "bob",
            password: "secret",
            algorithm: Algorithm::Md5,
            nonce: "n",
            method: &method,
            qop: None,
            uri: &uri,
            realm: "r",
        }
        .compute();
        let sha_hash = DigestGenerator {
            username: "bob",
            password: "secret",
            algorithm: Algorithm::Sha256,
            nonce: "n",
            method: &method,
            qop: None,
            uri: &uri,
            realm: "r",
        }
        .compute();
        assert_ne!(md5_hash, sha_hash);
        assert_eq!(md5_hash.len(), 32);
        assert_eq!(sha_hash.len(), 64);
    }
}
