use super::{
    param::{write_params, Param},
    parse::SipParseError,
    uri::Uri,
};

/// `name-addr` / `addr-spec` form shared by From, To, Contact, Route,
/// Record-Route, Refer-To and Referred-By headers:
/// `"Display Name" <sip:uri>;params`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub params: Vec<Param>,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        NameAddr {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> Result<NameAddr, SipParseError> {
        let input = input.trim();

        if let Some(open) = find_laquot(input) {
            let display = input[..open].trim();
            let display_name = parse_display_name(display);
            let close = input[open..].find('>').map(|i| i + open).ok_or_else(|| {
                SipParseError::UriSyntax(format!("unterminated angle bracket: {}", input))
            })?;
            let uri = Uri::parse(&input[open + 1..close])?;
            // Params after `>` belong to the header, not the URI.
            let params = match input[close + 1..].trim_start().strip_prefix(';') {
                Some(rest) => Param::parse_list(rest),
                None => Vec::new(),
            };
            return Ok(NameAddr {
                display_name,
                uri,
                params,
            });
        }

        // addr-spec form without brackets: everything after the first `;`
        // is a header parameter (RFC 3261 §20.10 note).
        let (uri_part, params_part) = match input.split_once(';') {
            Some((uri, params)) => (uri, Some(params)),
            None => (input, None),
        };
        Ok(NameAddr {
            display_name: None,
            uri: Uri::parse(uri_part)?,
            params: params_part.map(Param::parse_list).unwrap_or_default(),
        })
    }

    /// The `tag` parameter of From/To headers.
    pub fn tag(&self) -> Option<&str> {
        self.params.iter().find_map(|p| match p {
            Param::Tag(tag) => Some(tag.as_str()),
            _ => None,
        })
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.params.retain(|p| !matches!(p, Param::Tag(_)));
        self.params.push(Param::Tag(tag.into()));
        self
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.params.retain(|p| !matches!(p, Param::Tag(_)));
        self.params.push(Param::Tag(tag.into()));
    }

    /// Contact `expires` parameter.
    pub fn expires(&self) -> Option<u32> {
        self.params.iter().find_map(|p| match p {
            Param::Expires(secs) => Some(*secs),
            _ => None,
        })
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }
}

/// Finds the `<` that opens the addr-spec, skipping quoted display names.
fn find_laquot(input: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            b'<' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_display_name(display: &str) -> Option<String> {
    if display.is_empty() {
        return None;
    }
    if display.starts_with('"') && display.ends_with('"') && display.len() >= 2 {
        let inner = &display[1..display.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut escaped = false;
        for c in inner.chars() {
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else {
                out.push(c);
            }
        }
        Some(out)
    } else {
        Some(display.to_string())
    }
}

fn display_needs_quoting(display: &str) -> bool {
    !display
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '!' | '%' | '*' | '_' | '+' | '`' | '\'' | '~' | ' '))
}

impl std::fmt::Display for NameAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(display) = &self.display_name {
            if display_needs_quoting(display) {
                write!(f, "\"{}\" ", display.replace('\\', "\\\\").replace('"', "\\\""))?;
            } else {
                write!(f, "{} ", display)?;
            }
        }
        write!(f, "<{}>", self.uri)?;
        write_params(f, &self.params)
    }
}

impl TryFrom<&str> for NameAddr {
    type Error = SipParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        NameAddr::parse(value)
    }
}

impl From<Uri> for NameAddr {
    fn from(uri: Uri) -> Self {
        NameAddr::new(uri)
    }
}
