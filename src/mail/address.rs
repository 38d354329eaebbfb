//! Sender address parsing with fallbacks for malformed headers.
//!
//! Mailbox exports carry `From` values that were mangled somewhere upstream:
//! display names with an unbalanced leading quote, or encoded words with a
//! broken charset marker. Parsing is modelled as an ordered list of
//! [`Strategy`] values. Each strategy rewrites the raw value (or declines) and
//! runs a full RFC 5322 address parse on the result; the first success wins.
//!
//! `mailparse` is lenient about encoded words, so values carrying the broken
//! `?windows1252` marker usually parse verbatim already. The legacy-charset
//! strategy stays last as the remaining fallback for values it still rejects.
//!
//! The value must name exactly one mailbox. Address lists and groups are
//! rejected rather than reduced to their first member.
//!
//! # Decomposition
//!
//! A parsed address is split on the **last** `@`. Everything before it is the
//! username, everything after it the domain, so a local part that itself
//! contains `@` is folded into the username rather than rejected:
//!
//! ```rust,ignore
//! let addr = split_address("a@b@example.com")?;
//! assert_eq!(addr.username, "a@b");
//! assert_eq!(addr.domain, "example.com");
//! ```

use mailparse::MailAddr;
use std::fmt;
use thiserror::Error;

/// Tag that marks a value carrying a legacy Western-European encoded word.
const LEGACY_CHARSET_TAG: &str = "windows-1252";

/// Malformed encoded-word marker removed by [`Strategy::LegacyCharsetMarker`].
const LEGACY_CHARSET_MARKER: &str = "?windows1252";

/// A sender address split into its local part and domain.
///
/// `domain` is never empty for a value produced by this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    pub username: String,
    pub domain: String,
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.domain)
    }
}

/// Errors produced while parsing a sender address.
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("failed to parse address `{raw}`: {source}")]
    Syntax {
        raw: String,
        #[source]
        source: mailparse::MailParseError,
    },
    #[error("no mailbox found in `{0}`")]
    Empty(String),
    #[error("`{0}` holds more than a single mailbox")]
    NotSingle(String),
    #[error("`{0}` is an invalid email address")]
    MissingAt(String),
    #[error("`{0}` has an empty domain")]
    EmptyDomain(String),
    #[error("{strategy} does not apply to `{raw}`")]
    NotApplicable { strategy: Strategy, raw: String },
    #[error("could not parse email address from `{0}`")]
    Exhausted(String),
}

/// One attempt at turning a raw header value into an [`EmailAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Parse the value as-is.
    Verbatim,
    /// Drop the first character of a value that starts with `"` and holds an
    /// odd number of quotes.
    UnbalancedLeadingQuote,
    /// Strip the malformed `?windows1252` marker from values tagged
    /// `windows-1252`.
    LegacyCharsetMarker,
}

impl Strategy {
    /// Strategies in the order they are attempted.
    pub const ALL: [Strategy; 3] = [
        Strategy::Verbatim,
        Strategy::UnbalancedLeadingQuote,
        Strategy::LegacyCharsetMarker,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Verbatim => "verbatim",
            Strategy::UnbalancedLeadingQuote => "unbalanced-leading-quote",
            Strategy::LegacyCharsetMarker => "legacy-charset-marker",
        }
    }

    /// Rewrite `raw` for this strategy, or `None` when the strategy does not apply.
    pub fn rewrite(self, raw: &str) -> Option<String> {
        match self {
            Strategy::Verbatim => Some(raw.to_string()),
            Strategy::UnbalancedLeadingQuote => {
                let quotes = raw.matches('"').count();
                if raw.starts_with('"') && quotes % 2 == 1 {
                    Some(raw[1..].to_string())
                } else {
                    None
                }
            }
            Strategy::LegacyCharsetMarker => {
                if raw.contains(LEGACY_CHARSET_TAG) {
                    Some(raw.replace(LEGACY_CHARSET_MARKER, ""))
                } else {
                    None
                }
            }
        }
    }

    /// Run this strategy against `raw`.
    pub fn apply(self, raw: &str) -> Result<EmailAddress, AddressError> {
        let candidate = self.rewrite(raw).ok_or_else(|| AddressError::NotApplicable {
            strategy: self,
            raw: raw.to_string(),
        })?;
        let mailbox = parse_mailbox(&candidate)?;
        split_address(&mailbox)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An address together with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub address: EmailAddress,
    pub strategy: Strategy,
}

/// Parse a raw `From` header value, trying every [`Strategy`] in order.
pub fn parse_address(raw: &str) -> Result<ParsedAddress, AddressError> {
    log::trace!("parse_address: `{}`", raw);

    for strategy in Strategy::ALL {
        match strategy.apply(raw) {
            Ok(address) => {
                log::trace!(
                    "parse_address: `{}` -> {} via {}",
                    raw,
                    address,
                    strategy
                );
                return Ok(ParsedAddress { address, strategy });
            }
            Err(AddressError::NotApplicable { .. }) => continue,
            Err(err) => {
                log::trace!("parse_address: {} failed: {}", strategy, err);
            }
        }
    }

    Err(AddressError::Exhausted(raw.to_string()))
}

/// Run the RFC 5322 address parser and return the first mailbox it yields.
fn parse_mailbox(candidate: &str) -> Result<String, AddressError> {
    let list = mailparse::addrparse(candidate).map_err(|source| AddressError::Syntax {
        raw: candidate.to_string(),
        source,
    })?;

    match list.as_slice() {
        [] => Err(AddressError::Empty(candidate.to_string())),
        [MailAddr::Single(info)] => Ok(info.addr.clone()),
        _ => Err(AddressError::NotSingle(candidate.to_string())),
    }
}

/// Split a bare address on its last `@`.
pub fn split_address(address: &str) -> Result<EmailAddress, AddressError> {
    let at = address
        .rfind('@')
        .ok_or_else(|| AddressError::MissingAt(address.to_string()))?;
    let (username, domain) = (&address[..at], &address[at + 1..]);

    if domain.is_empty() {
        return Err(AddressError::EmptyDomain(address.to_string()));
    }

    Ok(EmailAddress {
        username: username.to_string(),
        domain: domain.to_string(),
    })
}
