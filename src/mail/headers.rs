//! Header block extraction and date parsing.
//!
//! Each raw message is read once into an [`EnvelopeHeaders`] value so that
//! header presence is checked explicitly instead of through repeated string
//! lookups. Header names are matched case-insensitively by `mailparse`.
//!
//! The `From` value is kept in its raw, undecoded form: RFC 2047 decoding of
//! the display name can introduce commas and quotes that break address
//! parsing, and the address fallbacks key off the raw charset tags. All other
//! fields are decoded and copied verbatim into the indexed document.

use chrono::{DateTime, TimeZone, Utc};
use mailparse::{MailHeaderMap, MailParseError, parse_headers};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DateError {
    #[error("missing Date header")]
    Missing,
    #[error("invalid Date header `{raw}`: {reason}")]
    Invalid { raw: String, reason: String },
}

/// Envelope headers of a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeHeaders {
    pub from: Option<String>,
    pub return_path: Option<String>,
    pub delivered_to: Option<String>,
    pub message_id: Option<String>,
    pub to: Option<String>,
    pub date: Option<String>,
}

impl EnvelopeHeaders {
    /// Read the header block at the start of `raw`.
    pub fn parse(raw: &[u8]) -> Result<Self, MailParseError> {
        let (headers, _body_offset) = parse_headers(raw)?;

        let from = headers
            .get_first_header("From")
            .map(|header| unfold(&String::from_utf8_lossy(header.get_value_raw())));

        Ok(Self {
            from,
            return_path: headers.get_first_value("Return-Path"),
            delivered_to: headers.get_first_value("Delivered-To"),
            message_id: headers.get_first_value("Message-ID"),
            to: headers.get_first_value("To"),
            date: headers.get_first_value("Date"),
        })
    }
}

/// Collapse folded header lines into a single line.
fn unfold(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a `Date` header value.
///
/// RFC 5322 dates are tried first; the lenient `dateparser` formats catch the
/// non-conforming values some clients emit.
pub fn parse_date(raw: Option<&str>) -> Result<DateTime<Utc>, DateError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(DateError::Missing);
    }

    let rfc_reason = match mailparse::dateparse(raw) {
        Ok(ts) => match Utc.timestamp_opt(ts, 0).single() {
            Some(date) => return Ok(date),
            None => format!("timestamp {} out of range", ts),
        },
        Err(reason) => reason.to_string(),
    };

    match dateparser::parse(raw) {
        Ok(date) => Ok(date.with_timezone(&Utc)),
        Err(err) => {
            log::trace!(
                "parse_date: `{}` rejected (rfc5322: {}, fallback: {})",
                raw,
                rfc_reason,
                err
            );
            Err(DateError::Invalid {
                raw: raw.to_string(),
                reason: err.to_string(),
            })
        }
    }
}
