use crate::mail::{Domain, EmailAddress, EnvelopeHeaders};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Representation of an email document stored in the index.
///
/// One document is built per successfully parsed message. Header fields that
/// are absent from the message are stored as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EmailDocument {
    pub id: String,
    pub from: String,
    pub return_path: String,
    pub delivered_to: String,
    pub message_id: String,
    pub to: String,
    pub domain: String,
    pub second_level_domain: String,
    #[serde(rename = "date_ts", with = "chrono::serde::ts_seconds")]
    pub date_ts: DateTime<Utc>,
}

impl EmailDocument {
    pub fn new(
        ordinal: u64,
        headers: &EnvelopeHeaders,
        sender: &EmailAddress,
        domain: &Domain,
        date: DateTime<Utc>,
    ) -> Self {
        let from = sender.to_string();
        let message_id = headers.message_id.clone().unwrap_or_default();
        let id = document_id(&message_id, &from, date, ordinal);

        Self {
            id,
            from,
            return_path: headers.return_path.clone().unwrap_or_default(),
            delivered_to: headers.delivered_to.clone().unwrap_or_default(),
            message_id,
            to: headers.to.clone().unwrap_or_default(),
            domain: domain.name.clone(),
            second_level_domain: domain.second_level.clone(),
            date_ts: date,
        }
    }
}

/// Stable primary key for a document.
///
/// Message IDs contain characters the index rejects in primary keys and are
/// not guaranteed to be present, so the key is a digest over the identifying
/// fields and the message's position in the mailbox.
fn document_id(message_id: &str, from: &str, date: DateTime<Utc>, ordinal: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(from.as_bytes());
    hasher.update([0u8]);
    hasher.update(date.timestamp().to_le_bytes());
    hasher.update(ordinal.to_le_bytes());
    format!("{:x}", hasher.finalize())
}
