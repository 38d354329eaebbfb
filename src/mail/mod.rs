//! Envelope metadata extraction.
//!
//! Pure functions invoked once per message by the indexing workers:
//!
//! - **`address`**: turns a raw `From` header value into a username/domain pair,
//!   falling back through rewrites for the malformed quoting seen in real exports.
//! - **`domain`**: splits a domain into labels and derives the second-level domain.
//! - **`headers`**: reads the header block of a raw message into an explicit
//!   mapping and parses the `Date` header.

pub mod address;
pub mod domain;
pub mod headers;

pub use address::{AddressError, EmailAddress, ParsedAddress, Strategy, parse_address};
pub use domain::{Domain, DomainError, second_level_domain, split_domain};
pub use headers::{DateError, EnvelopeHeaders, parse_date};
