//! Mailbox stream reading.
//!
//! A mailbox is a sequence of messages, each introduced by a separator line
//! beginning with `From ` (the envelope sender and a timestamp follow). The
//! separator is not part of the message. Body lines that would look like a
//! separator are escaped by prefixing `>`; one level of escaping is removed on
//! read.
//!
//! # Failure handling
//!
//! - I/O errors abandon the message being read. The reader then skips ahead to
//!   the next separator and carries on.
//! - Content before the first separator is reported as one malformed slot.
//! - After `MAX_CONSECUTIVE_READ_ERRORS` I/O errors in a row the stream is
//!   treated as exhausted.
//!
//! Every failure consumes exactly one message ordinal, so ordinals identify
//! slots rather than successfully read messages.

use crate::sync::queue::{BatchSender, QueueError};
use crate::sync::stats::ReaderStats;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

const SEPARATOR: &[u8] = b"From ";

const MAX_CONSECUTIVE_READ_ERRORS: u32 = 16;

/// One message as delimited by the mailbox format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Position of the message slot in the stream, starting at 0.
    pub ordinal: u64,
    /// Remainder of the separator line (envelope sender and timestamp).
    pub envelope: String,
    /// Header block and body.
    pub contents: Vec<u8>,
}

pub type MessageBatch = Vec<RawMessage>;

#[derive(Debug, Error)]
pub enum MboxError {
    #[error("could not read message {ordinal} from mailbox: {source}")]
    Io {
        ordinal: u64,
        #[source]
        source: io::Error,
    },
    #[error("message {ordinal} is not preceded by a `From ` separator line")]
    MissingSeparator { ordinal: u64 },
}

/// Open a mailbox file, decompressing it when the path ends in `.gz`.
pub fn open_mailbox(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let gzipped = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

    if gzipped {
        log::debug!("opening {} as gzip stream", path.display());
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Iterator over the messages of a mailbox stream.
pub struct MboxReader<R> {
    reader: R,
    ordinal: u64,
    /// Separator line of the next message, already consumed from the stream.
    separator: Option<Vec<u8>>,
    /// Discard lines until the next separator (after an I/O error).
    resync: bool,
    consecutive_errors: u32,
    done: bool,
}

impl<R: BufRead> MboxReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            ordinal: 0,
            separator: None,
            resync: false,
            consecutive_errors: 0,
            done: false,
        }
    }

    fn next_slot(&mut self) -> u64 {
        let ordinal = self.ordinal;
        self.ordinal += 1;
        ordinal
    }

    fn read_failure(&mut self, source: io::Error) -> MboxError {
        let ordinal = self.next_slot();
        self.consecutive_errors += 1;
        self.resync = true;

        if self.consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
            log::error!(
                "giving up on mailbox after {} consecutive read errors",
                self.consecutive_errors
            );
            self.done = true;
        }

        MboxError::Io { ordinal, source }
    }
}

impl<R: BufRead> Iterator for MboxReader<R> {
    type Item = Result<RawMessage, MboxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut separator = self.separator.take();
        let mut skipping = std::mem::take(&mut self.resync) && separator.is_none();
        let mut contents = Vec::new();
        let mut saw_content = false;

        loop {
            let mut line = Vec::new();
            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(_) => {
                    self.consecutive_errors = 0;

                    if line.starts_with(SEPARATOR) {
                        if separator.is_none() && !saw_content {
                            separator = Some(line);
                            skipping = false;
                            continue;
                        }
                        self.separator = Some(line);
                        break;
                    }

                    if skipping || (separator.is_none() && !saw_content && is_blank(&line)) {
                        continue;
                    }

                    saw_content = true;
                    contents.extend_from_slice(unescape(&line));
                }
                Err(source) => return Some(Err(self.read_failure(source))),
            }
        }

        match separator {
            Some(line) => {
                trim_trailing_blank_line(&mut contents);
                let envelope = String::from_utf8_lossy(&line[SEPARATOR.len()..])
                    .trim()
                    .to_string();
                Some(Ok(RawMessage {
                    ordinal: self.next_slot(),
                    envelope,
                    contents,
                }))
            }
            None if saw_content => Some(Err(MboxError::MissingSeparator {
                ordinal: self.next_slot(),
            })),
            None => None,
        }
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Remove one level of `>From ` escaping.
fn unescape(line: &[u8]) -> &[u8] {
    let quoted = line.iter().take_while(|&&b| b == b'>').count();
    if quoted > 0 && line[quoted..].starts_with(SEPARATOR) {
        &line[1..]
    } else {
        line
    }
}

/// Drop the blank line that separates a message from the next separator.
fn trim_trailing_blank_line(contents: &mut Vec<u8>) {
    if contents.ends_with(b"\r\n\r\n") {
        contents.truncate(contents.len() - 2);
    } else if contents.ends_with(b"\n\n") {
        contents.truncate(contents.len() - 1);
    }
}

/// Groups mailbox messages into fixed-size batches.
///
/// Every batch holds exactly `batch_size` messages except possibly the last,
/// which is never empty. Unreadable slots are logged, counted and skipped;
/// they do not shorten a batch.
pub struct MboxBatchReader<R> {
    messages: MboxReader<R>,
    batch_size: usize,
    stats: ReaderStats,
    exhausted: bool,
}

impl<R: BufRead> MboxBatchReader<R> {
    pub fn new(reader: R, batch_size: usize) -> Self {
        Self {
            messages: MboxReader::new(reader),
            batch_size: batch_size.max(1),
            stats: ReaderStats::default(),
            exhausted: false,
        }
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    pub fn next_batch(&mut self) -> Option<MessageBatch> {
        if self.exhausted {
            return None;
        }

        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.messages.next() {
                Some(Ok(message)) => {
                    self.stats.read += 1;
                    batch.push(message);
                }
                Some(Err(err)) => {
                    self.stats.read_failures += 1;
                    log::warn!("skipping mailbox slot: {}", err);
                }
                None => {
                    log::info!("reached end of mailbox");
                    self.exhausted = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            None
        } else {
            self.stats.batches += 1;
            Some(batch)
        }
    }

    /// Read the whole stream, handing each batch to the queue.
    ///
    /// Blocks whenever the queue is full. Must be called from a blocking
    /// context, never from inside an async task.
    pub fn pump(&mut self, sender: &BatchSender) -> Result<(), QueueError> {
        while let Some(batch) = self.next_batch() {
            log::trace!(
                "sending batch of {} message(s) starting at {}",
                batch.len(),
                batch[0].ordinal
            );
            sender.send_blocking(batch)?;
        }

        log::debug!(
            "read {} messages ({} unreadable) in {} batches",
            self.stats.read,
            self.stats.read_failures,
            self.stats.batches
        );
        Ok(())
    }
}

impl<R: BufRead> Iterator for MboxBatchReader<R> {
    type Item = MessageBatch;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}
