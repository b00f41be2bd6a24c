//! Raw change sources.
//!
//! A [`ChangeSource`] is the only platform-facing part of the engine. It
//! delivers batches of [`RawRecord`]s one request at a time: the engine calls
//! [`ChangeSource::request_next`], waits on the returned [`PendingRead`]
//! together with its own stop signal, and either consumes the outcome or calls
//! [`ChangeSource::cancel`].
//!
//! Two sources ship with the crate:
//!
//! - [`NotifySource`](crate::NotifySource), backed by the OS facility through
//!   the `notify` crate;
//! - [`ChannelSource`], fed in-process through a [`ChannelFeed`].

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::error::{Result, WatcherError};
use crate::path::PathKey;

/// Primitive action reported by a change source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawAction {
    Added,
    Removed,
    Modified,
    RenamedOld,
    RenamedNew,
}

/// One primitive change record, relative to the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// What happened.
    pub action: RawAction,

    /// Entry name relative to the watched directory. Empty for root records.
    pub name: PathKey,

    /// Whether the record is about the watched directory itself.
    pub is_root: bool,
}

impl RawRecord {
    /// Create a record about an entry of the watched directory.
    pub fn new(action: RawAction, name: impl Into<PathKey>) -> Self {
        Self {
            action,
            name: name.into(),
            is_root: false,
        }
    }

    /// Create a record about the watched directory itself.
    pub fn root(action: RawAction) -> Self {
        Self {
            action,
            name: PathKey::default(),
            is_root: true,
        }
    }

    pub fn added(name: impl Into<PathKey>) -> Self {
        Self::new(RawAction::Added, name)
    }

    pub fn removed(name: impl Into<PathKey>) -> Self {
        Self::new(RawAction::Removed, name)
    }

    pub fn modified(name: impl Into<PathKey>) -> Self {
        Self::new(RawAction::Modified, name)
    }

    pub fn renamed_old(name: impl Into<PathKey>) -> Self {
        Self::new(RawAction::RenamedOld, name)
    }

    pub fn renamed_new(name: impl Into<PathKey>) -> Self {
        Self::new(RawAction::RenamedNew, name)
    }

    /// Bytes this record occupies in the raw buffer: a
    /// `FILE_NOTIFY_INFORMATION` header plus the UTF-16 name, DWORD aligned.
    pub fn encoded_len(&self) -> usize {
        let name_bytes = self.name.as_str().encode_utf16().count() * 2;
        (12 + name_bytes + 3) & !3
    }
}

/// Result of one request.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Records in arrival order. An empty list means zero bytes were
    /// transferred, which the engine treats like an overflow.
    Records(Vec<RawRecord>),

    /// Records were lost; the directory must be rescanned.
    Overflow,

    /// The source failed.
    Failed(WatcherError),
}

/// An outstanding request, completed at most once.
#[derive(Debug)]
pub struct PendingRead {
    receiver: Receiver<ReadOutcome>,
}

impl PendingRead {
    /// Wrap the receiving end the source will complete.
    pub fn new(receiver: Receiver<ReadOutcome>) -> Self {
        Self { receiver }
    }

    /// A request that is already complete.
    pub fn ready(outcome: ReadOutcome) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        // The receiver is alive and the slot is free.
        let _ = tx.send(outcome);
        Self::new(rx)
    }

    /// Channel that yields the outcome.
    pub fn receiver(&self) -> &Receiver<ReadOutcome> {
        &self.receiver
    }
}

/// Capability interface over an OS directory-change facility.
pub trait ChangeSource: Send {
    /// Begin recording changes. Called once, before the initial scan.
    fn start(&mut self) -> Result<()>;

    /// Issue the next request. At most one request is outstanding.
    fn request_next(&mut self) -> Result<PendingRead>;

    /// Abandon the outstanding request, if any.
    fn cancel(&mut self) -> Result<()>;
}

impl<S: ChangeSource + ?Sized> ChangeSource for Box<S> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn request_next(&mut self) -> Result<PendingRead> {
        (**self).request_next()
    }

    fn cancel(&mut self) -> Result<()> {
        (**self).cancel()
    }
}

/// Fixed byte budget for records collected between two requests.
#[derive(Debug)]
pub(crate) struct RecordBuffer {
    records: Vec<RawRecord>,
    used: usize,
    capacity: usize,
    overflowed: bool,
}

impl RecordBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            used: 0,
            capacity,
            overflowed: false,
        }
    }

    /// Append a record. Returns `false` when the budget is exhausted, in which
    /// case everything buffered so far is dropped.
    pub(crate) fn push(&mut self, record: RawRecord) -> bool {
        if self.overflowed {
            return false;
        }

        let cost = record.encoded_len();
        if self.used + cost > self.capacity {
            warn!(
                "Change buffer overflow ({} of {} bytes), dropping {} records",
                self.used,
                self.capacity,
                self.records.len()
            );
            self.mark_overflow();
            return false;
        }

        self.used += cost;
        self.records.push(record);
        true
    }

    pub(crate) fn mark_overflow(&mut self) {
        self.records.clear();
        self.used = 0;
        self.overflowed = true;
    }

    /// Take whatever is ready, leaving the buffer empty.
    pub(crate) fn take(&mut self) -> Option<ReadOutcome> {
        if self.overflowed {
            self.overflowed = false;
            return Some(ReadOutcome::Overflow);
        }
        if self.records.is_empty() {
            return None;
        }

        self.used = 0;
        Some(ReadOutcome::Records(std::mem::take(&mut self.records)))
    }
}

/// In-process change source driven by a [`ChannelFeed`].
///
/// Every message sent through the feed completes one request. The watch fails
/// with [`WatcherError::SourceDisconnected`] once all feeds are dropped while
/// the engine is waiting.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: Receiver<ReadOutcome>,
}

/// Sending side of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct ChannelFeed {
    sender: Sender<ReadOutcome>,
}

impl ChannelSource {
    /// Create a connected source and feed.
    pub fn new() -> (Self, ChannelFeed) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { receiver }, ChannelFeed { sender })
    }
}

impl ChangeSource for ChannelSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn request_next(&mut self) -> Result<PendingRead> {
        Ok(PendingRead::new(self.receiver.clone()))
    }

    fn cancel(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ChannelFeed {
    /// Deliver one batch of records. Returns `false` if the source is gone.
    pub fn push(&self, records: impl IntoIterator<Item = RawRecord>) -> bool {
        self.send(ReadOutcome::Records(records.into_iter().collect()))
    }

    /// Report lost records.
    pub fn overflow(&self) -> bool {
        self.send(ReadOutcome::Overflow)
    }

    /// Report a source failure.
    pub fn fail(&self, error: WatcherError) -> bool {
        self.send(ReadOutcome::Failed(error))
    }

    /// Deliver a raw outcome.
    pub fn send(&self, outcome: ReadOutcome) -> bool {
        self.sender.send(outcome).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encoded_len_is_dword_aligned() {
        assert_eq!(RawRecord::added("a").encoded_len(), 16);
        assert_eq!(RawRecord::added("ab").encoded_len(), 16);
        assert_eq!(RawRecord::added("abc").encoded_len(), 20);
        assert_eq!(RawRecord::root(RawAction::Removed).encoded_len(), 12);
    }

    #[test]
    fn test_buffer_hands_out_records_once() {
        let mut buffer = RecordBuffer::new(1024);
        assert!(buffer.take().is_none());
        assert!(buffer.push(RawRecord::added("a.txt")));
        assert!(buffer.push(RawRecord::modified("a.txt")));

        match buffer.take() {
            Some(ReadOutcome::Records(records)) => assert_eq!(records.len(), 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(buffer.take().is_none());
    }

    #[test]
    fn test_buffer_overflow_discards_records() {
        let mut buffer = RecordBuffer::new(40);
        assert!(buffer.push(RawRecord::added("one")));
        assert!(buffer.push(RawRecord::added("two")));
        assert!(!buffer.push(RawRecord::added("three")));
        assert!(!buffer.push(RawRecord::added("four")));

        assert!(matches!(buffer.take(), Some(ReadOutcome::Overflow)));
        assert!(buffer.take().is_none());
        assert!(buffer.push(RawRecord::added("five")));
    }

    #[test]
    fn test_ready_read_is_complete() {
        let pending = PendingRead::ready(ReadOutcome::Overflow);
        assert!(matches!(pending.receiver().try_recv(), Ok(ReadOutcome::Overflow)));
    }

    #[test]
    fn test_channel_feed_reports_dropped_source() {
        let (source, feed) = ChannelSource::new();
        assert!(feed.push([RawRecord::added("a")]));
        drop(source);
        assert!(!feed.overflow());
    }
}
