//! Reassembly of one message from out-of-order, overlapping chunks.
//!
//! The [`Linearizer`] sits between a chunk producer (the datagram layer,
//! possibly spread over several paths) and a single consumer. Chunks may be
//! pushed in any order, repeated, or overlap each other; the consumer sees
//! one ordered, gap-free byte stream.
//!
//! # Model
//!
//! ```text
//!   delivered          pending (BTreeMap<start, Bytes>)
//! [0 ........ offset) [a..b)   [c....d)      [e..f)        length?
//! ```
//!
//! - Bytes before `offset` have been handed to the consumer and are gone.
//! - `pending` holds buffered, undelivered ranges. Keys are strictly
//!   increasing and ranges never overlap each other or `[0, offset)`.
//! - `length` is latched by the first end-of-message chunk and bounds all
//!   later input.
//!
//! Overlapping bytes are compared; disagreement closes the stream with
//! [`LinearizeError::DataLoss`]. The engine is single threaded and never
//! blocks: a read either completes immediately or parks its callback until
//! a later [`push`](Linearizer::push) or [`close`](Linearizer::close).
//!
//! Callbacks run synchronously inside the call that satisfies them and get
//! `&mut Linearizer`, so a consumer can issue its next read from inside the
//! completion.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;

use crate::chunk::Chunk;
use crate::config::LinearizerConfig;
use crate::error::{InvariantViolation, LinearizeError, Result};
use crate::stats::{NoopStats, StatsSink};

/// Completion for [`Linearizer::pull`]
///
/// `Ok(None)` means the message ended and no more data will follow.
pub type PullCallback = Box<dyn FnOnce(&mut Linearizer, Result<Option<Bytes>>)>;

/// Completion for [`Linearizer::pull_all`]
pub type PullAllCallback = Box<dyn FnOnce(&mut Linearizer, Result<Option<Vec<Bytes>>>)>;

/// Validation hook run at the boundaries of every public method
#[cfg(any(test, feature = "invariant-checks"))]
pub type InvariantHook = Box<dyn Fn(&Linearizer, HookPoint)>;

/// Where an invariant hook is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// Entry of the named method
    Enter(&'static str),
    /// Exit of the named method
    Exit(&'static str),
}

/// Consumer-interaction state, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// No read outstanding
    Idle,
    /// Terminal
    Closed,
    /// A `pull` is waiting for the next contiguous range
    ReadSlice,
    /// A `pull_all` is waiting for the rest of the message
    ReadAll,
}

enum ReadMode {
    Idle,
    Closed(Result<()>),
    ReadSlice(PullCallback),
    ReadAll {
        on_ready: PullAllCallback,
        ranges: Vec<Bytes>,
    },
}

impl ReadMode {
    fn state(&self) -> ReadState {
        match self {
            Self::Idle => ReadState::Idle,
            Self::Closed(_) => ReadState::Closed,
            Self::ReadSlice(_) => ReadState::ReadSlice,
            Self::ReadAll { .. } => ReadState::ReadAll,
        }
    }
}

/// Reassembles one message for one consumer.
///
/// # Example
///
/// ```
/// use overlink_core::{Chunk, Linearizer};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let mut lin = Linearizer::default();
/// let out = Rc::new(RefCell::new(Vec::new()));
///
/// let sink = Rc::clone(&out);
/// lin.pull_all(move |_, result| {
///     let ranges = result.unwrap().unwrap();
///     sink.borrow_mut().extend(ranges.iter().flat_map(|r| r.to_vec()));
/// });
///
/// lin.push(Chunk::last(3, &b"def"[..]));
/// lin.push(Chunk::new(0, &b"abc"[..]));
///
/// assert_eq!(&out.borrow()[..], b"abcdef");
/// assert!(lin.is_complete());
/// ```
pub struct Linearizer {
    /// Next byte offset not yet delivered
    offset: u64,
    /// Total message length, once declared
    length: Option<u64>,
    /// Buffered undelivered ranges keyed by start offset
    pending: BTreeMap<u64, Bytes>,
    /// Sum of pending range lengths
    buffered: u64,
    read_mode: ReadMode,
    config: LinearizerConfig,
    /// Set while `buffered` sits above the advisory ceiling
    overrun: bool,
    stats: Arc<dyn StatsSink>,
    #[cfg(any(test, feature = "invariant-checks"))]
    hook: Option<InvariantHook>,
}

impl Linearizer {
    /// Create a linearizer with an advisory buffering ceiling and a
    /// statistics sink
    pub fn new(max_buffer: u64, stats: Arc<dyn StatsSink>) -> Self {
        Self::with_config(LinearizerConfig::default().with_max_buffer(max_buffer), stats)
    }

    /// Create a linearizer from a full configuration
    pub fn with_config(config: LinearizerConfig, stats: Arc<dyn StatsSink>) -> Self {
        Self {
            offset: 0,
            length: None,
            pending: BTreeMap::new(),
            buffered: 0,
            read_mode: ReadMode::Idle,
            config,
            overrun: false,
            stats,
            #[cfg(any(test, feature = "invariant-checks"))]
            hook: None,
        }
    }

    /// Integrate a chunk.
    ///
    /// Returns `false` only when the stream is already closed. Inconsistent
    /// data (content conflicts, data past the declared end) closes the
    /// stream with a failure while this call still returns `true`; the
    /// failure is observed through the read callbacks and
    /// [`close_status`](Self::close_status).
    ///
    /// A waiting read satisfied by this chunk is completed before `push`
    /// returns.
    pub fn push(&mut self, chunk: Chunk) -> bool {
        self.audit(HookPoint::Enter("push"));
        let accepted = self.push_inner(chunk);
        self.audit(HookPoint::Exit("push"));
        accepted
    }

    /// Request the next contiguous range.
    ///
    /// At most one `pull`/`pull_all` may be outstanding at a time.
    pub fn pull<F>(&mut self, on_ready: F)
    where
        F: FnOnce(&mut Linearizer, Result<Option<Bytes>>) + 'static,
    {
        self.audit(HookPoint::Enter("pull"));
        self.pull_inner(Box::new(on_ready));
        self.audit(HookPoint::Exit("pull"));
    }

    /// Request the whole remaining message.
    ///
    /// The callback fires once the declared end is reached, with every
    /// remaining range in order, or when the stream closes.
    pub fn pull_all<F>(&mut self, on_ready: F)
    where
        F: FnOnce(&mut Linearizer, Result<Option<Vec<Bytes>>>) + 'static,
    {
        self.audit(HookPoint::Enter("pull_all"));
        self.pull_all_inner(Box::new(on_ready));
        self.audit(HookPoint::Exit("pull_all"));
    }

    /// Close the stream, returning the status it was closed with.
    ///
    /// A success status becomes [`LinearizeError::Cancelled`] unless the
    /// whole message has been delivered. Closing an already closed stream
    /// returns the latched status and changes nothing.
    pub fn close(&mut self, status: Result<()>) -> Result<()> {
        self.close_with(status, || {})
    }

    /// Close the stream and run `on_quiesced` once every outstanding read
    /// has been resolved
    pub fn close_with<F>(&mut self, status: Result<()>, on_quiesced: F) -> Result<()>
    where
        F: FnOnce(),
    {
        self.audit(HookPoint::Enter("close"));
        let status = self.close_inner(status);
        on_quiesced();
        self.audit(HookPoint::Exit("close"));
        status
    }

    /// Update the advisory buffering ceiling
    pub fn update_max_buffer(&mut self, new_max: u64) {
        self.audit(HookPoint::Enter("update_max_buffer"));
        self.config.max_buffer = new_max;
        self.overrun = false;
        self.note_buffer_level();
        self.audit(HookPoint::Exit("update_max_buffer"));
    }

    /// Whether every byte of the message has been delivered
    pub fn is_complete(&self) -> bool {
        self.length == Some(self.offset)
    }

    /// Whether the stream reached its terminal state
    pub fn is_closed(&self) -> bool {
        matches!(self.read_mode, ReadMode::Closed(_))
    }

    /// Latched close status, if closed
    pub fn close_status(&self) -> Option<Result<()>> {
        match &self.read_mode {
            ReadMode::Closed(status) => Some(status.clone()),
            _ => None,
        }
    }

    /// Current read state
    pub fn read_state(&self) -> ReadState {
        self.read_mode.state()
    }

    /// Next byte offset to be delivered
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Declared message length, if known
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Buffered, undelivered bytes
    pub fn buffered_bytes(&self) -> u64 {
        self.buffered
    }

    /// Number of disjoint buffered ranges
    pub fn pending_ranges(&self) -> usize {
        self.pending.len()
    }

    /// Advisory buffering ceiling
    pub fn max_buffer(&self) -> u64 {
        self.config.max_buffer
    }

    /// Verify the data-model invariants
    pub fn check_invariants(&self) -> std::result::Result<(), InvariantViolation> {
        if self.is_closed() && !self.pending.is_empty() {
            return Err(InvariantViolation::ClosedWithPending(self.pending.len()));
        }
        if let Some(length) = self.length {
            if self.offset > length {
                return Err(InvariantViolation::PastLength {
                    end: self.offset,
                    length,
                });
            }
        }

        let mut prev_end = self.offset;
        let mut total = 0u64;
        for (&key, data) in &self.pending {
            if data.is_empty() {
                return Err(InvariantViolation::EmptyRange(key));
            }
            if key < self.offset {
                return Err(InvariantViolation::BehindOffset {
                    key,
                    offset: self.offset,
                });
            }
            if key < prev_end {
                return Err(InvariantViolation::Overlap { key, prev_end });
            }
            let end = key + data.len() as u64;
            if let Some(length) = self.length {
                if end > length {
                    return Err(InvariantViolation::PastLength { end, length });
                }
            }
            prev_end = end;
            total += data.len() as u64;
        }

        if total != self.buffered {
            return Err(InvariantViolation::BufferedMismatch {
                counted: self.buffered,
                actual: total,
            });
        }
        Ok(())
    }

    /// Install a hook run at the entry and exit of every public method
    #[cfg(any(test, feature = "invariant-checks"))]
    pub fn set_invariant_hook<F>(&mut self, hook: F)
    where
        F: Fn(&Linearizer, HookPoint) + 'static,
    {
        self.hook = Some(Box::new(hook));
    }

    #[cfg(any(test, feature = "invariant-checks"))]
    fn audit(&self, point: HookPoint) {
        if let Some(hook) = &self.hook {
            hook(self, point);
        }
    }

    #[cfg(not(any(test, feature = "invariant-checks")))]
    #[inline(always)]
    fn audit(&self, _point: HookPoint) {}

    fn push_inner(&mut self, chunk: Chunk) -> bool {
        if self.is_closed() {
            tracing::trace!("Dropping chunk at {} on closed stream", chunk.start());
            return false;
        }

        let chunk_start = chunk.start();
        let Some(chunk_end) = chunk.end() else {
            self.fail(LinearizeError::InvalidArgument(format!(
                "chunk at {} of {} bytes overflows the offset space",
                chunk_start,
                chunk.len()
            )));
            return true;
        };
        if !chunk.is_empty() {
            self.stats.chunk_received(chunk.len() as u64);
        }
        tracing::trace!(
            "Push [{}, {}) eom={} offset={}",
            chunk_start,
            chunk_end,
            chunk.is_end_of_message(),
            self.offset
        );

        match self.length {
            Some(length) => {
                if chunk_end > length {
                    self.fail(LinearizeError::InvalidArgument(format!(
                        "chunk [{chunk_start}, {chunk_end}) extends past message end {length}"
                    )));
                    return true;
                }
                if chunk.is_end_of_message() && chunk_end != length {
                    self.fail(LinearizeError::InvalidArgument(format!(
                        "end of message at {chunk_end} contradicts declared end {length}"
                    )));
                    return true;
                }
            }
            None if chunk.is_end_of_message() => {
                let buffered_end = self
                    .pending
                    .last_key_value()
                    .map(|(&key, data)| key + data.len() as u64);
                if chunk_end < self.offset || buffered_end.is_some_and(|end| end > chunk_end) {
                    self.fail(LinearizeError::InvalidArgument(format!(
                        "end of message at {chunk_end} precedes data already received"
                    )));
                    return true;
                }
                tracing::debug!("Message length latched at {}", chunk_end);
                self.length = Some(chunk_end);
                if self.offset == chunk_end {
                    let _ = self.close_inner(Ok(()));
                    return true;
                }
            }
            None => {}
        }

        if chunk.is_empty() {
            return true;
        }
        let mut data = chunk.into_data();

        let fast_path = matches!(self.read_mode, ReadMode::ReadSlice(_))
            && chunk_start == self.offset
            && self
                .pending
                .first_key_value()
                .is_none_or(|(&key, _)| chunk_end <= key);
        if fast_path {
            if let Some(on_ready) = self.take_slice_reader() {
                self.resolve_slice(on_ready, data);
                return true;
            }
        }

        let mut start = chunk_start;
        if start < self.offset {
            if chunk_end <= self.offset {
                self.stats.duplicate_dropped(data.len() as u64);
                return true;
            }
            let stale = (self.offset - start) as usize;
            self.stats.duplicate_dropped(stale as u64);
            data = data.slice(stale..);
            start = self.offset;
        }

        if let Err(err) = self.integrate(start, data) {
            self.fail(err);
            return true;
        }
        self.note_buffer_level();
        self.service_reader();
        true
    }

    /// Merge `[start, start + data.len())` into `pending`.
    ///
    /// Pieces still overlapping something are trimmed or split and queued
    /// again until each remaining piece inserts without overlap.
    fn integrate(&mut self, start: u64, data: Bytes) -> Result<()> {
        let mut work = vec![(start, data)];

        while let Some((start, data)) = work.pop() {
            let end = start + data.len() as u64;

            // Preceding entry, including one at exactly `start`
            if let Some((&key, existing)) = self.pending.range(..=start).next_back() {
                let existing_end = key + existing.len() as u64;
                if existing_end > start {
                    let overlap_end = end.min(existing_end);
                    compare_overlap(key, existing, start, &data, start, overlap_end)?;
                    if end <= existing_end {
                        self.stats.duplicate_dropped(data.len() as u64);
                        continue;
                    }
                    let covered = (existing_end - start) as usize;
                    self.stats.duplicate_dropped(covered as u64);
                    work.push((existing_end, data.slice(covered..)));
                    continue;
                }
            }

            // Following entry
            if let Some((&key, existing)) = self
                .pending
                .range((Bound::Excluded(start), Bound::Unbounded))
                .next()
            {
                if key < end {
                    let existing_end = key + existing.len() as u64;
                    let overlap_end = end.min(existing_end);
                    compare_overlap(key, existing, start, &data, key, overlap_end)?;
                    self.stats.duplicate_dropped(overlap_end - key);
                    let head = data.slice(..(key - start) as usize);
                    if end > existing_end {
                        let tail_at = (existing_end - start) as usize;
                        work.push((existing_end, data.slice(tail_at..)));
                    }
                    work.push((start, head));
                    continue;
                }
            }

            self.buffered += data.len() as u64;
            self.pending.insert(start, data);
        }
        Ok(())
    }

    fn pull_inner(&mut self, on_ready: PullCallback) {
        match &self.read_mode {
            ReadMode::Closed(status) => {
                let result = status.clone().map(|()| None);
                on_ready(self, result);
            }
            ReadMode::Idle => match self.pop_ready() {
                Some(data) => self.resolve_slice(on_ready, data),
                None => self.read_mode = ReadMode::ReadSlice(on_ready),
            },
            ReadMode::ReadSlice(_) | ReadMode::ReadAll { .. } => {
                if cfg!(debug_assertions) {
                    panic!("pull issued while another read is outstanding");
                }
                on_ready(
                    self,
                    Err(LinearizeError::Internal("read already outstanding".into())),
                );
            }
        }
    }

    fn pull_all_inner(&mut self, on_ready: PullAllCallback) {
        match &self.read_mode {
            ReadMode::Closed(status) => {
                let result = status.clone().map(|()| None);
                on_ready(self, result);
            }
            ReadMode::Idle => {
                self.read_mode = ReadMode::ReadAll {
                    on_ready,
                    ranges: Vec::new(),
                };
                self.advance_read_all();
            }
            ReadMode::ReadSlice(_) | ReadMode::ReadAll { .. } => {
                if cfg!(debug_assertions) {
                    panic!("pull_all issued while another read is outstanding");
                }
                on_ready(
                    self,
                    Err(LinearizeError::Internal("read already outstanding".into())),
                );
            }
        }
    }

    fn close_inner(&mut self, status: Result<()>) -> Result<()> {
        if let ReadMode::Closed(latched) = &self.read_mode {
            return latched.clone();
        }

        let status = match status {
            Ok(()) if !self.is_complete() => Err(LinearizeError::Cancelled(match self.length {
                Some(length) => format!("closed at offset {} of {}", self.offset, length),
                None => format!("closed at offset {} before end of message", self.offset),
            })),
            other => other,
        };

        match &status {
            Ok(()) => tracing::debug!("Stream complete after {} bytes", self.offset),
            Err(err) => tracing::debug!("Stream closed at offset {}: {}", self.offset, err),
        }

        self.pending.clear();
        self.buffered = 0;
        self.overrun = false;
        self.stats.stream_closed(&status);

        match mem::replace(&mut self.read_mode, ReadMode::Closed(status.clone())) {
            ReadMode::ReadSlice(on_ready) => on_ready(self, status.clone().map(|()| None)),
            ReadMode::ReadAll { on_ready, ranges } => {
                on_ready(self, status.clone().map(|()| Some(ranges)));
            }
            ReadMode::Idle | ReadMode::Closed(_) => {}
        }
        status
    }

    fn fail(&mut self, err: LinearizeError) {
        tracing::warn!("Closing stream at offset {}: {}", self.offset, err);
        let _ = self.close_inner(Err(err));
    }

    /// Satisfy whatever read is waiting from the front of `pending`
    fn service_reader(&mut self) {
        match self.read_mode {
            ReadMode::ReadSlice(_) => {
                if let Some(data) = self.pop_ready() {
                    if let Some(on_ready) = self.take_slice_reader() {
                        self.resolve_slice(on_ready, data);
                    }
                }
            }
            ReadMode::ReadAll { .. } => self.advance_read_all(),
            ReadMode::Idle | ReadMode::Closed(_) => {}
        }
    }

    /// Deliver `data` at `offset` to a slice reader already taken out of
    /// `read_mode`
    fn resolve_slice(&mut self, on_ready: PullCallback, data: Bytes) {
        let len = data.len() as u64;
        self.offset += len;
        self.stats.bytes_delivered(len);
        self.stats.read_satisfied();
        if self.is_complete() {
            let _ = self.close_inner(Ok(()));
        }
        on_ready(self, Ok(Some(data)));
    }

    fn advance_read_all(&mut self) {
        let (on_ready, mut ranges) = match mem::replace(&mut self.read_mode, ReadMode::Idle) {
            ReadMode::ReadAll { on_ready, ranges } => (on_ready, ranges),
            other => {
                self.read_mode = other;
                return;
            }
        };

        while let Some(data) = self.pop_ready() {
            let len = data.len() as u64;
            self.offset += len;
            self.stats.bytes_delivered(len);
            ranges.push(data);
        }

        if self.is_complete() {
            self.stats.read_satisfied();
            let _ = self.close_inner(Ok(()));
            on_ready(self, Ok(Some(ranges)));
        } else {
            self.read_mode = ReadMode::ReadAll { on_ready, ranges };
        }
    }

    fn take_slice_reader(&mut self) -> Option<PullCallback> {
        match mem::replace(&mut self.read_mode, ReadMode::Idle) {
            ReadMode::ReadSlice(on_ready) => Some(on_ready),
            other => {
                self.read_mode = other;
                None
            }
        }
    }

    /// Remove the first pending range if it starts at `offset`
    fn pop_ready(&mut self) -> Option<Bytes> {
        let (&key, _) = self.pending.first_key_value()?;
        if key != self.offset {
            return None;
        }
        let (_, data) = self.pending.pop_first()?;
        self.buffered -= data.len() as u64;
        if self.buffered <= self.config.max_buffer {
            self.overrun = false;
        }
        Some(data)
    }

    fn note_buffer_level(&mut self) {
        if self.buffered <= self.config.max_buffer {
            self.overrun = false;
        } else if !self.overrun {
            self.overrun = true;
            if self.config.log_overruns {
                tracing::warn!(
                    "Buffered {} bytes exceeds advisory ceiling {}",
                    self.buffered,
                    self.config.max_buffer
                );
            }
        }
    }
}

/// Compare `[from, to)` as held by an existing range and by a new piece
fn compare_overlap(
    existing_start: u64,
    existing: &Bytes,
    new_start: u64,
    new: &Bytes,
    from: u64,
    to: u64,
) -> Result<()> {
    let old = &existing[(from - existing_start) as usize..(to - existing_start) as usize];
    let incoming = &new[(from - new_start) as usize..(to - new_start) as usize];
    if old == incoming {
        Ok(())
    } else {
        Err(LinearizeError::DataLoss(format!(
            "conflicting content for bytes [{from}, {to})"
        )))
    }
}

/// Hook that panics on the first invariant violation
#[cfg(any(test, feature = "invariant-checks"))]
pub fn assert_invariants(linearizer: &Linearizer, point: HookPoint) {
    if let Err(violation) = linearizer.check_invariants() {
        panic!("invariant violated at {point:?}: {violation}");
    }
}

impl Default for Linearizer {
    fn default() -> Self {
        Self::with_config(LinearizerConfig::default(), Arc::new(NoopStats))
    }
}

impl Drop for Linearizer {
    fn drop(&mut self) {
        if matches!(
            self.read_mode,
            ReadMode::ReadSlice(_) | ReadMode::ReadAll { .. }
        ) {
            let _ = self.close_inner(Err(LinearizeError::Cancelled(
                "linearizer dropped with a read outstanding".into(),
            )));
        }
    }
}

impl fmt::Debug for Linearizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Linearizer")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("pending_ranges", &self.pending.len())
            .field("buffered", &self.buffered)
            .field("read_state", &self.read_mode.state())
            .field("max_buffer", &self.config.max_buffer)
            .finish()
    }
}
