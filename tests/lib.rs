//! Shared helpers for OVERLINK integration tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use overlink_core::{Bytes, Chunk, Linearizer, Result, assert_invariants};

/// Install a fmt subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Linearizer that panics on any invariant violation
pub fn checked_linearizer() -> Linearizer {
    init_tracing();
    let mut lin = Linearizer::default();
    lin.set_invariant_hook(assert_invariants);
    lin
}

/// Slice `message` into chunks over the given half-open ranges.
///
/// Chunks ending at the message end carry the end-of-message flag.
pub fn chunks_from(message: &[u8], ranges: &[(usize, usize)]) -> Vec<Chunk> {
    ranges
        .iter()
        .map(|&(start, end)| {
            Chunk::with_flag(
                start as u64,
                end == message.len(),
                Bytes::copy_from_slice(&message[start..end]),
            )
        })
        .collect()
}

/// Deterministic test message
pub fn message(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 3)) as u8).collect()
}

/// Consumer that keeps one `pull` outstanding, re-arming from inside its
/// own completion
#[derive(Clone, Default)]
pub struct ReadLog {
    data: Rc<RefCell<Vec<u8>>>,
    status: Rc<RefCell<Option<Result<()>>>>,
    reads: Rc<Cell<usize>>,
}

impl ReadLog {
    /// Start reading from `lin`
    pub fn attach(lin: &mut Linearizer) -> Self {
        let log = Self::default();
        lin.pull(read_loop(log.clone()));
        log
    }

    /// Bytes received so far
    pub fn bytes(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    /// How the read loop ended, if it has
    pub fn finished(&self) -> Option<Result<()>> {
        self.status.borrow().clone()
    }

    /// Number of ranges received
    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

fn read_loop(log: ReadLog) -> impl FnOnce(&mut Linearizer, Result<Option<Bytes>>) + 'static {
    move |lin: &mut Linearizer, result: Result<Option<Bytes>>| match result {
        Ok(Some(data)) => {
            log.data.borrow_mut().extend_from_slice(&data);
            log.reads.set(log.reads.get() + 1);
            lin.pull(read_loop(log));
        }
        Ok(None) => *log.status.borrow_mut() = Some(Ok(())),
        Err(err) => *log.status.borrow_mut() = Some(Err(err)),
    }
}

/// Slot filled by a single `pull_all`
pub type ReadAllSlot = Rc<RefCell<Option<Result<Option<Vec<Bytes>>>>>>;

/// Issue a `pull_all` whose result lands in the returned slot
pub fn read_all(lin: &mut Linearizer) -> ReadAllSlot {
    let slot: ReadAllSlot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    lin.pull_all(move |_, result| *sink.borrow_mut() = Some(result));
    slot
}

/// Flatten a sequence of ranges
pub fn concat(ranges: &[Bytes]) -> Vec<u8> {
    ranges.iter().flat_map(|r| r.iter().copied()).collect()
}
