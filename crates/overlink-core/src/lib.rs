//! # OVERLINK Core
//!
//! Message reassembly for the OVERLINK peer-to-peer overlay transport.
//!
//! The datagram layer below may deliver the chunks of a message out of
//! order, more than once, or with overlapping ranges (retransmission,
//! multi-path). This crate provides:
//! - The [`Linearizer`]: ordered, gap-free, duplicate-free delivery of one
//!   message to one consumer
//! - Conflict detection between overlapping chunks
//! - A single, unambiguous end-of-message boundary
//! - Passive statistics and configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Consumer                                 │
//! │   (pull / pull_all, completion callbacks)                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Linearizer                               │
//! │   (pending ranges, end-of-message, terminal status)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Chunk producer                           │
//! │   (datagram framing, retransmission, multi-path)                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod config;
pub mod error;
pub mod linearizer;
pub mod stats;

pub use bytes::Bytes;
pub use chunk::Chunk;
pub use config::{DEFAULT_MAX_BUFFER, LinearizerConfig};
pub use error::{InvariantViolation, LinearizeError, Result, StatusCode};
pub use linearizer::{HookPoint, Linearizer, PullAllCallback, PullCallback, ReadState};
#[cfg(any(test, feature = "invariant-checks"))]
pub use linearizer::{InvariantHook, assert_invariants};
pub use stats::{LinearizerStats, NoopStats, StatsSink, StatsSnapshot};
