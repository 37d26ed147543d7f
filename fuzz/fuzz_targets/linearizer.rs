//! Fuzz target for message reassembly
//!
//! Drives a linearizer with arbitrary pushes, reads and closes. Invariants
//! are checked around every call, and whatever reaches the consumer must be
//! a prefix of the message unless the producer corrupted a chunk.

#![no_main]

use std::cell::RefCell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use overlink_core::{Bytes, Chunk, LinearizeError, Linearizer, ReadState, assert_invariants};

#[derive(Debug, Arbitrary)]
enum Op {
    Push { start: u16, len: u8, eom: bool },
    Corrupt { start: u16, len: u8 },
    Pull,
    PullAll,
    Close { ok: bool },
    UpdateMaxBuffer(u16),
}

#[derive(Debug, Arbitrary)]
struct Input {
    message_len: u16,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let n = (input.message_len as usize % 2048) + 1;
    let message: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();

    let mut lin = Linearizer::default();
    lin.set_invariant_hook(assert_invariants);

    let out = Rc::new(RefCell::new(Vec::new()));
    let mut corrupted = false;

    for op in input.ops {
        match op {
            Op::Push { start, len, eom } => {
                let start = start as usize % n;
                let end = (start + len as usize).min(n);
                let eom = eom && end == n;
                lin.push(Chunk::with_flag(
                    start as u64,
                    eom,
                    Bytes::copy_from_slice(&message[start..end]),
                ));
            }
            Op::Corrupt { start, len } => {
                let start = start as usize % n;
                let end = (start + len as usize + 1).min(n);
                let data: Vec<u8> = message[start..end].iter().map(|b| !b).collect();
                corrupted = true;
                lin.push(Chunk::new(start as u64, data));
            }
            Op::Pull => {
                if matches!(lin.read_state(), ReadState::Idle | ReadState::Closed) {
                    let sink = Rc::clone(&out);
                    lin.pull(move |_, result| {
                        if let Ok(Some(data)) = result {
                            sink.borrow_mut().extend_from_slice(&data);
                        }
                    });
                }
            }
            Op::PullAll => {
                if matches!(lin.read_state(), ReadState::Idle | ReadState::Closed) {
                    let sink = Rc::clone(&out);
                    lin.pull_all(move |_, result| {
                        if let Ok(Some(ranges)) = result {
                            for range in ranges {
                                sink.borrow_mut().extend_from_slice(&range);
                            }
                        }
                    });
                }
            }
            Op::Close { ok } => {
                let status = if ok {
                    Ok(())
                } else {
                    Err(LinearizeError::Unavailable("fuzz".into()))
                };
                let _ = lin.close(status);
            }
            Op::UpdateMaxBuffer(max) => lin.update_max_buffer(max as u64),
        }
    }

    drop(lin);
    if !corrupted {
        let out = out.borrow();
        assert_eq!(&out[..], &message[..out.len()]);
    }
});
