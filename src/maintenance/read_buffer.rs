// Copyright (c) 2025 RustyCache Contributors
//
// Striped lossy read buffer
//
// Reads record their access events into a small set of bounded ring
// buffers so the policy can replay them during the next drain. The
// buffers are best-effort by design: a full stripe drops the event and
// reports saturation, because a read must never block or allocate on
// behalf of bookkeeping.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;

/// Capacity of each stripe's ring.
const STRIPE_CAPACITY: usize = 64;

/// Source of per-thread stripe affinity tokens.
static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(u64::MAX) };
}

fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| {
        let mut t = token.get();
        if t == u64::MAX {
            // Golden-ratio spacing spreads consecutive threads across
            // the stripes.
            t = NEXT_THREAD_TOKEN
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_mul(0x9E37_79B9_7F4A_7C15);
            token.set(t);
        }
        t
    })
}

/// Outcome of offering a read event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Added,
    /// The thread's stripe was full; the event was dropped and the
    /// caller should request a drain.
    Full,
}

pub(crate) struct ReadBuffer<T> {
    stripes: Box<[ArrayQueue<T>]>,
    mask: usize,
}

impl<T> ReadBuffer<T> {
    pub(crate) fn new() -> Self {
        let stripes = (2 * num_cpus::get()).next_power_of_two();
        ReadBuffer {
            stripes: (0..stripes)
                .map(|_| ArrayQueue::new(STRIPE_CAPACITY))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            mask: stripes - 1,
        }
    }

    pub(crate) fn offer(&self, event: T) -> Offer {
        let stripe = (thread_token() as usize) & self.mask;
        match self.stripes[stripe].push(event) {
            Ok(()) => Offer::Added,
            Err(_) => Offer::Full,
        }
    }

    /// Drain every stripe into `f`. Work is bounded: each stripe yields
    /// at most its capacity, so a pass cannot starve on a busy reader.
    pub(crate) fn drain(&self, mut f: impl FnMut(T)) {
        for stripe in self.stripes.iter() {
            for _ in 0..STRIPE_CAPACITY {
                match stripe.pop() {
                    Some(event) => f(event),
                    None => break,
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn stripe_capacity() -> usize {
        STRIPE_CAPACITY
    }
}
