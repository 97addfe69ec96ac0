// Copyright (c) 2025 RustyCache Contributors
//
// Drain status state machine
//
// A single atomic word coordinates maintenance so that exactly one
// drain is in flight at a time:
//
//   Idle -> Required -> Processing -> Idle
//
// with an absorbing `ProcessingToRequired` state for work that arrives
// while a pass is running. Producers only ever publish the *need* for a
// drain; the pass itself loops until it observes no absorbed request.

use std::sync::atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const REQUIRED: u8 = 1;
const PROCESSING: u8 = 2;
const PROCESSING_TO_REQUIRED: u8 = 3;

pub(crate) struct DrainStatus {
    state: AtomicU8,
}

impl DrainStatus {
    pub(crate) fn new() -> Self {
        DrainStatus {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Publish that buffered work awaits a drain. If a pass is already
    /// running, its status absorbs the request and the pass repeats.
    pub(crate) fn request(&self) {
        loop {
            match self.state.load(Ordering::Acquire) {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, REQUIRED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                REQUIRED | PROCESSING_TO_REQUIRED => return,
                PROCESSING => {
                    if self
                        .state
                        .compare_exchange(
                            PROCESSING,
                            PROCESSING_TO_REQUIRED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                _ => unreachable!("invalid drain state"),
            }
        }
    }

    /// True when a drain has been requested and not yet started.
    pub(crate) fn is_required(&self) -> bool {
        self.state.load(Ordering::Acquire) == REQUIRED
    }

    /// Mark a pass as running. Called only by the drain owner.
    pub(crate) fn begin(&self) {
        self.state.store(PROCESSING, Ordering::Release);
    }

    /// Attempt to return to idle after a pass. Returns false when a
    /// request was absorbed mid-pass, in which case the owner must run
    /// another pass.
    pub(crate) fn finish(&self) -> bool {
        self.state
            .compare_exchange(PROCESSING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
