// Copyright (c) 2025 RustyCache Contributors
//
// Maintenance pipeline
//
// Buffering between the concurrent operation surface and the
// single-owner drain: reads go through striped lossy rings, writes
// through a lossless MPSC queue, and the drain status word decides who
// runs the next pass.

pub(crate) mod drain;
pub(crate) mod read_buffer;
pub(crate) mod write_buffer;

pub(crate) use drain::DrainStatus;
pub(crate) use read_buffer::{Offer, ReadBuffer};
pub(crate) use write_buffer::{WriteBuffer, WriteEvent};
