// Copyright (c) 2025 RustyCache Contributors
//
// Concurrent hash map substrate
//
// The storage layer beneath the cache: a lock-striped table of shared
// entry records. Policy ordering lives elsewhere; the table's only job
// is reachability by key with per-stripe concurrency.

pub(crate) mod entry;
pub(crate) mod iter;
pub(crate) mod table;

pub(crate) use entry::{Entry, ETERNAL, NO_SLOT};
pub(crate) use iter::TableIter;
pub(crate) use table::StripedTable;
