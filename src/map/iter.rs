// Copyright (c) 2025 RustyCache Contributors
//
// Weakly consistent table iteration
//
// The iterator snapshots one stripe at a time under that stripe's read
// lock. It reflects the map at some point at or after creation, never
// observes a key twice (stripes are disjoint and fixed), and never fails
// on concurrent modification.

use std::hash::Hash;
use std::sync::Arc;

use crate::map::entry::Entry;
use crate::map::table::StripedTable;

pub(crate) struct TableIter<'a, K, V> {
    table: &'a StripedTable<K, V>,
    next_stripe: usize,
    pending: std::vec::IntoIter<Arc<Entry<K, V>>>,
}

impl<'a, K, V> TableIter<'a, K, V>
where
    K: Eq + Hash,
{
    pub(crate) fn new(table: &'a StripedTable<K, V>) -> Self {
        TableIter {
            table,
            next_stripe: 0,
            pending: Vec::new().into_iter(),
        }
    }
}

impl<K, V> Iterator for TableIter<'_, K, V>
where
    K: Eq + Hash,
{
    type Item = Arc<Entry<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.pending.next() {
                return Some(entry);
            }
            if self.next_stripe >= self.table.stripe_count() {
                return None;
            }
            self.pending = self.table.collect_stripe(self.next_stripe).into_iter();
            self.next_stripe += 1;
        }
    }
}
