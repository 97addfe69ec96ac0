// Copyright (c) 2025 RustyCache Contributors
//
// Write-event buffer
//
// Mutations publish their policy side effects through an unbounded
// multi-producer queue consumed only by the drain. Events for one key
// are enqueued under that key's stripe lock, so per-key order matches
// real-time order; events are never dropped.

use std::sync::Arc;

use crossbeam::queue::SegQueue;

use crate::cache::listener::RemovalCause;
use crate::map::Entry;

pub(crate) enum WriteEvent<K, V> {
    /// A new mapping was installed.
    Insert { entry: Arc<Entry<K, V>> },

    /// An existing mapping's value was replaced in place. The cause is
    /// `Replaced` for a live entry, `Expired` when the write landed on
    /// an entry whose deadline had already passed.
    Update {
        entry: Arc<Entry<K, V>>,
        old_value: V,
        old_weight: u32,
        cause: RemovalCause,
    },

    /// The mapping was unlinked from the table.
    Remove {
        entry: Arc<Entry<K, V>>,
        old_value: V,
        cause: RemovalCause,
    },

    /// An atomic compute settled on inserting or replacing; `old_value`
    /// is `None` for the insert case.
    Compute {
        entry: Arc<Entry<K, V>>,
        old_value: Option<V>,
        old_weight: u32,
        cause: RemovalCause,
    },
}

pub(crate) struct WriteBuffer<K, V> {
    queue: SegQueue<WriteEvent<K, V>>,
}

impl<K, V> WriteBuffer<K, V> {
    pub(crate) fn new() -> Self {
        WriteBuffer {
            queue: SegQueue::new(),
        }
    }

    pub(crate) fn push(&self, event: WriteEvent<K, V>) {
        self.queue.push(event);
    }

    pub(crate) fn pop(&self) -> Option<WriteEvent<K, V>> {
        self.queue.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_per_producer() {
        let buffer: WriteBuffer<u32, u32> = WriteBuffer::new();
        for i in 0..3 {
            let entry = Arc::new(Entry::new(i, u64::from(i), i, 1, 0));
            buffer.push(WriteEvent::Insert { entry });
        }

        let mut keys = Vec::new();
        while let Some(event) = buffer.pop() {
            if let WriteEvent::Insert { entry } = event {
                keys.push(*entry.key());
            }
        }
        assert_eq!(keys, vec![0, 1, 2]);
        assert!(buffer.is_empty());
    }
}
