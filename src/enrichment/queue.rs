//! In-memory enrichment work list.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use crate::types::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: PlayerId,
    pub priority: Priority,
    /// Failed attempts so far.
    pub retries: u32,
    /// Enqueue order; larger is newer.
    seq: u64,
}

/// Ordered list of player ids waiting for enrichment.
///
/// An id is queued at most once. Enqueueing an already queued id at high
/// priority promotes it. Items are keyed by id so membership checks and
/// promotion are constant time; ordering is applied when a batch is taken.
#[derive(Debug, Default)]
pub struct WorkList {
    items: HashMap<PlayerId, QueueItem>,
    next_seq: u64,
}

impl WorkList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.items.contains_key(&id)
    }

    /// Queue `ids`. High priority is served before normal, newest first
    /// within a class. Returns how many ids were newly added.
    pub fn enqueue(&mut self, ids: impl IntoIterator<Item = PlayerId>, priority: Priority) -> usize {
        let mut added = 0;
        for id in ids {
            match self.items.entry(id) {
                Entry::Occupied(mut slot) => {
                    let item = slot.get_mut();
                    if priority == Priority::High && item.priority == Priority::Normal {
                        self.next_seq += 1;
                        item.priority = Priority::High;
                        item.seq = self.next_seq;
                    }
                }
                Entry::Vacant(slot) => {
                    self.next_seq += 1;
                    slot.insert(QueueItem {
                        id,
                        priority,
                        retries: 0,
                        seq: self.next_seq,
                    });
                    added += 1;
                }
            }
        }
        added
    }

    /// Put a failed item back with one more retry, unless it has used up
    /// `max_retries`. Returns false when the item was dropped.
    pub fn requeue(&mut self, mut item: QueueItem, max_retries: u32) -> bool {
        if item.retries >= max_retries {
            return false;
        }
        if let Entry::Vacant(slot) = self.items.entry(item.id) {
            self.next_seq += 1;
            item.retries += 1;
            item.seq = self.next_seq;
            slot.insert(item);
        }
        true
    }

    /// Order high before normal, newest first within a class, then take up
    /// to `n` items.
    pub fn next_batch(&mut self, n: usize) -> Vec<QueueItem> {
        let mut order: Vec<(Priority, u64, PlayerId)> = self
            .items
            .values()
            .map(|item| (item.priority, item.seq, item.id))
            .collect();
        order.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        order
            .into_iter()
            .take(n)
            .filter_map(|(_, _, id)| self.items.remove(&id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(batch: &[QueueItem]) -> Vec<u64> {
        batch.iter().map(|item| item.id.0).collect()
    }

    #[test]
    fn test_high_priority_jumps_the_queue() {
        let mut list = WorkList::new();
        list.enqueue([PlayerId(1), PlayerId(2)], Priority::Normal);
        list.enqueue([PlayerId(3)], Priority::High);

        let batch = list.next_batch(50);
        assert_eq!(batch[0].id, PlayerId(3));
        assert_eq!(batch.len(), 3);
        assert!(list.is_empty());
    }

    #[test]
    fn test_newest_first_within_class() {
        let mut list = WorkList::new();
        list.enqueue([PlayerId(1)], Priority::Normal);
        list.enqueue([PlayerId(2)], Priority::Normal);
        list.enqueue([PlayerId(3)], Priority::High);
        list.enqueue([PlayerId(4)], Priority::High);

        assert_eq!(ids(&list.next_batch(3)), vec![4, 3, 2]);
        assert_eq!(ids(&list.next_batch(3)), vec![1]);
    }

    #[test]
    fn test_duplicates_are_ignored_and_promoted() {
        let mut list = WorkList::new();
        assert_eq!(list.enqueue([PlayerId(1), PlayerId(2), PlayerId(1)], Priority::Normal), 2);
        assert_eq!(list.enqueue([PlayerId(1)], Priority::High), 0);
        assert_eq!(list.len(), 2);

        let batch = list.next_batch(1);
        assert_eq!(batch[0].id, PlayerId(1));
        assert_eq!(batch[0].priority, Priority::High);
    }

    #[test]
    fn test_requeue_counts_retries_then_drops() {
        let mut list = WorkList::new();
        list.enqueue([PlayerId(9)], Priority::Normal);

        let mut item = list.next_batch(1).remove(0);
        for expected in 1..=3 {
            assert!(list.requeue(item, 3));
            item = list.next_batch(1).remove(0);
            assert_eq!(item.retries, expected);
        }

        assert!(!list.requeue(item, 3));
        assert!(list.is_empty());
    }

    #[test]
    fn test_bulk_enqueue_deduplicates_by_id() {
        let mut list = WorkList::new();
        let added = list.enqueue((0..5_000).chain(0..5_000).map(PlayerId), Priority::Normal);
        assert_eq!(added, 5_000);
        assert_eq!(list.len(), 5_000);
        assert!(list.contains(PlayerId(4_999)));

        assert_eq!(list.enqueue([PlayerId(17)], Priority::High), 0);
        let batch = list.next_batch(3);
        assert_eq!(ids(&batch), vec![17, 4_999, 4_998]);
        assert_eq!(list.len(), 4_997);
        assert!(!list.contains(PlayerId(17)));
    }

    #[test]
    fn test_requeue_of_already_queued_id_keeps_one_entry() {
        let mut list = WorkList::new();
        list.enqueue([PlayerId(5)], Priority::Normal);
        let item = list.next_batch(1).remove(0);
        list.enqueue([PlayerId(5)], Priority::Normal);

        assert!(list.requeue(item, 3));
        assert_eq!(list.len(), 1);
        assert_eq!(list.next_batch(1)[0].retries, 0);
    }
}
