use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Ordering entry for a job waiting to be assigned.
///
/// Entries are transient: the job they point at may have been cancelled or
/// already finished by the time the entry is popped, so the caller must
/// check the registry before acting on one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: Uuid,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    seq: u64,
}

impl QueueEntry {
    /// Key compared ascending: higher priority first, then earlier timestamp
    fn key(&self) -> (i64, DateTime<Utc>, u64) {
        (-(self.priority as i64), self.enqueued_at, self.seq)
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key pops first
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of pending jobs, ordered by `(priority desc, timestamp asc)`.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job with the given ordering timestamp
    pub fn push(&mut self, job_id: Uuid, priority: i32, enqueued_at: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            job_id,
            priority,
            enqueued_at,
            seq,
        });
    }

    /// Insert a job stamped with the current time, as retries and recoveries do
    pub fn push_now(&mut self, job_id: Uuid, priority: i32) {
        self.push(job_id, priority, Utc::now());
    }

    /// Put a popped entry back with its original key
    pub fn reinsert(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
