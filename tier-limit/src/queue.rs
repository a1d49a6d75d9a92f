use crate::error::QueueError;

/// A fixed-capacity FIFO of expiry deadlines (nanoseconds from the rule's clock anchor).
///
/// The backing buffer holds one more element than the usable capacity so that
/// an empty queue (`head == tail`) can be told apart from a full one
/// (`(tail + 1) % len == head`).
///
/// The queue has no internal locking. It is always owned by a
/// [`SingleRule`](crate::SingleRule) and only mutated under that rule's mutex.
#[derive(Debug, Clone)]
pub struct CircularQueue {
    buffer: Box<[i64]>,
    head: usize,
    tail: usize,
}

impl CircularQueue {
    /// Creates a queue able to hold `capacity` deadlines.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity + 1].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.buffer.len()
    }

    /// The number of deadlines this queue can hold.
    pub fn capacity(&self) -> usize {
        self.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.tail + 1) % self.len() == self.head
    }

    /// Appends a deadline at the tail.
    pub fn push(&mut self, deadline: i64) -> Result<(), QueueError> {
        if self.is_full() {
            return Err(QueueError::Full);
        }
        self.buffer[self.tail] = deadline;
        self.tail = (self.tail + 1) % self.len();
        Ok(())
    }

    /// Removes and returns the earliest deadline.
    pub fn pop(&mut self) -> Result<i64, QueueError> {
        if self.is_empty() {
            return Err(QueueError::Empty);
        }
        let deadline = self.buffer[self.head];
        self.head = (self.head + 1) % self.len();
        Ok(deadline)
    }

    /// Removes and returns the most recently pushed deadline.
    pub fn pop_back(&mut self) -> Result<i64, QueueError> {
        if self.is_empty() {
            return Err(QueueError::Empty);
        }
        self.tail = (self.tail + self.len() - 1) % self.len();
        Ok(self.buffer[self.tail])
    }

    /// The earliest deadline, if any.
    pub fn peek(&self) -> Option<i64> {
        (!self.is_empty()).then(|| self.buffer[self.head])
    }

    /// Number of deadlines currently stored.
    pub fn used(&self) -> usize {
        (self.tail + self.len() - self.head) % self.len()
    }

    /// Number of deadlines that can still be pushed.
    pub fn free_slots(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Drops every deadline strictly earlier than `now`.
    ///
    /// Deadlines are pushed in non-decreasing order, so this stops at the
    /// first entry that has not yet expired. Returns how many were removed.
    pub fn prune_expired(&mut self, now: i64) -> usize {
        let mut pruned = 0;
        while let Some(deadline) = self.peek() {
            if deadline >= now {
                break;
            }
            // Cannot fail: peek just saw an entry.
            let _ = self.pop();
            pruned += 1;
        }
        pruned
    }

    /// Iterates deadlines from head (earliest) to tail (latest).
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.used()).map(move |i| self.buffer[(self.head + i) % self.len()])
    }
}
