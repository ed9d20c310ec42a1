use std::cmp::Ordering;

/// Bounded buffer keyed by a wrapping sequence number, kept newest first.
///
/// A sequence number is "newer" than another when it is less than half the
/// rollover ahead of it. Capacity is capped at a quarter of the rollover so
/// the ordering stays unambiguous.
#[derive(Debug)]
pub struct SequenceQueue<T> {
    entries: Vec<(u32, T)>,
    rollover: u32,
    capacity: usize,
}

impl<T> SequenceQueue<T> {
    pub fn new(rollover: u32, capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity as u64 <= u64::from(rollover) / 4,
            "capacity {} must be within a quarter of rollover {}",
            capacity,
            rollover
        );
        Self {
            entries: Vec::with_capacity(capacity),
            rollover,
            capacity,
        }
    }

    fn is_newer(&self, a: u32, b: u32) -> bool {
        let rollover = u64::from(self.rollover);
        let diff = (u64::from(a) + rollover - u64::from(b)) % rollover;
        diff > 0 && diff < rollover / 2
    }

    fn position(&self, seq: u32) -> Result<usize, usize> {
        self.entries.binary_search_by(|(entry, _)| {
            if *entry == seq {
                Ordering::Equal
            } else if self.is_newer(*entry, seq) {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        })
    }

    /// Inserts `item` under `seq`. Returns false, leaving the queue unchanged,
    /// when `seq` is already present. A full queue drops its oldest entry.
    pub fn enqueue(&mut self, seq: u32, item: T) -> bool {
        if self.contains(seq) {
            return false;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop();
        }
        let at = self
            .entries
            .iter()
            .position(|(entry, _)| self.is_newer(seq, *entry))
            .unwrap_or(self.entries.len());
        self.entries.insert(at, (seq, item));
        true
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.entries.iter().any(|(entry, _)| *entry == seq)
    }

    pub fn get(&self, seq: u32) -> Option<&T> {
        self.position(seq).ok().map(|at| &self.entries[at].1)
    }

    pub fn remove(&mut self, seq: u32) -> Option<T> {
        let at = self.position(seq).ok()?;
        Some(self.entries.remove(at).1)
    }

    /// Sequence numbers currently held, newest first.
    pub fn sequence_numbers(&self) -> Vec<u32> {
        self.entries.iter().map(|(seq, _)| *seq).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
