//! Per-series write buffer.
//!
//! Samples accumulate in a live list. A flush swaps the live list into an
//! in-flight snapshot keyed by a fresh id; the snapshot stays readable until
//! the insert completes, so queries never miss data that is being written.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::types::Sample;

/// Buffered samples visible to a query window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    /// Samples inside the window, oldest snapshot first, then the live list.
    pub samples: Vec<Sample>,
    /// Whether any in-flight snapshot exists for the series.
    pub in_flight: bool,
}

#[derive(Debug, Default)]
pub struct WriteBuffer {
    live: Vec<Sample>,
    in_flight: BTreeMap<u64, Arc<Vec<Sample>>>,
    next_id: u64,
    last_ts: Option<i64>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. A timestamp equal to the previous one is bumped by 1ms.
    pub fn append(&mut self, mut sample: Sample) {
        if self.last_ts == Some(sample.ts) {
            sample.ts += 1;
        }
        self.last_ts = Some(sample.ts);
        self.live.push(sample);
    }

    /// Number of samples in the live list.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Whether neither live nor in-flight samples remain.
    pub fn is_drained(&self) -> bool {
        self.live.is_empty() && self.in_flight.is_empty()
    }

    /// Timestamp of the last appended sample.
    pub fn last_ts(&self) -> Option<i64> {
        self.last_ts
    }

    /// Move the live list into a new in-flight snapshot.
    ///
    /// Returns `None` when there is nothing to write.
    pub fn take_snapshot(&mut self) -> Option<(u64, Arc<Vec<Sample>>)> {
        if self.live.is_empty() {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        let samples = Arc::new(std::mem::take(&mut self.live));
        self.in_flight.insert(id, Arc::clone(&samples));
        Some((id, samples))
    }

    /// Forget a snapshot after its insert finished (successfully or not).
    pub fn complete(&mut self, id: u64) -> bool {
        self.in_flight.remove(&id).is_some()
    }

    /// Ids of snapshots still being written.
    pub fn in_flight_ids(&self) -> Vec<u64> {
        self.in_flight.keys().copied().collect()
    }

    /// Buffered samples with `start <= ts <= end`; no lower bound without `start`.
    pub fn snapshot_range(&self, start: Option<i64>, end: i64) -> CacheSnapshot {
        let in_window = |s: &&Sample| start.is_none_or(|start| s.ts >= start) && s.ts <= end;
        let samples = self
            .in_flight
            .values()
            .flat_map(|snapshot| snapshot.iter())
            .chain(self.live.iter())
            .filter(in_window)
            .cloned()
            .collect();
        CacheSnapshot {
            samples,
            in_flight: !self.in_flight.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_bump() {
        let mut buffer = WriteBuffer::new();
        buffer.append(Sample::new(100, 1.0));
        buffer.append(Sample::new(100, 2.0));
        buffer.append(Sample::new(105, 3.0));

        let snapshot = buffer.snapshot_range(None, i64::MAX);
        let ts: Vec<i64> = snapshot.samples.iter().map(|s| s.ts).collect();
        assert_eq!(ts, vec![100, 101, 105]);
        assert!(!snapshot.in_flight);
    }

    #[test]
    fn test_snapshot_lifecycle() {
        let mut buffer = WriteBuffer::new();
        assert!(buffer.take_snapshot().is_none());

        buffer.append(Sample::new(1, 1.0));
        buffer.append(Sample::new(2, 2.0));
        let (id, samples) = buffer.take_snapshot().unwrap();
        assert_eq!(samples.len(), 2);
        assert!(buffer.is_empty());
        assert!(!buffer.is_drained());

        buffer.append(Sample::new(3, 3.0));
        let snapshot = buffer.snapshot_range(Some(2), 3);
        assert_eq!(snapshot.samples.iter().map(|s| s.ts).collect::<Vec<_>>(), vec![2, 3]);
        assert!(snapshot.in_flight);

        assert!(buffer.complete(id));
        assert!(!buffer.complete(id));
        assert!(buffer.in_flight_ids().is_empty());
        assert_eq!(buffer.snapshot_range(None, 10).samples.len(), 1);
    }

    #[test]
    fn test_snapshot_ids_are_unique() {
        let mut buffer = WriteBuffer::new();
        buffer.append(Sample::new(1, 1.0));
        let (a, _) = buffer.take_snapshot().unwrap();
        buffer.append(Sample::new(2, 1.0));
        let (b, _) = buffer.take_snapshot().unwrap();
        assert_ne!(a, b);
        assert_eq!(buffer.in_flight_ids(), vec![a, b]);
    }
}
