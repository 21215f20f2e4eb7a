//! Bounded, time-ordered measurement storage.
//!
//! A [`TimeIndexedBuffer`] maps acquisition stamps to samples of one type.
//! It is written by exactly one producer (its sensor callback) and read at
//! arbitrary times by the integration mode selector.
//!
//! # Policy
//!
//! | Operation | Behaviour |
//! |---|---|
//! | [`insert`][TimeIndexedBuffer::insert] | Out-of-order stamps are accepted; a stamp already present is refused; the oldest entry is evicted once the capacity is exceeded. |
//! | [`nearest`][TimeIndexedBuffer::nearest] | Entry with the smallest `|stamp - t|`; ties go to the earlier entry. |
//! | [`lookup`][TimeIndexedBuffer::lookup] | [`nearest`][TimeIndexedBuffer::nearest] restricted to a tolerance. |

use std::cmp::Ordering;
use std::collections::BTreeMap;

use strider_types::Stamped;
use thiserror::Error;

/// Reasons a sample is refused by [`TimeIndexedBuffer::insert`].
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum BufferError {
    #[error("a sample with stamp {0} is already buffered")]
    DuplicateStamp(f64),

    #[error("stamp {0} is not a finite number")]
    NonFiniteStamp(f64),
}

/// Totally ordered wrapper so `f64` stamps can key a [`BTreeMap`].
#[derive(Debug, Clone, Copy)]
struct StampKey(f64);

impl PartialEq for StampKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StampKey {}

impl PartialOrd for StampKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StampKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Bounded map from stamp to sample, always sorted by stamp.
#[derive(Debug, Clone)]
pub struct TimeIndexedBuffer<T> {
    entries: BTreeMap<StampKey, T>,
    capacity: usize,
}

impl<T: Stamped> TimeIndexedBuffer<T> {
    /// Create an empty buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    /// Insert `sample` keyed by its own stamp.
    ///
    /// Returns the evicted oldest sample when the insertion pushed the buffer
    /// over capacity.
    pub fn insert(&mut self, sample: T) -> Result<Option<T>, BufferError> {
        let stamp = sample.stamp();
        if !stamp.is_finite() {
            return Err(BufferError::NonFiniteStamp(stamp));
        }
        let key = StampKey(stamp);
        if self.entries.contains_key(&key) {
            return Err(BufferError::DuplicateStamp(stamp));
        }
        self.entries.insert(key, sample);

        if self.entries.len() > self.capacity {
            return Ok(self.entries.pop_first().map(|(_, evicted)| evicted));
        }
        Ok(None)
    }

    /// The sample whose stamp is closest to `stamp`, or `None` when empty.
    pub fn nearest(&self, stamp: f64) -> Option<&T> {
        let (before, after) = self.bracket(stamp);
        match (before, after) {
            (Some(b), Some(a)) => {
                if a.stamp() - stamp < stamp - b.stamp() {
                    Some(a)
                } else {
                    Some(b)
                }
            }
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    /// [`nearest`][Self::nearest], but only when it lies within `tolerance`
    /// seconds of `stamp`.
    pub fn lookup(&self, stamp: f64, tolerance: f64) -> Option<&T> {
        self.nearest(stamp)
            .filter(|sample| (sample.stamp() - stamp).abs() <= tolerance)
    }

    /// Latest sample at or before `stamp` and earliest sample at or after it.
    ///
    /// An exact match is returned on both sides.
    fn bracket(&self, stamp: f64) -> (Option<&T>, Option<&T>) {
        if stamp.is_nan() {
            return (None, None);
        }
        let key = StampKey(stamp);
        let before = self.entries.range(..=key).next_back().map(|(_, v)| v);
        let after = self.entries.range(key..).next().map(|(_, v)| v);
        (before, after)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Sample {
        stamp: f64,
        value: u32,
    }

    impl Stamped for Sample {
        fn stamp(&self) -> f64 {
            self.stamp
        }
    }

    fn sample(stamp: f64) -> Sample {
        Sample { stamp, value: 0 }
    }

    fn stamps(buffer: &TimeIndexedBuffer<Sample>) -> Vec<f64> {
        buffer.entries.values().map(|s| s.stamp).collect()
    }

    #[test]
    fn capacity_is_never_exceeded_and_newest_survive() {
        let mut buffer = TimeIndexedBuffer::new(3);
        for stamp in [5.0, 1.0, 4.0, 2.0, 6.0, 3.0] {
            buffer.insert(sample(stamp)).unwrap();
            assert!(buffer.len() <= 3);
        }
        // Stamp 3.0 arrived last but is older than everything retained, so
        // it is evicted straight away.
        assert_eq!(stamps(&buffer), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn insert_reports_evicted_oldest() {
        let mut buffer = TimeIndexedBuffer::new(2);
        assert!(buffer.insert(sample(1.0)).unwrap().is_none());
        assert!(buffer.insert(sample(2.0)).unwrap().is_none());
        let evicted = buffer.insert(sample(3.0)).unwrap();
        assert_eq!(evicted.map(|s| s.stamp), Some(1.0));
    }

    #[test]
    fn duplicate_stamp_is_refused_and_first_wins() {
        let mut buffer = TimeIndexedBuffer::new(4);
        buffer.insert(Sample { stamp: 1.0, value: 1 }).unwrap();
        let err = buffer.insert(Sample { stamp: 1.0, value: 2 }).unwrap_err();
        assert_eq!(err, BufferError::DuplicateStamp(1.0));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.nearest(1.0).map(|s| s.value), Some(1));
    }

    #[test]
    fn nan_stamp_is_refused() {
        let mut buffer = TimeIndexedBuffer::new(4);
        assert!(matches!(
            buffer.insert(sample(f64::NAN)),
            Err(BufferError::NonFiniteStamp(_))
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn empty_buffer_reports_unavailable() {
        let buffer: TimeIndexedBuffer<Sample> = TimeIndexedBuffer::new(4);
        assert!(buffer.nearest(1.0).is_none());
        assert!(buffer.lookup(1.0, 10.0).is_none());
        assert_eq!(buffer.bracket(1.0), (None, None));
    }

    #[test]
    fn nearest_has_minimal_distance() {
        let mut buffer = TimeIndexedBuffer::new(16);
        let stored = [0.0, 0.3, 0.35, 1.0, 2.5, 7.0];
        for stamp in stored {
            buffer.insert(sample(stamp)).unwrap();
        }
        for query in [-3.0, 0.1, 0.32, 0.9, 1.7, 4.0, 100.0] {
            let found = buffer.nearest(query).unwrap().stamp;
            let best = stored
                .iter()
                .map(|s| (s - query).abs())
                .fold(f64::INFINITY, f64::min);
            assert!(((found - query).abs() - best).abs() < 1e-12, "query {query}");
        }
    }

    #[test]
    fn nearest_tie_goes_to_earlier_entry() {
        let mut buffer = TimeIndexedBuffer::new(4);
        buffer.insert(sample(1.0)).unwrap();
        buffer.insert(sample(2.0)).unwrap();
        assert_eq!(buffer.nearest(1.5).map(|s| s.stamp), Some(1.0));
    }

    #[test]
    fn lookup_respects_tolerance() {
        let mut buffer = TimeIndexedBuffer::new(4);
        buffer.insert(sample(1.0)).unwrap();
        assert!(buffer.lookup(1.05, 0.1).is_some());
        assert!(buffer.lookup(1.5, 0.1).is_none());
    }

    #[test]
    fn bracket_returns_exact_match_on_both_sides() {
        let mut buffer = TimeIndexedBuffer::new(4);
        for stamp in [1.0, 2.0, 3.0] {
            buffer.insert(sample(stamp)).unwrap();
        }
        let (before, after) = buffer.bracket(2.0);
        assert_eq!(before.map(|s| s.stamp), Some(2.0));
        assert_eq!(after.map(|s| s.stamp), Some(2.0));

        let (before, after) = buffer.bracket(2.5);
        assert_eq!(before.map(|s| s.stamp), Some(2.0));
        assert_eq!(after.map(|s| s.stamp), Some(3.0));
    }
}
