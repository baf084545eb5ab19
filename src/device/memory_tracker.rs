use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StagingError};

pub struct MemoryTracker {
    maximum: u64,
    current: AtomicU64,
}

// concurrent reservations never overshoot `maximum`

impl MemoryTracker {
    pub fn new(maximum: u64) -> Self {
        Self {
            maximum,
            current: AtomicU64::new(0),
        }
    }

    pub fn try_allocate(&self, size: u64) -> Result<()> {
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(size)
                    .filter(|&next| next <= self.maximum)
            })
            .map(|_| ())
            .map_err(|current| StagingError::Allocation {
                requested: size,
                in_use: current,
                capacity: self.maximum,
            })
    }

    pub fn deallocate(&self, size: u64) {
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(size))
            });
    }

    pub fn get_current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn get_maximum(&self) -> u64 {
        self.maximum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_maximum() {
        let tracker = MemoryTracker::new(100);
        tracker.try_allocate(60).unwrap();

        let err = tracker.try_allocate(41).unwrap_err();
        assert!(matches!(
            err,
            StagingError::Allocation {
                requested: 41,
                in_use: 60,
                capacity: 100
            }
        ));
        assert_eq!(tracker.get_current(), 60);

        tracker.try_allocate(40).unwrap();
        assert_eq!(tracker.get_current(), tracker.get_maximum());

        tracker.deallocate(100);
        assert_eq!(tracker.get_current(), 0);
    }

    #[test]
    fn overflow_is_an_allocation_error() {
        let tracker = MemoryTracker::new(u64::MAX);
        tracker.try_allocate(u64::MAX - 1).unwrap();
        assert!(tracker.try_allocate(2).is_err());
    }

    #[test]
    fn concurrent_reservations_never_overshoot() {
        let tracker = std::sync::Arc::new(MemoryTracker::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || (0..100).filter(|_| tracker.try_allocate(7).is_ok()).count())
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 1000 / 7);
        assert_eq!(tracker.get_current(), (1000 / 7) * 7);
    }
}
