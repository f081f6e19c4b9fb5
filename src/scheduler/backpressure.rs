use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Admission control for the scheduler.
///
/// Counts jobs admitted but not yet finished. Once that count reaches the
/// threshold, new submissions are rejected (and counted) instead of queued.
pub struct BackpressureController {
    threshold: usize,
    load: AtomicUsize,
    rejected: AtomicU64,
}

impl BackpressureController {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            load: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Admit one job, or return the current load if over threshold
    pub fn try_admit(&self) -> Result<(), usize> {
        let threshold = self.threshold;
        self.load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| {
                (load < threshold).then_some(load + 1)
            })
            .map(|_| ())
            .map_err(|load| {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                load
            })
    }

    /// A previously admitted job finished or was abandoned
    pub fn release(&self) {
        let _ = self
            .load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| load.checked_sub(1));
    }

    pub fn load(&self) -> usize {
        self.load.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_at_threshold_and_recovers() {
        let bp = BackpressureController::new(2);
        assert!(bp.try_admit().is_ok());
        assert!(bp.try_admit().is_ok());
        assert_eq!(bp.try_admit(), Err(2));
        assert_eq!(bp.rejected(), 1);

        bp.release();
        assert!(bp.try_admit().is_ok());
        assert_eq!(bp.load(), 2);
    }

    #[test]
    fn test_release_never_underflows() {
        let bp = BackpressureController::new(1);
        bp.release();
        assert_eq!(bp.load(), 0);
    }
}
