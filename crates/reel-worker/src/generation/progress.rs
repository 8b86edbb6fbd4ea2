//! Completion counting for generation stages.

use std::sync::Mutex;

/// Counts finished items and reports `(completed, total)` to a callback.
///
/// Every item is recorded exactly once, whether it produced a real artifact or
/// a placeholder, so the reported count strictly increases and ends at
/// `total`.
pub struct ProgressAggregator<F> {
    total: usize,
    completed: Mutex<usize>,
    callback: F,
}

impl<F> ProgressAggregator<F>
where
    F: Fn(usize, usize) + Send + Sync,
{
    pub fn new(total: usize, callback: F) -> Self {
        Self {
            total,
            completed: Mutex::new(0),
            callback,
        }
    }

    /// Count one finished item and fire the callback.
    ///
    /// The callback runs under the counter lock so observers never see counts
    /// out of order.
    pub fn record_completion(&self) -> usize {
        let mut completed = match self.completed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *completed >= self.total {
            return *completed;
        }
        *completed += 1;
        (self.callback)(*completed, self.total);
        *completed
    }

    pub fn completed(&self) -> usize {
        match self.completed.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed() as f64 / self.total as f64
        }
    }
}
