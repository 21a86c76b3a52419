use crate::metrics::kinds::DELAY_RANGES;

/// Inclusive start day of each coarse exposure-delay range. The last range is
/// open-ended and runs up to the attribution threshold.
const RANGE_STARTS: [usize; DELAY_RANGES] = [0, 4, 7, 11];

/// Days (since exposure) covered by delay range `range`, cut at `threshold`.
pub fn range_days(range: usize, threshold: usize) -> std::ops::Range<usize> {
    let start = RANGE_STARTS[range].min(threshold);
    let end = range_end(range, threshold).min(threshold);
    start..end.max(start)
}

/// Number of days delay range `range` spans before any cut. The open last
/// range ends at `threshold`.
pub fn range_span(range: usize, threshold: usize) -> usize {
    range_end(range, threshold).saturating_sub(RANGE_STARTS[range])
}

fn range_end(range: usize, threshold: usize) -> usize {
    match RANGE_STARTS.get(range + 1) {
        Some(next) => *next,
        None => threshold,
    }
}

/// Tracks, per classification category, how many notifications (per 100K
/// reporting clients) are attributable to exposures that happened `j` days
/// ago, for `j` below the attribution threshold.
///
/// Slot `today` holds age 0. Moving to the next day drops the oldest age.
#[derive(Debug, Clone)]
pub struct NotificationShown {
    threshold: usize,
    slots: Vec<Vec<f64>>,
    today: usize,
}

impl NotificationShown {
    pub fn new(num_categories: usize, threshold: usize) -> Self {
        assert!(threshold > 0, "threshold must be positive");
        Self {
            threshold,
            slots: vec![vec![0.0; threshold]; num_categories],
            today: 0,
        }
    }

    pub fn num_categories(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, age: usize) -> usize {
        (self.today + self.threshold - age) % self.threshold
    }

    /// Adds one day of debiased date-of-exposure estimates, laid out as
    /// `category * DELAY_RANGES + range`, reported by `client_count` clients.
    pub fn add(&mut self, debiased: &[f64], client_count: i64) {
        if client_count <= 0 {
            return;
        }
        let normalize = 100_000.0 / client_count as f64;
        for category in 0..self.slots.len() {
            for range in 0..DELAY_RANGES {
                let Some(value) =
                    debiased.get(category * DELAY_RANGES + range)
                else {
                    continue;
                };
                // Shares of ages at or past the threshold are dropped.
                let span = range_span(range, self.threshold);
                if span == 0 {
                    continue;
                }
                let share = value * normalize / span as f64;
                let days = range_days(range, self.threshold);
                for age in days {
                    let idx = self.index(age);
                    self.slots[category][idx] += share;
                }
            }
        }
    }

    /// Notifications per 100K clients still inside the attribution window.
    pub fn total(&self, category: usize) -> f64 {
        self.slots[category].iter().sum()
    }

    /// Fraction of clients currently showing a notification of `category`.
    pub fn background_rate(&self, category: usize) -> f64 {
        self.total(category) / 100_000.0
    }

    pub fn background_rate_all(&self) -> f64 {
        (0..self.slots.len()).map(|c| self.background_rate(c)).sum()
    }

    /// Ages every entry by one day, forgetting those reaching the threshold.
    pub fn advance(&mut self) {
        self.today = (self.today + 1) % self.threshold;
        let today = self.today;
        for category in &mut self.slots {
            category[today] = 0.0;
        }
    }
}
