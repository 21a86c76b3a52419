use std::ops::Range;

use crate::mechanisms::noise_model::NoiseModel;

#[derive(Debug, Clone)]
struct Slot {
    raw_bucket_sums: Vec<i64>,
    debiased_bucket_values: Vec<f64>,
    client_count: i64,
}

impl Slot {
    fn new(width: usize) -> Self {
        Self {
            raw_bucket_sums: vec![0; width],
            debiased_bucket_values: vec![0.0; width],
            client_count: 0,
        }
    }

    fn clear(&mut self) {
        self.raw_bucket_sums.fill(0);
        self.debiased_bucket_values.fill(0.0);
        self.client_count = 0;
    }
}

/// Rolling sums of one metric over the last `capacity` days that had data.
///
/// A ring of per-day slots. Samples for the current day accumulate into the
/// slot under the cursor; [`FixedLengthAccumulator::advance`] moves the cursor
/// and clears the slot that held the day falling out of the window. Days
/// without any sample do not consume a slot.
#[derive(Debug, Clone)]
pub struct FixedLengthAccumulator {
    noise: NoiseModel,
    slots: Vec<Slot>,
    cursor: usize,
    slots_written: usize,
    days_seen: usize,
    dirty: bool,
}

impl FixedLengthAccumulator {
    pub fn new(capacity: usize, width: usize, noise: NoiseModel) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        Self {
            noise,
            slots: vec![Slot::new(width); capacity],
            cursor: 0,
            slots_written: 0,
            days_seen: 0,
            dirty: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn width(&self) -> usize {
        self.slots[0].raw_bucket_sums.len()
    }

    pub fn noise_model(&self) -> NoiseModel {
        self.noise
    }

    /// Debiases `raw_bucket_sums` over `client_count` reports, multiplies the
    /// estimates by `scale`, and adds raw and debiased values to today's slot.
    /// Returns the debiased values.
    pub fn add_debiased_sample(
        &mut self,
        raw_bucket_sums: &[i64],
        client_count: i64,
        scale: f64,
    ) -> Vec<f64> {
        debug_assert_eq!(raw_bucket_sums.len(), self.width());
        let debiased =
            self.noise.debias_all(client_count, raw_bucket_sums, scale);

        let slot = &mut self.slots[self.cursor];
        for (sum, raw) in slot.raw_bucket_sums.iter_mut().zip(raw_bucket_sums) {
            *sum += raw;
        }
        let values = slot.debiased_bucket_values.iter_mut();
        for (value, estimate) in values.zip(&debiased) {
            *value += estimate;
        }
        slot.client_count += client_count;
        self.dirty = true;
        debiased
    }

    /// Closes the current day. A no-op, apart from counting the day, when no
    /// sample arrived since the last call.
    pub fn advance(&mut self) {
        self.days_seen += 1;
        if !self.dirty {
            return;
        }
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.slots[self.cursor].clear();
        self.slots_written += 1;
        self.dirty = false;
    }

    /// Whether a sample arrived since the last advance.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of slots holding data, counting the current day if it has any.
    ///
    /// The slot under the cursor was cleared by the last advance, so without
    /// a sample today at most `capacity - 1` slots hold data.
    pub fn window_days(&self) -> usize {
        let closed = self.slots_written.min(self.slots.len() - 1);
        closed + usize::from(self.dirty)
    }

    pub fn bucket_sum(&self, bucket: usize) -> f64 {
        self.slots
            .iter()
            .map(|slot| slot.debiased_bucket_values[bucket])
            .sum()
    }

    pub fn bucket_sums(&self) -> Vec<f64> {
        (0..self.width()).map(|b| self.bucket_sum(b)).collect()
    }

    /// Debiased sum over a range of buckets.
    pub fn range_sum(&self, buckets: Range<usize>) -> f64 {
        buckets.map(|b| self.bucket_sum(b)).sum()
    }

    pub fn raw_bucket_sum(&self, bucket: usize) -> i64 {
        self.slots.iter().map(|slot| slot.raw_bucket_sums[bucket]).sum()
    }

    pub fn client_sum(&self) -> i64 {
        self.slots.iter().map(|slot| slot.client_count).sum()
    }

    /// Rolling debiased count of `bucket` per 100,000 reporting clients.
    pub fn rate_per_100k(&self, bucket: usize) -> Option<f64> {
        per_100k(self.bucket_sum(bucket), self.client_sum())
    }

    pub fn range_rate_per_100k(&self, buckets: Range<usize>) -> Option<f64> {
        per_100k(self.range_sum(buckets), self.client_sum())
    }

    /// Standard deviation of one rolling bucket sum: the per-slot standard
    /// deviation at the average slot population, scaled by the square root of
    /// the number of slots summed.
    pub fn std_dev(&self) -> f64 {
        let slots = self.window_days();
        if slots == 0 {
            return 0.0;
        }
        let average_clients = self.client_sum() as f64 / slots as f64;
        self.noise.std_dev(average_clients) * (slots as f64).sqrt()
    }

    /// Prefix sums of the rolling estimates over `buckets`, normalized so the
    /// last entry is 1.0. `None` when the range total is not positive.
    pub fn cumulative_distribution(
        &self,
        buckets: Range<usize>,
    ) -> Option<Vec<f64>> {
        let values: Vec<f64> = buckets.map(|b| self.bucket_sum(b)).collect();
        let total: f64 = values.iter().sum();
        if total <= 0.0 {
            return None;
        }
        let mut running = 0.0;
        let cumulative = values
            .iter()
            .map(|v| {
                running += v;
                running / total
            })
            .collect();
        Some(cumulative)
    }

    /// Average number of processed days per written slot.
    pub fn days_per_slot(&self) -> Option<f64> {
        if self.slots_written == 0 {
            return None;
        }
        Some(self.days_seen as f64 / self.slots_written as f64)
    }
}

pub fn per_100k(count: f64, clients: i64) -> Option<f64> {
    if clients <= 0 {
        return None;
    }
    Some(count * 100_000.0 / clients as f64)
}
