//! Weighted running averages for per-epoch statistics.

/// Running mean of a scalar metric over one epoch.
///
/// The average is `sum / count`, or `0.0` while `count` is zero. A batch that
/// contributes zero weight still updates [`RunningStat::val`].
///
/// ```rust
/// use infinity_pose_train::meter::RunningStat;
///
/// let mut loss = RunningStat::new();
/// loss.update(2.0, 3.0);
/// loss.update(4.0, 1.0);
/// assert_eq!(loss.avg(), 2.5);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStat {
    val: f64,
    sum: f64,
    count: f64,
    avg: f64,
}

impl RunningStat {
    /// A zeroed accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all state. Called by the owner at the start of every epoch.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record `value` with weight `weight`.
    pub fn update(&mut self, value: f64, weight: f64) {
        self.val = value;
        self.sum += value * weight;
        self.count += weight;
        self.avg = if self.count != 0.0 { self.sum / self.count } else { 0.0 };
    }

    /// Most recent value.
    pub fn val(&self) -> f64 {
        self.val
    }

    /// Weighted running mean.
    pub fn avg(&self) -> f64 {
        self.avg
    }

    /// Weighted sum of all values.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Total weight seen.
    pub fn count(&self) -> f64 {
        self.count
    }
}
