use std::collections::VecDeque;

/// Fixed-capacity window; pushing into a full window evicts the oldest value
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
            sum: 0.0,
        }
    }

    /// Push a value, returning the evicted one if the window was full
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.values.len() == self.capacity {
            self.values.pop_front()
        } else {
            None
        };
        if let Some(old) = evicted {
            self.sum -= old;
        }
        self.values.push_back(value);
        self.sum += value;
        evicted
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent value
    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Mean of the window, only once it is full
    pub fn mean(&self) -> Option<f64> {
        if self.is_full() {
            Some(self.sum / self.capacity as f64)
        } else {
            None
        }
    }

    /// Population standard deviation, only once the window is full
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / self.capacity as f64;
        Some(variance.sqrt())
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }
}

/// Percentage returns between consecutive window values, most recent first
///
/// A window of prices `[p0, p1, p2]` yields `[(p2/p1 - 1)*100, (p1/p0 - 1)*100]`.
pub fn lagged_returns_pct(prices: &RollingWindow) -> Vec<f64> {
    let values: Vec<f64> = prices.iter().collect();
    values
        .windows(2)
        .rev()
        .map(|w| {
            if w[0] != 0.0 {
                (w[1] / w[0] - 1.0) * 100.0
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_evict() {
        let mut window = RollingWindow::new(3);
        assert_eq!(window.push(1.0), None);
        assert_eq!(window.push(2.0), None);
        assert!(window.mean().is_none());
        assert_eq!(window.push(3.0), None);
        assert_eq!(window.mean(), Some(2.0));

        assert_eq!(window.push(4.0), Some(1.0));
        assert_eq!(window.len(), 3);
        assert_eq!(window.mean(), Some(3.0));
        assert_eq!(window.iter().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_latest_and_std_dev() {
        let mut window = RollingWindow::new(4);
        for v in [2.0, 4.0, 4.0] {
            window.push(v);
        }
        assert_eq!(window.latest(), Some(4.0));
        assert!(window.std_dev().is_none());

        window.push(6.0);
        // mean 4, squared deviations 4 + 0 + 0 + 4 over 4
        assert!((window.std_dev().unwrap() - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = RollingWindow::new(0);
        window.push(5.0);
        window.push(6.0);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.mean(), Some(6.0));
    }

    #[test]
    fn test_lagged_returns_most_recent_first() {
        let mut prices = RollingWindow::new(3);
        for p in [100.0, 110.0, 99.0] {
            prices.push(p);
        }
        let returns = lagged_returns_pct(&prices);
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - (-10.0)).abs() < 1e-9);
        assert!((returns[1] - 10.0).abs() < 1e-9);
    }
}
