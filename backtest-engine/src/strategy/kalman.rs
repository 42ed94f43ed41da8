//! Pairs trading on a Kalman-filtered hedge ratio
//!
//! The filter tracks `y = slope * x + intercept` as a random walk in
//! (slope, intercept). Each new price pair runs one predict/update step and
//! yields the forecast error `e` and its standard deviation `sqrt(Q)`. The
//! strategy buys the spread when `e < -sqrt(Q)`, sells it when
//! `e > sqrt(Q)`, and closes once the error reverts inside the band.

use chrono::{DateTime, Utc};
use common::{Direction, Result};
use tracing::{debug, info};

use crate::data::DataHandler;
use crate::event::{Event, EventQueue, SignalEvent};
use crate::strategy::Strategy;

type Matrix2 = [[f64; 2]; 2];

/// Outcome of one filter step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanUpdate {
    /// Predicted `y` before seeing it
    pub prediction: f64,
    /// `y - prediction`
    pub error: f64,
    /// `sqrt(Q)`, the standard deviation of the prediction
    pub std_dev: f64,
}

/// Recursive least squares on a two-state (slope, intercept) model
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    /// Diagonal of the state noise covariance, `delta / (1 - delta)`
    wt: f64,
    /// Observation noise variance
    vt: f64,
    theta: [f64; 2],
    c: Matrix2,
    primed: bool,
}

impl KalmanFilter {
    pub fn new(delta: f64, observation_variance: f64) -> Self {
        Self {
            wt: delta / (1.0 - delta),
            vt: observation_variance,
            theta: [0.0; 2],
            c: [[0.0; 2]; 2],
            primed: false,
        }
    }

    /// Posterior mean `[slope, intercept]`
    pub fn theta(&self) -> [f64; 2] {
        self.theta
    }

    /// Posterior covariance
    pub fn covariance(&self) -> Matrix2 {
        self.c
    }

    pub fn update(&mut self, x: f64, y: f64) -> KalmanUpdate {
        // Prior covariance; the first step has no prior
        let r: Matrix2 = if self.primed {
            [
                [self.c[0][0] + self.wt, self.c[0][1]],
                [self.c[1][0], self.c[1][1] + self.wt],
            ]
        } else {
            [[0.0; 2]; 2]
        };
        self.primed = true;

        let f = [x, 1.0];
        let prediction = f[0] * self.theta[0] + f[1] * self.theta[1];
        let error = y - prediction;

        // R F' and F R
        let rf = [
            r[0][0] * f[0] + r[0][1] * f[1],
            r[1][0] * f[0] + r[1][1] * f[1],
        ];
        let fr = [
            f[0] * r[0][0] + f[1] * r[1][0],
            f[0] * r[0][1] + f[1] * r[1][1],
        ];
        let q = f[0] * rf[0] + f[1] * rf[1] + self.vt;

        let gain = [rf[0] / q, rf[1] / q];
        self.theta[0] += gain[0] * error;
        self.theta[1] += gain[1] * error;
        for i in 0..2 {
            for j in 0..2 {
                self.c[i][j] = r[i][j] - gain[i] * fr[j];
            }
        }

        KalmanUpdate {
            prediction,
            error,
            std_dev: q.sqrt(),
        }
    }
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new(1e-4, 1e-3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpreadPosition {
    Long,
    Short,
}

/// Trades `y` against `x` with a hedge of `floor(quantity * slope)` units of `x`
pub struct KalmanPairsStrategy {
    x: String,
    y: String,
    quantity: u64,
    filter: KalmanFilter,
    time: Option<DateTime<Utc>>,
    /// Timestamps seen after the first; trading starts once this exceeds one
    days: usize,
    latest: [Option<f64>; 2],
    invested: Option<SpreadPosition>,
    hedge_quantity: u64,
}

impl KalmanPairsStrategy {
    pub fn new(x: impl Into<String>, y: impl Into<String>, quantity: u64) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            quantity,
            filter: KalmanFilter::default(),
            time: None,
            days: 0,
            latest: [None, None],
            invested: None,
            hedge_quantity: quantity,
        }
    }

    pub fn with_filter(mut self, filter: KalmanFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn filter(&self) -> &KalmanFilter {
        &self.filter
    }

    /// Record the price for the bar's timestamp, resetting on a new timestamp
    fn observe(&mut self, leg: usize, timestamp: DateTime<Utc>, price: f64) {
        match self.time {
            Some(t) if t == timestamp => {}
            Some(_) => {
                self.time = Some(timestamp);
                self.days += 1;
                self.latest = [None, None];
            }
            None => self.time = Some(timestamp),
        }
        self.latest[leg] = Some(price);
    }

    fn hedge_for_slope(&self) -> u64 {
        (self.quantity as f64 * self.filter.theta[0]).floor().max(0.0) as u64
    }

    fn emit(
        &self,
        queue: &mut EventQueue,
        timestamp: DateTime<Utc>,
        y_dir: Direction,
        x_dir: Direction,
    ) {
        queue.push(SignalEvent::new(&self.y, timestamp, y_dir).with_quantity(self.quantity));
        queue.push(SignalEvent::new(&self.x, timestamp, x_dir).with_quantity(self.hedge_quantity));
    }
}

impl Strategy for KalmanPairsStrategy {
    fn name(&self) -> &str {
        "Kalman Pairs"
    }

    fn calculate_signals(
        &mut self,
        event: &Event,
        feed: &dyn DataHandler,
        queue: &mut EventQueue,
    ) -> Result<()> {
        let Event::Market(market) = event else {
            return Ok(());
        };
        let leg = if market.symbol == self.x {
            0
        } else if market.symbol == self.y {
            1
        } else {
            return Ok(());
        };

        let price = feed.latest_price(&market.symbol)?;
        self.observe(leg, market.timestamp, price);

        let [Some(x), Some(y)] = self.latest else {
            return Ok(());
        };
        // Both legs seen; wait for the next timestamp before updating again
        self.latest = [None, None];

        let update = self.filter.update(x, y);
        let (e, band) = (update.error, update.std_dev);
        debug!(error = e, std_dev = band, slope = self.filter.theta[0], "kalman update");

        if self.days <= 1 {
            return Ok(());
        }

        let ts = market.timestamp;
        match self.invested {
            None if e < -band => {
                self.hedge_quantity = self.hedge_for_slope();
                info!(%ts, hedge = self.hedge_quantity, "long spread");
                self.emit(queue, ts, Direction::Long, Direction::Short);
                self.invested = Some(SpreadPosition::Long);
            }
            None if e > band => {
                self.hedge_quantity = self.hedge_for_slope();
                info!(%ts, hedge = self.hedge_quantity, "short spread");
                self.emit(queue, ts, Direction::Short, Direction::Long);
                self.invested = Some(SpreadPosition::Short);
            }
            Some(SpreadPosition::Long) if e > -band => {
                info!(%ts, "closing long spread");
                self.emit(queue, ts, Direction::Exit, Direction::Exit);
                self.invested = None;
            }
            Some(SpreadPosition::Short) if e < band => {
                info!(%ts, "closing short spread");
                self.emit(queue, ts, Direction::Exit, Direction::Exit);
                self.invested = None;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{bars_from_closes, HistoricDataHandler};
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn run_pair(xs: &[f64], ys: &[f64]) -> (KalmanPairsStrategy, Vec<Vec<SignalEvent>>) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut data = BTreeMap::new();
        data.insert("X".to_string(), bars_from_closes(start, xs));
        data.insert("Y".to_string(), bars_from_closes(start, ys));
        let mut feed = HistoricDataHandler::new(vec!["X".into(), "Y".into()], data).unwrap();
        let mut strategy = KalmanPairsStrategy::new("X", "Y", 2000);

        let mut per_bar = Vec::new();
        while feed.has_more_data() {
            let mut markets = EventQueue::new();
            feed.update_bars(&mut markets).unwrap();
            let mut signals = EventQueue::new();
            while let Some(event) = markets.poll() {
                strategy.calculate_signals(&event, &feed, &mut signals).unwrap();
            }
            let mut bar = Vec::new();
            while let Some(Event::Signal(signal)) = signals.poll() {
                bar.push(signal);
            }
            per_bar.push(bar);
        }
        (strategy, per_bar)
    }

    #[test]
    fn test_first_step_leaves_state_at_zero() {
        let mut filter = KalmanFilter::default();
        let update = filter.update(100.0, 200.0);
        assert_eq!(update.prediction, 0.0);
        assert_eq!(update.error, 200.0);
        assert_relative_eq!(update.std_dev, 1e-3_f64.sqrt());
        assert_eq!(filter.theta(), [0.0, 0.0]);
        assert_eq!(filter.covariance(), [[0.0; 2]; 2]);
    }

    #[test]
    fn test_second_step_moves_towards_slope() {
        let mut filter = KalmanFilter::default();
        filter.update(100.0, 200.0);
        let update = filter.update(101.0, 202.0);
        // Q = wt * (101^2 + 1) + vt
        let wt: f64 = 1e-4 / (1.0 - 1e-4);
        assert_relative_eq!(
            update.std_dev,
            (wt * (101.0 * 101.0 + 1.0) + 1e-3).sqrt(),
            epsilon = 1e-12
        );
        assert!((filter.theta()[0] - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_converges_on_exact_pair_without_trading() {
        let xs: Vec<f64> = (0..60).map(|i| 100.0 + (i % 5) as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x).collect();
        let (strategy, signals) = run_pair(&xs, &ys);

        assert!((strategy.filter().theta()[0] - 2.0).abs() < 0.05);
        assert!(signals.iter().all(|bar| bar.is_empty()));
    }

    #[test]
    fn test_spread_dislocation_enters_and_exits() {
        let xs: Vec<f64> = (0..40).map(|i| 100.0 + (i % 5) as f64).collect();
        let mut ys: Vec<f64> = xs.iter().map(|x| 2.0 * x).collect();
        ys[30] -= 10.0;
        let (_, signals) = run_pair(&xs, &ys);

        assert!(signals[..30].iter().all(|bar| bar.is_empty()));

        let entry = &signals[30];
        assert_eq!(entry.len(), 2);
        assert_eq!((entry[0].symbol.as_str(), entry[0].direction), ("Y", Direction::Long));
        assert_eq!(entry[0].suggested_quantity, Some(2000));
        assert_eq!((entry[1].symbol.as_str(), entry[1].direction), ("X", Direction::Short));
        // The shock itself pulls the slope down before the hedge is sized
        let hedge = entry[1].suggested_quantity.unwrap();
        assert!((3500..=4000).contains(&hedge));

        let exit = &signals[31];
        assert_eq!(exit.len(), 2);
        assert!(exit.iter().all(|s| s.direction == Direction::Exit));
    }

    #[test]
    fn test_ignores_other_symbols() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let feed = HistoricDataHandler::single("SPY", bars_from_closes(start, &[1.0])).unwrap();
        let mut strategy = KalmanPairsStrategy::new("X", "Y", 10);
        let mut queue = EventQueue::new();
        let event = Event::Market(crate::event::MarketEvent {
            symbol: "SPY".to_string(),
            timestamp: start,
        });
        strategy.calculate_signals(&event, &feed, &mut queue).unwrap();
        assert!(queue.is_empty());
        assert_eq!(strategy.filter().theta(), [0.0, 0.0]);
    }
}
