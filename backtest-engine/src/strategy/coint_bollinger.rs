//! Mean reversion on a weighted basket of cointegrated assets
//!
//! Each timestamp the basket value `Σ w_i * p_i` goes into a rolling window.
//! Once the window is full the z-score of the latest value drives trading:
//! below `-entry_z` the basket is bought, above `entry_z` it is sold, and the
//! position is closed when the z-score comes back inside `±exit_z`.

use chrono::{DateTime, Utc};
use common::{Direction, Result};
use tracing::{debug, info};

use crate::data::DataHandler;
use crate::event::{Event, EventQueue, SignalEvent};
use crate::indicators::RollingWindow;
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BasketPosition {
    Long,
    Short,
}

/// Bollinger band z-score trading on a cointegrated basket
///
/// One "unit" of the basket is `weights[i]` of `symbols[i]`; each leg trades
/// `floor(quantity * |weight|)` units.
#[derive(Debug)]
pub struct CointegrationBollingerStrategy {
    symbols: Vec<String>,
    weights: Vec<f64>,
    entry_z: f64,
    exit_z: f64,
    quantity: u64,
    lookback: usize,
    basket: RollingWindow,
    time: Option<DateTime<Utc>>,
    bars_elapsed: usize,
    latest: Vec<Option<f64>>,
    invested: Option<BasketPosition>,
}

impl CointegrationBollingerStrategy {
    /// `weights` must line up with `symbols`
    pub fn new(
        symbols: &[String],
        weights: &[f64],
        lookback: usize,
        entry_z: f64,
        exit_z: f64,
        quantity: u64,
    ) -> Self {
        Self {
            symbols: symbols.to_vec(),
            weights: weights.to_vec(),
            entry_z,
            exit_z,
            quantity,
            lookback,
            basket: RollingWindow::new(lookback),
            time: None,
            bars_elapsed: 0,
            latest: vec![None; symbols.len()],
            invested: None,
        }
    }

    fn observe(&mut self, leg: usize, timestamp: DateTime<Utc>, price: f64) {
        match self.time {
            Some(t) if t == timestamp => {}
            Some(_) => {
                self.time = Some(timestamp);
                self.bars_elapsed += 1;
                self.latest.iter_mut().for_each(|p| *p = None);
            }
            None => self.time = Some(timestamp),
        }
        self.latest[leg] = Some(price);
    }

    fn leg_quantity(&self, weight: f64) -> u64 {
        (self.quantity as f64 * weight.abs()).floor() as u64
    }

    /// Buy (`long == true`) or sell one scaled unit of the basket
    fn enter(&self, queue: &mut EventQueue, timestamp: DateTime<Utc>, long: bool) {
        for (symbol, &weight) in self.symbols.iter().zip(&self.weights) {
            let direction = if (weight >= 0.0) == long {
                Direction::Long
            } else {
                Direction::Short
            };
            queue.push(
                SignalEvent::new(symbol, timestamp, direction)
                    .with_quantity(self.leg_quantity(weight)),
            );
        }
    }

    fn exit(&self, queue: &mut EventQueue, timestamp: DateTime<Utc>) {
        for symbol in &self.symbols {
            queue.push(SignalEvent::new(symbol, timestamp, Direction::Exit));
        }
    }
}

impl Strategy for CointegrationBollingerStrategy {
    fn name(&self) -> &str {
        "Cointegration Bollinger"
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
        let Some(leg) = self.symbols.iter().position(|s| *s == market.symbol) else {
            return Ok(());
        };

        let price = feed.latest_price(&market.symbol)?;
        self.observe(leg, market.timestamp, price);

        let Some(prices) = self.latest.iter().copied().collect::<Option<Vec<f64>>>() else {
            return Ok(());
        };
        self.latest.iter_mut().for_each(|p| *p = None);

        let value: f64 = prices.iter().zip(&self.weights).map(|(p, w)| p * w).sum();
        self.basket.push(value);
        if self.bars_elapsed <= self.lookback {
            return Ok(());
        }

        let (Some(mean), Some(std), Some(latest)) =
            (self.basket.mean(), self.basket.std_dev(), self.basket.latest())
        else {
            return Ok(());
        };
        // Flat basket: the band has no width
        if std == 0.0 {
            return Ok(());
        }
        let zscore = (latest - mean) / std;
        debug!(zscore, basket = latest, "basket z-score");

        let ts = market.timestamp;
        match self.invested {
            None if zscore < -self.entry_z => {
                info!(%ts, zscore, "long basket");
                self.enter(queue, ts, true);
                self.invested = Some(BasketPosition::Long);
            }
            None if zscore > self.entry_z => {
                info!(%ts, zscore, "short basket");
                self.enter(queue, ts, false);
                self.invested = Some(BasketPosition::Short);
            }
            Some(BasketPosition::Long) if zscore >= -self.exit_z => {
                info!(%ts, zscore, "closing long basket");
                self.exit(queue, ts);
                self.invested = None;
            }
            Some(BasketPosition::Short) if zscore <= self.exit_z => {
                info!(%ts, zscore, "closing short basket");
                self.exit(queue, ts);
                self.invested = None;
            }
            _ => {}
        }
        Ok(())
    }
}
