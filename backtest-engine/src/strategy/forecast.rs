use std::collections::BTreeMap;

use common::{Direction, Result};
use tracing::debug;

use crate::data::DataHandler;
use crate::event::{Event, EventQueue, SignalEvent};
use crate::indicators::{lagged_returns_pct, RollingWindow};
use crate::strategy::Strategy;

/// Opaque directional model
///
/// Features are lagged percentage returns, most recent first. A positive
/// output means "up", negative means "down"; zero is no view.
pub trait Predictor {
    fn predict(&self, features: &[f64]) -> f64;
}

/// Predicts the sign of the summed lagged returns
#[derive(Debug, Clone, Copy, Default)]
pub struct SignOfMomentumPredictor;

impl Predictor for SignOfMomentumPredictor {
    fn predict(&self, features: &[f64]) -> f64 {
        let sum: f64 = features.iter().sum();
        if sum > 0.0 {
            1.0
        } else if sum < 0.0 {
            -1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
struct ForecastState {
    prices: RollingWindow,
    invested: bool,
}

/// Long/exit strategy driven by a return forecast
pub struct ForecastStrategy {
    predictor: Box<dyn Predictor>,
    states: BTreeMap<String, ForecastState>,
}

impl ForecastStrategy {
    pub fn new(symbols: &[String], lags: usize, predictor: Box<dyn Predictor>) -> Self {
        let lags = lags.max(1);
        let states = symbols
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    ForecastState {
                        prices: RollingWindow::new(lags + 1),
                        invested: false,
                    },
                )
            })
            .collect();
        Self { predictor, states }
    }
}

impl Strategy for ForecastStrategy {
    fn name(&self) -> &str {
        "Forecast"
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
        let Some(state) = self.states.get_mut(&market.symbol) else {
            return Ok(());
        };

        state.prices.push(feed.latest_price(&market.symbol)?);
        if !state.prices.is_full() {
            return Ok(());
        }

        let features = lagged_returns_pct(&state.prices);
        let prediction = self.predictor.predict(&features);
        debug!(symbol = %market.symbol, prediction, "forecast");

        if prediction > 0.0 && !state.invested {
            queue.push(SignalEvent::new(&market.symbol, market.timestamp, Direction::Long));
            state.invested = true;
        } else if prediction < 0.0 && state.invested {
            queue.push(SignalEvent::new(&market.symbol, market.timestamp, Direction::Exit));
            state.invested = false;
        }
        Ok(())
    }
}
