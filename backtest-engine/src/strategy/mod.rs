//! Signal-generating strategies
//!
//! A strategy sees every event the engine routes to it and pushes zero or
//! more `Signal` events. Event kinds a strategy has no use for are ignored.

pub mod buy_and_hold;
pub mod coint_bollinger;
pub mod forecast;
pub mod kalman;
pub mod moving_average;
pub mod rebalance;
pub mod scripted;
pub mod sentiment;

use common::{BacktestError, Result, StrategyConfig};

use crate::data::DataHandler;
use crate::event::{Event, EventQueue};

pub use buy_and_hold::BuyAndHoldStrategy;
pub use coint_bollinger::CointegrationBollingerStrategy;
pub use forecast::{ForecastStrategy, Predictor, SignOfMomentumPredictor};
pub use kalman::{KalmanFilter, KalmanPairsStrategy, KalmanUpdate};
pub use moving_average::MovingAverageCrossStrategy;
pub use rebalance::MonthlyRebalanceStrategy;
pub use scripted::ScriptedStrategy;
pub use sentiment::SentimentStrategy;

pub trait Strategy {
    fn name(&self) -> &str;

    fn calculate_signals(
        &mut self,
        event: &Event,
        feed: &dyn DataHandler,
        queue: &mut EventQueue,
    ) -> Result<()>;
}

/// Build the configured strategy for `symbols`
pub fn build_strategy(config: &StrategyConfig, symbols: &[String]) -> Result<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match config {
        StrategyConfig::BuyAndHold => Box::new(BuyAndHoldStrategy::new()),
        StrategyConfig::MovingAverageCross {
            short_window,
            long_window,
        } => Box::new(MovingAverageCrossStrategy::new(
            symbols,
            *short_window,
            *long_window,
        )),
        StrategyConfig::Forecast { lags } => Box::new(ForecastStrategy::new(
            symbols,
            *lags,
            Box::new(SignOfMomentumPredictor),
        )),
        StrategyConfig::KalmanPairs {
            quantity,
            delta,
            observation_variance,
        } => {
            let [x, y] = symbols else {
                return Err(BacktestError::InvalidParameter(format!(
                    "Kalman pairs needs exactly two symbols, got {}",
                    symbols.len()
                )));
            };
            Box::new(
                KalmanPairsStrategy::new(x.clone(), y.clone(), *quantity)
                    .with_filter(KalmanFilter::new(*delta, *observation_variance)),
            )
        }
        StrategyConfig::Sentiment {
            buy_threshold,
            sell_threshold,
            quantity,
        } => Box::new(SentimentStrategy::new(
            symbols,
            *buy_threshold,
            *sell_threshold,
            *quantity,
        )),
        StrategyConfig::CointegrationBollinger {
            lookback,
            weights,
            entry_z,
            exit_z,
            quantity,
        } => {
            if weights.len() != symbols.len() {
                return Err(BacktestError::InvalidParameter(format!(
                    "{} hedge weights for {} symbols",
                    weights.len(),
                    symbols.len()
                )));
            }
            Box::new(CointegrationBollingerStrategy::new(
                symbols, weights, *lookback, *entry_z, *exit_z, *quantity,
            ))
        }
        StrategyConfig::MonthlyRebalance { .. } => Box::new(MonthlyRebalanceStrategy::new(symbols)),
    };
    Ok(strategy)
}
