use std::collections::BTreeMap;

use common::{Direction, Result};
use tracing::debug;

use crate::data::DataHandler;
use crate::event::{Event, EventQueue, SignalEvent};
use crate::indicators::RollingWindow;
use crate::strategy::Strategy;

#[derive(Debug)]
struct CrossState {
    short: RollingWindow,
    long: RollingWindow,
    invested: bool,
}

/// Long-only simple moving average crossover
///
/// Goes long when the short average crosses above the long one and exits
/// when it falls back below.
#[derive(Debug)]
pub struct MovingAverageCrossStrategy {
    states: BTreeMap<String, CrossState>,
}

impl MovingAverageCrossStrategy {
    pub fn new(symbols: &[String], short_window: usize, long_window: usize) -> Self {
        let states = symbols
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    CrossState {
                        short: RollingWindow::new(short_window),
                        long: RollingWindow::new(long_window),
                        invested: false,
                    },
                )
            })
            .collect();
        Self { states }
    }
}

impl Strategy for MovingAverageCrossStrategy {
    fn name(&self) -> &str {
        "Moving Average Cross"
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

        let price = feed.latest_price(&market.symbol)?;
        state.short.push(price);
        state.long.push(price);

        let (Some(short_sma), Some(long_sma)) = (state.short.mean(), state.long.mean()) else {
            return Ok(());
        };

        if short_sma > long_sma && !state.invested {
            debug!(symbol = %market.symbol, short_sma, long_sma, "golden cross");
            queue.push(SignalEvent::new(&market.symbol, market.timestamp, Direction::Long));
            state.invested = true;
        } else if short_sma < long_sma && state.invested {
            debug!(symbol = %market.symbol, short_sma, long_sma, "death cross");
            queue.push(SignalEvent::new(&market.symbol, market.timestamp, Direction::Exit));
            state.invested = false;
        }
        Ok(())
    }
}
