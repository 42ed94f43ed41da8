use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, Utc};
use common::{Direction, Result};

use crate::data::DataHandler;
use crate::event::{Event, EventQueue, SignalEvent};
use crate::strategy::Strategy;

/// True on the last calendar day of the month
fn is_end_of_month(ts: DateTime<Utc>) -> bool {
    let date = ts.date_naive();
    match date.checked_add_days(Days::new(1)) {
        Some(next) => next.month() != date.month(),
        None => true,
    }
}

/// Liquidate and re-buy every symbol at each month end
///
/// Emits EXIT (once something is held) followed by LONG; the
/// `LiquidateRebalanceSizer` turns those into weighted orders.
#[derive(Debug)]
pub struct MonthlyRebalanceStrategy {
    invested: BTreeMap<String, bool>,
}

impl MonthlyRebalanceStrategy {
    pub fn new(symbols: &[String]) -> Self {
        Self {
            invested: symbols.iter().map(|s| (s.clone(), false)).collect(),
        }
    }
}

impl Strategy for MonthlyRebalanceStrategy {
    fn name(&self) -> &str {
        "Monthly Rebalance"
    }

    fn calculate_signals(
        &mut self,
        event: &Event,
        _feed: &dyn DataHandler,
        queue: &mut EventQueue,
    ) -> Result<()> {
        let Event::Market(market) = event else {
            return Ok(());
        };
        if !is_end_of_month(market.timestamp) {
            return Ok(());
        }
        let Some(invested) = self.invested.get_mut(&market.symbol) else {
            return Ok(());
        };

        if *invested {
            queue.push(SignalEvent::new(&market.symbol, market.timestamp, Direction::Exit));
        }
        queue.push(SignalEvent::new(&market.symbol, market.timestamp, Direction::Long));
        *invested = true;
        Ok(())
    }
}
