use std::collections::BTreeSet;

use common::{Direction, Result};

use crate::data::DataHandler;
use crate::event::{Event, EventQueue, SignalEvent};
use crate::strategy::Strategy;

/// Goes long every symbol on its first bar and never trades again
#[derive(Debug, Default)]
pub struct BuyAndHoldStrategy {
    bought: BTreeSet<String>,
}

impl BuyAndHoldStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        "Buy and Hold"
    }

    fn calculate_signals(
        &mut self,
        event: &Event,
        _feed: &dyn DataHandler,
        queue: &mut EventQueue,
    ) -> Result<()> {
        if let Event::Market(market) = event {
            if self.bought.insert(market.symbol.clone()) {
                queue.push(SignalEvent::new(
                    &market.symbol,
                    market.timestamp,
                    Direction::Long,
                ));
            }
        }
        Ok(())
    }
}
