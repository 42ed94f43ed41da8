use std::collections::BTreeMap;

use common::{Direction, Result};
use tracing::info;

use crate::data::DataHandler;
use crate::event::{Event, EventQueue, SignalEvent};
use crate::strategy::Strategy;

/// Long-only strategy on external sentiment scores
///
/// Buys `quantity` when a score reaches `buy_threshold` and closes when a
/// score falls to `sell_threshold`. Price events are ignored.
#[derive(Debug)]
pub struct SentimentStrategy {
    buy_threshold: i64,
    sell_threshold: i64,
    quantity: u64,
    invested: BTreeMap<String, bool>,
}

impl SentimentStrategy {
    pub fn new(symbols: &[String], buy_threshold: i64, sell_threshold: i64, quantity: u64) -> Self {
        Self {
            buy_threshold,
            sell_threshold,
            quantity,
            invested: symbols.iter().map(|s| (s.clone(), false)).collect(),
        }
    }
}

impl Strategy for SentimentStrategy {
    fn name(&self) -> &str {
        "Sentiment"
    }

    fn calculate_signals(
        &mut self,
        event: &Event,
        _feed: &dyn DataHandler,
        queue: &mut EventQueue,
    ) -> Result<()> {
        let Event::Sentiment(reading) = event else {
            return Ok(());
        };
        let Some(invested) = self.invested.get_mut(&reading.symbol) else {
            return Ok(());
        };

        if !*invested && reading.sentiment >= self.buy_threshold {
            info!(symbol = %reading.symbol, sentiment = reading.sentiment, "sentiment long");
            queue.push(
                SignalEvent::new(&reading.symbol, reading.timestamp, Direction::Long)
                    .with_quantity(self.quantity),
            );
            *invested = true;
        }
        if *invested && reading.sentiment <= self.sell_threshold {
            info!(symbol = %reading.symbol, sentiment = reading.sentiment, "sentiment exit");
            queue.push(
                SignalEvent::new(&reading.symbol, reading.timestamp, Direction::Exit)
                    .with_quantity(self.quantity),
            );
            *invested = false;
        }
        Ok(())
    }
}
