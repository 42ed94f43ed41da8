use std::collections::BTreeMap;

use common::{Direction, Result};

use crate::data::DataHandler;
use crate::event::{Event, EventQueue, SignalEvent};
use crate::strategy::Strategy;

/// Emits fixed signals at fixed bar indices
///
/// Bar indices count `Market` events per symbol, starting at zero.
#[derive(Debug, Default)]
pub struct ScriptedStrategy {
    script: Vec<(usize, String, Direction)>,
    bars_seen: BTreeMap<String, usize>,
}

impl ScriptedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, bar_index: usize, symbol: impl Into<String>, direction: Direction) -> Self {
        self.script.push((bar_index, symbol.into(), direction));
        self
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "Scripted"
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

        let seen = self.bars_seen.entry(market.symbol.clone()).or_insert(0);
        let index = *seen;
        *seen += 1;

        for (_, symbol, direction) in self
            .script
            .iter()
            .filter(|(at, symbol, _)| *at == index && *symbol == market.symbol)
        {
            queue.push(SignalEvent::new(symbol, market.timestamp, *direction));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{bars_from_closes, HistoricDataHandler};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_signals_on_scripted_bars() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut feed =
            HistoricDataHandler::single("SPY", bars_from_closes(start, &[1.0, 2.0, 3.0])).unwrap();
        let mut strategy = ScriptedStrategy::new()
            .at(1, "SPY", Direction::Long)
            .at(2, "SPY", Direction::Exit)
            .at(2, "QQQ", Direction::Long);

        let mut directions = Vec::new();
        while feed.has_more_data() {
            let mut market_events = EventQueue::new();
            feed.update_bars(&mut market_events).unwrap();
            let mut signals = EventQueue::new();
            while let Some(event) = market_events.poll() {
                strategy.calculate_signals(&event, &feed, &mut signals).unwrap();
            }
            while let Some(Event::Signal(signal)) = signals.poll() {
                directions.push(signal.direction);
            }
        }

        assert_eq!(directions, vec![Direction::Long, Direction::Exit]);
    }
}
