//! Market data feed
//!
//! The engine only talks to `DataHandler`. `HistoricDataHandler` replays
//! bars already held in memory, merging all symbols onto one timeline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use common::{BacktestError, Bar, BarField, Result};
use tracing::debug;

use crate::data::loader::load_csv_dir;
use crate::event::{EventQueue, MarketEvent};

/// Source of time-ordered bars for a fixed symbol universe
pub trait DataHandler {
    fn symbols(&self) -> &[String];

    /// False once every timestamp has been replayed
    fn has_more_data(&self) -> bool;

    /// Advance one timestamp and push a `Market` event for each symbol that
    /// has a bar at it. Returns the number of events pushed.
    fn update_bars(&mut self, queue: &mut EventQueue) -> Result<usize>;

    /// Up to `n` most recent bars, oldest first
    fn latest_bars(&self, symbol: &str, n: usize) -> Result<&[Bar]>;

    fn latest_bar(&self, symbol: &str) -> Result<&Bar> {
        self.latest_bars(symbol, 1)?
            .last()
            .ok_or_else(|| BacktestError::NoData(symbol.to_string()))
    }

    fn latest_bar_datetime(&self, symbol: &str) -> Result<DateTime<Utc>> {
        Ok(self.latest_bar(symbol)?.timestamp)
    }

    fn latest_bar_value(&self, symbol: &str, field: BarField) -> Result<f64> {
        Ok(self.latest_bar(symbol)?.value(field))
    }

    fn latest_bars_values(&self, symbol: &str, field: BarField, n: usize) -> Result<Vec<f64>> {
        Ok(self
            .latest_bars(symbol, n)?
            .iter()
            .map(|b| b.value(field))
            .collect())
    }

    /// Price used for marking positions and filling orders
    fn latest_price(&self, symbol: &str) -> Result<f64> {
        self.latest_bar_value(symbol, BarField::AdjClose)
    }

    /// Most recent bar timestamp across the universe
    fn current_datetime(&self) -> Option<DateTime<Utc>> {
        self.symbols()
            .iter()
            .filter_map(|s| self.latest_bar_datetime(s).ok())
            .max()
    }
}

/// In-memory replay of historic bars
#[derive(Debug)]
pub struct HistoricDataHandler {
    symbols: Vec<String>,
    data: BTreeMap<String, Vec<Bar>>,
    timeline: Vec<DateTime<Utc>>,
    cursors: BTreeMap<String, usize>,
    latest: BTreeMap<String, Vec<Bar>>,
    position: usize,
}

impl HistoricDataHandler {
    /// Build a feed for `symbols`; every symbol must have at least one bar
    pub fn new(symbols: Vec<String>, mut data: BTreeMap<String, Vec<Bar>>) -> Result<Self> {
        if symbols.is_empty() {
            return Err(BacktestError::InvalidParameter(
                "feed needs at least one symbol".to_string(),
            ));
        }

        let mut timeline = BTreeSet::new();
        for symbol in &symbols {
            let bars = data
                .get_mut(symbol)
                .ok_or_else(|| BacktestError::UnknownSymbol(symbol.clone()))?;
            if bars.is_empty() {
                return Err(BacktestError::InsufficientData {
                    required: 1,
                    actual: 0,
                });
            }
            bars.sort_by_key(|b| b.timestamp);
            bars.dedup_by_key(|b| b.timestamp);
            timeline.extend(bars.iter().map(|b| b.timestamp));
        }
        data.retain(|symbol, _| symbols.contains(symbol));

        let cursors = symbols.iter().map(|s| (s.clone(), 0)).collect();
        let latest = symbols.iter().map(|s| (s.clone(), Vec::new())).collect();

        Ok(Self {
            symbols,
            data,
            timeline: timeline.into_iter().collect(),
            cursors,
            latest,
            position: 0,
        })
    }

    /// Feed with a single symbol
    pub fn single(symbol: impl Into<String>, bars: Vec<Bar>) -> Result<Self> {
        let symbol = symbol.into();
        let mut data = BTreeMap::new();
        data.insert(symbol.clone(), bars);
        Self::new(vec![symbol], data)
    }

    /// Load `<dir>/<SYMBOL>.csv` for each symbol
    pub fn from_csv_dir(dir: &Path, symbols: &[String]) -> Result<Self> {
        let data = load_csv_dir(dir, symbols)?;
        Self::new(symbols.to_vec(), data)
    }

    /// Drop every timestamp outside `[start, end]`
    pub fn with_date_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        let in_range = |ts: &DateTime<Utc>| {
            start.map_or(true, |s| *ts >= s) && end.map_or(true, |e| *ts <= e)
        };
        self.timeline.retain(|ts| in_range(ts));
        for bars in self.data.values_mut() {
            bars.retain(|b| in_range(&b.timestamp));
        }
        self
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timeline.first().copied()
    }

    /// Number of distinct timestamps in the replay
    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    /// Timestamps replayed so far
    pub fn bars_processed(&self) -> usize {
        self.position
    }
}

impl DataHandler for HistoricDataHandler {
    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn has_more_data(&self) -> bool {
        self.position < self.timeline.len()
    }

    fn update_bars(&mut self, queue: &mut EventQueue) -> Result<usize> {
        let Some(&timestamp) = self.timeline.get(self.position) else {
            return Ok(0);
        };
        self.position += 1;

        let mut pushed = 0;
        for symbol in &self.symbols {
            let bars = &self.data[symbol];
            let cursor = self
                .cursors
                .get_mut(symbol)
                .ok_or_else(|| BacktestError::UnknownSymbol(symbol.clone()))?;
            let history = self
                .latest
                .get_mut(symbol)
                .ok_or_else(|| BacktestError::UnknownSymbol(symbol.clone()))?;

            match bars.get(*cursor) {
                Some(bar) if bar.timestamp == timestamp => {
                    history.push(bar.clone());
                    *cursor += 1;
                    queue.push(MarketEvent {
                        symbol: symbol.clone(),
                        timestamp,
                    });
                    pushed += 1;
                }
                _ => {
                    // Pad with the previous bar so lookups stay aligned
                    if let Some(prev) = history.last() {
                        let mut padded = prev.clone();
                        padded.timestamp = timestamp;
                        history.push(padded);
                        debug!(symbol = %symbol, %timestamp, "no bar, padding with previous");
                    }
                }
            }
        }

        Ok(pushed)
    }

    fn latest_bars(&self, symbol: &str, n: usize) -> Result<&[Bar]> {
        let history = self
            .latest
            .get(symbol)
            .ok_or_else(|| BacktestError::UnknownSymbol(symbol.to_string()))?;
        if history.is_empty() {
            return Err(BacktestError::NoData(symbol.to_string()));
        }
        let start = history.len().saturating_sub(n);
        Ok(&history[start..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::bars_from_closes;
    use crate::event::Event;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_replay_single_symbol() {
        let mut feed =
            HistoricDataHandler::single("SPY", bars_from_closes(start(), &[10.0, 11.0, 12.0]))
                .unwrap();
        let mut queue = EventQueue::new();

        assert!(matches!(feed.latest_bar("SPY"), Err(BacktestError::NoData(_))));

        assert_eq!(feed.update_bars(&mut queue).unwrap(), 1);
        assert_eq!(feed.latest_price("SPY").unwrap(), 10.0);
        assert_eq!(feed.update_bars(&mut queue).unwrap(), 1);
        assert_eq!(feed.update_bars(&mut queue).unwrap(), 1);
        assert!(!feed.has_more_data());
        assert_eq!(feed.update_bars(&mut queue).unwrap(), 0);

        assert_eq!(queue.len(), 3);
        assert_eq!(
            feed.latest_bars_values("SPY", BarField::Close, 2).unwrap(),
            vec![11.0, 12.0]
        );
        assert_eq!(feed.latest_bars("SPY", 10).unwrap().len(), 3);
        assert_eq!(feed.bars_processed(), 3);
    }

    #[test]
    fn test_missing_bar_is_padded_without_event() {
        let mut a = bars_from_closes(start(), &[10.0, 11.0, 12.0]);
        let b = bars_from_closes(start(), &[20.0, 21.0, 22.0]);
        a.remove(1);

        let mut data = BTreeMap::new();
        data.insert("A".to_string(), a);
        data.insert("B".to_string(), b);
        let mut feed = HistoricDataHandler::new(vec!["A".into(), "B".into()], data).unwrap();
        let mut queue = EventQueue::new();

        feed.update_bars(&mut queue).unwrap();
        assert_eq!(feed.update_bars(&mut queue).unwrap(), 1);
        let day2 = start() + Duration::days(1);
        assert_eq!(feed.latest_bar_datetime("A").unwrap(), day2);
        assert_eq!(feed.latest_price("A").unwrap(), 10.0);
        assert_eq!(feed.latest_price("B").unwrap(), 21.0);

        let symbols: Vec<String> = std::iter::from_fn(|| queue.poll())
            .map(|e| match e {
                Event::Market(m) => m.symbol,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(symbols, vec!["A", "B", "B"]);
    }

    #[test]
    fn test_unknown_symbol() {
        let feed = HistoricDataHandler::single("SPY", bars_from_closes(start(), &[1.0])).unwrap();
        assert!(matches!(
            feed.latest_bar("QQQ"),
            Err(BacktestError::UnknownSymbol(_))
        ));
        assert!(HistoricDataHandler::new(vec!["X".into()], BTreeMap::new()).is_err());
    }

    #[test]
    fn test_date_range_limits_replay() {
        let feed = HistoricDataHandler::single(
            "SPY",
            bars_from_closes(start(), &[1.0, 2.0, 3.0, 4.0, 5.0]),
        )
        .unwrap()
        .with_date_range(
            Some(start() + Duration::days(1)),
            Some(start() + Duration::days(3)),
        );
        assert_eq!(feed.len(), 3);
        assert_eq!(feed.first_timestamp(), Some(start() + Duration::days(1)));
    }
}
