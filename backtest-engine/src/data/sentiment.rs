//! Replay of daily sentiment scores as `Sentiment` events

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Utc};
use common::{BacktestError, Result};

use crate::data::loader::parse_timestamp;
use crate::event::{EventQueue, SentimentEvent};

/// Time-ordered sentiment readings, released as the backtest clock passes them
#[derive(Debug, Default)]
pub struct SentimentHandler {
    events: Vec<SentimentEvent>,
    cursor: usize,
}

impl SentimentHandler {
    pub fn new(mut events: Vec<SentimentEvent>) -> Self {
        events.sort_by_key(|e| e.timestamp);
        Self { events, cursor: 0 }
    }

    /// Load `date,symbol,sentiment_signal` rows, keeping only `symbols`
    pub fn from_csv(path: &Path, symbols: &[String]) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| BacktestError::DataLoadError(format!("{}: {}", path.display(), e)))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::new(file));
        let wanted: BTreeSet<&str> = symbols.iter().map(String::as_str).collect();

        let mut events = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| BacktestError::CsvError(e.to_string()))?;
            if record.len() < 3 || !wanted.contains(&record[1]) {
                continue;
            }
            let sentiment = record[2].trim().parse::<i64>().map_err(|_| {
                BacktestError::CsvError(format!("Invalid sentiment: {}", &record[2]))
            })?;
            events.push(SentimentEvent {
                symbol: record[1].to_string(),
                timestamp: parse_timestamp(&record[0])?,
                sentiment,
            });
        }
        Ok(Self::new(events))
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.events.len()
    }

    /// Push every reading stamped at or before `until`; returns how many
    pub fn stream_next(&mut self, until: DateTime<Utc>, queue: &mut EventQueue) -> usize {
        let start = self.cursor;
        while let Some(event) = self.events.get(self.cursor) {
            if event.timestamp > until {
                break;
            }
            queue.push(event.clone());
            self.cursor += 1;
        }
        self.cursor - start
    }
}
