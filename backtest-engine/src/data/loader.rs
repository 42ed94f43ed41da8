use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use common::{BacktestError, Bar, Result};

/// Load bars from CSV file
pub fn load_csv(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path)
        .map_err(|e| BacktestError::DataLoadError(format!("{}: {}", path.display(), e)))?;
    let reader = BufReader::new(file);
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut bars = Vec::new();

    for result in csv_reader.records() {
        let record = result.map_err(|e| BacktestError::CsvError(e.to_string()))?;

        // Expected columns: datetime, open, high, low, close, volume, [adj_close]
        if record.len() < 6 {
            continue;
        }

        let timestamp = parse_timestamp(&record[0])?;
        let open = parse_price(&record[1], "open")?;
        let high = parse_price(&record[2], "high")?;
        let low = parse_price(&record[3], "low")?;
        let close = parse_price(&record[4], "close")?;
        // Vendors sometimes write volume as a float
        let volume = record[5]
            .parse::<u64>()
            .or_else(|_| record[5].parse::<f64>().map(|v| v.max(0.0) as u64))
            .map_err(|_| BacktestError::CsvError(format!("Invalid volume: {}", &record[5])))?;

        let adj_close = if record.len() > 6 {
            record[6].parse().ok()
        } else {
            None
        };

        bars.push(Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            adj_close,
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

/// Load bars from JSON file
pub fn load_json(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path)
        .map_err(|e| BacktestError::DataLoadError(format!("{}: {}", path.display(), e)))?;
    let reader = BufReader::new(file);
    let mut bars: Vec<Bar> = serde_json::from_reader(reader)?;
    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

/// Load `<dir>/<SYMBOL>.csv` for every symbol
pub fn load_csv_dir(dir: &Path, symbols: &[String]) -> Result<BTreeMap<String, Vec<Bar>>> {
    symbols
        .iter()
        .map(|symbol| {
            let path = dir.join(format!("{}.csv", symbol));
            load_csv(&path).map(|bars| (symbol.clone(), bars))
        })
        .collect()
}

fn parse_price(s: &str, column: &str) -> Result<f64> {
    s.trim()
        .parse()
        .map_err(|_| BacktestError::CsvError(format!("Invalid {} price: {}", column, s)))
}

/// Parse timestamp from various formats
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    // Try ISO 8601 format first
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try common formats
    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d",
    ];

    for fmt in &formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(s, fmt) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&dt));
            }
        }
    }

    // Try Unix timestamp (seconds)
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(BacktestError::CsvError(format!(
        "Unable to parse timestamp: {}",
        s
    )))
}
