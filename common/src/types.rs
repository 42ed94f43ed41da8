use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adj_close: Option<f64>,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            adj_close: None,
        }
    }

    /// Flat bar where every price equals `price`
    pub fn flat(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self::new(timestamp, price, price, price, price, 0)
    }

    /// Adjusted close, falling back to the raw close
    pub fn adj_close(&self) -> f64 {
        self.adj_close.unwrap_or(self.close)
    }

    pub fn value(&self, field: BarField) -> f64 {
        match field {
            BarField::Open => self.open,
            BarField::High => self.high,
            BarField::Low => self.low,
            BarField::Close => self.close,
            BarField::AdjClose => self.adj_close(),
            BarField::Volume => self.volume as f64,
        }
    }
}

/// Column selector for bar lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarField {
    Open,
    High,
    Low,
    Close,
    AdjClose,
    Volume,
}

/// Direction carried by a strategy signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    Exit,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
            Direction::Exit => write!(f, "EXIT"),
        }
    }
}

/// Order / fill side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells
    pub fn sign(self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    #[serde(rename = "MKT")]
    Market,
}

/// Quantities held per symbol at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub timestamp: DateTime<Utc>,
    pub positions: BTreeMap<String, i64>,
}

/// Market value of each symbol plus cash at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub market_values: BTreeMap<String, f64>,
    pub cash: f64,
    pub commission: f64,
    pub total: f64,
}

impl HoldingsSnapshot {
    /// Cash plus the sum of all market values
    pub fn marked_total(&self) -> f64 {
        self.cash + self.market_values.values().sum::<f64>()
    }
}

/// One row of the post-run equity curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityCurveRow {
    pub timestamp: DateTime<Utc>,
    pub market_values: BTreeMap<String, f64>,
    pub cash: f64,
    pub commission: f64,
    pub total: f64,
    /// Period return; undefined for the first row
    pub returns: Option<f64>,
    /// Cumulative growth factor, 1.0 at the first row
    pub equity_curve: f64,
    pub drawdown: f64,
}

/// Labelled, formatted statistic as printed in the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStat {
    pub label: String,
    pub value: String,
}

impl SummaryStat {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Performance metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Returns
    pub total_return: f64,
    pub total_return_pct: f64,
    pub cagr: f64,
    // Risk metrics; ratios are None when undefined
    pub volatility: f64,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub max_drawdown_duration: usize,
}

/// Event counts for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub signals: u64,
    pub orders: u64,
    pub fills: u64,
}

/// Backtest result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub symbols: Vec<String>,
    pub metrics: PerformanceMetrics,
    pub summary: Vec<SummaryStat>,
    pub equity_curve: Vec<EquityCurveRow>,
    pub final_positions: BTreeMap<String, i64>,
    pub counts: EventCounts,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub bars_processed: usize,
    pub execution_time_ms: u64,
}
