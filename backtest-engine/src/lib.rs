pub mod data;
pub mod engine;
pub mod event;
pub mod execution;
pub mod indicators;
pub mod metrics;
pub mod portfolio;
pub mod strategy;
pub mod sweep;

pub use data::{
    generate_cointegrated_pair, generate_synthetic_bars, load_file, DataHandler,
    HistoricDataHandler, SentimentHandler,
};
pub use engine::BacktestEngine;
pub use event::{
    Event, EventQueue, FillEvent, MarketEvent, OrderEvent, SentimentEvent, SignalEvent,
};
pub use execution::{ExecutionHandler, SimulatedExecutionHandler};
pub use metrics::MetricsCalculator;
pub use portfolio::{Portfolio, SummaryReport};
pub use strategy::{build_strategy, Strategy};
pub use sweep::{run_ma_cross_sweep, SweepResult};

// Re-export common types
pub use common::{
    BacktestError, BacktestParameters, BacktestResult, Bar, Direction, EventCounts,
    PerformanceMetrics, Result, StrategyConfig,
};
