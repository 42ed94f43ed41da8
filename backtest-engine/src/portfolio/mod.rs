//! Position and holdings ledger
//!
//! `Portfolio` is the only owner of position and cash state. It marks
//! positions to market once per bar timestamp, turns signals into orders
//! through a sizer and a risk manager, and books fills.

pub mod report;
pub mod risk;
pub mod sizer;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use common::{
    BacktestError, EquityCurveRow, HoldingsSnapshot, PerformanceMetrics, PositionSnapshot, Result,
    SummaryStat,
};
use tracing::{debug, info};

use crate::data::DataHandler;
use crate::event::{EventQueue, FillEvent, MarketEvent, SignalEvent};
use crate::metrics::MetricsCalculator;

pub use report::{build_equity_curve, write_equity_csv};
pub use risk::{
    NaiveRiskManager, Regime, RegimeClassifier, RegimeFilterRiskManager, RiskManager,
    VolatilityRegimeClassifier,
};
pub use sizer::{
    FixedQuantitySizer, LiquidateRebalanceSizer, PositionSizer, SizingContext,
    SuggestedQuantitySizer,
};

/// Instantaneous holdings, updated on every fill
#[derive(Debug, Clone)]
struct CurrentHoldings {
    cash: f64,
    commission: f64,
    total: f64,
}

/// Statistics produced at the end of a run
#[derive(Debug, Clone)]
pub struct SummaryReport {
    pub metrics: PerformanceMetrics,
    pub stats: Vec<SummaryStat>,
    pub equity_curve: Vec<EquityCurveRow>,
}

pub struct Portfolio {
    symbols: Vec<String>,
    initial_capital: f64,
    current_positions: BTreeMap<String, i64>,
    current_holdings: CurrentHoldings,
    all_positions: Vec<PositionSnapshot>,
    all_holdings: Vec<HoldingsSnapshot>,
    last_marked: Option<DateTime<Utc>>,
    sizer: Box<dyn PositionSizer>,
    risk_manager: Box<dyn RiskManager>,
}

impl Portfolio {
    /// Flat portfolio holding only cash, with the first snapshot at `start_date`
    pub fn new(symbols: Vec<String>, start_date: DateTime<Utc>, initial_capital: f64) -> Self {
        let current_positions: BTreeMap<String, i64> =
            symbols.iter().map(|s| (s.clone(), 0)).collect();
        let zero_values: BTreeMap<String, f64> = symbols.iter().map(|s| (s.clone(), 0.0)).collect();

        let all_positions = vec![PositionSnapshot {
            timestamp: start_date,
            positions: current_positions.clone(),
        }];
        let all_holdings = vec![HoldingsSnapshot {
            timestamp: start_date,
            market_values: zero_values,
            cash: initial_capital,
            commission: 0.0,
            total: initial_capital,
        }];

        Self {
            symbols,
            initial_capital,
            current_positions,
            current_holdings: CurrentHoldings {
                cash: initial_capital,
                commission: 0.0,
                total: initial_capital,
            },
            all_positions,
            all_holdings,
            last_marked: None,
            sizer: Box::new(FixedQuantitySizer::default()),
            risk_manager: Box::new(NaiveRiskManager),
        }
    }

    pub fn with_sizer(mut self, sizer: Box<dyn PositionSizer>) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn with_risk_manager(mut self, risk_manager: Box<dyn RiskManager>) -> Self {
        self.risk_manager = risk_manager;
        self
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn cash(&self) -> f64 {
        self.current_holdings.cash
    }

    pub fn commission(&self) -> f64 {
        self.current_holdings.commission
    }

    /// Cash plus cost of fills, before marking to market
    pub fn book_total(&self) -> f64 {
        self.current_holdings.total
    }

    pub fn position(&self, symbol: &str) -> i64 {
        self.current_positions.get(symbol).copied().unwrap_or(0)
    }

    pub fn current_positions(&self) -> &BTreeMap<String, i64> {
        &self.current_positions
    }

    pub fn all_positions(&self) -> &[PositionSnapshot] {
        &self.all_positions
    }

    pub fn all_holdings(&self) -> &[HoldingsSnapshot] {
        &self.all_holdings
    }

    fn market_value(&self, symbol: &str, feed: &dyn DataHandler) -> Result<f64> {
        let quantity = self.position(symbol);
        if quantity == 0 {
            return Ok(0.0);
        }
        Ok(quantity as f64 * feed.latest_price(symbol)?)
    }

    /// Cash plus every position marked at the feed's latest price
    pub fn equity(&self, feed: &dyn DataHandler) -> Result<f64> {
        let mut total = self.current_holdings.cash;
        for symbol in &self.symbols {
            total += self.market_value(symbol, feed)?;
        }
        Ok(total)
    }

    /// Record positions and marked holdings for the event's bar
    ///
    /// Only the first Market event of a timestamp appends snapshots. Values use
    /// positions as they stand before any fill generated on this bar.
    pub fn update_timeindex(&mut self, event: &MarketEvent, feed: &dyn DataHandler) -> Result<bool> {
        if self.last_marked == Some(event.timestamp) {
            return Ok(false);
        }

        let mut market_values = BTreeMap::new();
        let mut total = self.current_holdings.cash;
        for symbol in &self.symbols {
            let value = self.market_value(symbol, feed)?;
            total += value;
            market_values.insert(symbol.clone(), value);
        }

        self.all_positions.push(PositionSnapshot {
            timestamp: event.timestamp,
            positions: self.current_positions.clone(),
        });
        self.all_holdings.push(HoldingsSnapshot {
            timestamp: event.timestamp,
            market_values,
            cash: self.current_holdings.cash,
            commission: self.current_holdings.commission,
            total,
        });
        self.last_marked = Some(event.timestamp);
        Ok(true)
    }

    /// Size the signal, pass it through risk management and queue the orders
    ///
    /// Signals for a symbol with no bar yet produce no orders.
    pub fn update_signal(
        &mut self,
        signal: &SignalEvent,
        feed: &dyn DataHandler,
        queue: &mut EventQueue,
    ) -> Result<usize> {
        // Nothing can be priced or filled before the symbol's first bar
        let price = match feed.latest_price(&signal.symbol) {
            Ok(price) => price,
            Err(BacktestError::NoData(_)) => {
                debug!(symbol = %signal.symbol, "signal before first bar ignored");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        let ctx = SizingContext {
            current_quantity: self.position(&signal.symbol),
            price: Some(price),
            equity: self.equity(feed)?,
        };

        let Some(order) = self.sizer.size_order(signal, &ctx) else {
            debug!(symbol = %signal.symbol, direction = %signal.direction, "signal produced no order");
            return Ok(0);
        };

        let orders = self.risk_manager.refine_orders(order, &ctx, feed)?;
        let count = orders.len();
        for order in orders {
            info!(
                symbol = %order.symbol,
                side = %order.direction,
                quantity = order.quantity,
                "order"
            );
            queue.push(order);
        }
        Ok(count)
    }

    /// Book a fill against positions and holdings
    pub fn update_fill(&mut self, fill: &FillEvent) -> Result<()> {
        let position = self
            .current_positions
            .get_mut(&fill.symbol)
            .ok_or_else(|| BacktestError::UnknownSymbol(fill.symbol.clone()))?;
        let sign = fill.direction.sign();
        *position += sign * fill.quantity as i64;

        let cost = sign as f64 * fill.fill_cost * fill.quantity as f64;
        let holdings = &mut self.current_holdings;
        holdings.commission += fill.commission;
        holdings.cash -= cost + fill.commission;
        holdings.total -= cost + fill.commission;
        Ok(())
    }

    pub fn create_equity_curve(&self) -> Vec<EquityCurveRow> {
        build_equity_curve(&self.all_holdings)
    }

    /// Build the equity curve and its statistics, writing the curve to `output` if given
    pub fn output_summary_stats(
        &self,
        periods_per_year: f64,
        output: Option<&Path>,
    ) -> Result<SummaryReport> {
        let equity_curve = self.create_equity_curve();
        let metrics =
            MetricsCalculator::calculate(&equity_curve, self.initial_capital, periods_per_year);
        let stats = MetricsCalculator::summary_stats(&metrics);

        if let Some(path) = output {
            write_equity_csv(path, &self.symbols, &equity_curve)?;
            info!(path = %path.display(), rows = equity_curve.len(), "equity curve written");
        }

        Ok(SummaryReport {
            metrics,
            stats,
            equity_curve,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{bars_from_closes, HistoricDataHandler};
    use crate::event::{Event, OrderEvent};
    use chrono::{Duration, TimeZone};
    use common::{Direction, OrderSide};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn fill(symbol: &str, quantity: u64, direction: OrderSide, price: f64, commission: f64) -> FillEvent {
        FillEvent {
            symbol: symbol.to_string(),
            timestamp: start(),
            exchange: "ARCA".to_string(),
            quantity,
            direction,
            fill_cost: price,
            commission,
        }
    }

    fn advanced_feed(closes: &[f64], steps: usize) -> HistoricDataHandler {
        let mut feed = HistoricDataHandler::single("SPY", bars_from_closes(start(), closes)).unwrap();
        let mut queue = EventQueue::new();
        for _ in 0..steps {
            feed.update_bars(&mut queue).unwrap();
        }
        feed
    }

    fn market(day: i64) -> MarketEvent {
        MarketEvent {
            symbol: "SPY".to_string(),
            timestamp: start() + Duration::days(day),
        }
    }

    #[test]
    fn test_initial_state() {
        let portfolio = Portfolio::new(vec!["SPY".into(), "AGG".into()], start(), 100_000.0);
        assert_eq!(portfolio.cash(), 100_000.0);
        assert_eq!(portfolio.commission(), 0.0);
        assert_eq!(portfolio.position("SPY"), 0);
        assert_eq!(portfolio.all_holdings().len(), 1);
        assert_eq!(portfolio.all_positions().len(), 1);
        let first = &portfolio.all_holdings()[0];
        assert_eq!(first.total, 100_000.0);
        assert_eq!(first.timestamp, start());
        assert_eq!(first.market_values.len(), 2);
    }

    #[test]
    fn test_position_is_signed_sum_of_fills() {
        let mut portfolio = Portfolio::new(vec!["SPY".into(), "AGG".into()], start(), 100_000.0);
        let fills = [
            fill("SPY", 100, OrderSide::Buy, 10.0, 0.0),
            fill("SPY", 30, OrderSide::Sell, 11.0, 1.0),
            fill("AGG", 50, OrderSide::Sell, 20.0, 0.5),
            fill("SPY", 200, OrderSide::Sell, 12.0, 0.0),
            fill("AGG", 20, OrderSide::Buy, 19.0, 0.0),
        ];
        for f in &fills {
            portfolio.update_fill(f).unwrap();
        }

        for symbol in ["SPY", "AGG"] {
            let expected: i64 = fills
                .iter()
                .filter(|f| f.symbol == symbol)
                .map(|f| f.direction.sign() * f.quantity as i64)
                .sum();
            assert_eq!(portfolio.position(symbol), expected);
        }
        assert_eq!(portfolio.position("SPY"), -130);
        assert_eq!(portfolio.position("AGG"), -30);

        let spent: f64 = fills
            .iter()
            .map(|f| f.direction.sign() as f64 * f.fill_cost * f.quantity as f64 + f.commission)
            .sum();
        assert!((portfolio.cash() - (100_000.0 - spent)).abs() < 1e-9);
        assert!((portfolio.commission() - 1.5).abs() < 1e-12);
        assert_eq!(portfolio.book_total(), portfolio.cash());
    }

    #[test]
    fn test_unknown_symbol_fill_is_an_error() {
        let mut portfolio = Portfolio::new(vec!["SPY".into()], start(), 1_000.0);
        let result = portfolio.update_fill(&fill("QQQ", 1, OrderSide::Buy, 1.0, 0.0));
        assert!(matches!(result, Err(BacktestError::UnknownSymbol(_))));
    }

    #[test]
    fn test_timeindex_once_per_timestamp() {
        let feed = advanced_feed(&[100.0, 101.0], 1);
        let mut portfolio = Portfolio::new(vec!["SPY".into()], start(), 10_000.0);

        assert!(portfolio.update_timeindex(&market(0), &feed).unwrap());
        assert!(!portfolio.update_timeindex(&market(0), &feed).unwrap());
        assert_eq!(portfolio.all_holdings().len(), 2);
    }

    #[test]
    fn test_snapshot_totals_reconcile() {
        let closes = [100.0, 101.0, 99.0, 104.0];
        let mut feed = HistoricDataHandler::single("SPY", bars_from_closes(start(), &closes)).unwrap();
        let mut queue = EventQueue::new();
        let mut portfolio = Portfolio::new(vec!["SPY".into()], start(), 50_000.0);
        let mut booked_costs = 0.0;

        for (day, &price) in closes.iter().enumerate() {
            feed.update_bars(&mut queue).unwrap();
            portfolio.update_timeindex(&market(day as i64), &feed).unwrap();

            let f = if day % 2 == 0 {
                fill("SPY", 10, OrderSide::Buy, price, 1.0)
            } else {
                fill("SPY", 4, OrderSide::Sell, price, 1.0)
            };
            booked_costs += f.direction.sign() as f64 * f.fill_cost * f.quantity as f64 + f.commission;
            portfolio.update_fill(&f).unwrap();
        }

        // Snapshot 0 is the initial state; snapshot i >= 1 is taken on day i - 1
        // before that day's fill
        let mut costs_before = vec![0.0, 0.0];
        let mut running = 0.0;
        for (day, &price) in closes.iter().enumerate() {
            let qty = if day % 2 == 0 { 10.0 } else { -4.0 };
            running += qty * price + 1.0;
            costs_before.push(running);
        }

        assert_eq!(portfolio.all_holdings().len(), closes.len() + 1);
        for (i, snapshot) in portfolio.all_holdings().iter().enumerate() {
            assert!((snapshot.total - snapshot.marked_total()).abs() < 1e-9);
            let market_value: f64 = snapshot.market_values.values().sum();
            let from_costs = 50_000.0 - costs_before[i] + market_value;
            assert!((snapshot.total - from_costs).abs() < 1e-9);
        }
        assert!((portfolio.cash() - (50_000.0 - booked_costs)).abs() < 1e-9);
    }

    #[test]
    fn test_long_signal_while_flat_emits_one_buy() {
        let feed = advanced_feed(&[100.0], 1);
        let mut portfolio = Portfolio::new(vec!["SPY".into()], start(), 100_000.0);
        let mut queue = EventQueue::new();

        let long = SignalEvent::new("SPY", start(), Direction::Long);
        assert_eq!(portfolio.update_signal(&long, &feed, &mut queue).unwrap(), 1);
        assert_eq!(
            queue.poll(),
            Some(Event::Order(OrderEvent::market("SPY", 100, OrderSide::Buy)))
        );

        portfolio.update_fill(&fill("SPY", 100, OrderSide::Buy, 100.0, 0.0)).unwrap();
        assert_eq!(portfolio.update_signal(&long, &feed, &mut queue).unwrap(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_exit_while_flat_emits_nothing() {
        let feed = advanced_feed(&[100.0], 1);
        let mut portfolio = Portfolio::new(vec!["SPY".into()], start(), 100_000.0);
        let mut queue = EventQueue::new();

        let exit = SignalEvent::new("SPY", start(), Direction::Exit);
        assert_eq!(portfolio.update_signal(&exit, &feed, &mut queue).unwrap(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_signal_before_first_bar_emits_nothing() {
        let feed = advanced_feed(&[100.0], 0);
        let mut portfolio = Portfolio::new(vec!["SPY".into()], start(), 100_000.0);
        let mut queue = EventQueue::new();

        let long = SignalEvent::new("SPY", start(), Direction::Long);
        assert_eq!(portfolio.update_signal(&long, &feed, &mut queue).unwrap(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_summary_writes_curve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equity.csv");
        let feed = advanced_feed(&[100.0, 110.0], 2);
        let mut portfolio = Portfolio::new(vec!["SPY".into()], start() - Duration::days(1), 10_000.0);
        portfolio.update_fill(&fill("SPY", 10, OrderSide::Buy, 100.0, 0.0)).unwrap();
        portfolio.update_timeindex(&market(1), &feed).unwrap();

        let report = portfolio.output_summary_stats(252.0, Some(&path)).unwrap();
        assert_eq!(report.equity_curve.len(), 2);
        assert!((report.equity_curve[1].total - 10_100.0).abs() < 1e-9);
        assert_eq!(report.stats[0].value, "1.00%");
        assert!(path.exists());
    }
}
