//! Event-driven backtest loop
//!
//! Each round pulls the next bar(s) from the feed and then drains the queue
//! until it is empty, so every Signal → Order → Fill chain caused by a bar
//! completes before the next bar arrives.

use std::thread;
use std::time::{Duration, Instant};

use common::{
    BacktestError, BacktestParameters, BacktestResult, EventCounts, Result, StrategyConfig,
};
use tracing::{debug, info};

use crate::data::{DataHandler, HistoricDataHandler, SentimentHandler};
use crate::event::{Event, EventQueue};
use crate::execution::{ExecutionHandler, SimulatedExecutionHandler};
use crate::portfolio::{
    FixedQuantitySizer, LiquidateRebalanceSizer, Portfolio, PositionSizer,
    RegimeFilterRiskManager, SuggestedQuantitySizer, VolatilityRegimeClassifier,
};
use crate::strategy::{build_strategy, Strategy};

pub struct BacktestEngine {
    params: BacktestParameters,
    queue: EventQueue,
    feed: Box<dyn DataHandler>,
    strategy: Box<dyn Strategy>,
    portfolio: Portfolio,
    execution: Box<dyn ExecutionHandler>,
    sentiment: Option<SentimentHandler>,
    counts: EventCounts,
    rounds: usize,
}

/// Sizer matching the order semantics of the configured strategy
fn build_sizer(params: &BacktestParameters) -> Box<dyn PositionSizer> {
    match &params.strategy {
        StrategyConfig::KalmanPairs { .. }
        | StrategyConfig::Sentiment { .. }
        | StrategyConfig::CointegrationBollinger { .. } => {
            Box::new(SuggestedQuantitySizer::new(params.order_quantity))
        }
        StrategyConfig::MonthlyRebalance { weights } => {
            Box::new(LiquidateRebalanceSizer::new(weights.clone()))
        }
        _ => Box::new(FixedQuantitySizer::new(params.order_quantity)),
    }
}

impl BacktestEngine {
    /// Assemble an engine from explicit components
    pub fn new(
        params: BacktestParameters,
        feed: Box<dyn DataHandler>,
        strategy: Box<dyn Strategy>,
        portfolio: Portfolio,
        execution: Box<dyn ExecutionHandler>,
    ) -> Self {
        Self {
            params,
            queue: EventQueue::new(),
            feed,
            strategy,
            portfolio,
            execution,
            sentiment: None,
            counts: EventCounts::default(),
            rounds: 0,
        }
    }

    /// Build the strategy, portfolio and execution handler described by `params`
    pub fn from_params(params: BacktestParameters, feed: HistoricDataHandler) -> Result<Self> {
        params.validate()?;

        let start_date = match params.start_date {
            Some(start) => start,
            None => feed
                .first_timestamp()
                .ok_or_else(|| BacktestError::NoData("feed has no bars".to_string()))?,
        };
        let symbols = feed.symbols().to_vec();

        let strategy = build_strategy(&params.strategy, &symbols)?;
        let mut portfolio = Portfolio::new(symbols, start_date, params.initial_capital)
            .with_sizer(build_sizer(&params));
        if let Some(filter) = &params.regime_filter {
            let classifier = VolatilityRegimeClassifier {
                threshold: filter.volatility_threshold,
                periods_per_year: params.periods_per_year,
            };
            portfolio = portfolio.with_risk_manager(Box::new(RegimeFilterRiskManager::new(
                Box::new(classifier),
                filter.lookback,
            )));
        }
        let execution = SimulatedExecutionHandler::new(params.execution.clone());

        Ok(Self::new(
            params,
            Box::new(feed),
            strategy,
            portfolio,
            Box::new(execution),
        ))
    }

    /// Replay sentiment readings alongside the bars
    pub fn with_sentiment(mut self, sentiment: SentimentHandler) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn counts(&self) -> EventCounts {
        self.counts
    }

    /// Pull the next bar(s); `false` once the feed is exhausted
    pub fn advance(&mut self) -> Result<bool> {
        if !self.feed.has_more_data() {
            return Ok(false);
        }
        self.feed.update_bars(&mut self.queue)?;
        self.rounds += 1;

        let now = self.feed.current_datetime();
        if let (Some(sentiment), Some(now)) = (self.sentiment.as_mut(), now) {
            sentiment.stream_next(now, &mut self.queue);
        }
        Ok(true)
    }

    /// Dispatch queued events until the queue is empty
    ///
    /// Market events go to the strategy and then mark the portfolio. Kinds a
    /// component does not handle are dropped without error.
    pub fn drain_queue(&mut self) -> Result<()> {
        while let Some(event) = self.queue.poll() {
            match &event {
                Event::Market(market) => {
                    self.strategy
                        .calculate_signals(&event, self.feed.as_ref(), &mut self.queue)?;
                    self.portfolio.update_timeindex(market, self.feed.as_ref())?;
                }
                Event::Signal(signal) => {
                    self.counts.signals += 1;
                    debug!(symbol = %signal.symbol, direction = %signal.direction, "signal");
                    self.portfolio
                        .update_signal(signal, self.feed.as_ref(), &mut self.queue)?;
                }
                Event::Order(order) => {
                    self.counts.orders += 1;
                    self.execution
                        .execute_order(order, self.feed.as_ref(), &mut self.queue)?;
                }
                Event::Fill(fill) => {
                    self.counts.fills += 1;
                    self.portfolio.update_fill(fill)?;
                }
                Event::Sentiment(_) => {
                    self.strategy
                        .calculate_signals(&event, self.feed.as_ref(), &mut self.queue)?;
                }
            }
        }
        Ok(())
    }

    /// Run to feed exhaustion and report
    pub fn run(&mut self) -> Result<BacktestResult> {
        let start_time = Instant::now();
        info!(
            strategy = self.strategy.name(),
            symbols = ?self.feed.symbols(),
            capital = self.params.initial_capital,
            "starting backtest"
        );

        let heartbeat = Duration::from_millis(self.params.heartbeat_ms);
        while self.advance()? {
            self.drain_queue()?;
            if !heartbeat.is_zero() {
                thread::sleep(heartbeat);
            }
        }

        let result = self.output_performance(start_time)?;
        info!(
            rounds = self.rounds,
            signals = result.counts.signals,
            orders = result.counts.orders,
            fills = result.counts.fills,
            elapsed_ms = result.execution_time_ms,
            "backtest finished"
        );
        Ok(result)
    }

    fn output_performance(&self, start_time: Instant) -> Result<BacktestResult> {
        let report = self.portfolio.output_summary_stats(
            self.params.periods_per_year,
            self.params.equity_output.as_deref(),
        )?;
        for stat in &report.stats {
            info!(label = %stat.label, value = %stat.value, "summary");
        }

        let final_equity = report
            .equity_curve
            .last()
            .map(|row| row.total)
            .unwrap_or(self.portfolio.initial_capital());

        Ok(BacktestResult {
            strategy: self.strategy.name().to_string(),
            symbols: self.portfolio.symbols().to_vec(),
            metrics: report.metrics,
            summary: report.stats,
            equity_curve: report.equity_curve,
            final_positions: self.portfolio.current_positions().clone(),
            counts: self.counts,
            initial_capital: self.portfolio.initial_capital(),
            final_equity,
            bars_processed: self.rounds,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}
