//! Parallel grid search over moving average windows

use std::cmp::Ordering;
use std::collections::BTreeMap;

use common::{BacktestParameters, BacktestResult, Bar, Result, StrategyConfig};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::data::HistoricDataHandler;
use crate::engine::BacktestEngine;

/// One point of the grid and its outcome
#[derive(Debug, Clone)]
pub struct SweepResult {
    pub short_window: usize,
    pub long_window: usize,
    pub result: BacktestResult,
}

impl SweepResult {
    pub fn sharpe(&self) -> Option<f64> {
        self.result.metrics.sharpe_ratio
    }
}

/// Best Sharpe first; undefined Sharpe ratios sort last
fn by_sharpe_desc(a: &SweepResult, b: &SweepResult) -> Ordering {
    match (a.sharpe(), b.sharpe()) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Run one moving average cross backtest per `(short, long)` pair
///
/// Pairs with `short >= long` are skipped. Each run owns its own feed and
/// engine; the equity CSV output of `params` is ignored.
pub fn run_ma_cross_sweep(
    data: &BTreeMap<String, Vec<Bar>>,
    params: &BacktestParameters,
    grid: &[(usize, usize)],
) -> Result<Vec<SweepResult>> {
    let points: Vec<(usize, usize)> = grid
        .iter()
        .copied()
        .filter(|&(short, long)| short > 0 && short < long)
        .collect();
    info!(points = points.len(), skipped = grid.len() - points.len(), "starting sweep");

    let mut results = points
        .par_iter()
        .map(|&(short_window, long_window)| -> Result<SweepResult> {
            let strategy = StrategyConfig::MovingAverageCross {
                short_window,
                long_window,
            };
            let mut run_params = params.clone().with_strategy(strategy);
            run_params.equity_output = None;

            let feed = HistoricDataHandler::new(run_params.symbols.clone(), data.clone())?;
            let result = BacktestEngine::from_params(run_params, feed)?.run()?;
            debug!(
                short_window,
                long_window,
                sharpe = ?result.metrics.sharpe_ratio,
                "sweep point"
            );
            Ok(SweepResult {
                short_window,
                long_window,
                result,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    results.sort_by(by_sharpe_desc);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::generate_synthetic_bars;

    fn data() -> BTreeMap<String, Vec<Bar>> {
        let mut data = BTreeMap::new();
        data.insert("SPY".to_string(), generate_synthetic_bars(200, 100.0, 3));
        data
    }

    #[test]
    fn test_sweep_skips_invalid_pairs_and_sorts() {
        let grid = [(5, 20), (10, 30), (30, 10), (20, 20), (0, 5)];
        let results = run_ma_cross_sweep(&data(), &BacktestParameters::default(), &grid).unwrap();

        assert_eq!(results.len(), 2);
        for pair in results.windows(2) {
            assert_ne!(by_sharpe_desc(&pair[0], &pair[1]), Ordering::Greater);
        }
    }

    #[test]
    fn test_sweep_matches_single_run() {
        let params = BacktestParameters::default();
        let swept = run_ma_cross_sweep(&data(), &params, &[(10, 30)]).unwrap();

        let feed = HistoricDataHandler::new(vec!["SPY".into()], data()).unwrap();
        let single = BacktestEngine::from_params(params, feed).unwrap().run().unwrap();

        assert_eq!(swept[0].result.final_equity, single.final_equity);
        assert_eq!(swept[0].result.counts.fills, single.counts.fills);
    }

    #[test]
    fn test_undefined_sharpe_sorts_last() {
        let base = BacktestResult {
            strategy: String::new(),
            symbols: Vec::new(),
            metrics: Default::default(),
            summary: Vec::new(),
            equity_curve: Vec::new(),
            final_positions: BTreeMap::new(),
            counts: Default::default(),
            initial_capital: 1.0,
            final_equity: 1.0,
            bars_processed: 0,
            execution_time_ms: 0,
        };
        let with = |sharpe: Option<f64>| {
            let mut result = base.clone();
            result.metrics.sharpe_ratio = sharpe;
            SweepResult {
                short_window: 1,
                long_window: 2,
                result,
            }
        };

        let mut results = vec![with(None), with(Some(0.5)), with(Some(1.5))];
        results.sort_by(by_sharpe_desc);
        let order: Vec<Option<f64>> = results.iter().map(SweepResult::sharpe).collect();
        assert_eq!(order, vec![Some(1.5), Some(0.5), None]);
    }
}
