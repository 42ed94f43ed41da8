//! Performance statistics over an equity curve
//!
//! All functions are pure. Ratios that divide by a dispersion return `None`
//! when the dispersion is (numerically) zero instead of producing `inf`.

use common::{EquityCurveRow, PerformanceMetrics, SummaryStat};

/// Drawdown series and its extremes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Drawdowns {
    pub drawdown: Vec<f64>,
    pub duration: Vec<usize>,
    pub max_drawdown: f64,
    pub max_duration: usize,
}

/// `returns[t] = total[t] / total[t-1] - 1`; the first period has no prior
pub fn period_returns(totals: &[f64]) -> Vec<Option<f64>> {
    let mut returns = Vec::with_capacity(totals.len());
    if totals.is_empty() {
        return returns;
    }
    returns.push(None);
    returns.extend(totals.windows(2).map(|w| {
        if w[0] != 0.0 {
            Some(w[1] / w[0] - 1.0)
        } else {
            None
        }
    }));
    returns
}

/// Cumulative growth factor, starting at 1.0
pub fn cumulative_growth(returns: &[Option<f64>]) -> Vec<f64> {
    let mut growth = 1.0;
    returns
        .iter()
        .map(|r| {
            if let Some(r) = r {
                growth *= 1.0 + r;
            }
            growth
        })
        .collect()
}

fn finite(returns: &[f64]) -> Vec<f64> {
    returns.iter().copied().filter(|r| r.is_finite()).collect()
}

fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

fn is_negligible(std: f64, scale: f64) -> bool {
    !(std > 1e-12 * (1.0 + scale.abs()))
}

/// `sqrt(periods) * mean / std` with a zero benchmark
///
/// Non-finite entries (the undefined first return) are skipped. Returns
/// `None` when nothing is left or the standard deviation is zero.
pub fn annualised_sharpe(returns: &[f64], periods: f64) -> Option<f64> {
    let values = finite(returns);
    let (mean, std) = mean_and_std(&values)?;
    if is_negligible(std, mean) {
        return None;
    }
    Some(periods.sqrt() * mean / std)
}

/// Like Sharpe but only penalises returns below zero
pub fn annualised_sortino(returns: &[f64], periods: f64) -> Option<f64> {
    let values = finite(returns);
    let (mean, _) = mean_and_std(&values)?;
    let n = values.len() as f64;
    let downside = values
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r.powi(2))
        .sum::<f64>()
        / n;
    let downside_dev = downside.sqrt();
    if is_negligible(downside_dev, mean) {
        return None;
    }
    Some(periods.sqrt() * mean / downside_dev)
}

/// Annualised standard deviation of returns, in percent
pub fn annualised_volatility(returns: &[f64], periods: f64) -> f64 {
    mean_and_std(&finite(returns))
        .map(|(_, std)| std * periods.sqrt() * 100.0)
        .unwrap_or(0.0)
}

/// Compound annual growth rate in percent
pub fn cagr(initial: f64, final_value: f64, periods_elapsed: usize, periods_per_year: f64) -> f64 {
    let years = periods_elapsed as f64 / periods_per_year;
    if years > 0.0 && initial > 0.0 && final_value > 0.0 {
        ((final_value / initial).powf(1.0 / years) - 1.0) * 100.0
    } else {
        0.0
    }
}

/// Single forward pass over the equity curve
///
/// `hwm[t] = max(hwm[t-1], equity[t])`, `drawdown[t] = hwm[t] - equity[t]`,
/// `duration[t]` counts consecutive periods under water.
pub fn drawdown_and_duration(equity: &[f64]) -> Drawdowns {
    let mut result = Drawdowns {
        drawdown: Vec::with_capacity(equity.len()),
        duration: Vec::with_capacity(equity.len()),
        ..Default::default()
    };
    let Some(&first) = equity.first() else {
        return result;
    };

    let mut hwm = first;
    let mut duration = 0usize;
    for &value in equity {
        hwm = hwm.max(value);
        let drawdown = hwm - value;
        duration = if drawdown == 0.0 { 0 } else { duration + 1 };

        result.max_drawdown = result.max_drawdown.max(drawdown);
        result.max_duration = result.max_duration.max(duration);
        result.drawdown.push(drawdown);
        result.duration.push(duration);
    }
    result
}

/// Largest peak-relative decline in percent
fn max_drawdown_pct(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for &value in equity {
        peak = peak.max(value);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - value) / peak * 100.0);
        }
    }
    max_dd
}

/// Calculate performance metrics from an equity curve
pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn calculate(
        curve: &[EquityCurveRow],
        initial_capital: f64,
        periods_per_year: f64,
    ) -> PerformanceMetrics {
        let Some(last) = curve.last() else {
            return PerformanceMetrics::default();
        };

        let returns: Vec<f64> = curve.iter().filter_map(|row| row.returns).collect();
        let growth: Vec<f64> = curve.iter().map(|row| row.equity_curve).collect();
        let totals: Vec<f64> = curve.iter().map(|row| row.total).collect();
        let drawdowns = drawdown_and_duration(&growth);

        let total_return = last.total - initial_capital;
        PerformanceMetrics {
            total_return,
            total_return_pct: (last.equity_curve - 1.0) * 100.0,
            cagr: cagr(
                initial_capital,
                last.total,
                curve.len().saturating_sub(1),
                periods_per_year,
            ),
            volatility: annualised_volatility(&returns, periods_per_year),
            sharpe_ratio: annualised_sharpe(&returns, periods_per_year),
            sortino_ratio: annualised_sortino(&returns, periods_per_year),
            max_drawdown: drawdowns.max_drawdown,
            max_drawdown_pct: max_drawdown_pct(&totals),
            max_drawdown_duration: drawdowns.max_duration,
        }
    }

    /// Labelled statistics in report order
    pub fn summary_stats(metrics: &PerformanceMetrics) -> Vec<SummaryStat> {
        let sharpe = metrics
            .sharpe_ratio
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "undefined".to_string());
        vec![
            SummaryStat::new("Total Return", format!("{:.2}%", metrics.total_return_pct)),
            SummaryStat::new("Sharpe Ratio", sharpe),
            SummaryStat::new(
                "Max Drawdown",
                format!("{:.2}%", metrics.max_drawdown * 100.0),
            ),
            SummaryStat::new(
                "Drawdown Duration",
                format!("{}", metrics.max_drawdown_duration),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_period_returns_first_is_undefined() {
        let returns = period_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(returns.len(), 3);
        assert!(returns[0].is_none());
        assert_relative_eq!(returns[1].unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(returns[2].unwrap(), -0.1, epsilon = 1e-12);

        let growth = cumulative_growth(&returns);
        assert_eq!(growth[0], 1.0);
        assert_relative_eq!(growth[2], 0.99, epsilon = 1e-12);
    }

    #[test]
    fn test_sharpe_matches_formula() {
        let returns = [0.01, -0.005, 0.02, 0.0];
        let mean: f64 = 0.025 / 4.0;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 4.0;
        let expected = 252.0_f64.sqrt() * mean / var.sqrt();
        assert_relative_eq!(
            annualised_sharpe(&returns, 252.0).unwrap(),
            expected,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_sharpe_zero_std_is_undefined() {
        assert!(annualised_sharpe(&[0.01, 0.01, 0.01], 252.0).is_none());
        assert!(annualised_sharpe(&[0.0, 0.0], 252.0).is_none());
        assert!(annualised_sharpe(&[], 252.0).is_none());
        assert!(annualised_sharpe(&[f64::NAN], 252.0).is_none());
    }

    #[test]
    fn test_sharpe_skips_nan() {
        let with_nan = annualised_sharpe(&[f64::NAN, 0.01, 0.03], 252.0);
        let without = annualised_sharpe(&[0.01, 0.03], 252.0);
        assert_eq!(with_nan, without);
        assert!(with_nan.is_some());
    }

    #[test]
    fn test_monotone_equity_has_no_drawdown() {
        let equity = [1.0, 1.01, 1.02, 1.02, 1.05, 1.2];
        let dd = drawdown_and_duration(&equity);
        assert!(dd.drawdown.iter().all(|&d| d == 0.0));
        assert!(dd.duration.iter().all(|&d| d == 0));
        assert_eq!(dd.max_drawdown, 0.0);
        assert_eq!(dd.max_duration, 0);
    }

    #[test]
    fn test_drawdown_and_duration() {
        let equity = [1.0, 1.1, 1.0, 0.9, 1.05, 1.2, 1.15];
        let dd = drawdown_and_duration(&equity);
        assert_eq!(dd.duration, vec![0, 0, 1, 2, 3, 0, 1]);
        assert_relative_eq!(dd.max_drawdown, 0.2, epsilon = 1e-12);
        assert_eq!(dd.max_duration, 3);
        assert_relative_eq!(dd.drawdown[6], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_drawdown_empty() {
        assert_eq!(drawdown_and_duration(&[]), Drawdowns::default());
    }

    #[test]
    fn test_max_drawdown_pct() {
        // Peak was 11000, trough was 9000 = 18.18% drawdown
        let dd = max_drawdown_pct(&[10000.0, 11000.0, 9000.0, 9500.0, 10500.0]);
        assert!((dd - 18.18).abs() < 0.1);
    }

    #[test]
    fn test_sortino_without_losses_is_undefined() {
        assert!(annualised_sortino(&[0.01, 0.02], 252.0).is_none());
        assert!(annualised_sortino(&[0.01, -0.02, 0.03], 252.0).is_some());
    }

    #[test]
    fn test_summary_stats_labels_and_undefined_sharpe() {
        let metrics = PerformanceMetrics {
            total_return_pct: -0.2,
            sharpe_ratio: None,
            max_drawdown: 0.002,
            max_drawdown_duration: 2,
            ..Default::default()
        };
        let stats = MetricsCalculator::summary_stats(&metrics);
        let labels: Vec<&str> = stats.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Total Return", "Sharpe Ratio", "Max Drawdown", "Drawdown Duration"]
        );
        assert_eq!(stats[0].value, "-0.20%");
        assert_eq!(stats[1].value, "undefined");
        assert_eq!(stats[2].value, "0.20%");
        assert_eq!(stats[3].value, "2");
    }

    #[test]
    fn test_cagr_one_year_double() {
        assert_relative_eq!(cagr(100.0, 200.0, 252, 252.0), 100.0, epsilon = 1e-9);
        assert_eq!(cagr(100.0, 200.0, 0, 252.0), 0.0);
    }
}
