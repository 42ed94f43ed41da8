//! Equity curve construction and CSV output

use std::path::Path;

use common::{BacktestError, EquityCurveRow, HoldingsSnapshot, Result};

use crate::metrics::{cumulative_growth, drawdown_and_duration, period_returns};

/// Build the equity curve from the holdings history
pub fn build_equity_curve(holdings: &[HoldingsSnapshot]) -> Vec<EquityCurveRow> {
    let totals: Vec<f64> = holdings.iter().map(|h| h.total).collect();
    let returns = period_returns(&totals);
    let growth = cumulative_growth(&returns);
    let drawdowns = drawdown_and_duration(&growth);

    holdings
        .iter()
        .zip(returns)
        .zip(growth)
        .zip(drawdowns.drawdown)
        .map(|(((h, returns), equity_curve), drawdown)| EquityCurveRow {
            timestamp: h.timestamp,
            market_values: h.market_values.clone(),
            cash: h.cash,
            commission: h.commission,
            total: h.total,
            returns,
            equity_curve,
            drawdown,
        })
        .collect()
}

/// Write `datetime, <symbols...>, cash, commission, total, returns, equity_curve, drawdown`
///
/// The undefined first return is written as an empty cell.
pub fn write_equity_csv(path: &Path, symbols: &[String], curve: &[EquityCurveRow]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).map_err(|e| BacktestError::CsvError(e.to_string()))?;

    let mut header = vec!["datetime".to_string()];
    header.extend(symbols.iter().cloned());
    header.extend(
        ["cash", "commission", "total", "returns", "equity_curve", "drawdown"]
            .iter()
            .map(|s| s.to_string()),
    );
    writer
        .write_record(&header)
        .map_err(|e| BacktestError::CsvError(e.to_string()))?;

    for row in curve {
        let mut record = vec![row.timestamp.to_rfc3339()];
        record.extend(
            symbols
                .iter()
                .map(|s| row.market_values.get(s).copied().unwrap_or(0.0).to_string()),
        );
        record.push(row.cash.to_string());
        record.push(row.commission.to_string());
        record.push(row.total.to_string());
        record.push(row.returns.map(|r| r.to_string()).unwrap_or_default());
        record.push(row.equity_curve.to_string());
        record.push(row.drawdown.to_string());
        writer
            .write_record(&record)
            .map_err(|e| BacktestError::CsvError(e.to_string()))?;
    }

    writer.flush()?;
    Ok(())
}
