use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use backtest_engine::data::load_csv_dir;
use backtest_engine::{
    generate_cointegrated_pair, generate_synthetic_bars, load_file, run_ma_cross_sweep,
    BacktestEngine, BacktestParameters, BacktestResult, Bar, HistoricDataHandler,
    SentimentHandler, StrategyConfig, SweepResult,
};
use common::{CommissionModel, RegimeFilterConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyKind {
    BuyAndHold,
    MaCross,
    Forecast,
    KalmanPairs,
    Sentiment,
    CointBollinger,
    MonthlyRebalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Parser, Debug)]
#[command(name = "backtest-engine")]
#[command(version = "0.1.0")]
#[command(about = "Event-driven backtester for daily bar strategies", long_about = None)]
struct Args {
    /// JSON parameter file; overrides the strategy and portfolio flags below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of <SYMBOL>.csv files
    #[arg(long, conflicts_with = "data_file")]
    data_dir: Option<PathBuf>,

    /// Single CSV/JSON bar file for a one-symbol run
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Symbols to trade
    #[arg(short, long, value_delimiter = ',', default_value = "SPY")]
    symbols: Vec<String>,

    /// First bar date to include (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last bar date to include (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Number of days of synthetic data when no data is given
    #[arg(short, long, default_value = "504")]
    days: usize,

    /// Initial price for synthetic data
    #[arg(long, default_value = "100.0")]
    initial_price: f64,

    /// Seed for synthetic data
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Initial capital
    #[arg(short, long, default_value = "100000")]
    capital: f64,

    #[arg(long, value_enum, default_value = "ma-cross")]
    strategy: StrategyKind,

    /// Units per order for fixed sizing
    #[arg(short, long, default_value = "100")]
    quantity: u64,

    #[arg(long, default_value = "10")]
    short_window: usize,

    #[arg(long, default_value = "30")]
    long_window: usize,

    /// Lagged returns fed to the forecaster
    #[arg(long, default_value = "2")]
    lags: usize,

    /// Kalman state noise
    #[arg(long, default_value = "0.0001")]
    delta: f64,

    /// Kalman observation noise variance
    #[arg(long, default_value = "0.001")]
    observation_variance: f64,

    /// Basket weights per symbol for the cointegration bands; the default
    /// matches the synthetic pair
    #[arg(long, value_delimiter = ',', default_value = "-1.5,1.0", allow_hyphen_values = true)]
    hedge_weights: Vec<f64>,

    /// Bars in the z-score window
    #[arg(long, default_value = "15")]
    lookback: usize,

    #[arg(long, default_value = "1.5")]
    entry_z: f64,

    #[arg(long, default_value = "0.5")]
    exit_z: f64,

    /// Sentiment CSV with date,symbol,sentiment_signal columns
    #[arg(long)]
    sentiment_file: Option<PathBuf>,

    #[arg(long, default_value = "6", allow_negative_numbers = true)]
    buy_threshold: i64,

    #[arg(long, default_value = "-1", allow_negative_numbers = true)]
    sell_threshold: i64,

    /// Target weights for monthly rebalancing, e.g. SPY=0.6,AGG=0.4
    #[arg(long, value_delimiter = ',', value_parser = parse_weight)]
    weights: Vec<(String, f64)>,

    /// Veto buys while annualised volatility (percent) exceeds this
    #[arg(long)]
    regime_threshold: Option<f64>,

    /// Returns used by the regime filter
    #[arg(long, default_value = "20")]
    regime_lookback: usize,

    /// Charge Interactive Brokers style per-share commission
    #[arg(long)]
    per_share_commission: bool,

    /// Enable simulated slippage on fills
    #[arg(long)]
    slippage: bool,

    /// Bars per year used to annualise ratios
    #[arg(long, default_value = "252")]
    periods_per_year: f64,

    /// Pause between bars in milliseconds
    #[arg(long, default_value = "0")]
    heartbeat_ms: u64,

    /// Write the equity curve CSV here
    #[arg(long)]
    equity_csv: Option<PathBuf>,

    /// Sweep moving average windows instead of a single run
    #[arg(long)]
    sweep: bool,

    #[arg(long, value_delimiter = ',', default_value = "5,10,20")]
    sweep_short: Vec<usize>,

    #[arg(long, value_delimiter = ',', default_value = "30,50,100")]
    sweep_long: Vec<usize>,

    #[arg(short, long, value_enum, default_value = "json")]
    output: OutputFormat,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,
}

fn parse_weight(s: &str) -> std::result::Result<(String, f64), String> {
    let (symbol, weight) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SYMBOL=WEIGHT, got '{}'", s))?;
    let weight: f64 = weight
        .parse()
        .map_err(|e| format!("bad weight '{}': {}", weight, e))?;
    Ok((symbol.trim().to_string(), weight))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn strategy_config(args: &Args) -> StrategyConfig {
    match args.strategy {
        StrategyKind::BuyAndHold => StrategyConfig::BuyAndHold,
        StrategyKind::MaCross => StrategyConfig::MovingAverageCross {
            short_window: args.short_window,
            long_window: args.long_window,
        },
        StrategyKind::Forecast => StrategyConfig::Forecast { lags: args.lags },
        StrategyKind::KalmanPairs => StrategyConfig::KalmanPairs {
            quantity: args.quantity,
            delta: args.delta,
            observation_variance: args.observation_variance,
        },
        StrategyKind::Sentiment => StrategyConfig::Sentiment {
            buy_threshold: args.buy_threshold,
            sell_threshold: args.sell_threshold,
            quantity: args.quantity,
        },
        StrategyKind::CointBollinger => StrategyConfig::CointegrationBollinger {
            lookback: args.lookback,
            weights: args.hedge_weights.clone(),
            entry_z: args.entry_z,
            exit_z: args.exit_z,
            quantity: args.quantity,
        },
        StrategyKind::MonthlyRebalance => {
            let weights: BTreeMap<String, f64> = if args.weights.is_empty() {
                let equal = 1.0 / args.symbols.len() as f64;
                args.symbols.iter().map(|s| (s.clone(), equal)).collect()
            } else {
                args.weights.iter().cloned().collect()
            };
            StrategyConfig::MonthlyRebalance { weights }
        }
    }
}

fn build_params(args: &Args) -> Result<BacktestParameters> {
    if let Some(path) = &args.config {
        info!(path = %path.display(), "loading parameters");
        return BacktestParameters::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()));
    }

    let mut params = BacktestParameters::default()
        .with_symbols(args.symbols.iter().cloned())
        .with_capital(args.capital)
        .with_order_quantity(args.quantity)
        .with_strategy(strategy_config(args));
    params.periods_per_year = args.periods_per_year;
    params.heartbeat_ms = args.heartbeat_ms;
    params.equity_output = args.equity_csv.clone();
    params.execution.slippage.enabled = args.slippage;
    if args.per_share_commission {
        params.execution.commission = CommissionModel::PerShare;
    }
    if let Some(threshold) = args.regime_threshold {
        params.regime_filter = Some(RegimeFilterConfig {
            volatility_threshold: threshold,
            lookback: args.regime_lookback,
        });
    }
    Ok(params)
}

/// Bars per symbol from disk, or synthetic series when no data is given
fn load_data(args: &Args, params: &BacktestParameters) -> Result<BTreeMap<String, Vec<Bar>>> {
    if let Some(dir) = &args.data_dir {
        info!(dir = %dir.display(), "loading CSV directory");
        return Ok(load_csv_dir(dir, &params.symbols)?);
    }

    if let Some(path) = &args.data_file {
        let [symbol] = params.symbols.as_slice() else {
            bail!("--data-file needs exactly one symbol, got {:?}", params.symbols);
        };
        info!(path = %path.display(), %symbol, "loading bar file");
        let mut data = BTreeMap::new();
        data.insert(symbol.clone(), load_file(path)?);
        return Ok(data);
    }

    info!(
        days = args.days,
        initial_price = args.initial_price,
        seed = args.seed,
        "generating synthetic data"
    );
    let mut data = BTreeMap::new();
    match (&params.strategy, params.symbols.as_slice()) {
        (
            StrategyConfig::KalmanPairs { .. } | StrategyConfig::CointegrationBollinger { .. },
            [x, y],
        ) => {
            let (xs, ys) = generate_cointegrated_pair(args.days, 1.5, 0.5, args.seed);
            data.insert(x.clone(), xs);
            data.insert(y.clone(), ys);
        }
        (_, symbols) => {
            for (i, symbol) in symbols.iter().enumerate() {
                let seed = args.seed + i as u64;
                let bars = generate_synthetic_bars(args.days, args.initial_price, seed);
                data.insert(symbol.clone(), bars);
            }
        }
    }
    Ok(data)
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let params = build_params(&args)?;
    let mut data = load_data(&args, &params)?;
    if args.start.is_some() || args.end.is_some() {
        let (start, end) = (args.start.map(midnight), args.end.map(midnight));
        for bars in data.values_mut() {
            bars.retain(|b| {
                start.map_or(true, |s| b.timestamp >= s) && end.map_or(true, |e| b.timestamp <= e)
            });
        }
    }

    if args.sweep {
        let grid: Vec<(usize, usize)> = args
            .sweep_short
            .iter()
            .flat_map(|&s| args.sweep_long.iter().map(move |&l| (s, l)))
            .collect();
        let results = run_ma_cross_sweep(&data, &params, &grid)?;
        match args.output {
            OutputFormat::Json => {
                let rows: Vec<_> = results
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "short_window": r.short_window,
                            "long_window": r.long_window,
                            "metrics": r.result.metrics,
                            "final_equity": r.result.final_equity,
                        })
                    })
                    .collect();
                print_json(&rows, args.pretty)?;
            }
            OutputFormat::Text => print_sweep_report(&results),
        }
        return Ok(());
    }

    let feed = HistoricDataHandler::new(params.symbols.clone(), data)?;
    info!(bars = feed.len(), symbols = ?params.symbols, "data ready");

    let mut engine = BacktestEngine::from_params(params.clone(), feed)?;
    if let Some(path) = &args.sentiment_file {
        engine = engine.with_sentiment(SentimentHandler::from_csv(path, &params.symbols)?);
    } else if matches!(params.strategy, StrategyConfig::Sentiment { .. }) {
        bail!("the sentiment strategy needs --sentiment-file");
    }

    let result = engine.run()?;

    match args.output {
        OutputFormat::Json => print_json(&result, args.pretty)?,
        OutputFormat::Text => print_text_report(&result),
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

fn print_text_report(result: &BacktestResult) {
    println!();
    println!("================================================================");
    println!("  BACKTEST REPORT - {}", result.strategy);
    println!("================================================================");
    println!();
    println!("  Symbols:          {}", result.symbols.join(", "));
    if let (Some(first), Some(last)) = (result.equity_curve.first(), result.equity_curve.last()) {
        println!(
            "  Period:           {} to {}",
            first.timestamp.format("%Y-%m-%d"),
            last.timestamp.format("%Y-%m-%d")
        );
    }
    println!("  Bars Processed:   {:>12}", result.bars_processed);
    println!("  Execution Time:   {:>10}ms", result.execution_time_ms);
    println!();
    println!("----------------------------------------------------------------");
    println!("  CAPITAL");
    println!("----------------------------------------------------------------");
    println!("  Initial Capital:  ${:>12.2}", result.initial_capital);
    println!("  Final Equity:     ${:>12.2}", result.final_equity);
    println!(
        "  Total Return:     ${:>12.2} ({:+.2}%)",
        result.metrics.total_return, result.metrics.total_return_pct
    );
    println!("  CAGR:             {:>12.2}%", result.metrics.cagr);
    println!();
    println!("----------------------------------------------------------------");
    println!("  SUMMARY");
    println!("----------------------------------------------------------------");
    for stat in &result.summary {
        println!("  {:<18}{:>12}", format!("{}:", stat.label), stat.value);
    }
    println!(
        "  Volatility (Ann): {:>12.2}%",
        result.metrics.volatility
    );
    match result.metrics.sortino_ratio {
        Some(sortino) => println!("  Sortino Ratio:    {:>12.3}", sortino),
        None => println!("  Sortino Ratio:    {:>12}", "undefined"),
    }
    println!();
    println!("----------------------------------------------------------------");
    println!("  EVENTS");
    println!("----------------------------------------------------------------");
    println!("  Signals:          {:>12}", result.counts.signals);
    println!("  Orders:           {:>12}", result.counts.orders);
    println!("  Fills:            {:>12}", result.counts.fills);
    println!();
    println!("================================================================");

    let open: Vec<_> = result
        .final_positions
        .iter()
        .filter(|(_, &qty)| qty != 0)
        .collect();
    if !open.is_empty() {
        println!();
        println!("  OPEN POSITIONS");
        println!("----------------------------------------------------------------");
        for (symbol, qty) in open {
            println!("  {:<8} {:>+12}", symbol, qty);
        }
        println!();
    }
}

fn print_sweep_report(results: &[SweepResult]) {
    println!();
    println!("  SHORT   LONG      SHARPE     RETURN    MAX DD");
    println!("----------------------------------------------------------------");
    for r in results {
        let sharpe = r
            .sharpe()
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "undefined".to_string());
        println!(
            "  {:>5}  {:>5}  {:>10}  {:>+8.2}%  {:>7.2}%",
            r.short_window,
            r.long_window,
            sharpe,
            r.result.metrics.total_return_pct,
            r.result.metrics.max_drawdown_pct
        );
    }
    println!();
}
