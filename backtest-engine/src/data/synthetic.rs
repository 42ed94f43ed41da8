use chrono::{DateTime, Duration, TimeZone, Utc};
use common::Bar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn default_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Daily flat bars with the given closes, one calendar day apart
pub fn bars_from_closes(start: DateTime<Utc>, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar::flat(start + Duration::days(i as i64), close))
        .collect()
}

/// Random-walk daily bars, reproducible for a given seed
pub fn generate_synthetic_bars(days: usize, initial_price: f64, seed: u64) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bars = Vec::with_capacity(days);

    let mut price = initial_price;
    let start_date = default_start();

    let daily_volatility = 0.015;
    let drift = 0.0003;

    for i in 0..days {
        let date = start_date + Duration::days(i as i64);

        let random_return: f64 = rng.gen_range(-1.0..1.0);
        let daily_return = drift + daily_volatility * random_return;
        let new_price = price * (1.0 + daily_return);

        // Generate OHLC
        let intraday_range = price * rng.gen_range(0.005..0.02);
        let open = price + rng.gen_range(-intraday_range / 2.0..intraday_range / 2.0);
        let close = new_price;
        let high = open.max(close) + rng.gen_range(0.0..intraday_range / 2.0);
        let low = open.min(close) - rng.gen_range(0.0..intraday_range / 2.0);

        // Volume is higher on volatile days
        let base_volume = 5_000_000u64;
        let volume_multiplier = 1.0 + daily_return.abs() * 10.0;
        let volume = (base_volume as f64 * volume_multiplier * rng.gen_range(0.8..1.2)) as u64;

        bars.push(Bar::new(date, open, high, low, close, volume));
        price = new_price;
    }

    bars
}

/// Two price series where `y = hedge_ratio * x + noise`
///
/// With `noise == 0.0` the pair is perfectly cointegrated.
pub fn generate_cointegrated_pair(
    days: usize,
    hedge_ratio: f64,
    noise: f64,
    seed: u64,
) -> (Vec<Bar>, Vec<Bar>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let start_date = default_start();
    let mut x = 100.0_f64;
    let mut xs = Vec::with_capacity(days);
    let mut ys = Vec::with_capacity(days);

    for i in 0..days {
        let date = start_date + Duration::days(i as i64);
        x = (x * (1.0 + rng.gen_range(-0.01..0.01))).max(1.0);
        let eps = if noise > 0.0 {
            rng.gen_range(-noise..noise)
        } else {
            0.0
        };
        let y = hedge_ratio * x + eps;
        xs.push(Bar::flat(date, x));
        ys.push(Bar::flat(date, y));
    }

    (xs, ys)
}
