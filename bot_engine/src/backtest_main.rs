/// backtest_main.rs - Offline replay entry point
///
/// Fetches historical klines from Binance spot (public endpoint, no key)
/// and replays them through one strategy variant.
use anyhow::Result;
use clap::Parser;
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bot_engine::backtest::{run_backtest, BacktestConfig};
use bot_engine::config::AppConfig;
use bot_engine::live::BinanceSpotGateway;
use bot_engine::{ExecutionGateway, StrategyEngine, StrategyKind, StrategyParams};

#[derive(Parser, Debug)]
#[command(name = "backtest", about = "Replay a bot strategy over historical Binance klines")]
struct Args {
    /// simple_moving_average | rsi | ema_rsi (aliases accepted)
    #[arg(short, long, default_value = "simple_moving_average")]
    strategy: String,

    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,

    /// Kline interval to replay
    #[arg(short, long, default_value = "15m")]
    interval: String,

    /// Number of klines to fetch (Binance caps at 1000)
    #[arg(short, long, default_value_t = 1000)]
    limit: usize,

    /// Base quantity per signal
    #[arg(short = 'a', long, default_value_t = 1.0)]
    trade_amount: f64,

    #[arg(long, default_value_t = 0.001)]
    fee_rate: f64,

    /// Log every fill
    #[arg(short, long)]
    verbose: bool,

    /// SMA short / long periods
    #[arg(long, default_value_t = 7)]
    short: usize,
    #[arg(long, default_value_t = 25)]
    long: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = AppConfig::from_env()?;

    let kind: StrategyKind = args.strategy.parse()?;
    let params = StrategyParams {
        short_period: args.short,
        long_period:  args.long,
        ..Default::default()
    };
    let mut engine = StrategyEngine::build(kind, &params, args.trade_amount)?;

    info!(
        "Fetching {} {} {} klines from {}...",
        args.limit, args.interval, args.symbol, cfg.rest_url
    );
    let gateway = BinanceSpotGateway::public(&cfg.rest_url, Duration::from_secs(cfg.http_timeout_secs))?;
    let candles = gateway.get_candles(&args.symbol, &args.interval, args.limit).await?;
    gateway.close().await?;

    if candles.is_empty() {
        anyhow::bail!("No kline data received.  Check symbol, interval, and connectivity.");
    }
    info!(
        "Loaded {} bars  ({} → {})",
        candles.len(),
        candles.first().map_or(0, |c| c.open_time),
        candles.last().map_or(0, |c| c.open_time)
    );

    let bt_cfg = BacktestConfig { verbose: args.verbose, fee_rate: args.fee_rate };
    let report = run_backtest(&mut engine, &candles, &bt_cfg)?;

    println!("\n{}", report);
    Ok(())
}
