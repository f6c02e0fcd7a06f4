use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use tradebot_engine::backtest::{load_candles_csv, BacktestHarness};
use tradebot_engine::bot::{BotConfig, BotEvent, BotManager};
use tradebot_engine::grid::{GridConfig, GridDirection, GridMode, GridSimulator};
use tradebot_engine::ledger::Summary;
use tradebot_engine::market::SyntheticFeed;
use tradebot_engine::strategy::{ParamValue, StrategyParams, StrategyRegistry};
use tradebot_engine::validator::MomentumValidator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Strategy execution and risk-discipline engine")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a strategy over a historical candle CSV
    Backtest {
        /// CSV file with time,open,high,low,close,volume rows
        #[arg(long)]
        csv: PathBuf,

        #[arg(long, default_value = "BTCUSDT")]
        symbol: String,

        /// Strategy id (ma_cross, rsi_reversal, channel_breakout)
        #[arg(long, default_value = "ma_cross")]
        strategy: String,

        /// Strategy parameter as key=value (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,

        #[arg(long, default_value = "1000.0")]
        capital: f64,

        #[arg(long, default_value = "1.0")]
        leverage: f64,

        /// Take-profit distance, percent
        #[arg(long, default_value = "2.0")]
        take_profit: f64,

        /// Stop-loss distance, percent
        #[arg(long, default_value = "1.0")]
        stop_loss: f64,

        /// Fee rate per notional (0.001 = 0.1%)
        #[arg(long, default_value = "0.001")]
        fee_rate: f64,

        /// Invert every strategy signal
        #[arg(long)]
        reverse: bool,

        /// Validate entries with the deterministic momentum oracle
        #[arg(long)]
        validate: bool,
    },

    /// Run a grid simulation over the close prices of a candle CSV
    Grid {
        #[arg(long)]
        csv: PathBuf,

        #[arg(long, default_value = "BTCUSDT")]
        symbol: String,

        #[arg(long)]
        lower: f64,

        #[arg(long)]
        upper: f64,

        #[arg(long, default_value = "10")]
        count: usize,

        /// Geometric spacing instead of arithmetic
        #[arg(long)]
        geometric: bool,

        /// Short-biased grid (sell high, cover low)
        #[arg(long)]
        short: bool,

        #[arg(long, default_value = "1000.0")]
        capital: f64,

        #[arg(long, default_value = "1.0")]
        leverage: f64,

        #[arg(long, default_value = "0.001")]
        fee_rate: f64,

        /// Force-close everything and halt below this price
        #[arg(long)]
        global_stop: Option<f64>,

        /// Force-close everything and halt above this price
        #[arg(long)]
        global_target: Option<f64>,
    },

    /// Run live bots against a synthetic random-walk feed until Ctrl-C
    Demo {
        /// Symbols to trade (comma-separated)
        #[arg(short, long, default_value = "BTCUSDT,ETHUSDT")]
        symbols: String,

        #[arg(long, default_value = "ma_cross")]
        strategy: String,

        /// AI-credit quota shared by all bots
        #[arg(long, default_value = "100", env = "TRADEBOT_CREDITS")]
        credits: u32,

        #[arg(long, default_value = "1")]
        poll_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tradebot_engine=info".parse().unwrap())
                .add_directive("tradebot=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Backtest {
            csv,
            symbol,
            strategy,
            params,
            capital,
            leverage,
            take_profit,
            stop_loss,
            fee_rate,
            reverse,
            validate,
        } => {
            let series = load_candles_csv(&csv)?;
            info!(candles = series.len(), file = %csv.display(), "loaded series");

            let mut config = BotConfig::new(&symbol, &strategy);
            config.capital = capital;
            config.leverage = leverage;
            config.take_profit_pct = take_profit;
            config.stop_loss_pct = stop_loss;
            config.fee_rate = fee_rate;
            config.reverse = reverse;
            config.params = parse_params(&params)?;

            let registry = Arc::new(StrategyRegistry::with_builtins());
            let mut harness = BacktestHarness::new(registry);
            if validate {
                harness = harness.with_validator(Arc::new(MomentumValidator::default()));
            }

            let report = harness.run(series, config).await?;

            println!("\n═══════════════════════════════════════════════════════════");
            println!("              BACKTEST RESULTS                              ");
            println!("═══════════════════════════════════════════════════════════\n");
            println!("Strategy:          {}", strategy);
            println!("Candles Processed: {}", report.candles_processed);
            print_summary(&report.summary);
            if let Some(open) = &report.open_position {
                println!();
                println!(
                    "Open at end:       {} {} @ {:.4} (excluded from summary)",
                    open.symbol, open.side, open.entry_price
                );
            }
        }

        Command::Grid {
            csv,
            symbol,
            lower,
            upper,
            count,
            geometric,
            short,
            capital,
            leverage,
            fee_rate,
            global_stop,
            global_target,
        } => {
            let series = load_candles_csv(&csv)?;
            info!(candles = series.len(), "loaded series");

            let mut config = GridConfig::new(&symbol, lower, upper, count);
            config.mode = if geometric {
                GridMode::Geometric
            } else {
                GridMode::Arithmetic
            };
            config.direction = if short {
                GridDirection::Short
            } else {
                GridDirection::Neutral
            };
            config.capital = capital;
            config.leverage = leverage;
            config.fee_rate = fee_rate;
            config.stop_loss = global_stop;
            config.take_profit = global_target;

            let mut grid = GridSimulator::new(config)?;
            info!(levels = ?grid.levels(), "grid generated");
            for candle in &series {
                grid.on_price_tick(candle.close, candle.time);
                if grid.is_halted() {
                    break;
                }
            }

            println!("\n═══════════════════════════════════════════════════════════");
            println!("              GRID SIMULATION RESULTS                       ");
            println!("═══════════════════════════════════════════════════════════\n");
            println!("Levels:            {}", count);
            println!("Matched Trades:    {}", grid.matched_trades().len());
            println!("Unmatched Lots:    {}", grid.unmatched_lots().len());
            println!("Halted:            {}", grid.is_halted());
            print_summary(&grid.summary());
        }

        Command::Demo {
            symbols,
            strategy,
            credits,
            poll_secs,
        } => {
            let symbols: Vec<String> = symbols
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if symbols.is_empty() {
                bail!("no symbols given");
            }

            info!(?symbols, strategy = %strategy, credits, "starting demo bots");

            let registry = Arc::new(StrategyRegistry::with_builtins());
            let feed = Arc::new(SyntheticFeed::new(100.0, 0.5));
            let mut manager = BotManager::new(registry, feed, credits)
                .with_validator(Arc::new(MomentumValidator::default()));

            let mut events = manager.subscribe_events();
            for symbol in &symbols {
                let mut config = BotConfig::new(symbol, &strategy);
                config.poll_interval_secs = poll_secs;
                manager.start(config).context("starting bot")?;
            }

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => {
                        if let Ok(event) = event {
                            print_event(&event);
                        }
                    }
                }
            }

            info!("shutting down");
            manager.stop_all().await;

            for state in manager.runtime_states() {
                println!("\n═══ {} ({}) ═══", state.symbol, state.strategy_id);
                print_summary(&state.summary);
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &Summary) {
    println!("Total Trades:      {}", summary.total_trades);
    println!(
        "Wins:              {} ({:.1}%)",
        summary.winning_trades, summary.win_rate
    );
    println!("Losses:            {}", summary.losing_trades);
    println!();
    println!("Profit Factor:     {:.2}", summary.profit_factor);
    println!("Avg Win:           {:+.2}", summary.avg_win);
    println!("Avg Loss:          {:+.2}", summary.avg_loss);
    println!("Total Fees:        {:.2}", summary.total_fees);
    println!(
        "Net P&L:           {:+.2} ({:+.2}%)",
        summary.total_pnl, summary.return_pct
    );
}

fn print_event(event: &BotEvent) {
    match event {
        BotEvent::StatusChanged { bot_id, status } => {
            println!("[{}] status -> {}", short(bot_id), status);
        }
        BotEvent::PositionOpened { bot_id, position } => {
            println!(
                "[{}] opened {} {} @ {:.4}",
                short(bot_id),
                position.side,
                position.symbol,
                position.entry_price
            );
        }
        BotEvent::TradeClosed { bot_id, trade } => {
            println!(
                "[{}] closed {} ({}) pnl {:+.4}",
                short(bot_id),
                trade.symbol,
                trade.reason,
                trade.pnl
            );
        }
        BotEvent::SignalRejected {
            bot_id,
            proposed,
            prediction,
        } => {
            println!(
                "[{}] rejected {} (oracle says {} at {:.0}%)",
                short(bot_id),
                proposed,
                prediction.direction,
                prediction.confidence * 100.0
            );
        }
        BotEvent::CooldownStarted { bot_id, until } => {
            println!("[{}] cooldown until {}", short(bot_id), until);
        }
        BotEvent::AdaptRequested {
            bot_id,
            recommendation,
        } => {
            println!(
                "[{}] adapt suggested: {}",
                short(bot_id),
                recommendation.strategy_id
            );
        }
        BotEvent::BotError { bot_id, message } => {
            println!("[{}] error: {}", short(bot_id), message);
        }
    }
}

fn short(bot_id: &str) -> &str {
    &bot_id[..bot_id.len().min(8)]
}

/// Parse repeated `key=value` flags into a parameter bag. Values are tried
/// as int, float, bool, then kept as text.
fn parse_params(raw: &[String]) -> Result<StrategyParams> {
    let mut params = StrategyParams::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("invalid --param '{}', expected key=value", entry);
        };
        let value = if let Ok(v) = value.parse::<i64>() {
            ParamValue::Int(v)
        } else if let Ok(v) = value.parse::<f64>() {
            ParamValue::Float(v)
        } else if let Ok(v) = value.parse::<bool>() {
            ParamValue::Bool(v)
        } else {
            ParamValue::Text(value.to_string())
        };
        params.insert(key, value);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let params = parse_params(&[
            "fast=9".to_string(),
            "threshold=1.5".to_string(),
            "flag=true".to_string(),
            "label=abc".to_string(),
        ])
        .unwrap();

        assert_eq!(params.get("fast"), Some(&ParamValue::Int(9)));
        assert_eq!(params.get("threshold"), Some(&ParamValue::Float(1.5)));
        assert_eq!(params.get("flag"), Some(&ParamValue::Bool(true)));
        assert_eq!(
            params.get("label"),
            Some(&ParamValue::Text("abc".to_string()))
        );

        assert!(parse_params(&["broken".to_string()]).is_err());
    }
}
