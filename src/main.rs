use anyhow::Context;
use clap::Parser;
use perpbot::config::BotConfig;
use perpbot::exchange::{BitgetClient, Credentials, MarketData, MarketGateway, PaperGateway};
use perpbot::execution::{RunOutcome, TradingController};
use perpbot::persistence::open_store;
use perpbot::strategy::EmaCrossSignal;
use perpbot::BotError;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const PAPER_EQUITY: i64 = 1_000;

#[derive(Parser, Debug)]
#[command(name = "perpbot")]
#[command(about = "Single-shot futures trading run: manage the open position or enter a new one")]
struct Cli {
    /// TOML config file (defaults to perpbot.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trade against an in-memory simulated account
    #[arg(long)]
    paper: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    match run(&cli).await {
        Ok(outcome) => {
            tracing::info!("✅ Run finished: {:?}", outcome);
            ExitCode::SUCCESS
        }
        Err(e) if e.downcast_ref::<BotError>().is_some_and(BotError::is_clean_exit) => {
            tracing::warn!("Run skipped: {:#}", e);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("❌ Run failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<RunOutcome> {
    let config =
        BotConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    tracing::info!(
        "🚀 perpbot starting for {} on {} candles",
        config.instrument,
        config.timeframe
    );

    let (gateway, market_data) = if cli.paper {
        build_paper(&config).await
    } else {
        build_live(&config).await
    }
    .context("Failed to connect to Bitget")?;

    let store = open_store(&config.store, cli.paper)
        .await
        .context("Failed to open plan store")?;
    let signal = Box::new(EmaCrossSignal::new(config.signal.clone()));

    let controller = TradingController::new(config, gateway, market_data, store, signal);
    Ok(controller.run_once().await?)
}

type Gateways = (Arc<dyn MarketGateway>, Arc<dyn MarketData>);

async fn build_live(config: &BotConfig) -> perpbot::Result<Gateways> {
    let credentials = Credentials::from_env();
    if credentials.is_none() {
        tracing::warn!("Bitget credentials not set, account calls will fail");
    }

    let client =
        Arc::new(BitgetClient::connect(&config.exchange, credentials, &config.instrument).await?);
    Ok((client.clone(), client))
}

/// Paper account seeded with live public candles
async fn build_paper(config: &BotConfig) -> perpbot::Result<Gateways> {
    tracing::info!("📝 Paper trading with {} USDT", PAPER_EQUITY);

    let market_data =
        Arc::new(BitgetClient::connect(&config.exchange, None, &config.instrument).await?);
    let gateway = Arc::new(PaperGateway::new(Decimal::from(PAPER_EQUITY)));
    Ok((gateway, market_data))
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("perpbot=info")),
        )
        .init();
}
