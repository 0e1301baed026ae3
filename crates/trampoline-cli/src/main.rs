//! Trampoline CLI - verify a trade link before anything is signed
//!
//! `trampoline verify <ROUTE>` connects to a node of the linked network,
//! selects the trading account and proves that the linked market is genuine,
//! printing every stage as it progresses. The exit status is non-zero unless
//! the market was verified.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trampoline_engine::PipelineDriver;
use trampoline_ledger::HttpDialer;
use trampoline_steps::{
    progress, trade_pipeline, HostEnvironment, Progress, RawRequest, Request, TradePipeline,
};

mod config;
mod render;

use config::CliConfig;
use render::OutputFormat;

/// Trampoline CLI application
#[derive(Parser)]
#[command(name = "trampoline")]
#[command(about = "Verify market trade links before trading", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TRAMPOLINE_CONFIG")]
    config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run the trade pipeline for a route
    Verify {
        /// Route such as /Rinkeby/0x.../1/buy/amount=1&price=0.5&redirect=...&creationTX=0x...
        route: String,

        /// Probe only this node
        #[arg(short, long, env = "TRAMPOLINE_ENDPOINT")]
        endpoint: Option<String>,

        /// Re-run failed stages this many times; integrity failures are final
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },

    /// Build a route from its parts
    Encode {
        #[arg(long, default_value = "Rinkeby")]
        network: String,
        #[arg(long)]
        market: String,
        #[arg(long, default_value = "0")]
        outcome: String,
        #[arg(long, default_value = "buy")]
        action: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        price: String,
        #[arg(long)]
        redirect: String,
        #[arg(long = "creation-tx")]
        creation_tx: String,
    },

    /// Show configuration
    Config,
}

fn init_tracing(config: &CliConfig, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only stage output.
    match (config.logging.json, config.logging.timestamps) {
        (true, _) => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (false, true) => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        (false, false) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn print_view(driver: &PipelineDriver<TradePipeline>, format: OutputFormat) -> Result<()> {
    let Some(view) = driver.view() else {
        return Ok(());
    };
    match format {
        OutputFormat::Text => println!("{}", render::render_text(&view)),
        OutputFormat::Json => println!("{}", render::render_json(&view)?),
    }
    Ok(())
}

/// Drive the pipeline until it settles. Returns whether the market verified.
async fn verify(
    config: CliConfig,
    route: &str,
    endpoint: Option<String>,
    mut retries: u32,
    format: OutputFormat,
) -> Result<bool> {
    let request =
        Request::from_route(route).with_context(|| format!("invalid route '{}'", route))?;

    let mut connector = config.connector.clone();
    if endpoint.is_some() {
        connector.manual_endpoint = endpoint;
    }
    let addresses = Arc::new(
        config
            .addresses
            .address_book()
            .context("failed to set up trusted addresses")?,
    );
    let dialer = Arc::new(HttpDialer::new(connector.candidate_timeout()));
    let environment = Arc::new(HostEnvironment::ready_now(None));

    let pipeline = trade_pipeline(connector, environment, dialer, addresses);
    let mut driver = PipelineDriver::start(pipeline, request)?;
    tracing::info!(session = %driver.session(), route, "verifying trade link");

    let mut shown = driver.revision();
    print_view(&driver, format)?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted");
                driver.shutdown();
                return Ok(false);
            }
            applied = driver.next() => {
                if !applied? {
                    return Ok(false);
                }
            }
        }

        if driver.revision() != shown || format == OutputFormat::Json {
            shown = driver.revision();
            print_view(&driver, format)?;
        }

        let Some(view) = driver.view() else {
            return Ok(false);
        };
        match progress(&view) {
            Progress::Running => {}
            Progress::Verified(metadata) => {
                if format == OutputFormat::Text {
                    println!("{}", render::render_metadata(&metadata));
                }
                driver.shutdown();
                return Ok(true);
            }
            Progress::Failed {
                stage,
                reason,
                integrity,
            } => {
                if integrity || retries == 0 {
                    tracing::error!(%stage, %reason, integrity, "pipeline failed");
                    driver.shutdown();
                    return Ok(false);
                }
                retries -= 1;
                tracing::warn!(%stage, %reason, retries_left = retries, "retrying stage");
                driver.dispatch(stage.retry())?;
            }
        }
    }
}

fn encode(raw: RawRequest) -> Result<String> {
    let request = Request::try_from(raw).context("invalid trade request")?;
    Ok(request.to_route())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CliConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Verify {
            route,
            endpoint,
            retries,
        } => {
            if !verify(config, &route, endpoint, retries, cli.output).await? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Encode {
            network,
            market,
            outcome,
            action,
            amount,
            price,
            redirect,
            creation_tx,
        } => {
            let route = encode(RawRequest {
                network,
                market,
                outcome,
                action,
                amount: Some(amount),
                price: Some(price),
                redirect: Some(redirect),
                creation_tx: Some(creation_tx),
            })?;
            println!("{}", route);
            Ok(())
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
