#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use clap::{Parser, ValueEnum};
use eyre::Context as _;
use secrecy::ExposeSecret as _;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

mod amount;
mod chain;
mod cli_output;
mod config;
mod errors;
mod paths;
mod pool;
mod quote;
mod retry;
mod route;
mod swap;
mod token;

use crate::chain::EvmClient;
use crate::cli_output::Report;
use crate::config::SwapConfig;
use crate::errors::SwapError;
use crate::route::{GasValuation, OneInchRoute, RouteSource, UniswapDirectRoute};
use crate::swap::{SwapArgs, Swapper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RouterKind {
    /// Single-pool route through `SwapRouter02`, quoted with `QuoterV2`.
    Uniswap,
    /// 1inch aggregator (needs `ONEINCH_API_KEY`).
    Oneinch,
}

/// Swap an ERC-20 token for another through Uniswap V3.
///
/// `API_URL` and `PRIVATE_KEY` are read from the environment (or a `.env` file
/// in the working directory).
#[derive(Parser, Debug)]
#[command(name = "univ3-swap", version)]
struct Cli {
    #[arg(long)]
    chain_id: u64,
    /// Wallet whose balances are shown; receives the output token.
    #[arg(long)]
    wallet_address: Address,
    #[arg(long)]
    token_in_address: Address,
    #[arg(long)]
    token_out_address: Address,
    /// Amount of the input token, in display units (e.g. `1.5`).
    #[arg(long)]
    amount_in: String,
    /// Pool fee tier in hundredths of a bip: 100, 500, 3000 or 10000.
    #[arg(long, default_value_t = 3000)]
    fee: u32,
    /// Slippage tolerance in basis points.
    #[arg(long, default_value_t = 500)]
    slippage_bps: u32,
    /// Swap deadline, in seconds from now.
    #[arg(long, default_value_t = 1800)]
    deadline_secs: u64,
    #[arg(long, value_enum, default_value_t = RouterKind::Uniswap)]
    router: RouterKind,
    #[arg(long, default_value_t = 800_000)]
    swap_gas_limit: u64,
    /// TOML file with RPC fallbacks, contract addresses and 1inch settings.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print balances, prices, quote and route, then stop without signing anything.
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn validate(&self) -> Result<(), SwapError> {
        if !pool::is_known_fee_tier(self.fee) {
            return Err(SwapError::InvalidOption(format!(
                "--fee {} is not a Uniswap V3 fee tier (expected one of {:?})",
                self.fee,
                pool::FEE_TIERS
            )));
        }
        if self.slippage_bps >= 10_000 {
            return Err(SwapError::InvalidOption(format!(
                "--slippage-bps {} must be below 10000",
                self.slippage_bps
            )));
        }
        if self.token_in_address == self.token_out_address {
            return Err(SwapError::InvalidOption(
                "--token-in-address and --token-out-address must differ".to_owned(),
            ));
        }
        let amount = self.amount_in.trim();
        if amount.is_empty() {
            return Err(SwapError::InvalidOption("--amount-in is empty".to_owned()));
        }
        if amount.bytes().all(|b| matches!(b, b'0' | b'.')) {
            return Err(SwapError::InvalidOption(
                "--amount-in must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    fn swap_args(&self) -> SwapArgs {
        SwapArgs {
            wallet: self.wallet_address,
            token_in: self.token_in_address,
            token_out: self.token_out_address,
            amount_in: self.amount_in.clone(),
            fee: self.fee,
            slippage_bps: self.slippage_bps,
            deadline_secs: self.deadline_secs,
            swap_gas_limit: self.swap_gas_limit,
            dry_run: self.dry_run,
        }
    }
}

fn init_logging(paths: &paths::SwapPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, paths.log_file_name());
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

async fn run_swap<R: RouteSource>(
    evm: &EvmClient,
    cfg: &SwapConfig,
    signer: &PrivateKeySigner,
    router: &R,
    args: &SwapArgs,
) -> eyre::Result<()> {
    info!(route_source = router.name(), chain_id = evm.chain_id, "starting swap");
    let mut report = Report::stdout();
    Swapper {
        evm,
        cfg,
        signer,
        router,
        report: &mut report,
    }
    .run(args)
    .await
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    // A missing .env is fine; the variables may come from the real environment.
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let paths = paths::SwapPaths::discover()?;
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);

    cli.validate()?;
    let cfg = SwapConfig::load(cli.config.as_deref())?;
    let rpc_urls = cfg.rpc_urls()?;
    let key = config::signing_key_from_env(|k| std::env::var(k).ok())?;
    let signer = key
        .expose_secret()
        .parse::<PrivateKeySigner>()
        .with_context(|| format!("{} is not a valid hex signing key", config::ENV_PRIVATE_KEY))?;

    let evm = EvmClient::new(cli.chain_id, rpc_urls, cfg.tx.gas_buffer_pct);
    let gas = GasValuation::new(
        evm.clone(),
        cfg.uniswap.quoter_v2,
        cfg.chain_tokens(cli.chain_id),
    );
    let args = cli.swap_args();
    match cli.router {
        RouterKind::Uniswap => {
            let router = UniswapDirectRoute::new(evm.clone(), cfg.uniswap.clone(), gas);
            run_swap(&evm, &cfg, &signer, &router, &args).await
        }
        RouterKind::Oneinch => {
            let router = OneInchRoute::new(evm.clone(), cfg.oneinch.clone(), gas)?;
            run_swap(&evm, &cfg, &signer, &router, &args).await
        }
    }
}
