use crate::amount::parse_units;
use crate::chain::EvmClient;
use crate::cli_output::Report;
use crate::config::SwapConfig;
use crate::errors::SwapError;
use crate::pool::{pool_address, Pool};
use crate::quote::quote_exact_input_single;
use crate::route::{Route, RouteRequest, RouteSource};
use crate::token::{load_token_and_balance, Token};
use alloy::{
    network::TransactionBuilder as _,
    primitives::{Address, B256, U256},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use eyre::Context as _;
use std::time::Duration;
use tracing::{info, warn};

/// Everything the user chose on the command line.
#[derive(Debug, Clone)]
pub struct SwapArgs {
    pub wallet: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: String,
    pub fee: u32,
    pub slippage_bps: u32,
    pub deadline_secs: u64,
    pub swap_gas_limit: u64,
    pub dry_run: bool,
}

pub struct Swapper<'a, R, W> {
    pub evm: &'a EvmClient,
    pub cfg: &'a SwapConfig,
    pub signer: &'a PrivateKeySigner,
    pub router: &'a R,
    pub report: &'a mut Report<W>,
}

fn deadline_from(now_unix: i64, offset_secs: u64) -> eyre::Result<u64> {
    u64::try_from(now_unix)
        .context("system clock before unix epoch")?
        .checked_add(offset_secs)
        .ok_or_else(|| eyre::eyre!("deadline overflow"))
}

/// `--amount-in` in base units; zero is rejected.
fn parse_amount_in(s: &str, decimals: u8) -> Result<U256, SwapError> {
    let v = parse_units(s, decimals)
        .map_err(|e| SwapError::InvalidOption(format!("--amount-in: {e:#}")))?;
    if v.is_zero() {
        return Err(SwapError::InvalidOption(
            "--amount-in must be greater than zero".to_owned(),
        ));
    }
    Ok(v)
}

fn or_na(v: Option<String>) -> String {
    v.unwrap_or_else(|| "n/a".to_owned())
}

/// Report lines describing a route, in the order they are printed.
pub fn route_lines(route: &Route, token_out: &Token) -> eyre::Result<Vec<String>> {
    let fmt = |v: Option<U256>| v.map(|v| token_out.format(v)).transpose();
    let mut lines = vec![format!(
        "You'll get {} of {}",
        token_out.format(route.quote)?,
        token_out.symbol
    )];
    if let Some(min) = route.min_out {
        lines.push(format!(
            "Minimum Received: {} {}",
            token_out.format(min)?,
            token_out.symbol
        ));
    }
    lines.push(format!(
        "Gas Adjusted Quote: {}",
        or_na(fmt(route.quote_gas_adjusted())?)
    ));
    lines.push(format!(
        "Gas Used Quote Token: {}",
        or_na(fmt(route.gas_used_quote_token)?)
    ));
    lines.push(format!(
        "Gas Used USD: {}",
        or_na(route.gas_used_usd.map(|a| a.format()).transpose()?)
    ));
    lines.push(format!(
        "Gas Used: {}",
        or_na(route.estimated_gas_used.map(|g| g.to_string()))
    ));
    lines.push(format!("Gas Price Wei: {}", route.gas_price_wei));
    Ok(lines)
}

impl<R: RouteSource, W: std::io::Write> Swapper<'_, R, W> {
    fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.tx.receipt_timeout_secs)
    }

    /// Send `tx`, wait for it to be mined and map a reverted receipt to `on_revert`.
    async fn send_and_confirm(
        &self,
        tx: TransactionRequest,
        on_revert: fn(B256) -> SwapError,
    ) -> eyre::Result<B256> {
        let hash = self.evm.send_tx(self.signer, tx).await?;
        info!(tx_hash = %format!("{hash:#x}"), "transaction broadcast");
        let receipt = self
            .evm
            .wait_for_receipt(hash, self.receipt_timeout())
            .await?;
        if !receipt.status() {
            return Err(on_revert(hash).into());
        }
        info!(
            tx_hash = %format!("{hash:#x}"),
            block = ?receipt.block_number,
            gas_used = ?receipt.gas_used,
            "transaction confirmed"
        );
        Ok(hash)
    }

    async fn approve(
        &mut self,
        token_in: &Token,
        spender: Address,
        amount: U256,
    ) -> eyre::Result<()> {
        let owner = self.signer.address();
        let allowance = self
            .evm
            .erc20_allowance(token_in.address, owner, spender)
            .await?;
        if allowance >= amount {
            info!(token = %token_in.address, spender = %spender, "allowance already sufficient");
            self.report.item(&format!(
                "Allowance of {} {} already covers the swap, skipping approval",
                token_in.format(allowance)?,
                token_in.symbol
            ))?;
            return Ok(());
        }

        let tx = EvmClient::build_erc20_approve(owner, token_in.address, spender, amount);
        let hash = self.send_and_confirm(tx, SwapError::ApproveFailed).await?;
        self.report.item(&format!("Approve tx: {hash:#x}"))
    }

    async fn execute(&mut self, route: &Route, gas_limit: u64) -> eyre::Result<B256> {
        let tx = TransactionRequest::default()
            .with_from(self.signer.address())
            .with_to(route.router)
            .with_input(route.calldata.clone())
            .with_value(route.value)
            .with_gas_price(route.gas_price_wei)
            .with_gas_limit(gas_limit);
        let hash = self.send_and_confirm(tx, SwapError::SwapFailed).await?;
        self.report.item(&format!("Swap tx: {hash:#x}"))?;
        Ok(hash)
    }

    pub async fn run(&mut self, args: &SwapArgs) -> eyre::Result<()> {
        // Part 1: tokens and balances.
        self.report.line("Connecting to blockchain, loading token balances...")?;
        self.report.blank()?;
        self.evm.verify_chain_id().await?;
        if self.signer.address() != args.wallet {
            warn!(
                signer = %self.signer.address(),
                wallet = %args.wallet,
                "signing key does not belong to --wallet-address; input is spent from the signer"
            );
        }
        let (balance_in, balance_out) = tokio::try_join!(
            load_token_and_balance(self.evm, args.token_in, args.wallet),
            load_token_and_balance(self.evm, args.token_out, args.wallet),
        )?;
        let (token_in, token_out) = (balance_in.token.clone(), balance_out.token.clone());
        self.report.line(&format!("Wallet {} balances:", args.wallet))?;
        self.report.item(&format!("Input: {}", balance_in.describe()?))?;
        self.report.item(&format!("Output: {}", balance_out.describe()?))?;
        self.report.blank()?;

        // Part 2: pool.
        self.report.line("Loading pool information...")?;
        let address = pool_address(
            self.evm,
            self.cfg.uniswap.factory,
            &token_in,
            &token_out,
            args.fee,
        )
        .await?;
        let pool = Pool::load(self.evm, address, &token_in, &token_out).await?;
        if pool.immutables.factory != self.cfg.uniswap.factory {
            eyre::bail!(
                "pool {address:#x} was deployed by {:#x}, not the configured factory",
                pool.immutables.factory
            );
        }
        let state = &pool.state;
        info!(
            pool = %address,
            fee = pool.fee(),
            tick_spacing = %pool.immutables.tick_spacing,
            max_liquidity_per_tick = pool.immutables.max_liquidity_per_tick,
            liquidity = state.liquidity,
            sqrt_price_x96 = %state.sqrt_price_x96,
            tick = %state.tick,
            observation_index = state.observation_index,
            observation_cardinality = state.observation_cardinality,
            observation_cardinality_next = state.observation_cardinality_next,
            fee_protocol = state.fee_protocol,
            unlocked = state.unlocked,
            "pool loaded"
        );
        self.report.line("Token prices in pool:")?;
        self.report.item(&format!(
            "1 {} = {} {}",
            pool.token0.symbol,
            pool.token0_price()?,
            pool.token1.symbol
        ))?;
        self.report.item(&format!(
            "1 {} = {} {}",
            pool.token1.symbol,
            pool.token1_price()?,
            pool.token0.symbol
        ))?;
        self.report.blank()?;

        // Part 3: quote.
        self.report.line("Loading up quote for a swap...")?;
        let amount_in = parse_amount_in(&args.amount_in, token_in.decimals)?;
        let quoted = quote_exact_input_single(
            self.evm,
            self.cfg.uniswap.quoter,
            token_in.address,
            token_out.address,
            pool.fee(),
            amount_in,
        )
        .await?;
        self.report.item(&format!(
            "You'll get approximately {} {} for {} {}",
            token_out.format(quoted)?,
            token_out.symbol,
            args.amount_in.trim(),
            token_in.symbol
        ))?;
        self.report.blank()?;

        // Part 4: route.
        self.report.blank()?;
        self.report.line("Loading a swap route...")?;
        let req = RouteRequest {
            token_in: token_in.clone(),
            token_out: token_out.clone(),
            amount_in,
            sender: self.signer.address(),
            recipient: args.wallet,
            slippage_bps: args.slippage_bps,
            deadline: deadline_from(chrono::Utc::now().timestamp(), args.deadline_secs)?,
            fee: pool.fee(),
        };
        let route = self.router.route(&req).await?;
        if route.calldata.is_empty() {
            return Err(SwapError::NoRoute.into());
        }
        info!(
            source = route.source,
            router = %route.router,
            quote = %route.quote,
            gas = ?route.estimated_gas_used,
            "route loaded"
        );
        for line in route_lines(&route, &token_out)? {
            self.report.item(&line)?;
        }
        self.report.blank()?;

        if args.dry_run {
            self.report.line("Dry run: not approving or swapping.")?;
            return Ok(());
        }

        // Part 5: approve, then swap.
        self.report.line("Approving amount to spend...")?;
        self.approve(&token_in, route.spender, amount_in).await?;

        self.report.line("Making a swap...")?;
        self.execute(&route, args.swap_gas_limit).await?;

        // Final part: balances after the swap.
        let (new_in, new_out) = tokio::try_join!(
            self.evm.erc20_balance(token_in.address, args.wallet),
            self.evm.erc20_balance(token_out.address, args.wallet),
        )?;
        self.report.blank()?;
        self.report.line("Swap completed successfully! ")?;
        self.report.blank()?;
        self.report.line("Updated balances:")?;
        self.report.item(&format!("{}: {}", token_in.symbol, token_in.format(new_in)?))?;
        self.report.item(&format!("{}: {}", token_out.symbol, token_out.format(new_out)?))?;
        Ok(())
    }
}
