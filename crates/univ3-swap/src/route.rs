use crate::amount::{format_units, min_out_after_slippage};
use crate::chain::EvmClient;
use crate::config::{ChainTokens, OneInchConfig, UniswapConfig};
use crate::errors::SwapError;
use crate::pool::FEE_TIERS;
use crate::token::Token;
use alloy::{
    primitives::{
        address,
        aliases::{U160, U24},
        Address, Bytes, U256,
    },
    sol,
    sol_types::SolCall as _,
};
use eyre::Context as _;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const ONEINCH_HTTP_TIMEOUT: Duration = Duration::from_secs(20);
const ONEINCH_ROUTERS: [Address; 2] = [
    address!("1111111254eeb25477b68fb85ed929f73a960582"),
    address!("111111125421cA6dc452d289314280a0f8842A65"),
];

sol! {
    #[sol(rpc)]
    contract IQuoterV2 {
        struct QuoteExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            uint24 fee;
            uint160 sqrtPriceLimitX96;
        }
        function quoteExactInputSingle(QuoteExactInputSingleParams params)
            external returns (uint256 amountOut, uint160 sqrtPriceX96After, uint32 initializedTicksCrossed, uint256 gasEstimate);
    }
}

sol! {
    contract ISwapRouter02 {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }
        function exactInputSingle(ExactInputSingleParams params)
            external payable returns (uint256 amountOut);
        function multicall(uint256 deadline, bytes[] data)
            external payable returns (bytes[] results);
    }
}

#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub token_in: Token,
    pub token_out: Token,
    pub amount_in: U256,
    /// Address whose tokens are spent (the signer).
    pub sender: Address,
    /// Address that receives the output.
    pub recipient: Address,
    pub slippage_bps: u32,
    /// Unix seconds after which the swap must revert.
    pub deadline: u64,
    pub fee: u32,
}

/// A token amount tagged with its decimals, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amount {
    pub value: U256,
    pub decimals: u8,
}

impl Amount {
    pub fn format(&self) -> eyre::Result<String> {
        format_units(self.value, self.decimals)
    }
}

/// An executable swap: where to send it, what to send, and what it should yield.
#[derive(Debug, Clone)]
pub struct Route {
    pub source: &'static str,
    /// Contract the swap transaction calls.
    pub router: Address,
    /// Address the input token must be approved for.
    pub spender: Address,
    pub calldata: Bytes,
    pub value: U256,
    /// Expected output in base units of the output token.
    pub quote: U256,
    pub min_out: Option<U256>,
    pub estimated_gas_used: Option<u64>,
    pub gas_price_wei: u128,
    /// Gas cost expressed in the output token.
    pub gas_used_quote_token: Option<U256>,
    pub gas_used_usd: Option<Amount>,
}

impl Route {
    /// Quote minus the gas cost, when the gas cost could be priced in the output token.
    pub fn quote_gas_adjusted(&self) -> Option<U256> {
        self.gas_used_quote_token
            .map(|g| self.quote.saturating_sub(g))
    }
}

pub trait RouteSource {
    fn name(&self) -> &'static str;

    async fn route(&self, req: &RouteRequest) -> eyre::Result<Route>;
}

async fn quote_v2(
    evm: &EvmClient,
    quoter_v2: Address,
    token_in: Address,
    token_out: Address,
    amount_in: U256,
    fee: u32,
) -> eyre::Result<(U256, U256)> {
    evm.with_fallback("quoter v2", |p| async move {
        let params = IQuoterV2::QuoteExactInputSingleParams {
            tokenIn: token_in,
            tokenOut: token_out,
            amountIn: amount_in,
            fee: U24::from(fee),
            sqrtPriceLimitX96: U160::ZERO,
        };
        let out = IQuoterV2::new(quoter_v2, &p)
            .quoteExactInputSingle(params)
            .call()
            .await
            .context("quoteExactInputSingle v2")?;
        Ok((out.amountOut, out.gasEstimate))
    })
    .await
}

/// Best output across all fee tiers; tiers without a pool are skipped.
async fn best_quote_v2(
    evm: &EvmClient,
    quoter_v2: Address,
    token_in: Address,
    token_out: Address,
    amount_in: U256,
) -> eyre::Result<U256> {
    let mut best: Option<U256> = None;
    for fee in FEE_TIERS {
        if let Ok((out, _gas)) = quote_v2(evm, quoter_v2, token_in, token_out, amount_in, fee).await
        {
            if best.is_none_or(|b| out > b) {
                best = Some(out);
            }
        }
    }
    best.ok_or_else(|| eyre::eyre!("no uniswap pool for {token_in:#x} -> {token_out:#x}"))
}

/// Prices a gas cost (in wei of the native token) in the output token and in USD by
/// quoting the wrapped native token on Uniswap.
#[derive(Debug, Clone)]
pub struct GasValuation {
    evm: EvmClient,
    quoter_v2: Address,
    tokens: Option<ChainTokens>,
}

impl GasValuation {
    pub const fn new(evm: EvmClient, quoter_v2: Address, tokens: Option<ChainTokens>) -> Self {
        Self {
            evm,
            quoter_v2,
            tokens,
        }
    }

    async fn native_to(&self, token: Address, wei: U256) -> Option<U256> {
        let tokens = self.tokens?;
        if wei.is_zero() || token == tokens.wrapped_native {
            return Some(wei);
        }
        match best_quote_v2(&self.evm, self.quoter_v2, tokens.wrapped_native, token, wei).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(token = %token, error = %format!("{e:#}"), "could not price gas");
                None
            }
        }
    }

    /// Gas cost in the output token and in USD; either is `None` when it can't be priced.
    pub async fn value(
        &self,
        token_out: &Token,
        gas: Option<u64>,
        gas_price_wei: u128,
    ) -> (Option<U256>, Option<Amount>) {
        let Some(gas) = gas else {
            return (None, None);
        };
        let cost = gas_cost_wei(gas, gas_price_wei);
        tokio::join!(self.native_to(token_out.address, cost), self.in_usd(cost))
    }

    async fn in_usd(&self, gas_cost_wei: U256) -> Option<Amount> {
        let usdc = self.tokens?.usdc?;
        let value = self.native_to(usdc, gas_cost_wei).await?;
        let decimals = match self.evm.erc20_metadata(usdc).await {
            Ok((d, _, _)) => d,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "could not load usdc decimals");
                return None;
            }
        };
        Some(Amount { value, decimals })
    }
}

fn gas_cost_wei(gas: u64, gas_price_wei: u128) -> U256 {
    U256::from(gas).saturating_mul(U256::from(gas_price_wei))
}

/// `SwapRouter02.multicall(deadline, [exactInputSingle(..)])`.
pub fn encode_direct_swap(req: &RouteRequest, min_out: U256) -> Bytes {
    let exact = ISwapRouter02::exactInputSingleCall {
        params: ISwapRouter02::ExactInputSingleParams {
            tokenIn: req.token_in.address,
            tokenOut: req.token_out.address,
            fee: U24::from(req.fee),
            recipient: req.recipient,
            amountIn: req.amount_in,
            amountOutMinimum: min_out,
            sqrtPriceLimitX96: U160::ZERO,
        },
    }
    .abi_encode();
    let multicall = ISwapRouter02::multicallCall {
        deadline: U256::from(req.deadline),
        data: vec![Bytes::from(exact)],
    }
    .abi_encode();
    Bytes::from(multicall)
}

/// One direct swap through the requested Uniswap V3 pool.
#[derive(Debug, Clone)]
pub struct UniswapDirectRoute {
    evm: EvmClient,
    uniswap: UniswapConfig,
    gas: GasValuation,
}

impl UniswapDirectRoute {
    pub const fn new(evm: EvmClient, uniswap: UniswapConfig, gas: GasValuation) -> Self {
        Self { evm, uniswap, gas }
    }
}

impl RouteSource for UniswapDirectRoute {
    fn name(&self) -> &'static str {
        "uniswap"
    }

    async fn route(&self, req: &RouteRequest) -> eyre::Result<Route> {
        let ((quote, gas_estimate), gas_price_wei) = tokio::try_join!(
            quote_v2(
                &self.evm,
                self.uniswap.quoter_v2,
                req.token_in.address,
                req.token_out.address,
                req.amount_in,
                req.fee,
            ),
            self.evm.gas_price(),
        )?;
        if quote.is_zero() {
            return Err(SwapError::NoRoute.into());
        }

        let min_out = min_out_after_slippage(quote, req.slippage_bps)?;
        let estimated_gas_used = u64::try_from(gas_estimate).ok();
        let (gas_used_quote_token, gas_used_usd) =
            self.gas.value(&req.token_out, estimated_gas_used, gas_price_wei).await;

        Ok(Route {
            source: self.name(),
            router: self.uniswap.swap_router02,
            spender: self.uniswap.swap_router02,
            calldata: encode_direct_swap(req, min_out),
            value: U256::ZERO,
            quote,
            min_out: Some(min_out),
            estimated_gas_used,
            gas_price_wei,
            gas_used_quote_token,
            gas_used_usd,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OneInchTx {
    to: String,
    data: String,
    value: String,
    #[serde(default)]
    gas: Option<u64>,
    #[serde(default, rename = "gasPrice")]
    gas_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OneInchSwapResponse {
    /// `dstAmount` since API v6; v5 called it `toAmount`.
    #[serde(rename = "dstAmount", alias = "toAmount")]
    to_amount: String,
    tx: OneInchTx,
}

#[derive(Debug, Deserialize)]
struct OneInchSpenderResponse {
    address: String,
}

fn parse_u256_dec(s: &str) -> eyre::Result<U256> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        eyre::bail!("invalid decimal integer: {s:?}");
    }
    s.parse::<U256>().context("parse u256")
}

/// Checked pieces of a 1inch swap response.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OneInchSwap {
    router: Address,
    calldata: Bytes,
    value: U256,
    to_amount: U256,
    gas: Option<u64>,
    gas_price_wei: Option<u128>,
}

fn check_oneinch_swap(resp: OneInchSwapResponse, spender: Address) -> eyre::Result<OneInchSwap> {
    let to_amount = parse_u256_dec(&resp.to_amount).context("parse 1inch dstAmount")?;
    let router: Address = resp.tx.to.trim().parse().context("parse 1inch router")?;
    if !ONEINCH_ROUTERS.contains(&router) || router != spender {
        eyre::bail!("unexpected 1inch router: {router:#x}");
    }
    let data = resp.tx.data.strip_prefix("0x").unwrap_or(&resp.tx.data);
    let calldata = hex::decode(data).context("decode 1inch swap calldata")?;
    if calldata.is_empty() {
        eyre::bail!("1inch swap calldata is empty");
    }
    let value = parse_u256_dec(&resp.tx.value).context("parse 1inch value")?;
    if !value.is_zero() {
        eyre::bail!("unexpected non-zero 1inch tx value for an erc20 swap");
    }
    let gas_price_wei = resp
        .tx
        .gas_price
        .as_deref()
        .map(|s| s.trim().parse::<u128>().context("parse 1inch gasPrice"))
        .transpose()?;
    Ok(OneInchSwap {
        router,
        calldata: Bytes::from(calldata),
        value,
        to_amount,
        gas: resp.tx.gas.filter(|g| *g > 0),
        gas_price_wei,
    })
}

/// 1inch slippage is a percentage with up to two decimals.
fn bps_to_percent(bps: u32) -> String {
    format!("{}.{:02}", bps / 100, bps % 100)
}

fn base_url_is_allowed(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        s.starts_with(prefix)
            && matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let s = url.trim();
    s.starts_with("https://")
        || host_prefix_ok(s, "http://127.0.0.1")
        || host_prefix_ok(s, "http://localhost")
        || host_prefix_ok(s, "http://[::1]")
}

/// Routes through the 1inch aggregation API.
#[derive(Debug, Clone)]
pub struct OneInchRoute {
    evm: EvmClient,
    cfg: OneInchConfig,
    gas: GasValuation,
    http: Client,
}

impl OneInchRoute {
    pub fn new(evm: EvmClient, cfg: OneInchConfig, gas: GasValuation) -> eyre::Result<Self> {
        if !base_url_is_allowed(&cfg.base_url) {
            eyre::bail!("1inch base_url must use https (or http://localhost for local testing)");
        }
        if cfg.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            return Err(SwapError::MissingEnv(crate::config::ENV_ONEINCH_API_KEY).into());
        }
        let http = Client::builder()
            .timeout(ONEINCH_HTTP_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            evm,
            cfg,
            gas,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/{path}",
            self.cfg.base_url.trim_end_matches('/'),
            self.evm.chain_id
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        label: &'static str,
    ) -> eyre::Result<T> {
        let key = self.cfg.api_key.as_deref().unwrap_or_default().trim();
        self.http
            .get(url)
            .header("authorization", format!("Bearer {key}"))
            .send()
            .await
            .context(label)?
            .error_for_status()
            .context(label)?
            .json()
            .await
            .context(label)
    }

    async fn spender(&self) -> eyre::Result<Address> {
        let v: OneInchSpenderResponse = self
            .get_json(self.url("approve/spender"), "1inch spender")
            .await?;
        v.address.trim().parse().context("parse 1inch spender")
    }
}

impl RouteSource for OneInchRoute {
    fn name(&self) -> &'static str {
        "1inch"
    }

    async fn route(&self, req: &RouteRequest) -> eyre::Result<Route> {
        let spender = self.spender().await?;
        let receiver = if req.recipient == req.sender {
            String::new()
        } else {
            format!("&receiver={:#x}", req.recipient)
        };
        let url = format!(
            "{}?src={:#x}&dst={:#x}&amount={}&from={:#x}&slippage={}&disableEstimate=true{receiver}",
            self.url("swap"),
            req.token_in.address,
            req.token_out.address,
            req.amount_in,
            req.sender,
            bps_to_percent(req.slippage_bps)
        );
        let resp: OneInchSwapResponse = self.get_json(url, "1inch swap").await?;
        let swap = check_oneinch_swap(resp, spender)?;
        if swap.to_amount.is_zero() {
            return Err(SwapError::NoRoute.into());
        }

        let gas_price_wei = match swap.gas_price_wei {
            Some(g) => g,
            None => self.evm.gas_price().await?,
        };
        let (gas_used_quote_token, gas_used_usd) =
            self.gas.value(&req.token_out, swap.gas, gas_price_wei).await;

        Ok(Route {
            source: self.name(),
            router: swap.router,
            spender,
            calldata: swap.calldata,
            value: swap.value,
            quote: swap.to_amount,
            min_out: None,
            estimated_gas_used: swap.gas,
            gas_price_wei,
            gas_used_quote_token,
            gas_used_usd,
        })
    }
}
