use crate::errors::SwapError;
use alloy::primitives::{address, Address};
use eyre::Context as _;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_API_URL: &str = "API_URL";
pub const ENV_PRIVATE_KEY: &str = "PRIVATE_KEY";
pub const ENV_ONEINCH_API_KEY: &str = "ONEINCH_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Primary JSON-RPC endpoint. `API_URL` wins over this value.
    pub url: Option<String>,
    /// Extra endpoints tried (in order) when the primary fails.
    pub fallback_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniswapConfig {
    pub factory: Address,
    /// Quoter (v1) used for the headline quote.
    pub quoter: Address,
    /// `QuoterV2`, which also reports a gas estimate; used for routing.
    pub quoter_v2: Address,
    pub swap_router02: Address,
    /// Override the per-chain wrapped native token (used for gas estimates).
    pub wrapped_native: Option<Address>,
    /// Override the per-chain USDC token (used for gas-in-USD estimates).
    pub usdc: Option<Address>,
}

impl Default for UniswapConfig {
    fn default() -> Self {
        // Same deployment addresses on mainnet, Polygon, Optimism and Arbitrum.
        Self {
            factory: address!("1F98431c8aD98523631AE4a59f267346ea31F984"),
            quoter: address!("b27308f9F90D607463bb33eA1BeBb41C27CE5AB6"),
            quoter_v2: address!("61fFE014bA17989E743c5F6cB21bF9697530B21e"),
            swap_router02: address!("68b3465833fb72A70ecDF485E0e4C7bD8665Fc45"),
            wrapped_native: None,
            usdc: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OneInchConfig {
    /// 1inch Swap API v6 base URL.
    pub base_url: String,
    /// 1inch requires a key; `ONEINCH_API_KEY` wins over this value.
    pub api_key: Option<String>,
}

impl Default for OneInchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.1inch.dev/swap/v6.0".into(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    pub receipt_timeout_secs: u64,
    /// Percentage added on top of `eth_estimateGas` for transactions we size ourselves.
    pub gas_buffer_pct: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            receipt_timeout_secs: 300,
            gas_buffer_pct: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    pub rpc: RpcConfig,
    pub uniswap: UniswapConfig,
    pub oneinch: OneInchConfig,
    pub tx: TxConfig,
}

/// Tokens used to price gas, per chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTokens {
    pub wrapped_native: Address,
    pub usdc: Option<Address>,
}

impl SwapConfig {
    /// Read the TOML file if one was given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> eyre::Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let s = std::fs::read_to_string(p)
                    .with_context(|| format!("read config {}", p.display()))?;
                toml::from_str(&s).with_context(|| format!("parse config {}", p.display()))?
            }
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        let non_empty = |k: &str| {
            get(k)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        if let Some(url) = non_empty(ENV_API_URL) {
            self.rpc.url = Some(url);
        }
        if let Some(key) = non_empty(ENV_ONEINCH_API_KEY) {
            self.oneinch.api_key = Some(key);
        }
    }

    /// Primary endpoint first, then de-duplicated fallbacks.
    pub fn rpc_urls(&self) -> Result<Vec<String>, SwapError> {
        let primary = self
            .rpc
            .url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SwapError::MissingEnv(ENV_API_URL))?;
        let mut urls = vec![primary.to_owned()];
        for u in &self.rpc.fallback_urls {
            let t = u.trim();
            if t.is_empty() || urls.iter().any(|x| x == t) {
                continue;
            }
            urls.push(t.to_owned());
        }
        Ok(urls)
    }

    pub fn chain_tokens(&self, chain_id: u64) -> Option<ChainTokens> {
        let defaults = default_chain_tokens(chain_id);
        let wrapped_native = self
            .uniswap
            .wrapped_native
            .or_else(|| defaults.map(|d| d.wrapped_native))?;
        let usdc = self.uniswap.usdc.or_else(|| defaults.and_then(|d| d.usdc));
        Some(ChainTokens {
            wrapped_native,
            usdc,
        })
    }
}

pub fn signing_key_from_env(
    get: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, SwapError> {
    get(ENV_PRIVATE_KEY)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
        .ok_or(SwapError::MissingEnv(ENV_PRIVATE_KEY))
}

fn default_chain_tokens(chain_id: u64) -> Option<ChainTokens> {
    match chain_id {
        1 => Some(ChainTokens {
            wrapped_native: address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            usdc: Some(address!("A0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")),
        }),
        10 => Some(ChainTokens {
            wrapped_native: address!("4200000000000000000000000000000000000006"),
            usdc: Some(address!("0b2C639c533813f4Aa9D7837CAf62653d097Ff85")),
        }),
        137 => Some(ChainTokens {
            wrapped_native: address!("0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270"),
            usdc: Some(address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174")),
        }),
        8453 => Some(ChainTokens {
            wrapped_native: address!("4200000000000000000000000000000000000006"),
            usdc: Some(address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")),
        }),
        42161 => Some(ChainTokens {
            wrapped_native: address!("82aF49447D8a07e3bd95BD0d56f35241523fBab1"),
            usdc: Some(address!("af88d065e77c8cC2239327C5EDb3A432268e5831")),
        }),
        11_155_111 => Some(ChainTokens {
            wrapped_native: address!("fFf9976782d46CC05630D1f6eBAb18b2324d6B14"),
            usdc: None,
        }),
        _ => None,
    }
}
