use crate::errors::SwapError;
use crate::retry::{first_ok_with_backoff, BackoffConfig};
use alloy::{
    consensus::{SignableTransaction as _, TxEip1559, TxEnvelope, TxLegacy},
    network::TransactionBuilder as _,
    primitives::{Address, Bytes, TxKind, B256, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, TransactionReceipt, TransactionRequest},
    signers::{local::PrivateKeySigner, SignerSync as _},
    sol,
    sol_types::SolCall as _,
    transports::http::reqwest::{Client, Url},
};
use eyre::Context as _;
use std::time::Duration;
use tokio::time::sleep;

const RPC_TIMEOUT: Duration = Duration::from_secs(20);
const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MIN_PRIORITY_FEE_WEI: u128 = 1_500_000_000;

pub type EvmProvider = RootProvider;

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) returns (bool);
    }
}

/// EIP-1559 fees from the pending base fee: `max(1.5 gwei, gas_price / 10)` tip and
/// `2 * base + tip` cap.
pub fn compute_eip1559_fees(base_fee: u128, gas_price: u128) -> (u128, u128) {
    let priority = std::cmp::max(MIN_PRIORITY_FEE_WEI, gas_price / 10);
    let min_fee = base_fee.saturating_add(priority);
    let max_fee = base_fee
        .saturating_mul(2)
        .saturating_add(priority)
        .max(min_fee);
    (max_fee, priority)
}

/// Fill fee fields unless the caller already picked them.
pub fn apply_fee_policy(
    mut tx: TransactionRequest,
    base_fee: Option<u128>,
    gas_price: u128,
) -> TransactionRequest {
    if tx.max_fee_per_gas.is_some()
        || tx.max_priority_fee_per_gas.is_some()
        || tx.gas_price.is_some()
    {
        return tx;
    }
    if let Some(base_fee) = base_fee {
        let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
        tx.max_fee_per_gas = Some(max_fee);
        tx.max_priority_fee_per_gas = Some(priority);
    } else {
        tx.gas_price = Some(gas_price);
    }
    tx
}

pub fn with_gas_buffer(gas: u64, buffer_pct: u64) -> u64 {
    gas.saturating_mul(100_u64.saturating_add(buffer_pct)) / 100
}

fn broadcast_err_is_ok(err: &eyre::Report) -> bool {
    let s = format!("{err:#}").to_lowercase();
    s.contains("already known")
        || s.contains("known transaction")
        || s.contains("already imported")
        || s.contains("already in mempool")
}

fn check_chain_id(expected: u64, actual: u64) -> Result<(), SwapError> {
    if actual == expected {
        Ok(())
    } else {
        Err(SwapError::ChainIdMismatch { expected, actual })
    }
}

/// Sign a fully populated request locally. Requests carrying `max_fee_per_gas` become
/// EIP-1559 transactions, everything else is legacy (EIP-155 replay protected).
fn sign_request(
    signer: &PrivateKeySigner,
    tx: &TransactionRequest,
    chain_id: u64,
) -> eyre::Result<(TxEnvelope, B256)> {
    let to = tx.to.unwrap_or(TxKind::Create);
    let value = tx.value.unwrap_or(U256::ZERO);
    let input = tx.input.clone().into_input().unwrap_or_default();
    let nonce = tx.nonce.ok_or_else(|| eyre::eyre!("tx missing nonce"))?;
    let gas_limit = tx.gas.ok_or_else(|| eyre::eyre!("tx missing gas limit"))?;

    if let Some(max_fee_per_gas) = tx.max_fee_per_gas {
        let unsigned = TxEip1559 {
            chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas.unwrap_or(0),
            to,
            value,
            input,
            access_list: tx.access_list.clone().unwrap_or_default(),
        };
        let sig = signer
            .sign_hash_sync(&unsigned.signature_hash())
            .context("sign eip1559")?;
        let signed = unsigned.into_signed(sig);
        let hash = *signed.hash();
        Ok((TxEnvelope::Eip1559(signed), hash))
    } else {
        let unsigned = TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price: tx.gas_price.ok_or_else(|| eyre::eyre!("tx missing gas price"))?,
            gas_limit,
            to,
            value,
            input,
        };
        let sig = signer
            .sign_hash_sync(&unsigned.signature_hash())
            .context("sign legacy")?;
        let signed = unsigned.into_signed(sig);
        let hash = *signed.hash();
        Ok((TxEnvelope::Legacy(signed), hash))
    }
}

/// JSON-RPC access to one EVM chain, with fallback endpoints.
#[derive(Debug, Clone)]
pub struct EvmClient {
    pub chain_id: u64,
    rpc_urls: Vec<String>,
    backoff: BackoffConfig,
    gas_buffer_pct: u64,
}

impl EvmClient {
    pub fn new(chain_id: u64, rpc_urls: Vec<String>, gas_buffer_pct: u64) -> Self {
        Self {
            chain_id,
            rpc_urls,
            backoff: BackoffConfig::default(),
            gas_buffer_pct,
        }
    }

    fn provider_for_url(url: &str) -> eyre::Result<EvmProvider> {
        let u: Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let client = Client::builder()
            .timeout(RPC_TIMEOUT)
            .connect_timeout(RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    /// Run `f` against the first endpoint that answers.
    pub async fn with_fallback<T, Fut>(
        &self,
        label: &'static str,
        f: impl Fn(EvmProvider) -> Fut + Sync,
    ) -> eyre::Result<T>
    where
        T: Send,
        Fut: std::future::Future<Output = eyre::Result<T>> + Send,
    {
        first_ok_with_backoff(
            &self.rpc_urls,
            &self.backoff,
            |u| {
                let u = u.clone();
                let f = &f;
                async move {
                    let p = Self::provider_for_url(&u)?;
                    f(p).await
                }
            },
            label,
        )
        .await
    }

    /// Fail unless the endpoint serves the chain the caller asked for.
    pub async fn verify_chain_id(&self) -> eyre::Result<()> {
        let actual = self
            .with_fallback("get chain id", |p| async move {
                p.get_chain_id().await.context("eth_chainId")
            })
            .await?;
        check_chain_id(self.chain_id, actual).map_err(Into::into)
    }

    /// Decimals, symbol and name, fetched concurrently.
    pub async fn erc20_metadata(&self, token: Address) -> eyre::Result<(u8, String, String)> {
        self.with_fallback("erc20 metadata", |p| async move {
            let c = IERC20::new(token, &p);
            let (decimals, symbol, name) = tokio::try_join!(
                async { c.decimals().call().await.context("erc20 decimals") },
                async { c.symbol().call().await.context("erc20 symbol") },
                async { c.name().call().await.context("erc20 name") },
            )?;
            Ok((decimals, symbol, name))
        })
        .await
    }

    pub async fn erc20_balance(&self, token: Address, owner: Address) -> eyre::Result<U256> {
        self.with_fallback("erc20 balance", |p| async move {
            IERC20::new(token, &p)
                .balanceOf(owner)
                .call()
                .await
                .context("erc20 balanceOf")
        })
        .await
    }

    pub async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> eyre::Result<U256> {
        self.with_fallback("erc20 allowance", |p| async move {
            IERC20::new(token, &p)
                .allowance(owner, spender)
                .call()
                .await
                .context("erc20 allowance")
        })
        .await
    }

    pub fn build_erc20_approve(
        from: Address,
        token: Address,
        spender: Address,
        value: U256,
    ) -> TransactionRequest {
        let calldata = IERC20::approveCall { spender, value }.abi_encode();
        TransactionRequest::default()
            .with_from(from)
            .with_to(token)
            .with_input(Bytes::from(calldata))
    }

    pub async fn gas_price(&self) -> eyre::Result<u128> {
        self.with_fallback("gas price", |p| async move {
            p.get_gas_price().await.context("eth_gasPrice")
        })
        .await
    }

    async fn pick_healthy_provider(&self) -> eyre::Result<EvmProvider> {
        self.with_fallback("select rpc", |p| async move {
            p.get_block_number().await.context("eth_blockNumber")?;
            Ok(p)
        })
        .await
    }

    /// Fill whatever the request is missing (fees, nonce, gas), sign it locally and
    /// broadcast the raw bytes to every endpoint until one accepts them.
    pub async fn send_tx(
        &self,
        signer: &PrivateKeySigner,
        mut tx: TransactionRequest,
    ) -> eyre::Result<B256> {
        let provider = self.pick_healthy_provider().await?;
        let from = signer.address();
        tx.chain_id = Some(self.chain_id);
        tx.from = Some(from);

        if tx.gas_price.is_none() && tx.max_fee_per_gas.is_none() {
            let base_fee = provider
                .get_block_by_number(BlockNumberOrTag::Pending)
                .await
                .ok()
                .flatten()
                .and_then(|b| b.header.base_fee_per_gas.map(u128::from));
            let gp = provider.get_gas_price().await.context("eth_gasPrice")?;
            tx = apply_fee_policy(tx, base_fee, gp);
        }

        if tx.nonce.is_none() {
            let n = provider
                .get_transaction_count(from)
                .pending()
                .await
                .context("get nonce")?;
            tx.nonce = Some(n);
        }

        if tx.gas.is_none() {
            let gas = provider
                .estimate_gas(tx.clone())
                .await
                .context("eth_estimateGas")?;
            tx.gas = Some(with_gas_buffer(gas, self.gas_buffer_pct));
        }

        let (envelope, tx_hash) = sign_request(signer, &tx, self.chain_id).context("sign tx")?;
        let raw = alloy::eips::eip2718::Encodable2718::encoded_2718(&envelope);
        tracing::debug!(tx_hash = %format!("{tx_hash:#x}"), nonce = ?tx.nonce, gas = ?tx.gas, "signed transaction");

        first_ok_with_backoff(
            &self.rpc_urls,
            &self.backoff,
            |u| {
                let u = u.clone();
                let raw = raw.clone();
                async move {
                    let p = Self::provider_for_url(&u)?;
                    match p.send_raw_transaction(&raw).await {
                        Ok(_pending) => Ok(()),
                        Err(e) => {
                            let report: eyre::Report = e.into();
                            if broadcast_err_is_ok(&report) {
                                Ok(())
                            } else {
                                Err(report).context("broadcast raw tx")
                            }
                        }
                    }
                }
            },
            "send transaction",
        )
        .await?;

        Ok(tx_hash)
    }

    pub async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> eyre::Result<TransactionReceipt> {
        let start = std::time::Instant::now();
        loop {
            let r = self
                .with_fallback("get tx receipt", |p| async move {
                    p.get_transaction_receipt(tx_hash)
                        .await
                        .context("eth_getTransactionReceipt")
                })
                .await?;
            if let Some(r) = r {
                return Ok(r);
            }
            if start.elapsed() > timeout {
                return Err(SwapError::ReceiptTimeout(tx_hash).into());
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eip1559_fee_policy() {
        let base_fee: u128 = 10_000_000_000;
        let gas_price: u128 = 20_000_000_000;
        let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
        assert_eq!(priority, 2_000_000_000_u128, "tip is gas_price / 10");
        assert_eq!(max_fee, 22_000_000_000_u128, "cap is 2 * base + tip");
    }

    #[test]
    fn eip1559_priority_has_floor() {
        let (_max_fee, priority) = compute_eip1559_fees(1_000_000_000, 5_000_000_000);
        assert_eq!(priority, MIN_PRIORITY_FEE_WEI);
    }

    #[test]
    fn fee_policy_keeps_explicit_gas_price() {
        let tx = TransactionRequest::default()
            .with_to(Address::ZERO)
            .with_gas_price(42);
        let out = apply_fee_policy(tx, Some(10), 7);
        assert_eq!(out.gas_price, Some(42));
        assert!(out.max_fee_per_gas.is_none());
    }

    #[test]
    fn fee_policy_falls_back_to_legacy_without_base_fee() {
        let tx = TransactionRequest::default().with_to(Address::ZERO);
        let out = apply_fee_policy(tx, None, 7);
        assert_eq!(out.gas_price, Some(7_u128));
        assert!(out.max_fee_per_gas.is_none());

        let tx = TransactionRequest::default().with_to(Address::ZERO);
        let out = apply_fee_policy(tx, Some(10_000_000_000), 20_000_000_000);
        assert!(out.max_fee_per_gas.is_some());
        assert!(out.gas_price.is_none());
    }

    #[test]
    fn gas_buffer() {
        assert_eq!(with_gas_buffer(100_000, 20), 120_000);
        assert_eq!(with_gas_buffer(46_000, 0), 46_000);
    }

    #[test]
    fn approve_request_targets_token() {
        let token = Address::repeat_byte(1);
        let spender = Address::repeat_byte(2);
        let tx = EvmClient::build_erc20_approve(Address::ZERO, token, spender, U256::from(5_u64));
        assert_eq!(tx.to, Some(TxKind::Call(token)));
        let input = tx.input.into_input().unwrap_or_default();
        assert_eq!(&input[..4], &IERC20::approveCall::SELECTOR[..]);
        let decoded = IERC20::approveCall::abi_decode(&input);
        assert!(decoded.is_ok_and(|c| c.spender == spender && c.value == U256::from(5_u64)));
    }

    #[test]
    fn signing_requires_nonce_and_gas() -> eyre::Result<()> {
        let signer = PrivateKeySigner::random();
        let tx = TransactionRequest::default()
            .with_to(Address::ZERO)
            .with_gas_price(1);
        assert!(sign_request(&signer, &tx, 1).is_err());

        let tx = tx.with_nonce(0).with_gas_limit(21_000);
        let (env, hash) = sign_request(&signer, &tx, 1)?;
        assert!(matches!(env, TxEnvelope::Legacy(_)));
        assert_ne!(hash, B256::ZERO);
        Ok(())
    }
    #[test]
    fn broadcast_duplicates_count_as_sent() {
        let cases = [
            ("already known", true),
            ("ALREADY KNOWN", true),
            ("known transaction: 0xabc", true),
            ("Transaction already imported", true),
            ("tx already in mempool", true),
            ("nonce too low", false),
            ("insufficient funds for gas * price + value", false),
            ("replacement transaction underpriced", false),
        ];
        for (msg, ok) in cases {
            let err = eyre::eyre!("{msg}").wrap_err("broadcast raw tx");
            assert_eq!(broadcast_err_is_ok(&err), ok, "{msg}");
        }
    }

    #[test]
    fn chain_id_must_match() {
        assert!(check_chain_id(1, 1).is_ok());
        assert_eq!(
            check_chain_id(1, 137),
            Err(SwapError::ChainIdMismatch {
                expected: 1,
                actual: 137
            })
        );
    }

    /// Minimal JSON-RPC endpoint answering every call with `result`.
    async fn mock_rpc(result: serde_json::Value) -> eyre::Result<String> {
        use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let result = result.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0_u8; 4096];
                    let body = loop {
                        let Ok(n) = sock.read(&mut chunk).await else {
                            return;
                        };
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(chunk.get(..n).unwrap_or_default());
                        let text = String::from_utf8_lossy(&buf).into_owned();
                        let Some((head, body)) = text.split_once("\r\n\r\n") else {
                            continue;
                        };
                        let len = head
                            .lines()
                            .filter_map(|l| l.split_once(':'))
                            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if body.len() >= len {
                            break body.to_owned();
                        }
                    };
                    let id = serde_json::from_str::<serde_json::Value>(&body)
                        .ok()
                        .and_then(|v| v.get("id").cloned())
                        .unwrap_or(serde_json::Value::Null);
                    let reply = serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
                        .to_string();
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
                        reply.len()
                    );
                    sock.write_all(resp.as_bytes()).await.ok();
                });
            }
        });
        Ok(url)
    }

    #[tokio::test]
    async fn endpoint_on_another_chain_is_rejected() -> eyre::Result<()> {
        let url = mock_rpc(serde_json::json!("0x89")).await?;
        let evm = EvmClient::new(1, vec![url.clone()], 20);
        let err = evm
            .verify_chain_id()
            .await
            .err()
            .ok_or_else(|| eyre::eyre!("chain id 137 accepted for chain 1"))?;
        assert_eq!(
            err.downcast_ref::<SwapError>(),
            Some(&SwapError::ChainIdMismatch {
                expected: 1,
                actual: 137
            })
        );

        let evm = EvmClient::new(137, vec![url], 20);
        evm.verify_chain_id().await?;
        Ok(())
    }

    #[tokio::test]
    async fn missing_receipt_times_out() -> eyre::Result<()> {
        let url = mock_rpc(serde_json::Value::Null).await?;
        let evm = EvmClient::new(1, vec![url], 20);
        let hash = B256::repeat_byte(0x11);
        let err = evm
            .wait_for_receipt(hash, Duration::ZERO)
            .await
            .err()
            .ok_or_else(|| eyre::eyre!("receipt appeared from nowhere"))?;
        assert_eq!(
            err.downcast_ref::<SwapError>(),
            Some(&SwapError::ReceiptTimeout(hash))
        );
        Ok(())
    }
}
