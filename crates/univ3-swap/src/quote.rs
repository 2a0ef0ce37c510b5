use crate::chain::EvmClient;
use alloy::{
    primitives::{aliases::U24, Address, U256},
    sol,
};
use eyre::Context as _;

sol! {
    #[sol(rpc)]
    contract IQuoter {
        function quoteExactInputSingle(
            address tokenIn,
            address tokenOut,
            uint24 fee,
            uint256 amountIn,
            uint160 sqrtPriceLimitX96
        ) external returns (uint256 amountOut);
    }
}

/// Expected output for an exact-input single-pool swap, simulated with `eth_call` against
/// the quoter (no price limit).
pub async fn quote_exact_input_single(
    evm: &EvmClient,
    quoter: Address,
    token_in: Address,
    token_out: Address,
    fee: u32,
    amount_in: U256,
) -> eyre::Result<U256> {
    evm.with_fallback("quoter", |p| async move {
        IQuoter::new(quoter, &p)
            .quoteExactInputSingle(
                token_in,
                token_out,
                U24::from(fee),
                amount_in,
                alloy::primitives::aliases::U160::ZERO,
            )
            .call()
            .await
            .context("quoteExactInputSingle")
    })
    .await
}
