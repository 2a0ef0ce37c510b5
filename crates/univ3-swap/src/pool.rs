use crate::amount::format_significant;
use crate::chain::EvmClient;
use crate::errors::SwapError;
use crate::token::Token;
use alloy::{
    primitives::{
        aliases::{I24, U160, U24},
        Address, U512,
    },
    sol,
};
use eyre::Context as _;

/// Digits used when printing pool prices.
pub const PRICE_SIGNIFICANT_DIGITS: u32 = 6;

/// Fee tiers Uniswap V3 deploys pools for, in hundredths of a bip.
pub const FEE_TIERS: [u32; 4] = [100, 500, 3000, 10_000];

sol! {
    #[sol(rpc)]
    contract IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
    }
}

sol! {
    #[sol(rpc)]
    contract IUniswapV3Pool {
        function factory() external view returns (address);
        function token0() external view returns (address);
        function token1() external view returns (address);
        function fee() external view returns (uint24);
        function tickSpacing() external view returns (int24);
        function maxLiquidityPerTick() external view returns (uint128);
        function liquidity() external view returns (uint128);
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolImmutables {
    pub factory: Address,
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_spacing: I24,
    pub max_liquidity_per_tick: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub liquidity: u128,
    pub sqrt_price_x96: U160,
    pub tick: I24,
    pub observation_index: u16,
    pub observation_cardinality: u16,
    pub observation_cardinality_next: u16,
    pub fee_protocol: u8,
    pub unlocked: bool,
}

pub fn is_known_fee_tier(fee: u32) -> bool {
    FEE_TIERS.contains(&fee)
}

/// Factory lookup for the `(token_in, token_out, fee)` pool.
pub async fn pool_address(
    evm: &EvmClient,
    factory: Address,
    token_in: &Token,
    token_out: &Token,
    fee: u32,
) -> eyre::Result<Address> {
    let (a, b) = (token_in.address, token_out.address);
    let addr = evm
        .with_fallback("factory getPool", |p| async move {
            IUniswapV3Factory::new(factory, &p)
                .getPool(a, b, U24::from(fee))
                .call()
                .await
                .context("getPool")
        })
        .await?;
    if addr.is_zero() {
        return Err(SwapError::NoPool {
            symbol_in: token_in.symbol.clone(),
            symbol_out: token_out.symbol.clone(),
            fee,
        }
        .into());
    }
    Ok(addr)
}

pub async fn load_immutables(evm: &EvmClient, pool: Address) -> eyre::Result<PoolImmutables> {
    evm.with_fallback("pool immutables", |p| async move {
        let c = IUniswapV3Pool::new(pool, &p);
        let (factory, token0, token1, fee, tick_spacing, max_liquidity_per_tick) = tokio::try_join!(
            async { c.factory().call().await.context("pool factory") },
            async { c.token0().call().await.context("pool token0") },
            async { c.token1().call().await.context("pool token1") },
            async { c.fee().call().await.context("pool fee") },
            async { c.tickSpacing().call().await.context("pool tickSpacing") },
            async {
                c.maxLiquidityPerTick()
                    .call()
                    .await
                    .context("pool maxLiquidityPerTick")
            },
        )?;
        Ok(PoolImmutables {
            factory,
            token0,
            token1,
            fee: fee.to::<u32>(),
            tick_spacing,
            max_liquidity_per_tick,
        })
    })
    .await
}

pub async fn load_state(evm: &EvmClient, pool: Address) -> eyre::Result<PoolState> {
    evm.with_fallback("pool state", |p| async move {
        let c = IUniswapV3Pool::new(pool, &p);
        let (liquidity, slot) = tokio::try_join!(
            async { c.liquidity().call().await.context("pool liquidity") },
            async { c.slot0().call().await.context("pool slot0") },
        )?;
        Ok(PoolState {
            liquidity,
            sqrt_price_x96: slot.sqrtPriceX96,
            tick: slot.tick,
            observation_index: slot.observationIndex,
            observation_cardinality: slot.observationCardinality,
            observation_cardinality_next: slot.observationCardinalityNext,
            fee_protocol: slot.feeProtocol,
            unlocked: slot.unlocked,
        })
    })
    .await
}

/// A pool snapshot with its tokens in pool order.
#[derive(Debug, Clone)]
pub struct Pool {
    pub address: Address,
    pub token0: Token,
    pub token1: Token,
    pub immutables: PoolImmutables,
    pub state: PoolState,
}

impl Pool {
    pub async fn load(
        evm: &EvmClient,
        address: Address,
        token_a: &Token,
        token_b: &Token,
    ) -> eyre::Result<Self> {
        let (immutables, state) =
            tokio::try_join!(load_immutables(evm, address), load_state(evm, address))?;
        Self::new(address, token_a, token_b, immutables, state)
    }

    pub fn new(
        address: Address,
        token_a: &Token,
        token_b: &Token,
        immutables: PoolImmutables,
        state: PoolState,
    ) -> eyre::Result<Self> {
        if token_a.chain_id != token_b.chain_id {
            eyre::bail!(
                "tokens are on different chains ({} and {})",
                token_a.chain_id,
                token_b.chain_id
            );
        }
        let (token0, token1) = if token_a.sorts_before(token_b) {
            (token_a.clone(), token_b.clone())
        } else {
            (token_b.clone(), token_a.clone())
        };
        if immutables.token0 != token0.address || immutables.token1 != token1.address {
            eyre::bail!(
                "pool {address:#x} holds {:#x}/{:#x}, expected {:#x}/{:#x}",
                immutables.token0,
                immutables.token1,
                token0.address,
                token1.address
            );
        }
        Ok(Self {
            address,
            token0,
            token1,
            immutables,
            state,
        })
    }

    pub const fn fee(&self) -> u32 {
        self.immutables.fee
    }

    /// Price of token0 in token1 as `(numerator, denominator)`:
    /// `sqrtPriceX96^2 * 10^dec0 / (2^192 * 10^dec1)`.
    pub fn token0_price_ratio(&self) -> eyre::Result<(U512, U512)> {
        let sqrt = U512::from(self.state.sqrt_price_x96);
        let pow10 = |d: u8| U512::from(10_u64).checked_pow(U512::from(d));
        let num = pow10(self.token0.decimals)
            .and_then(|scale| sqrt.checked_mul(sqrt)?.checked_mul(scale))
            .ok_or_else(|| eyre::eyre!("price overflow"))?;
        let den = pow10(self.token1.decimals)
            .and_then(|scale| (U512::from(1_u64) << 192_usize).checked_mul(scale))
            .ok_or_else(|| eyre::eyre!("price overflow"))?;
        Ok((num, den))
    }

    pub fn token0_price(&self) -> eyre::Result<String> {
        let (num, den) = self.token0_price_ratio()?;
        format_significant(num, den, PRICE_SIGNIFICANT_DIGITS)
    }

    pub fn token1_price(&self) -> eyre::Result<String> {
        let (num, den) = self.token0_price_ratio()?;
        if num.is_zero() {
            eyre::bail!("pool {:#x} is not initialized", self.address);
        }
        format_significant(den, num, PRICE_SIGNIFICANT_DIGITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::test_token;

    fn immutables_for(t0: &Token, t1: &Token) -> PoolImmutables {
        PoolImmutables {
            factory: Address::repeat_byte(0xfa),
            token0: t0.address,
            token1: t1.address,
            fee: 3000,
            tick_spacing: I24::ZERO,
            max_liquidity_per_tick: 1,
        }
    }

    fn state_with_sqrt(sqrt: U160) -> PoolState {
        PoolState {
            liquidity: 1,
            sqrt_price_x96: sqrt,
            tick: I24::ZERO,
            observation_index: 0,
            observation_cardinality: 1,
            observation_cardinality_next: 1,
            fee_protocol: 0,
            unlocked: true,
        }
    }

    #[test]
    fn tokens_are_sorted_into_pool_order() -> eyre::Result<()> {
        let a = test_token(2, 18, "WETH");
        let b = test_token(1, 6, "USDC");
        let pool = Pool::new(
            Address::repeat_byte(9),
            &a,
            &b,
            immutables_for(&b, &a),
            state_with_sqrt(U160::from(1_u64) << 96_usize),
        )?;
        assert_eq!(pool.token0.symbol, "USDC");
        assert_eq!(pool.token1.symbol, "WETH");
        assert_eq!(pool.fee(), 3000);
        Ok(())
    }

    #[test]
    fn mismatched_pool_tokens_are_rejected() {
        let a = test_token(1, 18, "A");
        let b = test_token(2, 18, "B");
        let c = test_token(3, 18, "C");
        let r = Pool::new(
            Address::repeat_byte(9),
            &a,
            &b,
            immutables_for(&a, &c),
            state_with_sqrt(U160::from(1_u64) << 96_usize),
        );
        assert!(r.is_err());
    }

    #[test]
    fn tokens_from_different_chains_are_rejected() {
        let a = test_token(1, 18, "A");
        let mut b = test_token(2, 18, "B");
        b.chain_id = 10;
        let r = Pool::new(
            Address::repeat_byte(9),
            &a,
            &b,
            immutables_for(&a, &b),
            state_with_sqrt(U160::from(1_u64) << 96_usize),
        );
        assert!(r.is_err());
    }

    #[test]
    fn unit_price_with_equal_decimals() -> eyre::Result<()> {
        let a = test_token(1, 18, "A");
        let b = test_token(2, 18, "B");
        let pool = Pool::new(
            Address::repeat_byte(9),
            &a,
            &b,
            immutables_for(&a, &b),
            state_with_sqrt(U160::from(1_u64) << 96_usize),
        )?;
        assert_eq!(pool.token0_price()?, "1");
        assert_eq!(pool.token1_price()?, "1");
        Ok(())
    }

    #[test]
    fn prices_scale_by_decimals() -> eyre::Result<()> {
        // Raw price 4 (sqrt = 2): 1 USDC = 4e-12 WETH in display units.
        let usdc = test_token(1, 6, "USDC");
        let weth = test_token(2, 18, "WETH");
        let pool = Pool::new(
            Address::repeat_byte(9),
            &usdc,
            &weth,
            immutables_for(&usdc, &weth),
            state_with_sqrt(U160::from(1_u64) << 97_usize),
        )?;
        assert_eq!(pool.token0_price()?, "0.000000000004");
        assert_eq!(pool.token1_price()?, "250000000000");
        Ok(())
    }

    #[test]
    fn uninitialized_pool_has_no_inverse_price() -> eyre::Result<()> {
        let a = test_token(1, 18, "A");
        let b = test_token(2, 18, "B");
        let pool = Pool::new(
            Address::repeat_byte(9),
            &a,
            &b,
            immutables_for(&a, &b),
            state_with_sqrt(U160::ZERO),
        )?;
        assert_eq!(pool.token0_price()?, "0");
        assert!(pool.token1_price().is_err());
        Ok(())
    }

    #[test]
    fn fee_tiers() {
        assert!(is_known_fee_tier(3000));
        assert!(is_known_fee_tier(100));
        assert!(!is_known_fee_tier(2500));
    }
}
