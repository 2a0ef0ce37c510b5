use crate::amount::format_units;
use crate::chain::EvmClient;
use alloy::primitives::{Address, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub chain_id: u64,
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
    pub name: String,
}

impl Token {
    pub async fn load(evm: &EvmClient, address: Address) -> eyre::Result<Self> {
        let (decimals, symbol, name) = evm.erc20_metadata(address).await?;
        Ok(Self {
            chain_id: evm.chain_id,
            address,
            decimals,
            symbol,
            name,
        })
    }

    /// Base units rendered with this token's decimals.
    pub fn format(&self, amount: U256) -> eyre::Result<String> {
        format_units(amount, self.decimals)
    }

    /// Uniswap orders pool tokens by address.
    pub fn sorts_before(&self, other: &Self) -> bool {
        self.address < other.address
    }
}

#[derive(Debug, Clone)]
pub struct TokenBalance {
    pub token: Token,
    pub balance: U256,
}

impl TokenBalance {
    pub fn describe(&self) -> eyre::Result<String> {
        Ok(format!(
            "{} ({}): {}",
            self.token.symbol,
            self.token.name,
            self.token.format(self.balance)?
        ))
    }
}

/// Metadata and the wallet's balance, loaded concurrently.
pub async fn load_token_and_balance(
    evm: &EvmClient,
    address: Address,
    wallet: Address,
) -> eyre::Result<TokenBalance> {
    let (token, balance) = tokio::try_join!(
        Token::load(evm, address),
        evm.erc20_balance(address, wallet)
    )?;
    Ok(TokenBalance { token, balance })
}

#[cfg(test)]
pub(crate) fn test_token(byte: u8, decimals: u8, symbol: &str) -> Token {
    Token {
        chain_id: 1,
        address: Address::repeat_byte(byte),
        decimals,
        symbol: symbol.to_owned(),
        name: format!("{symbol} token"),
    }
}
