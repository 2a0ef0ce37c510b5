use alloy::primitives::B256;
use thiserror::Error;

/// Failures the swap flow reports by name rather than as a bare eyre chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwapError {
    #[error("{0} is not set (export it or put it in .env)")]
    MissingEnv(&'static str),

    #[error("rpc endpoint is on chain {actual}, but --chain-id is {expected}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("no pool {symbol_in}-{symbol_out} for fee tier {fee}")]
    NoPool {
        symbol_in: String,
        symbol_out: String,
        fee: u32,
    },

    #[error("no route loaded")]
    NoRoute,

    #[error("approve transaction failed: {0:#x}")]
    ApproveFailed(B256),

    #[error("swap transaction failed: {0:#x}")]
    SwapFailed(B256),

    #[error("timed out waiting for receipt of {0:#x}")]
    ReceiptTimeout(B256),
}
