//! Uniswap-V2-style router adapter.
//!
//! Stateless: quoting goes through whatever provider the caller hands in, and payload
//! builders only ABI-encode calldata.

use crate::errors::SwapError;
use alloy::{
    primitives::{Address, Bytes, U256},
    providers::Provider,
    sol,
    sol_types::SolCall as _,
};

/// Seconds added to the latest block timestamp to form a swap deadline.
pub const SWAP_DEADLINE_SECS: u64 = 1200;

/// Slippage tolerance as a `numerator / denominator` of the quoted output (1%).
const SLIPPAGE_KEEP_NUM: u64 = 99;
const SLIPPAGE_KEEP_DEN: u64 = 100;

sol! {
    #[sol(rpc)]
    contract IWrappedNative {
        function deposit() external payable;
        function withdraw(uint256 wad) external;
    }
}

sol! {
    #[sol(rpc)]
    contract IUniswapV2Router02 {
        function getAmountsOut(uint256 amountIn, address[] path)
            external view returns (uint256[] amounts);
        function swapExactETHForTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline)
            external payable returns (uint256[] amounts);
    }
}

/// A router quote for one input amount along one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub router: Address,
    pub amount_in: U256,
    pub path: Vec<Address>,
    pub amount_out: U256,
}

impl Quote {
    pub fn min_out(&self) -> U256 {
        apply_slippage(self.amount_out)
    }
}

pub fn validate_path(path: &[Address]) -> Result<(), SwapError> {
    if path.len() < 2 {
        return Err(SwapError::QuoteUnavailable(format!(
            "path needs at least two tokens, got {}",
            path.len()
        )));
    }
    Ok(())
}

/// Ask the router how much of the last token in `path` `amount_in` buys.
pub async fn get_amount_out<P: Provider>(
    provider: &P,
    router: Address,
    amount_in: U256,
    path: &[Address],
) -> Result<U256, SwapError> {
    validate_path(path)?;
    let c = IUniswapV2Router02::new(router, provider);
    let amounts = c
        .getAmountsOut(amount_in, path.to_vec())
        .call()
        .await
        .map_err(|e| match SwapError::from_call("router getAmountsOut", &e) {
            SwapError::ContractCall { message, .. } => SwapError::QuoteUnavailable(message),
            other => other,
        })?;
    amounts
        .last()
        .copied()
        .ok_or_else(|| SwapError::QuoteUnavailable("router returned no amounts".to_owned()))
}

/// `floor(quoted * 0.99)` in integer arithmetic.
pub fn apply_slippage(quoted: U256) -> U256 {
    quoted
        .checked_mul(U256::from(SLIPPAGE_KEEP_NUM))
        .map_or_else(
            || quoted / U256::from(SLIPPAGE_KEEP_DEN) * U256::from(SLIPPAGE_KEEP_NUM),
            |x| x / U256::from(SLIPPAGE_KEEP_DEN),
        )
}

pub fn swap_exact_eth_for_tokens_calldata(
    min_out: U256,
    path: &[Address],
    recipient: Address,
    deadline: u64,
) -> Bytes {
    IUniswapV2Router02::swapExactETHForTokensCall {
        amountOutMin: min_out,
        path: path.to_vec(),
        to: recipient,
        deadline: U256::from(deadline),
    }
    .abi_encode()
    .into()
}

pub fn deposit_calldata() -> Bytes {
    IWrappedNative::depositCall {}.abi_encode().into()
}

pub fn withdraw_calldata(amount: U256) -> Bytes {
    IWrappedNative::withdrawCall { wad: amount }.abi_encode().into()
}
