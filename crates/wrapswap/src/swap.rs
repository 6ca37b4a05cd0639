//! Wrap-then-swap decision pipeline.
//!
//! Every step that can fail on its own (balance reads, wrap, quote, swap) is turned into a
//! [`SwapOutcome`] here; nothing below this boundary is allowed to abort the run. A swap that
//! fails after a confirmed wrap leaves the funds wrapped: no compensating unwrap is sent.

use crate::amount;
use crate::chains::evm::TxStatus;
use crate::errors::SwapError;
use crate::networks::{Network, NetworkProfile};
use crate::router;
use alloy::{
    network::TransactionBuilder as _,
    primitives::{Address, B256, U256},
    rpc::types::TransactionRequest,
};
use std::fmt;
use std::future::Future;

/// Chain operations the orchestrator and the quote comparator depend on.
pub trait SwapChain: Sync {
    fn profile(&self) -> &'static NetworkProfile;
    fn address(&self) -> Address;
    fn native_balance(&self) -> impl Future<Output = Result<U256, SwapError>> + Send;
    fn erc20_balance(&self, token: Address)
        -> impl Future<Output = Result<U256, SwapError>> + Send;
    /// Conservative fee budget for one transaction, in native smallest units.
    fn estimate_fee(&self) -> impl Future<Output = Result<U256, SwapError>> + Send;
    fn prepare_transaction(
        &self,
        value: U256,
    ) -> impl Future<Output = Result<TransactionRequest, SwapError>> + Send;
    fn sign_and_send(
        &self,
        tx: TransactionRequest,
        skip_gas_estimate: bool,
    ) -> impl Future<Output = Result<B256, SwapError>> + Send;
    fn wait_for_receipt(&self, tx: B256) -> impl Future<Output = TxStatus> + Send;
    fn latest_block_timestamp(&self) -> impl Future<Output = Result<u64, SwapError>> + Send;
    fn quote(
        &self,
        amount_in: U256,
        path: &[Address],
    ) -> impl Future<Output = Result<U256, SwapError>> + Send;

    /// `deposit()` `amount` of native currency into the wrapped token.
    fn wrap_native(&self, amount: U256) -> impl Future<Output = Result<B256, SwapError>> + Send {
        async move {
            let tx = self
                .prepare_transaction(amount)
                .await?
                .with_to(self.profile().wrapped_native)
                .with_input(router::deposit_calldata());
            self.sign_and_send(tx, false).await
        }
    }
}

/// What to swap: `amount` of native currency (18 decimals) into `target_token`.
#[derive(Debug, Clone)]
pub struct SwapPlan {
    pub amount: U256,
    pub target_token: Address,
    pub target_decimals: u8,
}

impl SwapPlan {
    /// Native → USDC on `network`.
    pub fn to_stablecoin(network: Network, amount: U256) -> Self {
        Self {
            amount,
            target_token: network.stablecoin(),
            target_decimals: network.stablecoin_decimals(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Native,
    Wrapped,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Wrapped => f.write_str("wrapped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStage {
    Balance,
    Wrap,
    Quote,
    Swap,
}

impl fmt::Display for SwapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Balance => "balance",
            Self::Wrap => "wrap",
            Self::Quote => "quote",
            Self::Swap => "swap",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InsufficientFunds {
        asset: Asset,
        available: U256,
        required: U256,
    },
}

#[derive(Debug, Clone)]
pub struct SwapFailure {
    pub stage: SwapStage,
    pub error: SwapError,
}

#[derive(Debug, Clone)]
pub enum SwapOutcome {
    /// Swap transaction confirmed on-chain.
    Sent(B256),
    Skipped(SkipReason),
    Failed(SwapFailure),
}

/// Decision points of one run, in the order they happen.
#[derive(Debug, Clone)]
pub enum SwapEvent {
    WrapSkipped { wrapped_balance: U256 },
    WrapStarted { amount: U256, fee_estimate: U256 },
    WrapSent { tx: B256 },
    WrapConfirmed { tx: B256 },
    InsufficientFunds { asset: Asset, available: U256, required: U256 },
    QuoteObtained { amount_in: U256, amount_out: U256, min_out: U256, out_decimals: u8 },
    SwapSent { tx: B256 },
    SwapConfirmed { tx: B256 },
    StepFailed { stage: SwapStage, error: SwapError },
}

/// Where orchestrator decisions are reported.
pub trait EventSink {
    fn record(&self, network: Network, event: &SwapEvent);
}

/// Writes each decision as one `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, network: Network, event: &SwapEvent) {
        match event {
            SwapEvent::WrapSkipped { wrapped_balance } => tracing::info!(
                %network,
                wrapped_balance = %amount::display_units(*wrapped_balance, 18),
                "wrapped balance covers the swap; skipping wrap"
            ),
            SwapEvent::WrapStarted {
                amount: a,
                fee_estimate,
            } => tracing::info!(
                %network,
                amount = %amount::display_units(*a, 18),
                fee_estimate = %amount::display_units(*fee_estimate, 18),
                "wrapping native currency"
            ),
            SwapEvent::WrapSent { tx } => tracing::info!(%network, tx = %tx, "wrap sent"),
            SwapEvent::WrapConfirmed { tx } => {
                tracing::info!(%network, tx = %tx, "wrap confirmed");
            }
            SwapEvent::InsufficientFunds {
                asset,
                available,
                required,
            } => tracing::error!(
                %network,
                %asset,
                available = %amount::display_units(*available, 18),
                required = %amount::display_units(*required, 18),
                "insufficient funds"
            ),
            SwapEvent::QuoteObtained {
                amount_in,
                amount_out,
                min_out,
                out_decimals,
            } => tracing::info!(
                %network,
                amount_in = %amount::display_units(*amount_in, 18),
                amount_out = %amount::display_units(*amount_out, *out_decimals),
                min_out = %amount::display_units(*min_out, *out_decimals),
                "quote obtained"
            ),
            SwapEvent::SwapSent { tx } => tracing::info!(%network, tx = %tx, "swap sent"),
            SwapEvent::SwapConfirmed { tx } => {
                tracing::info!(%network, tx = %tx, "swap confirmed");
            }
            SwapEvent::StepFailed { stage, error } => {
                tracing::error!(%network, %stage, %error, "swap step failed");
            }
        }
    }
}

trait AtStage<T> {
    fn at(self, stage: SwapStage) -> Result<T, SwapFailure>;
}

impl<T> AtStage<T> for Result<T, SwapError> {
    fn at(self, stage: SwapStage) -> Result<T, SwapFailure> {
        self.map_err(|error| SwapFailure { stage, error })
    }
}

fn confirmed(status: TxStatus, tx: B256, stage: SwapStage) -> Result<(), SwapFailure> {
    match status {
        TxStatus::Confirmed => Ok(()),
        TxStatus::Reverted => Err(SwapFailure {
            stage,
            error: SwapError::Reverted(tx),
        }),
        TxStatus::TimedOut => Err(SwapFailure {
            stage,
            error: SwapError::Timeout(tx),
        }),
    }
}

/// Run the full wrap → quote → swap pipeline once. Never returns an error.
pub async fn execute_swap<C, S>(chain: &C, plan: &SwapPlan, sink: &S) -> SwapOutcome
where
    C: SwapChain,
    S: EventSink + Sync,
{
    let network = chain.profile().network;
    match run_pipeline(chain, plan, sink).await {
        Ok(outcome) => outcome,
        Err(failure) => {
            sink.record(
                network,
                &SwapEvent::StepFailed {
                    stage: failure.stage,
                    error: failure.error.clone(),
                },
            );
            SwapOutcome::Failed(failure)
        }
    }
}

fn insufficient<S: EventSink>(
    sink: &S,
    network: Network,
    asset: Asset,
    available: U256,
    required: U256,
) -> SwapOutcome {
    sink.record(
        network,
        &SwapEvent::InsufficientFunds {
            asset,
            available,
            required,
        },
    );
    SwapOutcome::Skipped(SkipReason::InsufficientFunds {
        asset,
        available,
        required,
    })
}

async fn run_pipeline<C, S>(
    chain: &C,
    plan: &SwapPlan,
    sink: &S,
) -> Result<SwapOutcome, SwapFailure>
where
    C: SwapChain,
    S: EventSink + Sync,
{
    let profile = chain.profile();
    let network = profile.network;
    let wrapped = profile.wrapped_native;

    let wrapped_balance = chain.erc20_balance(wrapped).await.at(SwapStage::Balance)?;
    if wrapped_balance >= plan.amount {
        sink.record(network, &SwapEvent::WrapSkipped { wrapped_balance });
    } else {
        let native = chain.native_balance().await.at(SwapStage::Wrap)?;
        let fee = chain.estimate_fee().await.at(SwapStage::Wrap)?;
        let required = plan.amount.saturating_add(fee);
        if native < required {
            return Ok(insufficient(sink, network, Asset::Native, native, required));
        }

        sink.record(
            network,
            &SwapEvent::WrapStarted {
                amount: plan.amount,
                fee_estimate: fee,
            },
        );
        let wrap_tx = chain.wrap_native(plan.amount).await.at(SwapStage::Wrap)?;
        sink.record(network, &SwapEvent::WrapSent { tx: wrap_tx });
        confirmed(chain.wait_for_receipt(wrap_tx).await, wrap_tx, SwapStage::Wrap)?;
        sink.record(network, &SwapEvent::WrapConfirmed { tx: wrap_tx });
    }

    // The swap pays `amount` as native value on top of gas.
    let wrapped_balance = chain.erc20_balance(wrapped).await.at(SwapStage::Balance)?;
    if wrapped_balance < plan.amount {
        return Ok(insufficient(
            sink,
            network,
            Asset::Wrapped,
            wrapped_balance,
            plan.amount,
        ));
    }
    let native = chain.native_balance().await.at(SwapStage::Balance)?;
    let fee = chain.estimate_fee().await.at(SwapStage::Balance)?;
    let required = plan.amount.saturating_add(fee);
    if native < required {
        return Ok(insufficient(sink, network, Asset::Native, native, required));
    }

    let path = vec![wrapped, plan.target_token];
    let amount_out = chain
        .quote(plan.amount, &path)
        .await
        .at(SwapStage::Quote)?;
    let min_out = router::apply_slippage(amount_out);
    sink.record(
        network,
        &SwapEvent::QuoteObtained {
            amount_in: plan.amount,
            amount_out,
            min_out,
            out_decimals: plan.target_decimals,
        },
    );

    let latest = chain.latest_block_timestamp().await.at(SwapStage::Swap)?;
    let deadline = latest.saturating_add(router::SWAP_DEADLINE_SECS);
    let calldata =
        router::swap_exact_eth_for_tokens_calldata(min_out, &path, chain.address(), deadline);
    let tx = chain
        .prepare_transaction(plan.amount)
        .await
        .at(SwapStage::Swap)?
        .with_to(profile.router)
        .with_input(calldata);
    let swap_tx = chain.sign_and_send(tx, false).await.at(SwapStage::Swap)?;
    sink.record(network, &SwapEvent::SwapSent { tx: swap_tx });
    confirmed(chain.wait_for_receipt(swap_tx).await, swap_tx, SwapStage::Swap)?;
    sink.record(network, &SwapEvent::SwapConfirmed { tx: swap_tx });

    Ok(SwapOutcome::Sent(swap_tx))
}
