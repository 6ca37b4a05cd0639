use crate::errors::{error_chain, SwapError};
use crate::networks::NetworkProfile;
use crate::retry::RetryPolicy;
use crate::router;
use crate::swap::SwapChain;
use alloy::{
    consensus::{SignableTransaction as _, TxEip1559, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718 as _,
    network::TransactionBuilder as _,
    primitives::{Address, Bytes, TxKind, B256, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, TransactionRequest},
    signers::{local::PrivateKeySigner, SignerSync as _},
    sol,
};
use reqwest::Client;
use secrecy::{ExposeSecret as _, SecretString};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use zeroize::Zeroizing;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Gas units assumed by the pre-flight fee budget. Not the transaction's gas limit.
pub const FEE_CHECK_GAS: u64 = 70_000;
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

type EvmProvider = RootProvider;

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
        function approve(address spender, uint256 value) returns (bool);
    }
}

/// Fee fields for one transaction. Exactly one mode is ever applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeMode {
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    Legacy {
        gas_price: u128,
    },
}

/// Final state of a broadcast transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed,
    Reverted,
    TimedOut,
}

impl TxStatus {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// `floor(v * 1.25)`.
const fn with_headroom(v: u128) -> u128 {
    v.saturating_add(v / 4)
}

/// EIP-1559 fees from the node's gas price and suggested priority fee.
///
/// A zero priority suggestion falls back to the gas price itself.
pub const fn eip1559_fees(gas_price: u128, node_priority_fee: u128) -> FeeMode {
    let priority = if node_priority_fee == 0 {
        gas_price
    } else {
        node_priority_fee
    };
    FeeMode::Eip1559 {
        max_fee_per_gas: with_headroom(gas_price).saturating_add(priority),
        max_priority_fee_per_gas: priority,
    }
}

pub const fn legacy_fees(gas_price: u128) -> FeeMode {
    FeeMode::Legacy {
        gas_price: with_headroom(gas_price),
    }
}

/// Overwrite every fee field of `tx` with `fees`.
pub fn apply_fee_mode(mut tx: TransactionRequest, fees: FeeMode) -> TransactionRequest {
    tx.gas_price = None;
    tx.max_fee_per_gas = None;
    tx.max_priority_fee_per_gas = None;
    match fees {
        FeeMode::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            tx.max_fee_per_gas = Some(max_fee_per_gas);
            tx.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
            tx.transaction_type = Some(2);
        }
        FeeMode::Legacy { gas_price } => {
            tx.gas_price = Some(gas_price);
            tx.transaction_type = Some(0);
        }
    }
    tx
}

/// Worst-case fee budget: `(base_fee + priority_fee) * FEE_CHECK_GAS`.
pub fn fee_budget(base_fee: u128, priority_fee: u128) -> U256 {
    U256::from(base_fee.saturating_add(priority_fee)).saturating_mul(U256::from(FEE_CHECK_GAS))
}

/// `ceil(estimate * 1.5)`.
pub const fn gas_limit_with_buffer(estimate: u64) -> u64 {
    estimate.saturating_add(estimate.div_ceil(2))
}

fn max_poll_attempts(poll_interval: Duration, timeout: Duration) -> usize {
    let poll_ms = poll_interval.as_millis().max(1);
    let attempts = timeout.as_millis().div_ceil(poll_ms).max(1);
    usize::try_from(attempts).unwrap_or(usize::MAX)
}

/// Poll `fetch` for a receipt status until it shows up or `ceil(timeout / poll_interval)`
/// lookups have been made. Lookups are spaced one interval apart.
///
/// `fetch` yields `Some(true)` for status 1, `Some(false)` for status 0 and `None` while the
/// transaction is not mined. A lookup error ends the wait as [`TxStatus::TimedOut`].
pub async fn poll_receipt<F, Fut>(
    mut fetch: F,
    poll_interval: Duration,
    timeout: Duration,
) -> TxStatus
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<bool>, SwapError>>,
{
    let attempts = max_poll_attempts(poll_interval, timeout);
    for attempt in 1..=attempts {
        match fetch().await {
            Ok(Some(true)) => return TxStatus::Confirmed,
            Ok(Some(false)) => return TxStatus::Reverted,
            Ok(None) => {}
            Err(e) => {
                tracing::error!(attempt, error = %e, "receipt lookup failed");
                return TxStatus::TimedOut;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(poll_interval).await;
        }
    }
    TxStatus::TimedOut
}

fn broadcast_err_is_ok(message: &str) -> bool {
    let s = message.to_lowercase();
    s.contains("already known")
        || s.contains("known transaction")
        || s.contains("already imported")
        || s.contains("already in mempool")
}

/// Build and sign a consensus transaction from a fully-populated `TransactionRequest`.
fn build_and_sign_tx(
    signer: &PrivateKeySigner,
    tx: &TransactionRequest,
) -> Result<(TxEnvelope, B256), SwapError> {
    let to = tx.to.unwrap_or(TxKind::Create);
    let value = tx.value.unwrap_or(U256::ZERO);
    let input = tx.input.clone().into_input().unwrap_or_default();
    let nonce = tx
        .nonce
        .ok_or_else(|| SwapError::Signing("transaction has no nonce".to_owned()))?;
    let gas_limit = tx
        .gas
        .ok_or_else(|| SwapError::Signing("transaction has no gas limit".to_owned()))?;
    let chain_id = tx
        .chain_id
        .ok_or_else(|| SwapError::Signing("transaction has no chain id".to_owned()))?;

    match (tx.max_fee_per_gas, tx.max_priority_fee_per_gas, tx.gas_price) {
        (Some(max_fee_per_gas), Some(max_priority_fee_per_gas), None) => {
            let consensus_tx = TxEip1559 {
                chain_id,
                nonce,
                gas_limit,
                max_fee_per_gas,
                max_priority_fee_per_gas,
                to,
                value,
                input,
                access_list: tx.access_list.clone().unwrap_or_default(),
            };
            let hash = consensus_tx.signature_hash();
            let sig = signer
                .sign_hash_sync(&hash)
                .map_err(|e| SwapError::Signing(format!("sign eip1559: {e}")))?;
            let signed_tx = consensus_tx.into_signed(sig);
            let tx_hash = *signed_tx.hash();
            Ok((TxEnvelope::Eip1559(signed_tx), tx_hash))
        }
        (None, None, Some(gas_price)) => {
            let consensus_tx = TxLegacy {
                chain_id: Some(chain_id),
                nonce,
                gas_price,
                gas_limit,
                to,
                value,
                input,
            };
            let hash = consensus_tx.signature_hash();
            let sig = signer
                .sign_hash_sync(&hash)
                .map_err(|e| SwapError::Signing(format!("sign legacy: {e}")))?;
            let signed_tx = consensus_tx.into_signed(sig);
            let tx_hash = *signed_tx.hash();
            Ok((TxEnvelope::Legacy(signed_tx), tx_hash))
        }
        _ => Err(SwapError::Signing(
            "transaction must carry exactly one fee mode".to_owned(),
        )),
    }
}

/// Decode a hex private key (with or without `0x`) into a signer.
pub fn signer_from_hex(private_key: &SecretString) -> Result<PrivateKeySigner, SwapError> {
    let s = private_key.expose_secret().trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = Zeroizing::new(
        hex::decode(s)
            .ok()
            .ok_or_else(|| SwapError::config("private key is not valid hex"))?,
    );
    if bytes.len() != 32 {
        return Err(SwapError::config("private key must be 32 bytes"));
    }
    PrivateKeySigner::from_slice(&bytes)
        .map_err(|e| SwapError::config(format!("private key is not a valid secp256k1 scalar: {e}")))
}

struct Transport {
    provider: EvmProvider,
    proxied: bool,
}

/// One account on one network, talking to one RPC endpoint.
///
/// Transaction-producing methods are not meant to be called concurrently: nonces are read
/// fresh per transaction and nothing serializes two in-flight sends.
pub struct EvmClient {
    profile: &'static NetworkProfile,
    signer: PrivateKeySigner,
    transport: Mutex<Transport>,
    retry: RetryPolicy,
    eip1559: bool,
    receipt_poll_interval: Duration,
    receipt_timeout: Duration,
}

impl std::fmt::Debug for EvmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmClient")
            .field("network", &self.profile.network)
            .field("address", &self.signer.address())
            .field("proxied", &self.is_proxied())
            .field("eip1559", &self.eip1559)
            .finish_non_exhaustive()
    }
}

impl EvmClient {
    pub fn new(
        profile: &'static NetworkProfile,
        private_key: &SecretString,
        proxy: Option<&SecretString>,
    ) -> Result<Self, SwapError> {
        let signer = signer_from_hex(private_key)?;
        let provider = Self::provider_for_url(profile.rpc_url, proxy)?;
        tracing::debug!(
            network = %profile.network,
            chain_id = profile.chain_id,
            poa = profile.is_poa,
            proxied = proxy.is_some(),
            address = %signer.address(),
            "chain client ready"
        );
        Ok(Self {
            profile,
            signer,
            transport: Mutex::new(Transport {
                provider,
                proxied: proxy.is_some(),
            }),
            retry: RetryPolicy::default(),
            eip1559: true,
            receipt_poll_interval: RECEIPT_POLL_INTERVAL,
            receipt_timeout: RECEIPT_TIMEOUT,
        })
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Switch fee mode to legacy `gasPrice`.
    #[must_use]
    pub fn with_legacy_fees(mut self) -> Self {
        self.eip1559 = false;
        self
    }

    fn provider_for_url(url: &str, proxy: Option<&SecretString>) -> Result<EvmProvider, SwapError> {
        let u: reqwest::Url = url
            .parse()
            .map_err(|e| SwapError::config(format!("invalid rpc url {url}: {e}")))?;
        let mut builder = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT);
        if let Some(proxy) = proxy {
            let proxy_url = Zeroizing::new(format!("http://{}", proxy.expose_secret()));
            let p = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|e| SwapError::config(format!("invalid proxy url: {}", e.without_url())))?;
            builder = builder.proxy(p);
        }
        let client = builder
            .build()
            .map_err(|e| SwapError::config(format!("build rpc http client: {e}")))?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    pub fn is_proxied(&self) -> bool {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .proxied
    }

    /// Replace the proxied transport with a direct one for the rest of the run.
    pub fn disable_proxy(&self) {
        let direct = match Self::provider_for_url(self.profile.rpc_url, None) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(network = %self.profile.network, error = %e, "could not build direct rpc transport");
                return;
            }
        };
        let mut t = self.transport.lock().unwrap_or_else(PoisonError::into_inner);
        if t.proxied {
            t.provider = direct;
            t.proxied = false;
            tracing::info!(network = %self.profile.network, "proxy disabled");
        }
    }

    async fn with_proxy_retry<T, Fut>(
        &self,
        context_label: &'static str,
        f: impl Fn(EvmProvider) -> Fut + Sync,
    ) -> Result<T, SwapError>
    where
        Fut: std::future::Future<Output = Result<T, SwapError>> + Send,
    {
        let f = &f;
        self.retry
            .run(
                context_label,
                || {
                    let t = self.transport.lock().unwrap_or_else(PoisonError::into_inner);
                    let (provider, proxied) = (t.provider.clone(), t.proxied);
                    drop(t);
                    async move {
                        let r = f(provider).await;
                        if proxied {
                            r.map_err(SwapError::through_proxy)
                        } else {
                            r
                        }
                    }
                },
                || self.disable_proxy(),
            )
            .await
    }

    async fn gas_price(&self) -> Result<u128, SwapError> {
        self.with_proxy_retry("get gas price", |p| async move {
            p.get_gas_price()
                .await
                .map_err(|e| SwapError::from_transport("get gas price", &e))
        })
        .await
    }

    async fn receipt_status(&self, tx: B256) -> Result<Option<bool>, SwapError> {
        self.with_proxy_retry("get tx receipt", |p| async move {
            let r = p
                .get_transaction_receipt(tx)
                .await
                .map_err(|e| SwapError::from_transport("get tx receipt", &e))?;
            Ok(r.map(|r| r.status()))
        })
        .await
    }

    async fn call_tx(&self, to: Address, value: U256, input: Bytes) -> Result<B256, SwapError> {
        let tx = self
            .prepare_transaction(value)
            .await?
            .with_to(to)
            .with_input(input);
        self.sign_and_send(tx, false).await
    }

    /// `withdraw(amount)` from the wrapped token back to native currency.
    pub async fn unwrap_native(&self, amount: U256) -> Result<B256, SwapError> {
        let tx = self
            .call_tx(
                self.profile.wrapped_native,
                U256::ZERO,
                router::withdraw_calldata(amount),
            )
            .await?;
        tracing::info!(network = %self.profile.network, tx = %tx, "unwrap transaction sent");
        Ok(tx)
    }
}

impl SwapChain for EvmClient {
    fn profile(&self) -> &'static NetworkProfile {
        self.profile
    }

    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn native_balance(&self) -> Result<U256, SwapError> {
        let addr = self.address();
        self.with_proxy_retry("get balance", |p| async move {
            p.get_balance(addr)
                .await
                .map_err(|e| SwapError::from_transport("get balance", &e))
        })
        .await
    }

    async fn erc20_balance(&self, token: Address) -> Result<U256, SwapError> {
        let owner = self.address();
        self.with_proxy_retry("erc20 balance", |p| async move {
            let c = IERC20::new(token, &p);
            c.balanceOf(owner)
                .call()
                .await
                .map_err(|e| SwapError::from_call("erc20 balanceOf", &e))
        })
        .await
    }

    async fn estimate_fee(&self) -> Result<U256, SwapError> {
        let primary = self
            .with_proxy_retry("fee history", |p| async move {
                let history = p
                    .get_fee_history(10, BlockNumberOrTag::Latest, &[50.0_f64])
                    .await
                    .map_err(|e| SwapError::from_transport("fee history", &e))?;
                let base_fee = history.base_fee_per_gas.last().copied().ok_or_else(|| {
                    SwapError::Network {
                        context: "fee history",
                        message: "node returned no base fee".to_owned(),
                    }
                })?;
                let priority = p
                    .get_max_priority_fee_per_gas()
                    .await
                    .map_err(|e| SwapError::from_transport("max priority fee", &e))?;
                Ok((base_fee, priority))
            })
            .await;

        match primary {
            Ok((base_fee, priority)) => Ok(fee_budget(base_fee, priority)),
            Err(e) => {
                tracing::warn!(network = %self.profile.network, error = %e, "fee history unavailable; falling back to gas price");
                let gas_price = self.gas_price().await?;
                Ok(fee_budget(gas_price, 0))
            }
        }
    }

    async fn prepare_transaction(&self, value: U256) -> Result<TransactionRequest, SwapError> {
        let from = self.address();
        let nonce = self
            .with_proxy_retry("get nonce", |p| async move {
                p.get_transaction_count(from)
                    .await
                    .map_err(|e| SwapError::from_transport("get nonce", &e))
            })
            .await?;
        let gas_price = self.gas_price().await?;

        let fees = if self.eip1559 {
            let node_priority = match self
                .with_proxy_retry("max priority fee", |p| async move {
                    p.get_max_priority_fee_per_gas()
                        .await
                        .map_err(|e| SwapError::from_transport("max priority fee", &e))
                })
                .await
            {
                Ok(v) => v,
                Err(e) if e.is_proxy() => return Err(e),
                Err(e) => {
                    tracing::warn!(network = %self.profile.network, error = %e, "no priority fee suggestion; using gas price");
                    0
                }
            };
            eip1559_fees(gas_price, node_priority)
        } else {
            legacy_fees(gas_price)
        };

        let tx = TransactionRequest::default()
            .with_chain_id(self.profile.chain_id)
            .with_nonce(nonce)
            .with_from(from)
            .with_value(value);
        Ok(apply_fee_mode(tx, fees))
    }

    async fn sign_and_send(
        &self,
        mut tx: TransactionRequest,
        skip_gas_estimate: bool,
    ) -> Result<B256, SwapError> {
        if !skip_gas_estimate {
            let estimate = self
                .with_proxy_retry("estimate gas", |p| {
                    let t = tx.clone();
                    async move {
                        p.estimate_gas(t)
                            .await
                            .map_err(|e| SwapError::from_call("estimate gas", &e))
                    }
                })
                .await?;
            tx.gas = Some(gas_limit_with_buffer(estimate));
        }

        let (envelope, tx_hash) = build_and_sign_tx(&self.signer, &tx)?;
        tracing::debug!(network = %self.profile.network, tx = %tx_hash, "transaction signed");
        let raw = envelope.encoded_2718();

        self.with_proxy_retry("send raw transaction", |p| {
            let raw = raw.clone();
            async move {
                match p.send_raw_transaction(&raw).await {
                    Ok(_pending) => Ok(()),
                    Err(e) => {
                        let message = error_chain(&e);
                        if broadcast_err_is_ok(&message) {
                            Ok(())
                        } else {
                            match SwapError::from_transport_message(
                                "send raw transaction",
                                message.clone(),
                            ) {
                                proxy @ SwapError::Proxy { .. } => Err(proxy),
                                _ => Err(SwapError::Broadcast(message)),
                            }
                        }
                    }
                }
            }
        })
        .await?;

        tracing::info!(network = %self.profile.network, tx = %tx_hash, "transaction sent");
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx: B256) -> TxStatus {
        let status = poll_receipt(
            || self.receipt_status(tx),
            self.receipt_poll_interval,
            self.receipt_timeout,
        )
        .await;
        let url = self.profile.tx_url(tx);
        match status {
            TxStatus::Confirmed => tracing::info!(network = %self.profile.network, %url, "transaction confirmed"),
            TxStatus::Reverted => tracing::error!(network = %self.profile.network, %url, "transaction reverted"),
            TxStatus::TimedOut => tracing::warn!(
                network = %self.profile.network,
                %url,
                timeout_secs = self.receipt_timeout.as_secs(),
                "transaction not confirmed in time"
            ),
        }
        status
    }

    async fn latest_block_timestamp(&self) -> Result<u64, SwapError> {
        self.with_proxy_retry("latest block", |p| async move {
            let block = p
                .get_block_by_number(BlockNumberOrTag::Latest)
                .await
                .map_err(|e| SwapError::from_transport("latest block", &e))?
                .ok_or_else(|| SwapError::Network {
                    context: "latest block",
                    message: "node returned no latest block".to_owned(),
                })?;
            Ok(block.header.timestamp)
        })
        .await
    }

    async fn quote(&self, amount_in: U256, path: &[Address]) -> Result<U256, SwapError> {
        let router_addr = self.profile.router;
        self.with_proxy_retry("router quote", |p| {
            let path = path.to_vec();
            async move { router::get_amount_out(&p, router_addr, amount_in, &path).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn counting_fetch(
        answers: Vec<Option<bool>>,
    ) -> (
        Arc<AtomicUsize>,
        impl FnMut() -> std::future::Ready<Result<Option<bool>, SwapError>>,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let fetch = move || {
            let n = calls2.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(answers.get(n).copied().flatten()))
        };
        (calls, fetch)
    }

    #[tokio::test(start_paused = true)]
    async fn success_receipt_returns_without_more_polling() {
        let (calls, fetch) = counting_fetch(vec![Some(true)]);
        let status = poll_receipt(fetch, RECEIPT_POLL_INTERVAL, RECEIPT_TIMEOUT).await;
        assert_eq!(status, TxStatus::Confirmed);
        assert!(status.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "single lookup expected");
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_receipt_returns_without_more_polling() {
        let (calls, fetch) = counting_fetch(vec![Some(false)]);
        let status = poll_receipt(fetch, RECEIPT_POLL_INTERVAL, RECEIPT_TIMEOUT).await;
        assert_eq!(status, TxStatus::Reverted);
        assert!(!status.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "single lookup expected");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_receipt_times_out_after_bounded_polls() {
        let (calls, fetch) = counting_fetch(vec![]);
        let started = tokio::time::Instant::now();
        let status = poll_receipt(fetch, RECEIPT_POLL_INTERVAL, RECEIPT_TIMEOUT).await;
        assert_eq!(status, TxStatus::TimedOut);
        // ceil(120 / 10)
        assert_eq!(calls.load(Ordering::SeqCst), 12, "lookup count");
        assert!(
            started.elapsed() < RECEIPT_TIMEOUT + RECEIPT_POLL_INTERVAL,
            "blocked too long: {:?}",
            started.elapsed()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_found_after_a_few_polls() {
        let (calls, fetch) = counting_fetch(vec![None, None, Some(true)]);
        let status = poll_receipt(fetch, RECEIPT_POLL_INTERVAL, RECEIPT_TIMEOUT).await;
        assert_eq!(status, TxStatus::Confirmed);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "lookup count");
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_error_ends_the_wait() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let fetch = move || {
            calls2.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(SwapError::Network {
                context: "get tx receipt",
                message: "connection reset".to_owned(),
            }))
        };
        let status = poll_receipt(fetch, RECEIPT_POLL_INTERVAL, RECEIPT_TIMEOUT).await;
        assert_eq!(status, TxStatus::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no polling after an rpc error");
    }

    #[test]
    fn poll_attempts_round_up() {
        assert_eq!(
            max_poll_attempts(Duration::from_secs(7), Duration::from_secs(20)),
            3
        );
        assert_eq!(
            max_poll_attempts(Duration::from_secs(10), Duration::from_secs(0)),
            1
        );
    }

    #[test]
    fn eip1559_fees_add_headroom_over_gas_price() {
        let fees = eip1559_fees(10_000_000_000, 2_000_000_000);
        assert_eq!(
            fees,
            FeeMode::Eip1559 {
                max_fee_per_gas: 14_500_000_000,
                max_priority_fee_per_gas: 2_000_000_000,
            }
        );
    }

    #[test]
    fn zero_priority_suggestion_falls_back_to_gas_price() {
        let fees = eip1559_fees(8, 0);
        assert_eq!(
            fees,
            FeeMode::Eip1559 {
                max_fee_per_gas: 18,
                max_priority_fee_per_gas: 8,
            }
        );
    }

    #[test]
    fn legacy_fees_floor_the_headroom() {
        assert_eq!(legacy_fees(7), FeeMode::Legacy { gas_price: 8 });
        assert_eq!(
            legacy_fees(20_000_000_000),
            FeeMode::Legacy {
                gas_price: 25_000_000_000
            }
        );
    }

    #[test]
    fn fee_modes_are_mutually_exclusive() {
        let tx = TransactionRequest::default()
            .with_to(Address::ZERO)
            .with_value(U256::from(1_u64));
        let out = apply_fee_mode(tx, eip1559_fees(10, 1));
        assert!(out.max_fee_per_gas.is_some(), "should set max_fee_per_gas");
        assert!(out.max_priority_fee_per_gas.is_some(), "should set priority");
        assert!(out.gas_price.is_none(), "should not set legacy gas_price");

        let back = apply_fee_mode(out, legacy_fees(10));
        assert_eq!(back.gas_price, Some(12_u128), "should set legacy gas_price");
        assert!(back.max_fee_per_gas.is_none(), "eip1559 fields must be cleared");
        assert!(back.max_priority_fee_per_gas.is_none(), "eip1559 fields must be cleared");
    }

    #[test]
    fn fee_budget_uses_fixed_gas() {
        assert_eq!(fee_budget(30, 2), U256::from(32_u64 * FEE_CHECK_GAS));
    }

    #[test]
    fn gas_buffer_rounds_up() {
        assert_eq!(gas_limit_with_buffer(21_000), 31_500);
        assert_eq!(gas_limit_with_buffer(3), 5);
        assert_eq!(gas_limit_with_buffer(0), 0);
    }

    #[test]
    fn signs_both_fee_modes() -> eyre::Result<()> {
        let signer = signer_from_hex(&SecretString::from(TEST_KEY.to_owned()))?;
        let base = TransactionRequest::default()
            .with_chain_id(10)
            .with_nonce(3)
            .with_gas_limit(50_000)
            .with_to(Address::repeat_byte(7))
            .with_value(U256::from(1_u64));

        let eip1559 = apply_fee_mode(base.clone(), eip1559_fees(10, 1));
        let (env, hash) = build_and_sign_tx(&signer, &eip1559)?;
        assert!(matches!(env, TxEnvelope::Eip1559(_)), "expected eip1559 envelope");
        assert_ne!(hash, B256::ZERO);

        let (env, _) = build_and_sign_tx(&signer, &apply_fee_mode(base, legacy_fees(10)))?;
        assert!(matches!(env, TxEnvelope::Legacy(_)), "expected legacy envelope");
        Ok(())
    }

    #[test]
    fn signing_requires_nonce_and_gas() -> eyre::Result<()> {
        let signer = signer_from_hex(&SecretString::from(TEST_KEY.to_owned()))?;
        let tx = apply_fee_mode(
            TransactionRequest::default().with_chain_id(10),
            legacy_fees(1),
        );
        let r = build_and_sign_tx(&signer, &tx);
        assert!(matches!(r, Err(SwapError::Signing(_))), "got {r:?}");
        Ok(())
    }

    #[test]
    fn private_key_parsing() -> eyre::Result<()> {
        let with_prefix = signer_from_hex(&SecretString::from(TEST_KEY.to_owned()))?;
        let without = signer_from_hex(&SecretString::from(TEST_KEY.trim_start_matches("0x").to_owned()))?;
        assert_eq!(with_prefix.address(), without.address());
        assert!(signer_from_hex(&SecretString::from("0x1234".to_owned())).is_err());
        assert!(signer_from_hex(&SecretString::from("zz".to_owned())).is_err());
        Ok(())
    }

    #[test]
    fn already_known_broadcasts_count_as_sent() {
        assert!(broadcast_err_is_ok("server returned an error response: already known"));
        assert!(!broadcast_err_is_ok("nonce too low"));
    }

    fn fast_retry(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::ZERO,
            disable_proxy_on_final: false,
        }
    }

    fn proxied_client(proxy: String, retry: RetryPolicy) -> eyre::Result<EvmClient> {
        let key = SecretString::from(TEST_KEY.to_owned());
        let proxy = SecretString::from(proxy);
        let client = EvmClient::new(
            crate::networks::Network::Optimism.profile(),
            &key,
            Some(&proxy),
        )?;
        Ok(client.with_retry_policy(retry))
    }

    const PROXY_AUTH_REQUIRED: &[u8] =
        b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n";

    /// Local HTTP proxy that answers every connection with `407`.
    async fn rejecting_proxy() -> eyre::Result<(String, Arc<AtomicUsize>)> {
        use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                seen.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0_u8; 1024];
                let answered = match sock.read(&mut buf).await {
                    Ok(_) => sock.write_all(PROXY_AUTH_REQUIRED).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = answered {
                    tracing::debug!(error = %e, "test proxy connection dropped");
                }
            }
        });
        Ok((format!("user:pass@127.0.0.1:{port}"), connections))
    }

    #[tokio::test]
    async fn proxy_auth_rejection_is_retried_as_a_proxy_error() -> eyre::Result<()> {
        let (proxy, connections) = rejecting_proxy().await?;
        let client = proxied_client(proxy, fast_retry(2))?;

        let Err(err) = client.native_balance().await else {
            eyre::bail!("balance lookup through a rejecting proxy succeeded");
        };

        let SwapError::Proxy { message, .. } = &err else {
            eyre::bail!("expected proxy error, got {err:?}");
        };
        assert!(
            message.to_lowercase().contains("proxy"),
            "nested proxy cause missing: {message}"
        );
        assert!(
            connections.load(Ordering::SeqCst) >= 2,
            "every attempt should go through the proxy"
        );
        assert!(client.is_proxied(), "fallback disabled in this policy");
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_proxy_is_a_proxy_error() -> eyre::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        drop(listener);
        let client = proxied_client(format!("user:pass@127.0.0.1:{port}"), fast_retry(1))?;

        let Err(err) = client.native_balance().await else {
            eyre::bail!("balance lookup through a closed proxy port succeeded");
        };
        assert!(err.is_proxy(), "expected proxy error, got {err:?}");
        Ok(())
    }

    #[test]
    fn debug_output_hides_the_key() -> eyre::Result<()> {
        let key = SecretString::from(TEST_KEY.to_owned());
        let client = EvmClient::new(crate::networks::Network::Optimism.profile(), &key, None)?;
        let dbg = format!("{client:?}");
        assert!(!dbg.contains(TEST_KEY.trim_start_matches("0x")), "key leaked: {dbg}");
        assert!(dbg.contains("EvmClient"));
        Ok(())
    }
}
