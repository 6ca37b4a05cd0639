use alloy::primitives::{B256, U256};
use thiserror::Error;

/// Every failure the chain and swap layers can report.
///
/// Transport failures are split into [`SwapError::Proxy`] (retried by
/// [`crate::retry::RetryPolicy`]) and [`SwapError::Network`] (propagated). Business and contract
/// failures are turned into a [`crate::swap::SwapOutcome`] at the orchestrator boundary.
#[derive(Debug, Error, Clone)]
pub enum SwapError {
    #[error("config error: {0}")]
    Config(String),

    #[error("rpc unreachable ({context}): {message}")]
    Network {
        context: &'static str,
        message: String,
    },

    #[error("proxy failure ({context}): {message}")]
    Proxy {
        context: &'static str,
        message: String,
    },

    #[error("contract call failed ({context}): {message}")]
    ContractCall {
        context: &'static str,
        message: String,
    },

    #[error("quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: U256, required: U256 },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("transaction {0} reverted")]
    Reverted(B256),

    #[error("transaction {0} was not confirmed in time")]
    Timeout(B256),
}

impl SwapError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub const fn is_proxy(&self) -> bool {
        matches!(self, Self::Proxy { .. })
    }

    /// Sort a transport-level failure into `Proxy` or `Network`.
    ///
    /// reqwest and hyper only name the proxy in nested `source()` errors, so the whole chain
    /// is rendered before classifying.
    pub fn from_transport(context: &'static str, err: &(dyn std::error::Error + 'static)) -> Self {
        Self::from_transport_message(context, error_chain(err))
    }

    /// Classify an already rendered transport message.
    pub fn from_transport_message(context: &'static str, message: String) -> Self {
        if transport_err_is_proxy(&message) {
            Self::Proxy { context, message }
        } else {
            Self::Network { context, message }
        }
    }

    /// Like [`SwapError::from_transport`], but an execution revert becomes `ContractCall`.
    pub fn from_call(context: &'static str, err: &(dyn std::error::Error + 'static)) -> Self {
        let message = error_chain(err);
        if transport_err_is_proxy(&message) {
            Self::Proxy { context, message }
        } else if call_err_is_revert(&message) {
            Self::ContractCall { context, message }
        } else {
            Self::Network { context, message }
        }
    }

    /// A connect failure on a proxied transport is a proxy failure: the only host dialed is
    /// the proxy.
    #[must_use]
    pub fn through_proxy(self) -> Self {
        match self {
            Self::Network { context, message } if transport_err_is_connect(&message) => {
                Self::Proxy { context, message }
            }
            other => other,
        }
    }
}

/// `outer: cause: root cause`, skipping causes the outer message already prints.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = String::new();
    for cause in eyre::Chain::new(err) {
        let text = cause.to_string();
        if text.is_empty() || out.contains(&text) {
            continue;
        }
        if !out.is_empty() {
            out.push_str(": ");
        }
        out.push_str(&text);
    }
    out
}

fn transport_err_is_proxy(message: &str) -> bool {
    let s = message.to_lowercase();
    s.contains("proxy") || s.contains("tunnel")
}

fn transport_err_is_connect(message: &str) -> bool {
    let s = message.to_lowercase();
    s.contains("tcp connect error")
        || s.contains("connection refused")
        || s.contains("connection reset")
}

fn call_err_is_revert(message: &str) -> bool {
    let s = message.to_lowercase();
    s.contains("revert")
        || s.contains("abi decoding failed")
        || s.contains("returned no data")
        || s.contains("buffer overrun")
        || s.contains("type check failed")
}
