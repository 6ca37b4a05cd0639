//! Pick the network with the best router quote for the same nominal input.

use crate::networks::Network;
use crate::router::Quote;
use crate::swap::SwapChain;
use alloy::primitives::{Address, U256};
use futures::future::join_all;

/// One network/path pair to quote.
#[derive(Debug)]
pub struct Candidate<'a, C> {
    pub chain: &'a C,
    pub path: Vec<Address>,
    /// Decimals of the last token in `path`; outputs are compared on a common 18-decimal scale.
    pub out_decimals: u8,
}

impl<'a, C: SwapChain> Candidate<'a, C> {
    /// Wrapped native → USDC on the chain's network.
    pub fn to_stablecoin(chain: &'a C) -> Self {
        let network = chain.profile().network;
        Self {
            chain,
            path: vec![chain.profile().wrapped_native, network.stablecoin()],
            out_decimals: network.stablecoin_decimals(),
        }
    }
}

#[derive(Debug)]
pub struct BestQuote<'a, C> {
    pub chain: &'a C,
    pub network: Network,
    pub quote: Quote,
}

fn normalized(amount: U256, decimals: u8) -> U256 {
    let shift = 18_u8.saturating_sub(decimals);
    amount.saturating_mul(U256::from(10_u64).pow(U256::from(shift)))
}

/// Quote every candidate concurrently and return the largest output.
///
/// Candidates whose quote fails are logged and dropped. Ties go to the earlier candidate.
/// Returns `None` when no candidate produced a quote.
pub async fn best_quote<'a, C: SwapChain>(
    candidates: &[Candidate<'a, C>],
    amount_in: U256,
) -> Option<BestQuote<'a, C>> {
    let quotes = join_all(candidates.iter().map(|c| async move {
        let r = c.chain.quote(amount_in, &c.path).await;
        (c, r)
    }))
    .await;

    let mut best: Option<(U256, BestQuote<'a, C>)> = None;
    for (c, r) in quotes {
        let network = c.chain.profile().network;
        let amount_out = match r {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(%network, error = %e, "quote failed; skipping network");
                continue;
            }
        };
        tracing::info!(%network, amount_out = %amount_out, "quote");
        let score = normalized(amount_out, c.out_decimals);
        if best.as_ref().is_some_and(|(s, _)| score <= *s) {
            continue;
        }
        best = Some((
            score,
            BestQuote {
                chain: c.chain,
                network,
                quote: Quote {
                    router: c.chain.profile().router,
                    amount_in,
                    path: c.path.clone(),
                    amount_out,
                },
            },
        ));
    }
    best.map(|(_, b)| b)
}
