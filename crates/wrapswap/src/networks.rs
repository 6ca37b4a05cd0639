use crate::errors::SwapError;
use alloy::primitives::{address, Address};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Networks the executor knows how to trade on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Network {
    Optimism,
    Bsc,
    Polygon,
    Arbitrum,
}

impl Network {
    pub const ALL: [Self; 4] = [Self::Optimism, Self::Bsc, Self::Polygon, Self::Arbitrum];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Optimism => "OPTIMISM",
            Self::Bsc => "BSC",
            Self::Polygon => "POLYGON",
            Self::Arbitrum => "ARBITRUM",
        }
    }

    pub fn from_chain_id(chain_id: u64) -> Result<Self, SwapError> {
        Self::ALL
            .into_iter()
            .find(|n| n.profile().chain_id == chain_id)
            .ok_or_else(|| SwapError::config(format!("unsupported chain id: {chain_id}")))
    }

    pub fn profile(self) -> &'static NetworkProfile {
        match self {
            Self::Optimism => &OPTIMISM,
            Self::Bsc => &BSC,
            Self::Polygon => &POLYGON,
            Self::Arbitrum => &ARBITRUM,
        }
    }

    /// USDC deployment used as the swap target on this network.
    pub const fn stablecoin(self) -> Address {
        match self {
            Self::Optimism => address!("7F5c764cBc14f9669B88837ca1490cCa17c31607"),
            Self::Bsc => address!("8ac76a51cc950d9822d68b83fe1ad97b32cd580d"),
            Self::Polygon => address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174"),
            Self::Arbitrum => address!("af88d065e77c8cC2239327C5EDb3A432268e5831"),
        }
    }

    /// Decimals of [`Network::stablecoin`]. Binance-peg USDC on BSC uses 18.
    pub const fn stablecoin_decimals(self) -> u8 {
        match self {
            Self::Bsc => 18,
            Self::Optimism | Self::Polygon | Self::Arbitrum => 6,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|n| n.name() == wanted)
            .ok_or_else(|| {
                SwapError::config(format!(
                    "unsupported network {s:?}; expected one of OPTIMISM, BSC, POLYGON, ARBITRUM"
                ))
            })
    }
}

/// Static description of one supported chain.
#[derive(Debug, Clone)]
pub struct NetworkProfile {
    pub network: Network,
    pub chain_id: u64,
    pub rpc_url: &'static str,
    pub router: Address,
    pub wrapped_native: Address,
    pub native_symbol: &'static str,
    pub explorer_url: &'static str,
    pub is_poa: bool,
}

impl NetworkProfile {
    pub fn tx_url(&self, tx: impl fmt::Display) -> String {
        format!("{}/tx/{tx}", self.explorer_url.trim_end_matches('/'))
    }

    /// Router, wrapped token and USDC in EIP-55 form.
    pub fn checksummed_addresses(&self) -> [String; 3] {
        [
            self.router.to_checksum(None),
            self.wrapped_native.to_checksum(None),
            self.network.stablecoin().to_checksum(None),
        ]
    }
}

static OPTIMISM: NetworkProfile = NetworkProfile {
    network: Network::Optimism,
    chain_id: 10,
    rpc_url: "https://mainnet.optimism.io",
    // Uniswap V2 Router02
    router: address!("4A7b5Da61326A6379179b40d00F57E5bbDE84847"),
    wrapped_native: address!("4200000000000000000000000000000000000006"),
    native_symbol: "ETH",
    explorer_url: "https://optimistic.etherscan.io",
    is_poa: false,
};

static BSC: NetworkProfile = NetworkProfile {
    network: Network::Bsc,
    chain_id: 56,
    rpc_url: "https://bsc-dataseed.binance.org",
    // PancakeSwap V2 router
    router: address!("10ED43C718714eb63d5aA57B78B54704E256024E"),
    wrapped_native: address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"),
    native_symbol: "BNB",
    explorer_url: "https://bscscan.com",
    is_poa: true,
};

static POLYGON: NetworkProfile = NetworkProfile {
    network: Network::Polygon,
    chain_id: 137,
    rpc_url: "https://polygon-rpc.com",
    // QuickSwap V2 router
    router: address!("a5E0829CaCEd8fFDD4De3c43696c57F7D7A678ff"),
    wrapped_native: address!("0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270"),
    native_symbol: "MATIC",
    explorer_url: "https://polygonscan.com",
    is_poa: true,
};

static ARBITRUM: NetworkProfile = NetworkProfile {
    network: Network::Arbitrum,
    chain_id: 42161,
    rpc_url: "https://arb1.arbitrum.io/rpc",
    // Uniswap V2 Router02
    router: address!("4752ba5DBc23f44D87826276BF6Fd6b1C372aD24"),
    wrapped_native: address!("82aF49447D8a07e3bd95BD0d56f35241523fBab1"),
    native_symbol: "ETH",
    explorer_url: "https://arbiscan.io",
    is_poa: false,
};
