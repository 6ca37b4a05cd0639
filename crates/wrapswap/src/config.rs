use crate::amount;
use crate::chains::evm::signer_from_hex;
use crate::errors::SwapError;
use crate::networks::Network;
use alloy::primitives::U256;
use regex::Regex;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable holding a JSON object of named private keys for `ENV:<name>`.
pub const PRIVATE_KEYS_ENV: &str = "PRIVATE_KEYS";
const ENV_KEY_PREFIX: &str = "ENV:";

const PROXY_PATTERN: &str = r"^([^:@]+):([^:@]+)@([\w.-]+):(\d+)$";
const PROXY_CHECK_URL: &str = "https://httpbin.org/ip";
const PROXY_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Native decimals shared by every supported network.
const NATIVE_DECIMALS: u8 = 18;

const REQUIRED_KEYS: [&str; 6] = [
    "from_token",
    "to_token",
    "amount",
    "private_key",
    "proxy",
    "network",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Eth,
    Usdc,
}

impl Token {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eth => "ETH",
            Self::Usdc => "USDC",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Token {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ETH" => Ok(Self::Eth),
            "USDC" => Ok(Self::Usdc),
            _ => Err(SwapError::config(format!("unsupported token {s:?}"))),
        }
    }
}

/// Settings file as written on disk. Every field is required; `proxy` may be empty.
#[derive(Debug, Deserialize)]
struct RawSettings {
    from_token: String,
    to_token: String,
    amount: serde_json::Value,
    private_key: String,
    proxy: String,
    network: String,
}

/// Validated settings with secrets resolved.
#[derive(Debug)]
pub struct ResolvedSettings {
    pub amount: Decimal,
    /// `amount` in native smallest units.
    pub amount_wei: U256,
    pub private_key: SecretString,
    pub proxy: Option<SecretString>,
    pub network: Network,
    pub from_token: Token,
    pub to_token: Token,
}

/// Read, validate and resolve the settings file. Runs the live proxy check when a proxy is set.
pub async fn load(path: &Path) -> Result<ResolvedSettings, SwapError> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| SwapError::config(format!("read {}: {e}", path.display())))?;
    let keys = std::env::var(PRIVATE_KEYS_ENV).ok();
    let settings = parse(&s, keys.as_deref())?;
    match &settings.proxy {
        Some(proxy) => check_proxy(proxy).await?,
        None => tracing::info!("no proxy configured; skipping proxy check"),
    }
    Ok(settings)
}

/// Validate a settings document. `private_keys` is the raw `PRIVATE_KEYS` value, if any.
pub fn parse(json: &str, private_keys: Option<&str>) -> Result<ResolvedSettings, SwapError> {
    let doc: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| SwapError::config(format!("settings are not valid JSON: {e}")))?;
    let missing: Vec<&str> = REQUIRED_KEYS
        .into_iter()
        .filter(|k| doc.get(k).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(SwapError::config(format!(
            "missing required settings: {}",
            missing.join(", ")
        )));
    }
    let raw: RawSettings = serde_json::from_value(doc)
        .map_err(|e| SwapError::config(format!("invalid settings: {e}")))?;

    if raw.from_token.trim().eq_ignore_ascii_case(raw.to_token.trim()) {
        return Err(SwapError::config("from_token and to_token must differ"));
    }
    let from_token: Token = raw.from_token.parse()?;
    if from_token != Token::Eth {
        return Err(SwapError::config("from_token must be ETH"));
    }
    let to_token: Token = raw.to_token.parse()?;
    if to_token != Token::Usdc {
        return Err(SwapError::config("to_token must be USDC"));
    }

    let network: Network = raw.network.parse()?;
    let amount = parse_amount(&raw.amount)?;
    let amount_wei = amount::to_smallest_unit(&amount.to_string(), NATIVE_DECIMALS)?;

    let private_key = resolve_private_key(raw.private_key, private_keys)?;
    signer_from_hex(&private_key)?;

    let proxy = if raw.proxy.trim().is_empty() {
        None
    } else {
        validate_proxy_format(raw.proxy.trim())?;
        Some(SecretString::from(raw.proxy.trim().to_owned()))
    };

    Ok(ResolvedSettings {
        amount,
        amount_wei,
        private_key,
        proxy,
        network,
        from_token,
        to_token,
    })
}

/// Smallest amount accepted for a swap: 0.0001.
fn min_amount() -> Decimal {
    Decimal::new(1, 4)
}

fn parse_amount(v: &serde_json::Value) -> Result<Decimal, SwapError> {
    let s = match v {
        serde_json::Value::String(s) => s.trim().to_owned(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null
        | serde_json::Value::Bool(_)
        | serde_json::Value::Array(_)
        | serde_json::Value::Object(_) => {
            return Err(SwapError::config("amount must be a number or a string"));
        }
    };
    let amount = Decimal::from_str(&s)
        .or_else(|_| Decimal::from_scientific(&s))
        .map_err(|e| SwapError::config(format!("amount is not a valid decimal: {s:?} ({e})")))?;
    if amount <= Decimal::ZERO {
        return Err(SwapError::config("amount must be greater than zero"));
    }
    if amount < min_amount() {
        return Err(SwapError::config(format!(
            "amount is below the minimum of {}",
            min_amount()
        )));
    }
    Ok(amount.normalize())
}

/// Literal hex keys pass through; `ENV:<name>` is looked up in the `PRIVATE_KEYS` JSON map.
pub fn resolve_private_key(
    key: String,
    private_keys: Option<&str>,
) -> Result<SecretString, SwapError> {
    let Some(name) = key.strip_prefix(ENV_KEY_PREFIX) else {
        return Ok(SecretString::from(key));
    };
    let raw = private_keys
        .ok_or_else(|| SwapError::config(format!("{PRIVATE_KEYS_ENV} is not set")))?;
    let map: BTreeMap<String, String> = serde_json::from_str(raw).map_err(|e| {
        SwapError::config(format!(
            "{PRIVATE_KEYS_ENV} is not a JSON object of strings: {e}"
        ))
    })?;
    map.get(name)
        .map(|k| SecretString::from(k.clone()))
        .ok_or_else(|| {
            SwapError::config(format!("key {name:?} not found in {PRIVATE_KEYS_ENV}"))
        })
}

/// `login:password@host:port`.
pub fn validate_proxy_format(proxy: &str) -> Result<(), SwapError> {
    let re = Regex::new(PROXY_PATTERN)
        .map_err(|e| SwapError::config(format!("proxy pattern: {e}")))?;
    if re.is_match(proxy) {
        Ok(())
    } else {
        Err(SwapError::config(
            "proxy must look like login:password@host:port",
        ))
    }
}

/// One GET through the proxy to an IP-echo endpoint; anything but a 2xx fails.
async fn check_proxy(proxy: &SecretString) -> Result<(), SwapError> {
    let p = reqwest::Proxy::all(format!("http://{}", proxy.expose_secret()))
        .map_err(|e| SwapError::config(format!("invalid proxy url: {}", e.without_url())))?;
    let client = reqwest::Client::builder()
        .proxy(p)
        .timeout(PROXY_CHECK_TIMEOUT)
        .build()
        .map_err(|e| SwapError::config(format!("build proxy check client: {e}")))?;
    let resp = client
        .get(PROXY_CHECK_URL)
        .send()
        .await
        .map_err(|e| SwapError::config(format!("proxy check failed: {}", e.without_url())))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SwapError::config(format!(
            "proxy check returned status {status}"
        )));
    }
    tracing::info!("proxy check passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn settings(amount: &str, private_key: &str, proxy: &str, network: &str) -> String {
        format!(
            r#"{{"from_token":"ETH","to_token":"USDC","amount":{amount},"private_key":"{private_key}","proxy":"{proxy}","network":"{network}"}}"#
        )
    }

    fn config_message(r: Result<ResolvedSettings, SwapError>) -> String {
        match r {
            Err(SwapError::Config(m)) => m,
            Err(e) => format!("unexpected error kind: {e}"),
            Ok(s) => format!("unexpected success: {s:?}"),
        }
    }

    #[test]
    fn valid_settings_resolve() -> eyre::Result<()> {
        let s = parse(&settings("0.01", KEY, "", "arbitrum"), None)?;
        assert_eq!(s.network, Network::Arbitrum);
        assert_eq!(s.amount, Decimal::new(1, 2));
        assert_eq!(s.amount_wei, U256::from(10_000_000_000_000_000_u64));
        assert!(s.proxy.is_none(), "empty proxy disables it");
        assert_eq!(s.from_token, Token::Eth);
        assert_eq!(s.to_token, Token::Usdc);
        Ok(())
    }

    #[test]
    fn amount_may_be_a_string() -> eyre::Result<()> {
        let s = parse(&settings("\"0.5\"", KEY, "", "BSC"), None)?;
        assert_eq!(s.amount, Decimal::new(5, 1));
        Ok(())
    }

    #[test]
    fn missing_keys_are_listed() {
        let msg = config_message(parse(r#"{"from_token":"ETH","to_token":"USDC"}"#, None));
        assert!(msg.contains("amount"), "got {msg}");
        assert!(msg.contains("private_key"), "got {msg}");
        assert!(msg.contains("network"), "got {msg}");
    }

    #[test]
    fn amount_bounds() {
        let zero = config_message(parse(&settings("0", KEY, "", "BSC"), None));
        assert!(zero.contains("greater than zero"), "got {zero}");
        let tiny = config_message(parse(&settings("0.00009", KEY, "", "BSC"), None));
        assert!(tiny.contains("minimum"), "got {tiny}");
        assert!(
            parse(&settings("0.0001", KEY, "", "BSC"), None).is_ok(),
            "minimum itself is accepted"
        );
    }

    #[test]
    fn token_pair_is_checked() {
        let same = r#"{"from_token":"ETH","to_token":"eth","amount":1,"private_key":"x","proxy":"","network":"BSC"}"#;
        assert!(config_message(parse(same, None)).contains("differ"), "same token twice");
        let wrong = r#"{"from_token":"USDC","to_token":"ETH","amount":1,"private_key":"x","proxy":"","network":"BSC"}"#;
        assert!(
            config_message(parse(wrong, None)).contains("from_token must be ETH"),
            "reversed pair"
        );
    }

    #[test]
    fn unknown_network_is_rejected() {
        let msg = config_message(parse(&settings("1", KEY, "", "ethereum"), None));
        assert!(msg.contains("unsupported network"), "got {msg}");
    }

    #[test]
    fn env_keys_resolve_from_the_json_map() -> eyre::Result<()> {
        let map = format!(r#"{{"main":"{KEY}"}}"#);
        let s = parse(&settings("1", "ENV:main", "", "OPTIMISM"), Some(&map))?;
        assert_eq!(s.private_key.expose_secret(), KEY);

        let missing = config_message(parse(&settings("1", "ENV:other", "", "OPTIMISM"), Some(&map)));
        assert!(missing.contains("not found"), "got {missing}");
        let unset = config_message(parse(&settings("1", "ENV:main", "", "OPTIMISM"), None));
        assert!(unset.contains(PRIVATE_KEYS_ENV), "got {unset}");
        Ok(())
    }

    #[test]
    fn invalid_private_key_is_a_config_error() {
        let msg = config_message(parse(&settings("1", "0x1234", "", "POLYGON"), None));
        assert!(msg.contains("private key"), "got {msg}");
    }

    #[test]
    fn proxy_format() {
        for ok in ["user:pass@proxy.example.com:8080", "user:pass@10.0.0.1:3128"] {
            assert!(validate_proxy_format(ok).is_ok(), "should accept {ok}");
        }
        for bad in ["proxy.example.com:8080", "user:pass@host", "user:pa:ss@host:80"] {
            assert!(validate_proxy_format(bad).is_err(), "should reject {bad}");
        }
    }

    #[test]
    fn proxy_is_kept_secret() -> eyre::Result<()> {
        let s = parse(&settings("1", KEY, "user:hunter2@h.example:80", "BSC"), None)?;
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("hunter2"), "proxy credentials leaked: {dbg}");
        assert!(!dbg.contains("4c0883a6"), "private key leaked: {dbg}");
        Ok(())
    }
}
