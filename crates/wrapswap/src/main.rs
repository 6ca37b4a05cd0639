#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use alloy::primitives::U256;
use clap::{Parser, Subcommand};
use eyre::Context as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

mod amount;
mod chains;
mod compare;
mod config;
mod errors;
mod networks;
mod retry;
mod router;
mod swap;

use chains::evm::EvmClient;
use errors::SwapError;
use networks::Network;
use swap::{SwapChain as _, SwapOutcome, SwapPlan, TracingSink};

/// Exit status for settings that fail validation.
const CONFIG_ERROR_EXIT: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "wrapswap", version)]
struct Cli {
    /// Settings file (JSON).
    #[arg(long, global = true, default_value = "config/settings.json")]
    config: PathBuf,

    /// Dotenv file loaded before settings are resolved. Missing files are ignored.
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Also write JSON logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wrap native currency if needed and swap it for USDC on the configured network.
    Run {
        /// Sign legacy `gasPrice` transactions instead of EIP-1559.
        #[arg(long, default_value_t = false)]
        legacy_fees: bool,
    },

    /// Quote the configured amount on every supported network and print the best one.
    Quote,

    /// Withdraw wrapped native currency back to native on the configured network.
    Unwrap {
        /// Amount in native units, e.g. `0.01`.
        #[arg(long)]
        amount: String,

        #[arg(long, default_value_t = false)]
        legacy_fees: bool,
    },

    /// Print the built-in network table as JSON.
    Networks {
        /// Only print the network with this chain id.
        #[arg(long)]
        chain_id: Option<u64>,
    },
}

fn init_logging(
    log_file: Option<&Path>,
) -> eyre::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter.clone());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("log file path has no file name: {}", path.display()))?;
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(env_filter);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn write_stdout_json(v: &serde_json::Value) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(v).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write output")?;
    Ok(())
}

fn networks_json(networks: &[Network]) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = networks
        .iter()
        .map(|&n| {
            let p = n.profile();
            let [router, wrapped_native, stablecoin] = p.checksummed_addresses();
            serde_json::json!({
                "network": n,
                "chain_id": p.chain_id,
                "rpc_url": p.rpc_url,
                "router": router,
                "wrapped_native": wrapped_native,
                "stablecoin": stablecoin,
                "stablecoin_decimals": n.stablecoin_decimals(),
                "native_symbol": p.native_symbol,
                "explorer_url": p.explorer_url,
                "is_poa": p.is_poa,
            })
        })
        .collect();
    serde_json::Value::Array(rows)
}

fn build_client(
    network: Network,
    settings: &config::ResolvedSettings,
    legacy_fees: bool,
) -> Result<EvmClient, SwapError> {
    let client = EvmClient::new(
        network.profile(),
        &settings.private_key,
        settings.proxy.as_ref(),
    )?;
    Ok(if legacy_fees {
        client.with_legacy_fees()
    } else {
        client
    })
}

async fn run_swap(settings: &config::ResolvedSettings, legacy_fees: bool) -> Result<(), SwapError> {
    let client = build_client(settings.network, settings, legacy_fees)?;
    tracing::info!(
        network = %settings.network,
        address = %client.address(),
        amount = %settings.amount,
        from = %settings.from_token,
        to = %settings.to_token,
        proxied = client.is_proxied(),
        "starting swap"
    );

    let plan = SwapPlan::to_stablecoin(settings.network, settings.amount_wei);
    let outcome = tokio::select! {
        outcome = swap::execute_swap(&client, &plan, &TracingSink) => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted; any transaction already broadcast may still confirm");
            return Ok(());
        }
    };

    match outcome {
        SwapOutcome::Sent(tx) => tracing::info!(
            network = %settings.network,
            tx = %tx,
            url = %client.profile().tx_url(tx),
            "swap complete"
        ),
        SwapOutcome::Skipped(reason) => {
            tracing::warn!(network = %settings.network, ?reason, "swap skipped");
        }
        SwapOutcome::Failed(f) => tracing::error!(
            network = %settings.network,
            stage = %f.stage,
            error = %f.error,
            "swap failed"
        ),
    }
    Ok(())
}

fn build_all_clients(settings: &config::ResolvedSettings) -> Result<Vec<EvmClient>, SwapError> {
    Network::ALL
        .into_iter()
        .map(|n| build_client(n, settings, false))
        .collect()
}

async fn run_quote(clients: &[EvmClient], amount_in: U256) -> eyre::Result<()> {
    let candidates: Vec<_> = clients.iter().map(compare::Candidate::to_stablecoin).collect();

    let Some(best) = compare::best_quote(&candidates, amount_in).await else {
        tracing::error!("no network returned a quote");
        return Ok(());
    };
    let decimals = best.network.stablecoin_decimals();
    tracing::info!(
        network = %best.network,
        address = %best.chain.address(),
        amount_out = %best.quote.amount_out,
        "best quote"
    );
    write_stdout_json(&serde_json::json!({
        "network": best.network,
        "router": best.quote.router.to_checksum(None),
        "path": best.quote.path.iter().map(|a| a.to_checksum(None)).collect::<Vec<_>>(),
        "amount_in": amount::display_units(best.quote.amount_in, 18),
        "amount_out": amount::display_units(best.quote.amount_out, decimals),
        "min_out": amount::display_units(best.quote.min_out(), decimals),
    }))
}

async fn run_unwrap(
    settings: &config::ResolvedSettings,
    amount: &str,
    legacy_fees: bool,
) -> Result<(), SwapError> {
    let wei = amount::to_smallest_unit(amount, 18)?;
    if wei.is_zero() {
        return Err(SwapError::config("unwrap amount must be greater than zero"));
    }
    let client = build_client(settings.network, settings, legacy_fees)?;
    let wrapped = client
        .erc20_balance(client.profile().wrapped_native)
        .await?;
    if wrapped < wei {
        return Err(SwapError::InsufficientFunds {
            available: wrapped,
            required: wei,
        });
    }
    let tx = client.unwrap_native(wei).await?;
    let status = client.wait_for_receipt(tx).await;
    if status.is_success() {
        tracing::info!(network = %settings.network, tx = %tx, "unwrap complete");
    } else {
        tracing::error!(network = %settings.network, tx = %tx, ?status, "unwrap failed");
    }
    Ok(())
}

/// Config errors map to exit status 1; everything else is logged and the run ends normally.
fn finish(result: Result<(), SwapError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(SwapError::Config(msg)) => {
            tracing::error!(error = %msg, "invalid configuration");
            ExitCode::from(CONFIG_ERROR_EXIT)
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::SUCCESS
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let dotenv_result = if cli.env_file.exists() {
        Some(dotenv::from_path(&cli.env_file))
    } else {
        None
    };
    let _log_guard = init_logging(cli.log_file.as_deref())?;
    match dotenv_result {
        Some(Ok(())) => tracing::debug!(path = %cli.env_file.display(), "loaded env file"),
        Some(Err(e)) => {
            tracing::warn!(path = %cli.env_file.display(), error = %e, "could not load env file");
        }
        None => {}
    }

    if let Command::Networks { chain_id } = cli.cmd {
        let selected = match chain_id.map(Network::from_chain_id).transpose() {
            Ok(Some(n)) => vec![n],
            Ok(None) => Network::ALL.to_vec(),
            Err(e) => return Ok(finish(Err(e))),
        };
        write_stdout_json(&networks_json(&selected))?;
        return Ok(ExitCode::SUCCESS);
    }

    let settings = match config::load(&cli.config).await {
        Ok(s) => s,
        Err(e) => return Ok(finish(Err(e))),
    };

    let result = match cli.cmd {
        Command::Run { legacy_fees } => run_swap(&settings, legacy_fees).await,
        Command::Quote => match build_all_clients(&settings) {
            Ok(clients) => {
                run_quote(&clients, settings.amount_wei).await?;
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Unwrap {
            amount,
            legacy_fees,
        } => run_unwrap(&settings, &amount, legacy_fees).await,
        Command::Networks { .. } => Ok(()),
    };
    Ok(finish(result))
}
