//! Operator CLI: compose one attach transaction and print the outcome as
//! JSON. The heavy lifting lives in the library; this binary only wires the
//! collaborators together.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use attach_engine::cache::MemoryCache;
use attach_engine::composer::{AttachComposer, BuildRequest, ServiceFeeSpec};
use attach_engine::config::EngineConfig;
use attach_engine::fee_rate::FeeRateInput;
use attach_engine::gateway::QueryGateway;
use attach_engine::utxo::EsploraUtxoProvider;

#[derive(Debug, Parser)]
#[command(
    name = "attach-engine",
    about = "Compose a protocol asset-attach transaction as a signable PSBT"
)]
struct Cli {
    /// Path to a TOML configuration file; defaults apply when omitted.
    #[arg(long, env = "ATTACH_ENGINE_CONFIG")]
    config: Option<String>,

    /// Source address funding the attach (also receives change).
    #[arg(long)]
    address: String,

    /// Protocol asset identifier (cpid).
    #[arg(long)]
    asset: String,

    /// Asset quantity to attach.
    #[arg(long)]
    quantity: u64,

    /// Fee rate in sat/vB.
    #[arg(long, conflicts_with = "fee_rate_kvb")]
    fee_rate: Option<f64>,

    /// Fee rate in sat/kB.
    #[arg(long)]
    fee_rate_kvb: Option<f64>,

    /// Explicit funding input as txid:vout.
    #[arg(long)]
    input: Option<String>,

    /// Flat service fee in satoshis.
    #[arg(long, requires = "service_fee_address")]
    service_fee: Option<u64>,

    /// Address the service fee is paid to.
    #[arg(long)]
    service_fee_address: Option<String>,

    /// Refuse unconfirmed funding inputs (also disables RBF signaling).
    #[arg(long)]
    disallow_unconfirmed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file_with_env(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => EngineConfig::default(),
    };

    let cache = Arc::new(MemoryCache::new());
    let gateway = QueryGateway::new(config.providers.clone(), &config.gateway, cache)
        .context("constructing protocol query gateway")?;
    let utxo_provider = Arc::new(EsploraUtxoProvider::new(
        reqwest::Client::new(),
        config.utxo.esplora_base_url.clone(),
    ));
    let composer = AttachComposer::new(gateway, utxo_provider, config.policy.clone());

    let request = BuildRequest {
        address: cli.address,
        asset: cli.asset,
        quantity: cli.quantity,
        explicit_input: cli.input,
        fee_rate: FeeRateInput {
            sats_per_vbyte: cli.fee_rate,
            sats_per_kvb: cli.fee_rate_kvb,
        },
        service_fee: match (cli.service_fee, cli.service_fee_address) {
            (Some(amount_sats), Some(pay_to_address)) => Some(ServiceFeeSpec {
                amount_sats,
                pay_to_address,
            }),
            _ => None,
        },
        allow_unconfirmed_inputs: cli.disallow_unconfirmed.then_some(false),
    };

    let outcome = composer.build_attach_transaction(&request).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
