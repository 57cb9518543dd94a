use std::fs;
use std::io::stdout;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use thiserror::Error;

use solgas_engine::{check_trace_not_truncated, EngineError, Session};
use solgas_rpc::{JsonRpcClient, RpcClientError};
use solgas_sources::SourceRegistryConfig;
use solgas_types::bundle::CompilerBundle;
use solgas_types::chain::{ChainClient, ChainError};

mod cli;

use cli::AppArgs;

#[derive(Debug, Error)]
enum SolgasError {
    #[error("could not read compiler-output bundle {path}: {source}")]
    BundleRead { path: String, source: std::io::Error },
    #[error("compiler-output bundle {path} is not valid JSON: {source}")]
    BundleParse { path: String, source: serde_json::Error },
    #[error("invalid RPC endpoint: {0}")]
    RpcClient(#[from] RpcClientError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("transaction has no `to` and its receipt has no `contractAddress`; cannot determine entry contract")]
    NoEntryAddress,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = AppArgs::parse();
    run(args).await.context("solgas failed")
}

async fn run(args: AppArgs) -> Result<(), SolgasError> {
    // Loaded before any RPC call: a malformed bundle fails fast.
    let bundle = load_bundle(&args.compiler_output_json)?;

    let chain = JsonRpcClient::new(&args.rpc_endpoint)?;
    let tx = chain.get_transaction(&args.transaction_hash).await?;
    let receipt = chain.get_transaction_receipt(&args.transaction_hash).await?;

    let (entry_address, entry_is_construction) = match tx.to {
        Some(to) => (to, false),
        None => match receipt.contract_address {
            Some(created) => (created, true),
            None => return Err(SolgasError::NoEntryAddress),
        },
    };

    let code = chain.get_code(&entry_address).await?;
    if code.trim_start_matches("0x").is_empty() {
        println!("target {entry_address} is not a contract");
        return Ok(());
    }

    let trace = chain.debug_trace_transaction(&args.transaction_hash).await?;
    if let Err(e) = check_trace_not_truncated(&trace.struct_logs) {
        warn!("{e}");
        return Err(e.into());
    }

    let src_root = args.src_root.unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    let mut session = Session::new(SourceRegistryConfig { skip_substrings: args.skip, src_root });
    session
        .attribute_trace(&chain, &bundle, &entry_address, entry_is_construction, &trace.struct_logs)
        .await?;

    solgas_report::render_report(&session.contracts, &session.sources, &bundle, &mut stdout())
        .expect("writing to stdout does not fail");
    Ok(())
}

fn load_bundle(path: &std::path::Path) -> Result<CompilerBundle, SolgasError> {
    let text = fs::read_to_string(path).map_err(|source| SolgasError::BundleRead { path: path.display().to_string(), source })?;
    serde_json::from_str(&text).map_err(|source| SolgasError::BundleParse { path: path.display().to_string(), source })
}
