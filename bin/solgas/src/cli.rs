//! Command line interface for `solgas`.

use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_RPC_ENDPOINT: &str = "http://127.0.0.1:8545/";

/// Profiles gas usage per source line for an Ethereum transaction.
///
/// Loads a solc-style compiler-output JSON bundle, replays the transaction's
/// `debug_traceTransaction` struct logs against it, and prints a per-contract
/// and per-line gas report.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct AppArgs {
    /// Path to the compiler-output JSON bundle (solc combined-json / standard-json).
    pub compiler_output_json: PathBuf,
    /// Transaction hash to profile.
    pub transaction_hash: String,
    /// Substring of a source file name to exclude from the line-by-line report
    /// (repeatable). The contract/source still participates in accounting.
    #[clap(long = "skip")]
    pub skip: Vec<String>,
    /// Root directory source file paths in the bundle are resolved against.
    /// Defaults to the current directory.
    #[clap(long)]
    pub src_root: Option<PathBuf>,
    /// JSON-RPC endpoint of an archive/debug-capable node.
    #[clap(long, default_value_t = DEFAULT_RPC_ENDPOINT.to_string())]
    pub rpc_endpoint: String,
}
