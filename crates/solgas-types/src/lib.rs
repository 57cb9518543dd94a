pub mod address;
pub mod bundle;
pub mod chain;
pub mod trace;

pub use address::{normalize_address, strip_and_validate_hex, HexError};
pub use bundle::CompilerBundle;
pub use chain::{ChainClient, ChainError};
pub use trace::{StructLog, TraceResult, Transaction, TransactionReceipt};
