//! Ledger-side collaborators: blocks, claim scripts, the unspent-output view
//! and block sources.

mod block;
mod builder;
pub mod script;
mod source;
mod utxo;

pub use block::{Block, BlockHeader, Transaction, TxIn, TxOut};
pub use builder::ChainBuilder;
pub use script::{ClaimOpcode, ClaimScript};
pub use source::{BlockFile, BlockSource, MemoryBlockSource};
pub use utxo::{UtxoEntry, UtxoView};
