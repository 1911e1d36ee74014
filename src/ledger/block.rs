//! Blocks and transactions.

use crate::types::{Hash, Height, OutPoint};
use serde::{Deserialize, Serialize};

/// Transaction input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_output: OutPoint,
}

/// Transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: u64,
    pub script: Vec<u8>,
}

impl TxOut {
    pub fn new(value: u64, script: Vec<u8>) -> Self {
        Self { value, script }
    }
}

/// A ledger transaction. The id is computed at construction and again on
/// decode; it is never read from storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TxBody", into = "TxBody")]
pub struct Transaction {
    txid: Hash,
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
    lock_time: u32,
}

/// Serialized form of a transaction.
#[derive(Serialize, Deserialize)]
struct TxBody {
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
    lock_time: u32,
}

impl From<TxBody> for Transaction {
    fn from(body: TxBody) -> Self {
        Self::with_lock_time(body.inputs, body.outputs, body.lock_time)
    }
}

impl From<Transaction> for TxBody {
    fn from(tx: Transaction) -> Self {
        Self {
            inputs: tx.inputs,
            outputs: tx.outputs,
            lock_time: tx.lock_time,
        }
    }
}

impl Transaction {
    /// Build a regular transaction spending `inputs`.
    pub fn new(inputs: Vec<OutPoint>, outputs: Vec<TxOut>) -> Self {
        let inputs = inputs
            .into_iter()
            .map(|previous_output| TxIn { previous_output })
            .collect();
        Self::with_lock_time(inputs, outputs, 0)
    }

    /// Build the coinbase transaction of block `height`. The height is
    /// committed through the lock time so coinbase ids never collide.
    pub fn coinbase(height: Height, outputs: Vec<TxOut>) -> Self {
        let inputs = vec![TxIn {
            previous_output: OutPoint::null(),
        }];
        Self::with_lock_time(inputs, outputs, height)
    }

    fn with_lock_time(inputs: Vec<TxIn>, outputs: Vec<TxOut>, lock_time: u32) -> Self {
        let txid = Self::compute_txid(&inputs, &outputs, lock_time);
        Self {
            txid,
            inputs,
            outputs,
            lock_time,
        }
    }

    fn compute_txid(inputs: &[TxIn], outputs: &[TxOut], lock_time: u32) -> Hash {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(inputs.len() as u32).to_le_bytes());
        for input in inputs {
            buf.extend_from_slice(&input.previous_output.txid.0);
            buf.extend_from_slice(&input.previous_output.index.to_le_bytes());
        }
        buf.extend_from_slice(&(outputs.len() as u32).to_le_bytes());
        for output in outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            buf.extend_from_slice(&(output.script.len() as u32).to_le_bytes());
            buf.extend_from_slice(&output.script);
        }
        buf.extend_from_slice(&lock_time.to_le_bytes());
        Hash::double(&buf)
    }

    pub fn txid(&self) -> Hash {
        self.txid
    }

    pub fn inputs(&self) -> &[TxIn] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOut] {
        &self.outputs
    }

    pub fn lock_time(&self) -> u32 {
        self.lock_time
    }

    /// Outpoint of output `index` of this transaction.
    pub fn outpoint(&self, index: u32) -> OutPoint {
        OutPoint::new(self.txid, index)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }
}

/// Block header. `claim_trie` is the commitment hash of the claim trie after
/// this block has been applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: Height,
    pub prev_block: Hash,
    pub claim_trie: Hash,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(68);
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.prev_block.0);
        buf.extend_from_slice(&self.claim_trie.0);
        Hash::double(&buf)
    }
}

/// A ledger block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}
