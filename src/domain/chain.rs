use super::{now_timestamp, Block, BlockHash, TransactionRecord, GENESIS_PREVIOUS_HASH};

/// Append-only, genesis-rooted sequence of blocks.
///
/// A `Chain` is never empty: it is created with a genesis block or rebuilt
/// from stored blocks, which must contain at least one.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    /// Create a chain holding only a fresh genesis block.
    pub fn genesis() -> Self {
        Self {
            blocks: vec![Block::genesis(now_timestamp())],
        }
    }

    /// Rebuild a chain from stored blocks. Hashes are taken as stored;
    /// call [`Chain::verify`] to check them.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, ChainIntegrityError> {
        if blocks.is_empty() {
            return Err(ChainIntegrityError::Empty);
        }
        Ok(Self { blocks })
    }

    pub fn append(&mut self, transactions: Vec<TransactionRecord>) -> &Block {
        self.append_at(transactions, now_timestamp())
    }

    pub fn append_at(&mut self, transactions: Vec<TransactionRecord>, timestamp: f64) -> &Block {
        let block = Block::new(
            self.blocks.len() as u64,
            self.tip().hash(),
            transactions,
            timestamp,
        );
        self.blocks.push(block);
        self.tip()
    }

    /// Drop blocks past `len`. Only used to undo an append whose commit failed.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.blocks.truncate(len.max(1));
    }

    pub fn tip(&self) -> &Block {
        // Non-empty by construction.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn tip_hash(&self) -> &str {
        self.tip().hash()
    }

    pub fn genesis_block(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        self.blocks.get(usize::try_from(index).ok()?)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Check genesis shape, contiguous indexes, every stored hash against its
    /// recomputed value, and every link to the predecessor.
    pub fn verify(&self) -> Result<(), ChainIntegrityError> {
        let genesis = self.genesis_block();
        if genesis.index() != 0 {
            return Err(ChainIntegrityError::InvalidGenesis(format!(
                "index is {}",
                genesis.index()
            )));
        }
        if genesis.previous_hash() != GENESIS_PREVIOUS_HASH {
            return Err(ChainIntegrityError::InvalidGenesis(format!(
                "previous_hash is {:?}",
                genesis.previous_hash()
            )));
        }
        if !genesis.transactions().is_empty() {
            return Err(ChainIntegrityError::InvalidGenesis(
                "transaction payload is not empty".to_string(),
            ));
        }

        for (position, block) in self.blocks.iter().enumerate() {
            if block.index() != position as u64 {
                return Err(ChainIntegrityError::IndexMismatch {
                    position: position as u64,
                    found: block.index(),
                });
            }

            if !block.has_canonical_timestamp() {
                return Err(ChainIntegrityError::NonCanonicalTimestamp {
                    index: block.index(),
                });
            }

            let computed = block.compute_hash();
            if computed != block.hash() {
                return Err(ChainIntegrityError::HashMismatch {
                    index: block.index(),
                    stored: block.hash().to_string(),
                    computed,
                });
            }

            if position > 0 {
                let previous = &self.blocks[position - 1];
                if block.previous_hash() != previous.hash() {
                    return Err(ChainIntegrityError::BrokenLink {
                        index: block.index(),
                        expected: previous.hash().to_string(),
                        found: block.previous_hash().to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn verify_chain(&self) -> bool {
        self.verify().is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainIntegrityError {
    Empty,
    InvalidGenesis(String),
    IndexMismatch {
        position: u64,
        found: u64,
    },
    HashMismatch {
        index: u64,
        stored: BlockHash,
        computed: BlockHash,
    },
    NonCanonicalTimestamp {
        index: u64,
    },
    /// The chain file holds a block whose trade never reached the account table.
    UncommittedBlock {
        index: u64,
    },
    BrokenLink {
        index: u64,
        expected: BlockHash,
        found: BlockHash,
    },
}

impl std::fmt::Display for ChainIntegrityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainIntegrityError::Empty => write!(f, "chain has no genesis block"),
            ChainIntegrityError::InvalidGenesis(reason) => {
                write!(f, "invalid genesis block: {}", reason)
            }
            ChainIntegrityError::IndexMismatch { position, found } => {
                write!(f, "block at position {} carries index {}", position, found)
            }
            ChainIntegrityError::HashMismatch {
                index,
                stored,
                computed,
            } => write!(
                f,
                "block {} hash mismatch (stored {}, computed {})",
                index, stored, computed
            ),
            ChainIntegrityError::NonCanonicalTimestamp { index } => write!(
                f,
                "block {} timestamp has sub-microsecond precision",
                index
            ),
            ChainIntegrityError::UncommittedBlock { index } => write!(
                f,
                "block {} on disk was never committed to the account table",
                index
            ),
            ChainIntegrityError::BrokenLink {
                index,
                expected,
                found,
            } => write!(
                f,
                "block {} previous_hash {} does not match predecessor hash {}",
                index, found, expected
            ),
        }
    }
}

impl std::error::Error for ChainIntegrityError {}
