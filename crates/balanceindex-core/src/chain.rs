//! Chain index — answers "what height is this block at on the canonical chain?"
//!
//! Reconciliation only needs a height lookup. [`CanonicalChain`] is the
//! in-process implementation: an ordered run of headers that verifies parent
//! links on push and can be rewound when a reorg drops blocks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Height lookup against the canonical chain.
///
/// Returns `None` for blocks that are unknown or no longer canonical.
pub trait ChainIndex: Send + Sync {
    fn try_get_height(&self, block_id: &str) -> Option<u64>;
}

/// A static snapshot: block id → height.
impl ChainIndex for HashMap<String, u64> {
    fn try_get_height(&self, block_id: &str) -> Option<u64> {
        self.get(block_id).copied()
    }
}

impl<T: ChainIndex + ?Sized> ChainIndex for &T {
    fn try_get_height(&self, block_id: &str) -> Option<u64> {
        (**self).try_get_height(block_id)
    }
}

impl<T: ChainIndex + ?Sized> ChainIndex for std::sync::Arc<T> {
    fn try_get_height(&self, block_id: &str) -> Option<u64> {
        (**self).try_get_height(block_id)
    }
}

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// The part of a block header the chain index cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block id (hash).
    pub id: String,
    /// Parent block id.
    pub parent_id: String,
    /// Height on the chain (genesis = 0).
    pub height: u64,
}

impl BlockHeader {
    pub fn new(id: impl Into<String>, parent_id: impl Into<String>, height: u64) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            height,
        }
    }

    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.height == parent.height + 1 && self.parent_id == parent.id
    }
}

// ─── CanonicalChain ───────────────────────────────────────────────────────────

/// The canonical chain, oldest block first.
#[derive(Debug, Default, Clone)]
pub struct CanonicalChain {
    blocks: Vec<BlockHeader>,
    heights: HashMap<String, u64>,
}

impl CanonicalChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block to the tip.
    ///
    /// Returns `Err(depth)` if the block does not extend the tip, where `depth`
    /// is how many blocks must be rewound to reach its parent (the whole chain
    /// if the parent is unknown).
    pub fn push(&mut self, block: BlockHeader) -> Result<(), u64> {
        if let Some(tip) = self.blocks.last() {
            if !block.extends(tip) {
                let depth = self.find_reorg_depth(&block);
                tracing::warn!(
                    depth,
                    height = block.height,
                    block = %block.id,
                    "Block does not extend the canonical tip"
                );
                return Err(depth);
            }
        }
        self.heights.insert(block.id.clone(), block.height);
        self.blocks.push(block);
        Ok(())
    }

    /// The current tip.
    pub fn tip(&self) -> Option<&BlockHeader> {
        self.blocks.last()
    }

    /// Number of blocks held.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if no block has been pushed.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop every block above `height`; they stop resolving immediately.
    pub fn rewind_to(&mut self, height: u64) -> Vec<BlockHeader> {
        let mut dropped = Vec::new();
        while let Some(tip) = self.blocks.last() {
            if tip.height <= height {
                break;
            }
            if let Some(block) = self.blocks.pop() {
                self.heights.remove(&block.id);
                dropped.push(block);
            }
        }
        if !dropped.is_empty() {
            tracing::info!(height, dropped = dropped.len(), "Rewound canonical chain");
        }
        dropped
    }

    fn find_reorg_depth(&self, block: &BlockHeader) -> u64 {
        for (i, tracked) in self.blocks.iter().enumerate().rev() {
            if tracked.id == block.parent_id {
                return (self.blocks.len() - 1 - i) as u64;
            }
        }
        self.blocks.len() as u64
    }
}

impl ChainIndex for CanonicalChain {
    fn try_get_height(&self, block_id: &str) -> Option<u64> {
        self.heights.get(block_id).copied()
    }
}
