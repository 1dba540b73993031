//! balanceindex-core — data model and ledger reconciliation for BalanceIndex.
//!
//! # Architecture
//!
//! ```text
//! BalanceChangeSource ──► Reconciler / Ledger ──► confirmed / unconfirmed
//!                              │                   prunable / replaced
//!                              └── ChainIndex (CanonicalChain, height snapshot)
//! ```
//!
//! Writing records into storage lives in `balanceindex-storage`.

pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod replace;
pub mod source;
pub mod topo;
pub mod types;

pub use chain::{BlockHeader, CanonicalChain, ChainIndex};
pub use config::{IndexerBuilder, IndexerConfig};
pub use error::IndexerError;
pub use ledger::{Ledger, Reconciler};
pub use source::{fetch_ledger, BalanceChangeSource, MemoryBalanceSource};
pub use types::{BalanceChangeRecord, BalanceEffect, Coin, Outpoint};
