//! Persistence for crash recovery
//!
//! - TradeState stores (memory, JSON file; PostgreSQL lives in `adapters`)
//! - Transfer checkpoints written before every irreversible follow-up step

pub mod checkpoint;
pub mod state_store;

pub use checkpoint::{StateCheckpoint, TransferCheckpoint};
pub use state_store::{FileStateStore, MemoryStateStore, StateStore};

#[cfg(test)]
pub use checkpoint::MockTransferCheckpoint;
