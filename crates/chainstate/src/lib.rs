//! Account database and chain tip management.

pub mod state;

pub use state::{apply_mining_reward, apply_transaction, Accounts, ChainState, ChainStateError};
