//! Token rotation pool.
//!
//! Dispenses upstream API credentials under two overlapping policies:
//!
//! - **Batch rotation**: one token serves `BATCH_SIZE` consecutive
//!   dispenses, then the cursor advances round-robin. The counter and
//!   cursor live in the store and are updated under row locks
//!   ([`vgen_db::TokenRepo::dispense_batch`]).
//! - **Error cooldown**: a sliding window of recent errors per token; when
//!   the window fills, the token sits out a cooldown and its history is
//!   cleared on expiry. The window and cooldown maps are process-local.
//!
//! The pool is a pure interface over the store: it holds no back-reference
//! from the store and communicates cooldowns as an exclusion list.

pub mod error;
pub mod pool;

pub use error::{PoolError, PoolResult};
pub use pool::{TokenPool, TokenPoolConfig};
