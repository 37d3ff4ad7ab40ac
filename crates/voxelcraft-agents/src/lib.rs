//! Agent state and the pure rules of the Voxelcraft economy and
//! governance.
//!
//! Nothing in this crate touches the world grid or the owner loop; the
//! engine in `voxelcraft-core` calls into these types while it holds the
//! world state.
//!
//! # Modules
//!
//! - [`agent`] -- The [`Agent`] record, reputation, and the cursor event log
//! - [`error`] -- [`AgentError`] and its wire code mapping
//! - [`fun`] -- Six-dimensional fun scores with per-key decay
//! - [`governance`] -- Land claims, permissions, laws, and law parameters
//! - [`inventory`] -- Checked item-count arithmetic
//! - [`memory`] -- Private key/value memory with expiry
//! - [`orgs`] -- Organizations, roles, and per-world treasuries
//! - [`ratelimit`] -- Fixed-window per-action rate limits
//! - [`tasks`] -- Movement and work task slots
//! - [`trade`] -- Pending trades, valuation, and market tax

pub mod agent;
pub mod error;
pub mod fun;
pub mod governance;
pub mod inventory;
pub mod memory;
pub mod orgs;
pub mod ratelimit;
pub mod tasks;
pub mod trade;

pub use agent::{Agent, CursorEvent, Equipment, Reputation};
pub use error::AgentError;
pub use fun::{FunDecay, FunScore};
pub use governance::{ClaimFlags, LandClaim, Law, Permissions};
pub use inventory::Inventory;
pub use memory::{Memory, MemoryEntry};
pub use orgs::{LeaveOutcome, Organization};
pub use ratelimit::{RateLimitSpec, RateLimiter, RateWindow};
pub use tasks::{MoveTask, WorkTask};
pub use trade::{Trade, TradeValuation};
