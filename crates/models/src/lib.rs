//! # Pitch Lake Models
//!
//! This crate defines the entity row types shared across the backend: vault
//! and round state, liquidity provider and option buyer positions, bids, and
//! confirmed/unconfirmed gas blocks with their precomputed TWAPs.
//!
//! As a Layer 0 crate, it has no knowledge of the transport or the database
//! schema beyond the row shapes themselves. Every other crate depends on it.

pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{FossilStatus, TwapWindow, UserRole};
pub use error::ModelError;
pub use structs::{Bid, Block, LiquidityProviderState, OptionBuyer, OptionRound, VaultState};
