//! # Pitch Lake Events
//!
//! This crate defines the real-time message structures used for WebSocket
//! communication between the backend and the frontend, plus the typed
//! decoding of Postgres NOTIFY payloads into change events.
//!
//! As a Layer 0 crate, it depends only on `models` and provides the
//! definitive language for all real-time state synchronization.

// Declare the modules that make up this crate.
pub mod change;
pub mod error;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use change::{ChangeEvent, CHANGE_CHANNELS};
pub use error::EventsError;
pub use messages::{
    ChangeNotification, FossilStatusPayload, FossilSubscription, GasBlockUpdate, GasSnapshot,
    GasSubscription, HomeSnapshot, Operation, VaultSnapshot, VaultSubscription,
    VaultUpdateRequest, WsMessage,
};
