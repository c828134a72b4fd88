use models::{Bid, Block, FossilStatus, LiquidityProviderState, OptionBuyer, OptionRound,
    TwapWindow, UserRole, VaultState};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EventsError;

/// The row-level operation a change notification describes, as reported by
/// the database trigger (`TG_OP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// A row change paired with its operation discriminator. This is both the
/// shape the triggers NOTIFY with and the shape forwarded to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification<T> {
    pub operation: Operation,
    pub payload: T,
}

// ==============================================================================
// Handshake-in messages
// ==============================================================================

/// First frame on `/subscribeVault`: which vault to follow and as whom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSubscription {
    pub address: String,
    pub vault_address: String,
    pub user_type: UserRole,
}

/// First frame on `/subscribeGas`: the block range for the initial snapshot
/// and the TWAP bucket duration this client wants forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasSubscription {
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub duration: u64,
}

/// First frame on `/subscribeFossil`: identifies the pricing job to follow
/// (and create, if no subscriber asked for it yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FossilSubscription {
    pub vault_address: String,
    pub target_time: u64,
    pub duration: u64,
    pub client_address: String,
}

/// Mid-connection refinement on a vault session. Only the tracked address
/// is updatable; any other field name is a protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultUpdateRequest {
    pub updated_field: String,
    pub updated_value: String,
}

// ==============================================================================
// Snapshot payloads
// ==============================================================================

/// The full vault snapshot sent once after a successful vault handshake.
/// The role-specific half is filled in for the declared role only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSnapshot {
    pub vault_state: VaultState,
    pub option_round_states: Vec<OptionRound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidity_provider_state: Option<LiquidityProviderState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_buyer_states: Option<Vec<OptionBuyer>>,
}

/// The home snapshot: every vault address the indexer knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeSnapshot {
    pub vault_addresses: Vec<String>,
}

/// The gas snapshot: blocks in the requested range, each reduced to the
/// subscriber's TWAP window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasSnapshot {
    pub blocks: Vec<GasBlockUpdate>,
}

/// A gas block as forwarded to one subscriber: the shared columns plus the
/// single TWAP field matching that subscriber's window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasBlockUpdate {
    pub block_number: i64,
    pub timestamp: i64,
    pub basefee: Option<Decimal>,
    pub confirmed: bool,
    pub twap: Option<Decimal>,
}

impl GasBlockUpdate {
    /// Projects `block` onto `window`, keeping only the matching TWAP.
    pub fn from_block(block: &Block, window: TwapWindow) -> Self {
        Self {
            block_number: block.block_number,
            timestamp: block.timestamp,
            basefee: block.basefee,
            confirmed: block.is_confirmed,
            twap: window.select(block),
        }
    }
}

/// Status of a Fossil pricing job as published to its subscribers. A
/// terminal oracle failure is reported through `error` with no status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FossilStatusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FossilStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ==============================================================================
// The outbound message union
// ==============================================================================

/// The top-level WebSocket message enum.
/// All communication from the server to the client is one of these variants.
///
/// The `#[serde(tag = "type", content = "payload")]` attribute serializes the
/// enum into a clean JSON object that the frontend can dispatch on without
/// re-deriving the kind from the payload shape. For example a vault state
/// update looks like:
/// `{
///   "type": "vaultState",
///   "payload": { "operation": "UPDATE", "payload": { ... } }
/// }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum WsMessage {
    /// The one-time vault snapshot after a successful handshake.
    InitialVault(VaultSnapshot),
    /// The one-time home snapshot after connecting.
    InitialHome(HomeSnapshot),
    /// The one-time gas snapshot after a successful handshake.
    InitialGas(GasSnapshot),
    /// A vault state row changed.
    VaultState(ChangeNotification<VaultState>),
    /// A liquidity provider position changed.
    LpState(ChangeNotification<LiquidityProviderState>),
    /// An option buyer position changed.
    OptionBuyerState(ChangeNotification<OptionBuyer>),
    /// An option round row changed.
    OptionRoundState(ChangeNotification<OptionRound>),
    /// A bid was placed, updated, or removed.
    Bid(ChangeNotification<Bid>),
    /// A batch of blocks confirmed, reduced to the subscriber's window.
    ConfirmedBlocks(Vec<GasBlockUpdate>),
    /// A new unconfirmed block arrived.
    UnconfirmedBlocks(Vec<GasBlockUpdate>),
    /// A Fossil job status transition.
    FossilStatus(FossilStatusPayload),
}

impl WsMessage {
    /// Serializes the message for the wire.
    pub fn to_json(&self) -> Result<String, EventsError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_message_carries_type_and_payload_tags() {
        let msg = WsMessage::InitialHome(HomeSnapshot {
            vault_addresses: vec!["0xv1".into()],
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "initialHome");
        assert_eq!(value["payload"]["vaultAddresses"][0], "0xv1");
    }

    #[test]
    fn vault_subscription_parses_wire_shape() {
        let raw = r#"{"address":"0xa1","vaultAddress":"0xv1","userType":"ob"}"#;
        let sub: VaultSubscription = serde_json::from_str(raw).unwrap();
        assert_eq!(sub.user_type, UserRole::OptionBuyer);
        assert_eq!(sub.vault_address, "0xv1");
    }

    #[test]
    fn gas_block_update_keeps_only_the_selected_window() {
        let block = Block {
            block_number: 100,
            timestamp: 1_700_000_000,
            basefee: Some(Decimal::from(30)),
            is_confirmed: true,
            twap_short: Some(Decimal::from(31)),
            twap_medium: Some(Decimal::from(29)),
            twap_long: Some(Decimal::from(27)),
        };
        let update = GasBlockUpdate::from_block(&block, TwapWindow::Medium);
        assert_eq!(update.twap, Some(Decimal::from(29)));
    }

    #[test]
    fn fossil_error_payload_omits_status() {
        let payload = FossilStatusPayload {
            status: None,
            error: Some("job not found".into()),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("status").is_none());
        assert_eq!(value["error"], "job not found");
    }
}
