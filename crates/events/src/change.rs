use models::{Bid, Block, LiquidityProviderState, OptionBuyer, OptionRound, VaultState};
use serde::de::DeserializeOwned;

use crate::error::EventsError;
use crate::messages::ChangeNotification;

/// The NOTIFY channels the indexer's triggers publish on. The change stream
/// subscribes to exactly this set.
pub const CHANGE_CHANNELS: [&str; 7] = [
    "vault_update",
    "lp_update",
    "ob_update",
    "or_update",
    "bids_update",
    "confirmed_insert",
    "unconfirmed_insert",
];

/// A single decoded change notification, typed by its source channel.
///
/// Instances are constructed on receipt, routed once by the dispatcher, and
/// dropped; nothing retains them.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Vault(ChangeNotification<VaultState>),
    LiquidityProvider(ChangeNotification<LiquidityProviderState>),
    OptionBuyer(ChangeNotification<OptionBuyer>),
    OptionRound(ChangeNotification<OptionRound>),
    Bid(ChangeNotification<Bid>),
    /// A confirmation batch; the trigger sends the whole batch in one payload.
    ConfirmedBlocks(Vec<Block>),
    UnconfirmedBlock(Block),
}

impl ChangeEvent {
    /// Decodes a raw NOTIFY payload against the schema its channel implies.
    ///
    /// A malformed payload yields an error value for the caller to log and
    /// drop; it must never abort the listener loop.
    pub fn decode(channel: &str, payload: &str) -> Result<Self, EventsError> {
        match channel {
            "vault_update" => Ok(ChangeEvent::Vault(parse(channel, payload)?)),
            "lp_update" => Ok(ChangeEvent::LiquidityProvider(parse(channel, payload)?)),
            "ob_update" => Ok(ChangeEvent::OptionBuyer(parse(channel, payload)?)),
            "or_update" => Ok(ChangeEvent::OptionRound(parse(channel, payload)?)),
            "bids_update" => Ok(ChangeEvent::Bid(parse(channel, payload)?)),
            "confirmed_insert" => Ok(ChangeEvent::ConfirmedBlocks(parse(channel, payload)?)),
            "unconfirmed_insert" => Ok(ChangeEvent::UnconfirmedBlock(parse(channel, payload)?)),
            other => Err(EventsError::UnknownChannel(other.to_string())),
        }
    }
}

fn parse<T: DeserializeOwned>(channel: &str, payload: &str) -> Result<T, EventsError> {
    serde_json::from_str(payload).map_err(|source| EventsError::Decode {
        channel: channel.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Operation;

    #[test]
    fn decodes_a_vault_update() {
        let payload = r#"{
            "operation": "UPDATE",
            "payload": {
                "address": "0xv1",
                "current_round": "2",
                "current_round_address": "0xr2",
                "unlocked_balance": "100",
                "locked_balance": "200",
                "stashed_balance": "0",
                "latest_block": "77",
                "deployment_date": 1700000000,
                "alpha": "2500",
                "strike_level": "0",
                "auction_duration": 960,
                "round_duration": 13200,
                "round_transition_period": 3600
            }
        }"#;
        match ChangeEvent::decode("vault_update", payload).unwrap() {
            ChangeEvent::Vault(change) => {
                assert_eq!(change.operation, Operation::Update);
                assert_eq!(change.payload.address, "0xv1");
            }
            other => panic!("decoded the wrong variant: {other:?}"),
        }
    }

    #[test]
    fn decodes_an_unconfirmed_block() {
        let payload = r#"{
            "block_number": 19000000,
            "timestamp": 1700000000,
            "basefee": "25",
            "is_confirmed": false
        }"#;
        match ChangeEvent::decode("unconfirmed_insert", payload).unwrap() {
            ChangeEvent::UnconfirmedBlock(block) => {
                assert_eq!(block.block_number, 19_000_000);
                assert!(!block.is_confirmed);
                assert_eq!(block.twap_short, None);
            }
            other => panic!("decoded the wrong variant: {other:?}"),
        }
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        let err = ChangeEvent::decode("lp_update", "not json").unwrap_err();
        assert!(matches!(err, EventsError::Decode { channel, .. } if channel == "lp_update"));
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let err = ChangeEvent::decode("settlement_update", "{}").unwrap_err();
        assert!(matches!(err, EventsError::UnknownChannel(c) if c == "settlement_update"));
    }
}
