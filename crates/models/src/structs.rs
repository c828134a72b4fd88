use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// Rows arrive from two directions with different key casings: Postgres
// trigger payloads (`row_to_json`, snake_case) and the client wire
// (camelCase). The `alias` attributes accept the former while `rename_all`
// emits the latter.

/// Current state of a vault contract, one row per vault address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VaultState {
    pub address: String,
    #[serde(alias = "current_round")]
    pub current_round: Decimal,
    #[serde(alias = "current_round_address")]
    pub current_round_address: String,
    #[serde(alias = "unlocked_balance")]
    pub unlocked_balance: Decimal,
    #[serde(alias = "locked_balance")]
    pub locked_balance: Decimal,
    #[serde(alias = "stashed_balance")]
    pub stashed_balance: Decimal,
    #[serde(alias = "latest_block")]
    pub latest_block: Decimal,
    #[serde(alias = "deployment_date")]
    pub deployment_date: i64,
    pub alpha: Decimal,
    #[serde(alias = "strike_level")]
    pub strike_level: Decimal,
    // The indexer writes these under their contract names.
    #[serde(alias = "auction_duration", alias = "auction_run_time")]
    pub auction_run_time: i64,
    #[serde(alias = "round_duration", alias = "option_run_time")]
    pub option_run_time: i64,
    #[serde(alias = "round_transition_period")]
    pub round_transition_period: i64,
}

/// A liquidity provider's position within one vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityProviderState {
    pub address: String,
    #[serde(alias = "vault_address")]
    pub vault_address: String,
    #[serde(alias = "unlocked_balance")]
    pub unlocked_balance: Decimal,
    #[serde(alias = "locked_balance")]
    pub locked_balance: Decimal,
    #[serde(alias = "stashed_balance")]
    pub stashed_balance: Decimal,
    #[serde(alias = "latest_block")]
    pub latest_block: Decimal,
}

/// An option buyer's position within one round, with its bids nested.
///
/// The bids are filled in by a separate query; trigger payloads carry the
/// row without them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OptionBuyer {
    pub address: String,
    #[serde(alias = "round_address")]
    pub round_address: String,
    #[serde(alias = "mintable_options")]
    pub mintable_options: Decimal,
    #[serde(alias = "refundable_options")]
    pub refundable_options: Decimal,
    #[serde(alias = "has_minted")]
    pub has_minted: bool,
    #[serde(alias = "has_refunded")]
    pub has_refunded: bool,
    #[serde(default)]
    #[sqlx(skip)]
    pub bids: Vec<Bid>,
}

/// A single auction bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    // Trigger payloads name the buyer column plain `address`.
    #[serde(alias = "address", alias = "buyer_address")]
    pub buyer_address: String,
    #[serde(alias = "round_address")]
    pub round_address: String,
    #[serde(alias = "bid_id")]
    pub bid_id: String,
    #[serde(alias = "tree_nonce")]
    pub tree_nonce: String,
    pub amount: Decimal,
    pub price: Decimal,
}

/// One option round of a vault. The indexer populates columns as the round
/// progresses through its lifecycle, so everything past the identity fields
/// is nullable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OptionRound {
    pub address: String,
    #[serde(alias = "vault_address")]
    pub vault_address: String,
    #[serde(alias = "round_id")]
    pub round_id: Decimal,
    #[serde(alias = "round_state")]
    pub round_state: Option<String>,
    #[serde(alias = "cap_level")]
    pub cap_level: Option<Decimal>,
    #[serde(alias = "auction_start_date")]
    pub auction_start_date: Option<i64>,
    #[serde(alias = "auction_end_date")]
    pub auction_end_date: Option<i64>,
    #[serde(alias = "option_settle_date")]
    pub option_settle_date: Option<i64>,
    #[serde(alias = "starting_liquidity")]
    pub starting_liquidity: Option<Decimal>,
    #[serde(alias = "available_options")]
    pub available_options: Option<Decimal>,
    #[serde(alias = "clearing_price")]
    pub clearing_price: Option<Decimal>,
    #[serde(alias = "settlement_price")]
    pub settlement_price: Option<Decimal>,
    #[serde(alias = "strike_price")]
    pub strike_price: Option<Decimal>,
    #[serde(alias = "options_sold")]
    pub options_sold: Option<Decimal>,
    pub premiums: Option<Decimal>,
    #[serde(alias = "queued_liquidity")]
    pub queued_liquidity: Option<Decimal>,
    #[serde(alias = "payout_per_option")]
    pub payout_per_option: Option<Decimal>,
}

/// A gas block with its precomputed TWAP buckets.
///
/// Unconfirmed blocks only carry the base fee; the TWAP columns are filled
/// in once the block confirms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(alias = "block_number")]
    pub block_number: i64,
    pub timestamp: i64,
    pub basefee: Option<Decimal>,
    #[serde(alias = "is_confirmed")]
    pub is_confirmed: bool,
    #[serde(alias = "twap_short")]
    pub twap_short: Option<Decimal>,
    #[serde(alias = "twap_medium")]
    pub twap_medium: Option<Decimal>,
    #[serde(alias = "twap_long")]
    pub twap_long: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vault_state_decodes_snake_case_trigger_payload() {
        let payload = json!({
            "address": "0xv1",
            "current_round": "3",
            "current_round_address": "0xr3",
            "unlocked_balance": "1000",
            "locked_balance": "2000",
            "stashed_balance": "0",
            "latest_block": "42",
            "deployment_date": 1_700_000_000i64,
            "alpha": "2500",
            "strike_level": "-1000",
            "auction_duration": 960i64,
            "round_duration": 2_631_600i64,
            "round_transition_period": 3600i64,
        });
        let state: VaultState = serde_json::from_value(payload).unwrap();
        assert_eq!(state.address, "0xv1");
        assert_eq!(state.option_run_time, 2_631_600);
    }

    #[test]
    fn vault_state_serializes_camel_case() {
        let state = VaultState {
            address: "0xv1".into(),
            current_round: Decimal::from(1),
            current_round_address: "0xr1".into(),
            unlocked_balance: Decimal::ZERO,
            locked_balance: Decimal::ZERO,
            stashed_balance: Decimal::ZERO,
            latest_block: Decimal::ZERO,
            deployment_date: 0,
            alpha: Decimal::ZERO,
            strike_level: Decimal::ZERO,
            auction_run_time: 960,
            option_run_time: 13_200,
            round_transition_period: 3600,
        };
        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("unlockedBalance").is_some());
        assert!(value.get("unlocked_balance").is_none());
    }

    #[test]
    fn bid_accepts_buyer_under_address_key() {
        let payload = json!({
            "address": "0xbuyer",
            "round_address": "0xr1",
            "bid_id": "0xbid",
            "tree_nonce": "7",
            "amount": "100",
            "price": "5",
        });
        let bid: Bid = serde_json::from_value(payload).unwrap();
        assert_eq!(bid.buyer_address, "0xbuyer");
    }
}
