use crate::DbError;
use models::{Bid, Block, LiquidityProviderState, OptionBuyer, OptionRound, VaultState};
use sqlx::postgres::PgPool;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
///
/// Every lookup may fail with [`DbError::NotFound`] or a transport error;
/// callers propagate that to the requesting session as a handshake failure.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

impl DbRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetches the current state row of one vault.
    pub async fn get_vault_state(&self, vault_address: &str) -> Result<VaultState, DbError> {
        let state = sqlx::query_as::<_, VaultState>(
            r#"
            SELECT address, current_round, current_round_address,
                   unlocked_balance, locked_balance, stashed_balance,
                   latest_block, deployment_date, alpha, strike_level,
                   auction_run_time, option_run_time, round_transition_period
            FROM vault_states
            WHERE address = $1
            "#,
        )
        .bind(vault_address)
        .fetch_optional(&self.pool)
        .await?;

        state.ok_or(DbError::NotFound)
    }

    /// Fetches every option round of a vault, ordered by round sequence.
    pub async fn get_option_rounds_by_vault(
        &self,
        vault_address: &str,
    ) -> Result<Vec<OptionRound>, DbError> {
        let rounds = sqlx::query_as::<_, OptionRound>(
            r#"
            SELECT address, vault_address, round_id, round_state, cap_level,
                   auction_start_date, auction_end_date, option_settle_date,
                   starting_liquidity, available_options, clearing_price,
                   settlement_price, strike_price, options_sold, premiums,
                   queued_liquidity, payout_per_option
            FROM option_rounds
            WHERE vault_address = $1
            ORDER BY round_id ASC
            "#,
        )
        .bind(vault_address)
        .fetch_all(&self.pool)
        .await?;

        Ok(rounds)
    }

    /// Fetches a liquidity provider's position within one vault.
    pub async fn get_liquidity_provider_state(
        &self,
        address: &str,
        vault_address: &str,
    ) -> Result<LiquidityProviderState, DbError> {
        let state = sqlx::query_as::<_, LiquidityProviderState>(
            r#"
            SELECT address, vault_address, unlocked_balance, locked_balance,
                   stashed_balance, latest_block
            FROM liquidity_providers
            WHERE address = $1 AND vault_address = $2
            "#,
        )
        .bind(address)
        .bind(vault_address)
        .fetch_optional(&self.pool)
        .await?;

        state.ok_or(DbError::NotFound)
    }

    /// Fetches an option buyer's positions across rounds, with the buyer's
    /// bids nested into each position.
    pub async fn get_option_buyers_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<OptionBuyer>, DbError> {
        let mut buyers = sqlx::query_as::<_, OptionBuyer>(
            r#"
            SELECT address, round_address, mintable_options, refundable_options,
                   has_minted, has_refunded
            FROM option_buyers
            WHERE address = $1
            "#,
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        let bids = sqlx::query_as::<_, Bid>(
            r#"
            SELECT buyer_address, round_address, bid_id, tree_nonce, amount, price
            FROM bids
            WHERE buyer_address = $1
            "#,
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        for buyer in &mut buyers {
            buyer.bids = bids
                .iter()
                .filter(|bid| bid.round_address == buyer.round_address)
                .cloned()
                .collect();
        }

        Ok(buyers)
    }

    /// Fetches the address of every vault the indexer tracks.
    pub async fn get_all_vault_addresses(&self) -> Result<Vec<String>, DbError> {
        let addresses = sqlx::query_scalar::<_, String>(
            "SELECT address FROM vault_states ORDER BY deployment_date ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(addresses)
    }

    /// Fetches the gas blocks whose timestamps fall inside `[start, end]`.
    pub async fn get_blocks_in_range(
        &self,
        start_timestamp: i64,
        end_timestamp: i64,
    ) -> Result<Vec<Block>, DbError> {
        let blocks = sqlx::query_as::<_, Block>(
            r#"
            SELECT block_number, timestamp, basefee, is_confirmed,
                   twap_short, twap_medium, twap_long
            FROM blocks
            WHERE timestamp >= $1 AND timestamp <= $2
            ORDER BY block_number ASC
            "#,
        )
        .bind(start_timestamp)
        .bind(end_timestamp)
        .fetch_all(&self.pool)
        .await?;

        Ok(blocks)
    }
}
