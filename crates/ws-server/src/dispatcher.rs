use crate::registry::SubscriptionRegistry;
use database::ChangeStream;
use events::{ChangeEvent, GasBlockUpdate, WsMessage};
use models::Block;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Routes decoded change events onto matching sessions' delivery queues.
///
/// One dispatcher instance runs for the life of the process, fed by the
/// single change stream. Every enqueue is non-blocking: a slow session is
/// evicted, never waited on, so one stalled consumer cannot delay delivery
/// to anyone else or stall the listener loop.
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Consumes the change stream until cancellation or a fatal stream
    /// error. Decode failures are logged and dropped per event; they never
    /// end the loop.
    pub async fn run(self, mut stream: ChangeStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("change listener stopping");
                    return;
                }
                next = stream.recv() => match next {
                    Ok((channel, payload)) => self.dispatch(&channel, &payload),
                    Err(e) => {
                        tracing::error!(error = ?e, "change stream failed");
                        return;
                    }
                }
            }
        }
    }

    /// Decodes one notification and routes it. Malformed payloads drop here.
    pub fn dispatch(&self, channel: &str, payload: &str) {
        match ChangeEvent::decode(channel, payload) {
            Ok(event) => self.route(event),
            Err(e) => tracing::warn!(channel, error = %e, "dropping undecodable change event"),
        }
    }

    /// Applies the per-kind routing rules against the registry.
    pub fn route(&self, event: ChangeEvent) {
        match event {
            // Vault state reaches everyone on that vault, regardless of role.
            ChangeEvent::Vault(change) => {
                let vault_address = change.payload.address.clone();
                self.send_to_vault_sessions(&vault_address, WsMessage::VaultState(change), |_| true);
            }
            // LP state is scoped to the vault AND the provider's address.
            ChangeEvent::LiquidityProvider(change) => {
                let vault_address = change.payload.vault_address.clone();
                let address = change.payload.address.clone();
                self.send_to_vault_sessions(&vault_address, WsMessage::LpState(change), |s| {
                    s.role == models::UserRole::LiquidityProvider && s.address() == address
                });
            }
            // Buyer positions route by buyer address across all vaults.
            ChangeEvent::OptionBuyer(change) => {
                let address = change.payload.address.clone();
                self.send_to_all_vault_sessions(WsMessage::OptionBuyerState(change), |s| {
                    s.role == models::UserRole::OptionBuyer && s.address() == address
                });
            }
            ChangeEvent::Bid(change) => {
                let buyer = change.payload.buyer_address.clone();
                self.send_to_all_vault_sessions(WsMessage::Bid(change), |s| {
                    s.role == models::UserRole::OptionBuyer && s.address() == buyer
                });
            }
            // Round state reaches everyone on the round's vault.
            ChangeEvent::OptionRound(change) => {
                let vault_address = change.payload.vault_address.clone();
                self.send_to_vault_sessions(&vault_address, WsMessage::OptionRoundState(change), |_| true);
            }
            ChangeEvent::ConfirmedBlocks(blocks) => self.send_gas(&blocks, true),
            ChangeEvent::UnconfirmedBlock(block) => self.send_gas(std::slice::from_ref(&block), false),
        }
    }

    fn send_to_vault_sessions<F>(&self, vault_address: &str, msg: WsMessage, matches: F)
    where
        F: Fn(&crate::session::VaultSession) -> bool,
    {
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound message");
                return;
            }
        };
        for session in self.registry.vault_sessions(vault_address) {
            if matches(&session) {
                session.outbox.deliver_or_evict(json.clone());
            }
        }
    }

    fn send_to_all_vault_sessions<F>(&self, msg: WsMessage, matches: F)
    where
        F: Fn(&crate::session::VaultSession) -> bool,
    {
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound message");
                return;
            }
        };
        for session in self.registry.all_vault_sessions() {
            if matches(&session) {
                session.outbox.deliver_or_evict(json.clone());
            }
        }
    }

    /// Gas blocks fan out to every gas session, but each session gets the
    /// blocks reduced to its own TWAP window, so serialization is per
    /// session rather than per event.
    fn send_gas(&self, blocks: &[Block], confirmed: bool) {
        for session in self.registry.gas_sessions() {
            let updates: Vec<GasBlockUpdate> = blocks
                .iter()
                .map(|b| GasBlockUpdate::from_block(b, session.window))
                .collect();
            let msg = if confirmed {
                WsMessage::ConfirmedBlocks(updates)
            } else {
                WsMessage::UnconfirmedBlocks(updates)
            };
            match msg.to_json() {
                Ok(json) => session.outbox.deliver_or_evict(json),
                Err(e) => tracing::error!(error = %e, "failed to serialize gas update"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{GasSession, VaultSession, SESSION_MESSAGE_BUFFER};
    use events::{ChangeNotification, GasSubscription, Operation, VaultSubscription};
    use models::{OptionBuyer, TwapWindow, UserRole, VaultState};
    use rust_decimal::Decimal;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn vault_session(
        vault: &str,
        address: &str,
        role: UserRole,
    ) -> (Arc<VaultSession>, mpsc::Receiver<String>) {
        let sub = VaultSubscription {
            address: address.into(),
            vault_address: vault.into(),
            user_type: role,
        };
        let (session, rx) = VaultSession::new(sub, CancellationToken::new());
        (Arc::new(session), rx)
    }

    fn vault_state(address: &str) -> VaultState {
        VaultState {
            address: address.into(),
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
        }
    }

    fn option_buyer(address: &str, round: &str, mintable: i64) -> OptionBuyer {
        OptionBuyer {
            address: address.into(),
            round_address: round.into(),
            mintable_options: Decimal::from(mintable),
            refundable_options: Decimal::ZERO,
            has_minted: false,
            has_refunded: false,
            bids: vec![],
        }
    }

    #[tokio::test]
    async fn vault_state_reaches_only_its_vault_key() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (a, mut rx_a) = vault_session("0xva", "0x1", UserRole::LiquidityProvider);
        let (b, mut rx_b) = vault_session("0xvb", "0x2", UserRole::LiquidityProvider);
        registry.add_vault(a);
        registry.add_vault(b);

        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        dispatcher.route(ChangeEvent::Vault(ChangeNotification {
            operation: Operation::Update,
            payload: vault_state("0xva"),
        }));

        let msg = rx_a.try_recv().expect("key-A session should receive");
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["type"], "vaultState");
        assert!(rx_b.try_recv().is_err(), "key-B session must stay silent");
    }

    #[tokio::test]
    async fn lp_state_filters_on_role_and_address() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (lp_match, mut rx_match) = vault_session("0xv1", "0xlp1", UserRole::LiquidityProvider);
        let (lp_other, mut rx_other) = vault_session("0xv1", "0xlp2", UserRole::LiquidityProvider);
        let (ob_same_addr, mut rx_ob) = vault_session("0xv1", "0xlp1", UserRole::OptionBuyer);
        registry.add_vault(lp_match);
        registry.add_vault(lp_other);
        registry.add_vault(ob_same_addr);

        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        dispatcher.route(ChangeEvent::LiquidityProvider(ChangeNotification {
            operation: Operation::Update,
            payload: models::LiquidityProviderState {
                address: "0xlp1".into(),
                vault_address: "0xv1".into(),
                unlocked_balance: Decimal::from(100),
                locked_balance: Decimal::ZERO,
                stashed_balance: Decimal::ZERO,
                latest_block: Decimal::ZERO,
            },
        }));

        assert!(rx_match.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err(), "other lp address filtered out");
        assert!(rx_ob.try_recv().is_err(), "wrong role filtered out");
    }

    /// The end-to-end scenario: an option buyer update reaches exactly the
    /// matching buyer session, tagged so the client can dispatch on it.
    #[tokio::test]
    async fn option_buyer_update_reaches_matching_buyer_only() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (a, mut rx_a) = vault_session("0xV1", "0xA1", UserRole::OptionBuyer);
        let (b, mut rx_b) = vault_session("0xV1", "0xA2", UserRole::OptionBuyer);
        registry.add_vault(a);
        registry.add_vault(b);

        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        dispatcher.route(ChangeEvent::OptionBuyer(ChangeNotification {
            operation: Operation::Update,
            payload: option_buyer("0xA1", "0xR1", 5),
        }));

        let msg = rx_a.try_recv().expect("buyer 0xA1 should receive");
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["type"], "optionBuyerState");
        assert_eq!(value["payload"]["payload"]["mintableOptions"], "5");
        assert!(rx_a.try_recv().is_err(), "exactly one message");
        assert!(rx_b.try_recv().is_err(), "buyer 0xA2 receives nothing");
    }

    #[tokio::test]
    async fn slow_session_is_evicted_without_blocking_the_rest() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (slow, _slow_rx) = vault_session("0xv1", "0x1", UserRole::LiquidityProvider);
        let (healthy, mut healthy_rx) = vault_session("0xv1", "0x2", UserRole::LiquidityProvider);
        registry.add_vault(Arc::clone(&slow));
        registry.add_vault(healthy);

        // Fill the slow session's queue to capacity without reading it.
        for i in 0..SESSION_MESSAGE_BUFFER {
            slow.outbox.deliver_or_evict(format!("backlog {i}"));
        }
        assert!(!slow.outbox.is_evicted());

        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        dispatcher.route(ChangeEvent::Vault(ChangeNotification {
            operation: Operation::Update,
            payload: vault_state("0xv1"),
        }));

        assert!(healthy_rx.try_recv().is_ok(), "healthy session still served");
        assert!(slow.outbox.is_evicted(), "slow session marked for teardown");
    }

    #[tokio::test]
    async fn gas_sessions_each_get_their_own_window() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let short_sub = GasSubscription {
            start_timestamp: 0,
            end_timestamp: 0,
            duration: TwapWindow::Short.duration_secs(),
        };
        let long_sub = GasSubscription {
            start_timestamp: 0,
            end_timestamp: 0,
            duration: TwapWindow::Long.duration_secs(),
        };
        let (short, mut rx_short) =
            GasSession::new(&short_sub, CancellationToken::new()).unwrap();
        let (long, mut rx_long) = GasSession::new(&long_sub, CancellationToken::new()).unwrap();
        registry.add_gas(Arc::new(short));
        registry.add_gas(Arc::new(long));

        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        dispatcher.route(ChangeEvent::UnconfirmedBlock(Block {
            block_number: 1,
            timestamp: 10,
            basefee: Some(Decimal::from(40)),
            is_confirmed: false,
            twap_short: Some(Decimal::from(41)),
            twap_medium: Some(Decimal::from(39)),
            twap_long: Some(Decimal::from(35)),
        }));

        let short_msg: serde_json::Value =
            serde_json::from_str(&rx_short.try_recv().unwrap()).unwrap();
        let long_msg: serde_json::Value =
            serde_json::from_str(&rx_long.try_recv().unwrap()).unwrap();
        assert_eq!(short_msg["type"], "unconfirmedBlocks");
        assert_eq!(short_msg["payload"][0]["twap"], "41");
        assert_eq!(long_msg["payload"][0]["twap"], "35");
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_without_side_effects() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (a, mut rx_a) = vault_session("0xv1", "0x1", UserRole::LiquidityProvider);
        registry.add_vault(a);

        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        dispatcher.dispatch("vault_update", "{ definitely not json");
        assert!(rx_a.try_recv().is_err());

        // The dispatcher keeps working after the bad event.
        dispatcher.route(ChangeEvent::Vault(ChangeNotification {
            operation: Operation::Insert,
            payload: vault_state("0xv1"),
        }));
        assert!(rx_a.try_recv().is_ok());
    }
}
