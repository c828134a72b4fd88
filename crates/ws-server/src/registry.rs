use crate::session::{FossilKey, FossilSession, GasSession, HomeSession, VaultSession};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// The live set of sessions, partitioned by topic kind.
///
/// Each kind has its own lock: the four maps never alias, so home traffic
/// never contends with vault fan-out. All mutation and lookup goes through
/// this type; nothing else touches the maps, which is what keeps "never
/// iterate while racing a mutation" enforceable in one place.
///
/// Lookups return snapshots (cloned `Arc` vectors) so publishers iterate
/// and enqueue outside the lock. Removal is idempotent: a session may be
/// evicted by the dispatcher and explicitly closed by its own handler, in
/// either order. Empty map entries are pruned opportunistically, purely as
/// a memory optimization; `add` recreates an entry, so a publish to a
/// pruned key just finds no sessions rather than losing the key.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    home: Mutex<Vec<Arc<HomeSession>>>,
    vault: Mutex<HashMap<String, Vec<Arc<VaultSession>>>>,
    gas: Mutex<Vec<Arc<GasSession>>>,
    fossil: Mutex<HashMap<FossilKey, Vec<Arc<FossilSession>>>>,
}

// A poisoned registry lock would mean a panic while holding it; the data is
// just session handles, so continuing with the inner value is sound.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Home ---

    pub fn add_home(&self, session: Arc<HomeSession>) {
        lock(&self.home).push(session);
    }

    pub fn remove_home(&self, id: Uuid) {
        lock(&self.home).retain(|s| s.outbox.id() != id);
    }

    // --- Vault ---

    pub fn add_vault(&self, session: Arc<VaultSession>) {
        lock(&self.vault)
            .entry(session.vault_address.clone())
            .or_default()
            .push(session);
    }

    pub fn remove_vault(&self, session: &VaultSession) {
        let mut vaults = lock(&self.vault);
        if let Some(sessions) = vaults.get_mut(&session.vault_address) {
            sessions.retain(|s| s.outbox.id() != session.outbox.id());
            if sessions.is_empty() {
                vaults.remove(&session.vault_address);
            }
        }
    }

    /// Sessions subscribed to one vault address.
    pub fn vault_sessions(&self, vault_address: &str) -> Vec<Arc<VaultSession>> {
        lock(&self.vault)
            .get(vault_address)
            .cloned()
            .unwrap_or_default()
    }

    /// Every vault session regardless of key. Option buyer and bid events
    /// route by buyer address, which is not tied to a single vault.
    pub fn all_vault_sessions(&self) -> Vec<Arc<VaultSession>> {
        lock(&self.vault).values().flatten().cloned().collect()
    }

    // --- Gas ---

    pub fn add_gas(&self, session: Arc<GasSession>) {
        lock(&self.gas).push(session);
    }

    pub fn remove_gas(&self, id: Uuid) {
        lock(&self.gas).retain(|s| s.outbox.id() != id);
    }

    pub fn gas_sessions(&self) -> Vec<Arc<GasSession>> {
        lock(&self.gas).clone()
    }

    // --- Fossil ---

    pub fn add_fossil(&self, session: Arc<FossilSession>) {
        lock(&self.fossil)
            .entry(session.key.clone())
            .or_default()
            .push(session);
    }

    pub fn remove_fossil(&self, session: &FossilSession) {
        let mut jobs = lock(&self.fossil);
        if let Some(sessions) = jobs.get_mut(&session.key) {
            sessions.retain(|s| s.outbox.id() != session.outbox.id());
            if sessions.is_empty() {
                jobs.remove(&session.key);
            }
        }
    }

    pub fn fossil_sessions(&self, key: &FossilKey) -> Vec<Arc<FossilSession>> {
        lock(&self.fossil).get(key).cloned().unwrap_or_default()
    }

    /// Publishes a serialized payload to every session under a fossil key.
    /// Used by the job tracker's pollers.
    pub fn publish_fossil(&self, key: &FossilKey, msg: &str) {
        for session in self.fossil_sessions(key) {
            session.outbox.deliver_or_evict(msg.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::VaultSubscription;
    use models::UserRole;
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

    #[tokio::test]
    async fn vault_lookup_is_scoped_to_the_key() {
        let registry = SubscriptionRegistry::new();
        let (a, _rx_a) = vault_session("0xv1", "0xa1", UserRole::LiquidityProvider);
        let (b, _rx_b) = vault_session("0xv2", "0xa2", UserRole::LiquidityProvider);
        registry.add_vault(Arc::clone(&a));
        registry.add_vault(Arc::clone(&b));

        let under_v1 = registry.vault_sessions("0xv1");
        assert_eq!(under_v1.len(), 1);
        assert_eq!(under_v1[0].outbox.id(), a.outbox.id());
        assert!(registry.vault_sessions("0xv3").is_empty());
    }

    #[tokio::test]
    async fn removal_is_idempotent_and_isolated() {
        let registry = SubscriptionRegistry::new();
        let (a, _rx_a) = vault_session("0xv1", "0xa1", UserRole::OptionBuyer);
        let (b, _rx_b) = vault_session("0xv1", "0xa2", UserRole::OptionBuyer);
        registry.add_vault(Arc::clone(&a));
        registry.add_vault(Arc::clone(&b));

        registry.remove_vault(&a);
        registry.remove_vault(&a); // second removal is a no-op
        let (never_added, _rx) = vault_session("0xv1", "0xa3", UserRole::OptionBuyer);
        registry.remove_vault(&never_added);

        let remaining = registry.vault_sessions("0xv1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].outbox.id(), b.outbox.id());
    }

    #[tokio::test]
    async fn empty_keys_are_pruned_and_recreated_on_add() {
        let registry = SubscriptionRegistry::new();
        let (a, _rx_a) = vault_session("0xv1", "0xa1", UserRole::OptionBuyer);
        registry.add_vault(Arc::clone(&a));
        registry.remove_vault(&a);
        assert!(registry.vault_sessions("0xv1").is_empty());

        // A later subscriber to the same key is fully visible again.
        let (b, _rx_b) = vault_session("0xv1", "0xa2", UserRole::OptionBuyer);
        registry.add_vault(Arc::clone(&b));
        assert_eq!(registry.vault_sessions("0xv1").len(), 1);
    }
}
