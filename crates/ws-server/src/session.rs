use events::{GasSubscription, VaultSubscription};
use models::{ModelError, TwapWindow, UserRole};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How many messages may queue for a session before it is considered too
/// slow and evicted.
pub const SESSION_MESSAGE_BUFFER: usize = 16;

/// The outbound half every session owns: a bounded queue of serialized
/// messages read by that session's relay loop, plus the cancellation token
/// that tears the session down.
///
/// Producers (the dispatcher, the job tracker, the session's own read duty)
/// never block on it: a full queue evicts the session instead.
#[derive(Debug)]
pub struct Outbox {
    id: Uuid,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl Outbox {
    pub fn new(cancel: CancellationToken) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SESSION_MESSAGE_BUFFER);
        (
            Self {
                id: Uuid::new_v4(),
                tx,
                cancel,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Enqueues a message without blocking.
    ///
    /// A full queue means the consumer cannot keep up: the session is
    /// evicted (its relay loop observes the cancellation and closes the
    /// connection) and the publish continues to other sessions. A closed
    /// queue means the session is already torn down; the message is simply
    /// dropped.
    pub fn deliver_or_evict(&self, msg: String) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session = %self.id, "session too slow to keep up with messages, evicting");
                self.cancel.cancel();
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub fn is_evicted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A subscriber to the home feed. No key, no role; it receives the vault
/// address list once and nothing else until vault-list changes ship.
#[derive(Debug)]
pub struct HomeSession {
    pub outbox: Outbox,
}

impl HomeSession {
    pub fn new(cancel: CancellationToken) -> (Self, mpsc::Receiver<String>) {
        let (outbox, rx) = Outbox::new(cancel);
        (Self { outbox }, rx)
    }
}

/// A subscriber to one vault's feed, as a liquidity provider or an option
/// buyer. The tracked user address may be updated mid-connection by a
/// refinement request, so it sits behind a lock the dispatcher reads.
#[derive(Debug)]
pub struct VaultSession {
    pub outbox: Outbox,
    pub vault_address: String,
    pub role: UserRole,
    address: RwLock<String>,
}

impl VaultSession {
    pub fn new(
        sub: VaultSubscription,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<String>) {
        let (outbox, rx) = Outbox::new(cancel);
        (
            Self {
                outbox,
                vault_address: sub.vault_address,
                role: sub.user_type,
                address: RwLock::new(sub.address),
            },
            rx,
        )
    }

    pub fn address(&self) -> String {
        self.address
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_address(&self, address: String) {
        *self
            .address
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = address;
    }
}

/// A subscriber to the gas feed. The window is fixed at handshake time and
/// decides which TWAP field of each block this session is forwarded.
#[derive(Debug)]
pub struct GasSession {
    pub outbox: Outbox,
    pub window: TwapWindow,
}

impl GasSession {
    pub fn new(
        sub: &GasSubscription,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<String>), ModelError> {
        let window = TwapWindow::from_duration(sub.duration)?;
        let (outbox, rx) = Outbox::new(cancel);
        Ok((Self { outbox, window }, rx))
    }
}

/// Identifies one Fossil pricing job: the vault asking and the settlement
/// time the price is computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FossilKey {
    pub vault_address: String,
    pub target_time: u64,
}

/// A subscriber waiting on one pricing job's status transitions.
#[derive(Debug)]
pub struct FossilSession {
    pub outbox: Outbox,
    pub key: FossilKey,
}

impl FossilSession {
    pub fn new(key: FossilKey, cancel: CancellationToken) -> (Self, mpsc::Receiver<String>) {
        let (outbox, rx) = Outbox::new(cancel);
        (Self { outbox, key }, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_evicts_instead_of_blocking() {
        let (outbox, _rx) = Outbox::new(CancellationToken::new());
        for i in 0..SESSION_MESSAGE_BUFFER {
            outbox.deliver_or_evict(format!("msg {i}"));
        }
        assert!(!outbox.is_evicted());

        // One past capacity: the call returns immediately and the session
        // is marked for teardown.
        outbox.deliver_or_evict("overflow".into());
        assert!(outbox.is_evicted());
    }

    #[tokio::test]
    async fn delivery_to_a_dropped_receiver_is_silent() {
        let (outbox, rx) = Outbox::new(CancellationToken::new());
        drop(rx);
        outbox.deliver_or_evict("late".into());
        // Not an eviction: the session is already gone.
        assert!(!outbox.is_evicted());
    }

    #[tokio::test]
    async fn vault_session_address_is_updatable() {
        let sub = VaultSubscription {
            address: "0xa1".into(),
            vault_address: "0xv1".into(),
            user_type: UserRole::OptionBuyer,
        };
        let (session, _rx) = VaultSession::new(sub, CancellationToken::new());
        assert_eq!(session.address(), "0xa1");
        session.set_address("0xa2".into());
        assert_eq!(session.address(), "0xa2");
    }
}
