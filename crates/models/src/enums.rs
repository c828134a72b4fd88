use crate::error::ModelError;
use crate::structs::Block;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The role a vault subscriber declares at handshake time.
///
/// The wire encoding matches the frontend's short names: `"lp"` for
/// liquidity providers and `"ob"` for option buyers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    #[serde(rename = "lp")]
    LiquidityProvider,
    #[serde(rename = "ob")]
    OptionBuyer,
}

/// One of the three fixed TWAP buckets precomputed on every gas block.
///
/// A gas subscriber picks its window once at handshake time by sending the
/// window's duration in seconds; afterwards only the matching TWAP field of
/// each incoming block is forwarded to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TwapWindow {
    /// 960 seconds.
    Short,
    /// 13_200 seconds.
    Medium,
    /// 2_631_600 seconds.
    Long,
}

impl TwapWindow {
    /// The bucket duration in seconds.
    pub const fn duration_secs(self) -> u64 {
        match self {
            TwapWindow::Short => 960,
            TwapWindow::Medium => 13_200,
            TwapWindow::Long => 2_631_600,
        }
    }

    /// Maps a raw duration from a subscription request back to its window.
    pub fn from_duration(duration: u64) -> Result<Self, ModelError> {
        match duration {
            960 => Ok(TwapWindow::Short),
            13_200 => Ok(TwapWindow::Medium),
            2_631_600 => Ok(TwapWindow::Long),
            other => Err(ModelError::UnknownTwapDuration(other)),
        }
    }

    /// Picks the TWAP field of `block` that belongs to this window.
    pub fn select(self, block: &Block) -> Option<Decimal> {
        match self {
            TwapWindow::Short => block.twap_short,
            TwapWindow::Medium => block.twap_medium,
            TwapWindow::Long => block.twap_long,
        }
    }
}

/// Lifecycle of a Fossil pricing job.
///
/// The derived ordering (`Initial < Pending < Completed`) is what the job
/// tracker uses to reject status regressions reported by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FossilStatus {
    Initial,
    Pending,
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twap_window_round_trips_through_duration() {
        for window in [TwapWindow::Short, TwapWindow::Medium, TwapWindow::Long] {
            assert_eq!(
                TwapWindow::from_duration(window.duration_secs()).unwrap(),
                window
            );
        }
    }

    #[test]
    fn unknown_twap_duration_is_rejected() {
        assert!(matches!(
            TwapWindow::from_duration(961),
            Err(ModelError::UnknownTwapDuration(961))
        ));
    }

    #[test]
    fn fossil_status_ordering_is_monotonic() {
        assert!(FossilStatus::Initial < FossilStatus::Pending);
        assert!(FossilStatus::Pending < FossilStatus::Completed);
    }
}
