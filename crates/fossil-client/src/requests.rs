use crate::error::FossilError;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// The protocol identifier stamped on every job request and folded into the
/// job id digest.
const IDENTIFIER: &str = "PITCH_LAKE_V1";

/// The three time windows a pricing job is computed over, each a
/// `[from, to]` pair of unix timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobRequestParams {
    /// TWAP window: 1x the round duration.
    pub twap: [u64; 2],
    /// Volatility window: 3x the round duration.
    pub volatility: [u64; 2],
    /// Reserve price window: 3x the round duration.
    pub reserve_price: [u64; 2],
}

impl JobRequestParams {
    fn new(target_time: u64, duration: u64) -> Self {
        Self {
            twap: [target_time - duration, target_time],
            volatility: [target_time - 3 * duration, target_time],
            reserve_price: [target_time - 3 * duration, target_time],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub client_address: String,
    pub vault_address: String,
    pub timestamp: u64,
}

/// The body POSTed to `/pricing_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRequest {
    pub identifiers: Vec<String>,
    pub params: JobRequestParams,
    pub client_info: ClientInfo,
}

impl JobRequest {
    pub fn new(
        target_time: u64,
        duration: u64,
        client_address: &str,
        vault_address: &str,
    ) -> Result<Self, FossilError> {
        validate(target_time, duration)?;
        if client_address.is_empty() || vault_address.is_empty() {
            return Err(FossilError::InvalidRequest(
                "client and vault addresses are required".into(),
            ));
        }

        Ok(Self {
            identifiers: vec![IDENTIFIER.to_string()],
            params: JobRequestParams::new(target_time, duration),
            client_info: ClientInfo {
                client_address: client_address.to_string(),
                vault_address: vault_address.to_string(),
                timestamp: target_time,
            },
        })
    }
}

/// Derives the deterministic job id for a `(target_time, duration)` pair:
/// a digest over the protocol identifier and the three window bounds, so
/// every pollster of the same job lands on the same id without coordination.
pub fn job_id(target_time: u64, duration: u64) -> Result<String, FossilError> {
    validate(target_time, duration)?;
    let params = JobRequestParams::new(target_time, duration);

    let mut hasher = Sha256::new();
    hasher.update(IDENTIFIER.as_bytes());
    for bound in [
        params.twap[0],
        params.twap[1],
        params.volatility[0],
        params.volatility[1],
        params.reserve_price[0],
        params.reserve_price[1],
    ] {
        hasher.update(bound.to_be_bytes());
    }

    Ok(format!("0x{}", hex::encode(hasher.finalize())))
}

fn validate(target_time: u64, duration: u64) -> Result<(), FossilError> {
    if target_time == 0 || duration == 0 {
        return Err(FossilError::InvalidRequest(
            "target time and duration must be non-zero".into(),
        ));
    }
    // The windows subtract up to 3x the duration from the target.
    if 3 * duration > target_time {
        return Err(FossilError::InvalidRequest(
            "target time precedes the widest window".into(),
        ));
    }
    Ok(())
}
