//! # Fossil Client
//!
//! An HTTP client for the Fossil pricing API: submit a pricing job for a
//! (target time, round duration) pair and poll its status by deterministic
//! job id. The job tracker in the websocket server drives this client; the
//! `FossilApi` trait exists so tests can swap in a mock oracle.

use async_trait::async_trait;
use configuration::settings::FossilConfig;
use models::FossilStatus;
use reqwest::header::{HeaderMap, HeaderValue};
use std::time::Duration;

pub mod error;
pub mod requests;
pub mod responses;

// --- Public API ---
pub use error::FossilError;
pub use requests::{job_id, JobRequest};
pub use responses::{FossilResponse, JobStatus};

/// The generic, abstract interface to the pricing oracle.
/// This trait is the contract the job tracker polls against, allowing the
/// underlying implementation (live or mock) to be swapped out.
#[async_trait]
pub trait FossilApi: Send + Sync {
    /// Submits a new pricing job. Returns the status the oracle assigned it.
    async fn request_job(
        &self,
        target_time: u64,
        duration: u64,
        client_address: &str,
        vault_address: &str,
    ) -> Result<FossilStatus, FossilError>;

    /// Polls the status of the job identified by `(target_time, duration)`.
    async fn get_job_status(
        &self,
        target_time: u64,
        duration: u64,
    ) -> Result<JobStatus, FossilError>;
}

/// A concrete implementation of `FossilApi` for the live Fossil deployment.
#[derive(Clone)]
pub struct FossilClient {
    client: reqwest::Client,
    base_url: String,
}

impl FossilClient {
    pub fn new(config: &FossilConfig) -> Result<Self, FossilError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&config.api_key)
                .map_err(|_| FossilError::InvalidConfig("FOSSIL_API_KEY is not a valid header value".into()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FossilApi for FossilClient {
    async fn request_job(
        &self,
        target_time: u64,
        duration: u64,
        client_address: &str,
        vault_address: &str,
    ) -> Result<FossilStatus, FossilError> {
        let request = JobRequest::new(target_time, duration, client_address, vault_address)?;

        let response = self
            .client
            .post(format!("{}/pricing_data", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FossilError::Api(format!(
                "pricing_data returned {status}: {body}"
            )));
        }

        let parsed: FossilResponse = response.json().await?;
        if let Some(error) = &parsed.error {
            return Err(FossilError::Api(error.clone()));
        }
        parsed
            .parse_status()
            .ok_or_else(|| FossilError::Api("pricing_data response carried no status".into()))
    }

    async fn get_job_status(
        &self,
        target_time: u64,
        duration: u64,
    ) -> Result<JobStatus, FossilError> {
        let job_id = job_id(target_time, duration)?;

        let response = self
            .client
            .get(format!("{}/api/getJobStatus", self.base_url))
            .query(&[("jobId", job_id.as_str())])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(JobStatus::NotFound);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FossilError::Api(format!(
                "getJobStatus returned {status}: {body}"
            )));
        }

        let parsed: FossilResponse = response.json().await?;
        Ok(parsed.into_job_status())
    }
}
