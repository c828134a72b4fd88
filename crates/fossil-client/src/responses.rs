use models::FossilStatus;
use serde::Deserialize;

/// The envelope every Fossil endpoint responds with. Status endpoints nest
/// the interesting part under `data`; job submission answers at the top
/// level.
#[derive(Debug, Clone, Deserialize)]
pub struct FossilResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<StatusData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The outcome of one status poll, from the job tracker's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// The oracle has never seen this job id.
    NotFound,
    /// The job exists and reports this status.
    Known(FossilStatus),
    /// The oracle reported a terminal error for this job.
    Failed(String),
}

impl FossilResponse {
    /// The status string, wherever the endpoint put it.
    fn status_str(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.status.as_deref())
            .or(self.status.as_deref())
    }

    fn error_str(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.error.as_deref())
            .or(self.error.as_deref())
    }

    /// Parses the response status into the shared enum, if present and
    /// recognized.
    pub fn parse_status(&self) -> Option<FossilStatus> {
        match self.status_str()? {
            "Initial" => Some(FossilStatus::Initial),
            "Pending" => Some(FossilStatus::Pending),
            "Completed" => Some(FossilStatus::Completed),
            _ => None,
        }
    }

    /// Interprets a `getJobStatus` response body.
    pub fn into_job_status(self) -> JobStatus {
        if let Some(status) = self.parse_status() {
            return JobStatus::Known(status);
        }
        if let Some(error) = self.error_str() {
            return JobStatus::Failed(error.to_string());
        }
        match self.status_str() {
            Some(other) => JobStatus::Failed(format!("unrecognized job status '{other}'")),
            None => JobStatus::NotFound,
        }
    }
}
