use thiserror::Error;

#[derive(Error, Debug)]
pub enum FossilError {
    #[error("Failed to build or send the HTTP request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("The Fossil API returned an error: {0}")]
    Api(String),

    #[error("Invalid job parameters: {0}")]
    InvalidRequest(String),

    #[error("Invalid Fossil client configuration: {0}")]
    InvalidConfig(String),
}
