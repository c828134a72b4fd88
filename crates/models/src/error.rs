use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("no TWAP window has a bucket duration of {0} seconds")]
    UnknownTwapDuration(u64),
}
