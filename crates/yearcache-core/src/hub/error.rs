use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Hub is not running")]
    Closed,

    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}
