use segplay_engine::{FetchError, PlayerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Playback error: {0}")]
    Player(#[from] PlayerError),

    #[error("Network error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, AppError>;
