use super::models::TtsStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate event within dedup window, existing id {existing_id}")]
    DuplicateEvent { existing_id: i64 },

    #[error("tts artifact {0} is not ready")]
    NotReady(i64),

    #[error("illegal tts status transition {from} -> {to}")]
    IllegalTransition { from: TtsStatus, to: TtsStatus },

    #[error("row not found")]
    NotFound,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}
