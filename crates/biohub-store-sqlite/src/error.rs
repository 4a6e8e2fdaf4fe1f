//! Error type for `biohub-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Domain rejections: unknown schema rows, duplicate names, type
  /// mismatches, missing features or rules, ledger conflicts.
  #[error(transparent)]
  Core(#[from] biohub_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored column held a value outside its closed set.
  #[error("decode error: {0}")]
  Decode(String),
}

impl Error {
  /// The domain error, if this is one.
  pub fn core(&self) -> Option<&biohub_core::Error> {
    match self {
      Self::Core(e) => Some(e),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
