use thiserror::Error;

/// Errors surfaced by failable cache writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The key is already present, either in the published store or in the
    /// not-yet-merged pending buffer.
    #[error("key already present in cache")]
    DuplicateKey,
}

pub type Result<T> = std::result::Result<T, CacheError>;
