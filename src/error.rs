use thiserror::Error;

/// An error returned by a [`CuckooFilter`](crate::CuckooFilter) operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuckooError {
    /// The key was not found by `contains`, `delete`, or `change_fingerprint`.
    #[error("key not found")]
    NotFound,
    /// `add` was called while the victim slot was already occupied.
    #[error("not enough space left in the filter")]
    NotEnoughSpace,
    /// Reserved for future use; no operation currently returns this variant.
    #[error("operation not supported")]
    NotSupported,
}
