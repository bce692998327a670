use thiserror::Error;

// ---------------------------------------------------------------------------
// Library error type
// ---------------------------------------------------------------------------

/// Unified error type for the whole crate.
///
/// Per-key loading never returns this: decode failures are carried inside
/// [`crate::data::model::DecodedResult`] so batch operations survive a single
/// bad file. `SpmError` is reserved for the fatal surface: session
/// construction, key resolution, and analyzer access on failed data.
#[derive(Error, Debug)]
pub enum SpmError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, SpmError>;
