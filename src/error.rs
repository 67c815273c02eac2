use thiserror::Error;

/// Sticky error value for a scrub-and-defrag run.
///
/// First error wins: once any fallible step in the `Driver` returns one of
/// these, every later step short-circuits via `?` and the destination's
/// exclusive write transaction is never committed.
#[derive(Debug, Error)]
pub enum ScrubError {
    #[error("read failed for page {pgno}")]
    ReadFailed { pgno: u32 },

    #[error("write failed for page {pgno}")]
    WriteFailed { pgno: u32 },

    #[error(
        "corruption on page {page} of source database (errid={loc})"
    )]
    Corrupt { page: u32, loc: &'static str },

    #[error("internal logic error or database is corrupt, please run 'pragma integrity_check' on database: {0}")]
    Internal(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ScrubResult<T> = Result<T, ScrubError>;
