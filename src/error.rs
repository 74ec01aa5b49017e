use thiserror::Error;

/// Errors raised by the store and the diff iterator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TreeSequenceError {
    /// A column or pool allocation failed.
    #[error("out of memory")]
    NoMemory,
    /// The underlying container read or write failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The container is malformed: missing dataset or attribute, wrong
    /// rank, inconsistent lengths, checksum mismatch, or a format
    /// version newer than this build understands.
    #[error("file format error: {0}")]
    FileFormat(String),
    /// A record index at or past `num_records`.
    #[error("record index out of bounds")]
    OutOfBounds,
    /// An internal pool was exhausted mid-iteration. The pools are
    /// pre-sized from the sample size, so this indicates a sizing bug;
    /// the iterator must not be stepped again.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(&'static str),
}
