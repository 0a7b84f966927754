//! Error handling for the rastile crate.

use thiserror::Error;

/// Errors produced by the raster engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RastileError {
    /// A shape, size, range or self-consistency violation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A serialized block failed sentinel, CRC, framing or linkage
    /// validation.
    #[error("corrupt block: {0}")]
    CorruptBlock(String),

    /// The requested (sample, pixel, bands, compression) combination is
    /// outside the encode self-consistency matrix.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Persistence or source-file access failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An allocation was refused.
    #[error("out of memory: failed to reserve {0} bytes")]
    OutOfMemory(usize),

    /// The resolution chooser found no pyramid level matching the
    /// requested resolution.
    #[error("no matching resolution for ({x_res}, {y_res})")]
    NoMatchingResolution {
        /// Requested horizontal resolution.
        x_res: f64,
        /// Requested vertical resolution.
        y_res: f64,
    },

    /// A compression back-end rejected the payload.
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    /// An error from the underlying SQLite database.
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Any other error potentially returned by an external back-end.
    #[error(transparent)]
    External(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl RastileError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptBlock(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFeature(msg.into())
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeFailure(msg.into())
    }
}

/// Crate-wide result alias.
pub type RastileResult<T> = Result<T, RastileError>;

/// Reserve an exact buffer size, surfacing allocation failure instead
/// of aborting. Sizes come from untrusted block headers.
pub(crate) fn alloc_buffer(len: usize) -> RastileResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| RastileError::OutOfMemory(len))?;
    buf.resize(len, 0);
    Ok(buf)
}
