use thiserror::Error;

use crate::Handle;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Byte range outside the store
    #[error("Range of {length} bytes at {offset} exceeds store of {available} bytes")]
    OutOfBounds {
        offset: usize,
        length: usize,
        available: usize,
    },

    /// Handle was freed or never allocated
    #[error("Handle {0} does not name a live allocation")]
    InvalidHandle(Handle),

    #[error("Store is read-only")]
    ReadOnly,

    /// Backing cannot change size (memory maps)
    #[error("Store has a fixed size of {fixed} bytes, cannot resize to {requested}")]
    FixedSize { fixed: usize, requested: usize },
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub(crate) fn check_range(offset: usize, length: usize, available: usize) -> Result<()> {
    if offset.checked_add(length).is_none_or(|end| end > available) {
        return Err(StorageError::OutOfBounds {
            offset,
            length,
            available,
        });
    }
    Ok(())
}
