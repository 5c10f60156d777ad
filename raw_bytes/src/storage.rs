#[cfg(feature = "mmap")]
use std::{fs::File, path::Path};

#[cfg(feature = "mmap")]
use memmap2::{Mmap, MmapMut};

#[cfg(feature = "mmap")]
use crate::error::StorageError;
use crate::error::{Result, check_range};

/// A contiguous, byte-addressable range.
///
/// Offsets are in bytes from the start of the store. Growing a store fills
/// the new bytes with zero.
pub trait ByteStore: core::fmt::Debug {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buf` with the bytes starting at `offset`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Overwrites the bytes starting at `offset` with `data`.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;

    fn resize(&mut self, new_len: usize) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The low-level storage backend for raw bytes.
///
/// - Always includes in-memory `Vec<u8>`
/// - Includes mmap only when feature = "mmap"
#[derive(Debug)]
pub enum Storage {
    /// Standard in-memory vector
    InMemory(Vec<u8>),

    /// Read-only memory mapped file
    #[cfg(feature = "mmap")]
    MmapReadOnly(Mmap),

    /// Read-write memory mapped file
    #[cfg(feature = "mmap")]
    MmapReadWrite(MmapMut),
}

impl Storage {
    /// Create empty in-memory storage
    pub fn new_in_memory() -> Self {
        Storage::InMemory(Vec::new())
    }

    /// `len` zero bytes in memory
    pub fn zeroed(len: usize) -> Self {
        Storage::InMemory(vec![0u8; len])
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Storage::InMemory(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Storage::InMemory(vec) => vec,

            #[cfg(feature = "mmap")]
            Storage::MmapReadOnly(m) => m,

            #[cfg(feature = "mmap")]
            Storage::MmapReadWrite(m) => m,
        }
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match self {
            Storage::InMemory(vec) => Ok(vec),

            #[cfg(feature = "mmap")]
            Storage::MmapReadOnly(_) => Err(StorageError::ReadOnly),

            #[cfg(feature = "mmap")]
            Storage::MmapReadWrite(m) => Ok(m),
        }
    }

    //  Mmap constructors

    #[cfg(feature = "mmap")]
    pub fn from_mmap_readonly(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Storage::MmapReadOnly(mmap))
    }

    #[cfg(feature = "mmap")]
    pub fn from_mmap_readwrite(path: &Path) -> Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Storage::MmapReadWrite(mmap))
    }
}

impl ByteStore for Storage {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let bytes = self.as_slice();
        check_range(offset, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let bytes = self.as_mut_slice()?;
        check_range(offset, data.len(), bytes.len())?;
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn resize(&mut self, new_len: usize) -> Result<()> {
        match self {
            Storage::InMemory(vec) => {
                vec.resize(new_len, 0);
                Ok(())
            }

            #[cfg(feature = "mmap")]
            Storage::MmapReadOnly(_) => Err(StorageError::ReadOnly),

            #[cfg(feature = "mmap")]
            Storage::MmapReadWrite(m) => Err(StorageError::FixedSize {
                fixed: m.len(),
                requested: new_len,
            }),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Storage::InMemory(_) => Ok(()),

            #[cfg(feature = "mmap")]
            Storage::MmapReadOnly(_) => Ok(()),

            #[cfg(feature = "mmap")]
            Storage::MmapReadWrite(m) => Ok(m.flush()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn in_memory_basic_operations() {
        let mut storage = Storage::new_in_memory();
        assert_eq!(storage.len(), 0);
        assert!(storage.is_empty());

        storage.resize(4).unwrap();
        storage.write(1, &[1, 2]).unwrap();
        assert_eq!(storage.as_slice(), &[0, 1, 2, 0]);

        let mut buf = [0u8; 2];
        storage.read(2, &mut buf).unwrap();
        assert_eq!(buf, [2, 0]);

        assert!(matches!(
            storage.read(3, &mut buf),
            Err(StorageError::OutOfBounds {
                offset: 3,
                length: 2,
                available: 4
            })
        ));
    }

    #[test]
    fn shrinking_then_growing_zero_fills() {
        let mut storage = Storage::from_vec(vec![0xFF; 4]);
        storage.resize(2).unwrap();
        storage.resize(4).unwrap();
        assert_eq!(storage.as_slice(), &[0xFF, 0xFF, 0, 0]);
    }

    #[cfg(feature = "mmap")]
    #[test]
    fn mmap_readonly_operations() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();
        file.flush().unwrap();

        let mut storage = Storage::from_mmap_readonly(file.path()).unwrap();
        assert_eq!(storage.len(), 4);

        let mut buf = [0u8; 2];
        storage.read(1, &mut buf).unwrap();
        assert_eq!(buf, [2, 3]);

        assert!(matches!(storage.write(0, &[9]), Err(StorageError::ReadOnly)));
        assert!(storage.resize(8).is_err());
    }

    #[cfg(feature = "mmap")]
    #[test]
    fn mmap_readwrite_operations() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 4]).unwrap();
        file.flush().unwrap();

        {
            let mut storage = Storage::from_mmap_readwrite(file.path()).unwrap();
            storage.write(2, &[0xAA, 0xBB]).unwrap();
            storage.flush().unwrap();
            assert!(matches!(
                storage.resize(8),
                Err(StorageError::FixedSize {
                    fixed: 4,
                    requested: 8
                })
            ));
        }

        assert_eq!(std::fs::read(file.path()).unwrap(), vec![0, 0, 0xAA, 0xBB]);
    }
}
