//! File-backed byte store.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use crate::{
    ByteStore,
    error::{Result, check_range},
};

/// A byte store backed by an open file.
///
/// Besides the offset-addressed [`ByteStore`] contract it keeps a sequential
/// cursor (`read_next` / `write_next` / `seek` / `tell`). Offset-addressed access leaves
/// the cursor where it was.
#[derive(Debug)]
pub struct DiskStore {
    file: File,
    len: usize,
}

impl DiskStore {
    /// Opens (creating if needed) `path` for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(file)
    }

    pub fn from_file(file: File) -> Result<Self> {
        let len = file.metadata()?.len() as usize;
        Ok(Self { file, len })
    }

    /// Reads from the cursor; returns the number of bytes read.
    pub fn read_next(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    /// Writes at the cursor, extending the file when needed.
    pub fn write_next(&mut self, data: &[u8]) -> Result<usize> {
        let written = self.file.write(data)?;
        let end = self.file.stream_position()? as usize;
        self.len = self.len.max(end);
        Ok(written)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos)?)
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    pub fn into_file(self) -> File {
        self.file
    }

    fn at<T>(&self, offset: usize, op: impl FnOnce(&mut &File) -> std::io::Result<T>) -> Result<T> {
        let mut file = &self.file;
        let cursor = file.stream_position()?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let result = op(&mut file);
        file.seek(SeekFrom::Start(cursor))?;
        Ok(result?)
    }
}

impl ByteStore for DiskStore {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.at(offset, |file| file.read_exact(buf))
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_range(offset, data.len(), self.len)?;
        self.at(offset, |file| file.write_all(data))
    }

    fn resize(&mut self, new_len: usize) -> Result<()> {
        self.file.set_len(new_len as u64)?;
        self.len = new_len;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        DiskStore::flush(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn sequential_access() {
        let file = NamedTempFile::new().unwrap();
        let mut disk = DiskStore::open(file.path()).unwrap();

        assert_eq!(disk.write_next(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(disk.tell().unwrap(), 3);
        assert_eq!(ByteStore::len(&disk), 3);

        disk.seek(SeekFrom::Start(1)).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(disk.read_next(&mut buf).unwrap(), 2);
        assert_eq!(buf, [2, 3]);
    }

    #[test]
    fn offset_access_keeps_cursor() {
        let file = NamedTempFile::new().unwrap();
        let mut disk = DiskStore::open(file.path()).unwrap();
        ByteStore::resize(&mut disk, 8).unwrap();
        disk.seek(SeekFrom::Start(5)).unwrap();

        ByteStore::write(&mut disk, 2, &[0xAA, 0xBB]).unwrap();
        let mut buf = [0u8; 4];
        ByteStore::read(&disk, 1, &mut buf).unwrap();

        assert_eq!(buf, [0, 0xAA, 0xBB, 0]);
        assert_eq!(disk.tell().unwrap(), 5);
        assert!(ByteStore::write(&mut disk, 7, &[1, 2]).is_err());
    }

    #[test]
    fn resize_truncates_and_zero_extends() {
        let file = NamedTempFile::new().unwrap();
        let mut disk = DiskStore::open(file.path()).unwrap();
        disk.write_next(&[0xFF; 4]).unwrap();

        ByteStore::resize(&mut disk, 2).unwrap();
        ByteStore::resize(&mut disk, 3).unwrap();
        DiskStore::flush(&mut disk).unwrap();

        assert_eq!(std::fs::read(file.path()).unwrap(), vec![0xFF, 0xFF, 0]);
    }
}
