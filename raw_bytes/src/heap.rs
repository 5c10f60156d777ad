//! Handle-based allocation of byte stores.

use core::fmt;

use crate::{
    ByteStore, Storage,
    error::{Result, StorageError, check_range},
};

/// Names one allocation. A handle outlives its allocation safely: once the
/// slot is freed the generation moves on and the old handle is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// A set of resizable byte stores.
pub trait Allocator: fmt::Debug {
    /// A new zero-filled store of `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<Handle>;

    /// Grows (zero-filling) or truncates the store.
    fn reallocate(&mut self, handle: Handle, new_size: usize) -> Result<()>;

    fn free(&mut self, handle: Handle) -> Result<()>;

    fn read(&self, handle: Handle, offset: usize, len: usize) -> Result<Vec<u8>>;

    fn write(&mut self, handle: Handle, offset: usize, data: &[u8]) -> Result<()>;

    fn size(&self, handle: Handle) -> Result<usize>;

    /// Takes ownership of an existing store.
    fn adopt(&mut self, store: Box<dyn ByteStore>) -> Handle;

    fn flush(&mut self, _handle: Handle) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    store: Option<Box<dyn ByteStore>>,
}

/// Slab of byte stores; freed slots are reused.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.store.is_some()).count()
    }

    fn store(&self, handle: Handle) -> Result<&dyn ByteStore> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.store.as_deref())
            .ok_or(StorageError::InvalidHandle(handle))
    }

    fn store_mut(&mut self, handle: Handle) -> Result<&mut Box<dyn ByteStore>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.store.as_mut())
            .ok_or(StorageError::InvalidHandle(handle))
    }
}

impl Allocator for Heap {
    fn allocate(&mut self, size: usize) -> Result<Handle> {
        Ok(self.adopt(Box::new(Storage::zeroed(size))))
    }

    fn reallocate(&mut self, handle: Handle, new_size: usize) -> Result<()> {
        self.store_mut(handle)?.resize(new_size)
    }

    fn free(&mut self, handle: Handle) -> Result<()> {
        self.store(handle)?;
        let slot = &mut self.slots[handle.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        let store = slot.store.take();
        self.free_list.push(handle.index);
        match store {
            Some(mut store) => store.flush(),
            None => Ok(()),
        }
    }

    fn read(&self, handle: Handle, offset: usize, len: usize) -> Result<Vec<u8>> {
        let store = self.store(handle)?;
        check_range(offset, len, store.len())?;
        let mut buf = vec![0u8; len];
        store.read(offset, &mut buf)?;
        Ok(buf)
    }

    fn write(&mut self, handle: Handle, offset: usize, data: &[u8]) -> Result<()> {
        let store = self.store_mut(handle)?;
        check_range(offset, data.len(), store.len())?;
        store.write(offset, data)
    }

    fn size(&self, handle: Handle) -> Result<usize> {
        Ok(self.store(handle)?.len())
    }

    fn adopt(&mut self, store: Box<dyn ByteStore>) -> Handle {
        match self.free_list.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.store = Some(store);
                Handle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    store: Some(store),
                });
                Handle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    fn flush(&mut self, handle: Handle) -> Result<()> {
        self.store_mut(handle)?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_read_write() {
        let mut heap = Heap::new();
        let handle = heap.allocate(4).unwrap();
        heap.write(handle, 2, &[1, 2]).unwrap();
        assert_eq!(heap.read(handle, 0, 4).unwrap(), vec![0, 0, 1, 2]);
        assert_eq!(heap.size(handle).unwrap(), 4);
        assert!(matches!(
            heap.write(handle, 3, &[1, 2]),
            Err(StorageError::OutOfBounds { offset: 3, length: 2, available: 4 })
        ));
    }

    #[test]
    fn freed_handles_are_rejected_after_reuse() {
        let mut heap = Heap::new();
        let first = heap.allocate(1).unwrap();
        heap.free(first).unwrap();
        let second = heap.allocate(2).unwrap();

        assert_ne!(first, second);
        assert!(matches!(
            heap.read(first, 0, 1),
            Err(StorageError::InvalidHandle(h)) if h == first
        ));
        assert!(heap.free(first).is_err());
        assert_eq!(heap.live(), 1);
    }

    #[test]
    fn reallocate_zero_fills() {
        let mut heap = Heap::new();
        let handle = heap.adopt(Box::new(Storage::from_vec(vec![0xFF; 2])));
        heap.reallocate(handle, 4).unwrap();
        assert_eq!(heap.read(handle, 0, 4).unwrap(), vec![0xFF, 0xFF, 0, 0]);
        heap.reallocate(handle, 1).unwrap();
        assert_eq!(heap.size(handle).unwrap(), 1);
    }
}
