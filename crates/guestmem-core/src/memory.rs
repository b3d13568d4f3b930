use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use zerocopy::byteorder::{BigEndian, U64};

use crate::{MemoryError, Ra};

/// Access to the guest physical memory.
///
/// This is the only way translation code touches guest memory. All accesses
/// are naturally aligned doublewords; implementations decide the byte order
/// of the underlying storage.
pub trait GuestMemory {
    /// Reads the doubleword at `ra`.
    fn read_u64(&self, ra: Ra) -> Result<u64, MemoryError>;

    /// Writes `value` to the doubleword at `ra`.
    fn write_u64(&self, ra: Ra, value: u64) -> Result<(), MemoryError>;

    /// Atomically replaces the doubleword at `ra` with `new` if it equals
    /// `current`.
    ///
    /// Returns the value observed before the operation. The exchange took
    /// place if and only if the returned value equals `current`.
    fn cas_u64(&self, ra: Ra, current: u64, new: u64) -> Result<u64, MemoryError>;
}

impl<T> GuestMemory for &T
where
    T: GuestMemory + ?Sized,
{
    fn read_u64(&self, ra: Ra) -> Result<u64, MemoryError> {
        (**self).read_u64(ra)
    }

    fn write_u64(&self, ra: Ra, value: u64) -> Result<(), MemoryError> {
        (**self).write_u64(ra, value)
    }

    fn cas_u64(&self, ra: Ra, current: u64, new: u64) -> Result<u64, MemoryError> {
        (**self).cas_u64(ra, current, new)
    }
}

impl<T> GuestMemory for Arc<T>
where
    T: GuestMemory + ?Sized,
{
    fn read_u64(&self, ra: Ra) -> Result<u64, MemoryError> {
        (**self).read_u64(ra)
    }

    fn write_u64(&self, ra: Ra, value: u64) -> Result<(), MemoryError> {
        (**self).write_u64(ra, value)
    }

    fn cas_u64(&self, ra: Ra, current: u64, new: u64) -> Result<u64, MemoryError> {
        (**self).cas_u64(ra, current, new)
    }
}

/// Flat, zero based guest memory held in the current process.
///
/// Memory is stored as atomic doublewords, so it can be shared between
/// translation threads. The byte view exposed by [`read_bytes`] and
/// [`write_bytes`] is big-endian, i.e. the most significant byte of a
/// doubleword lives at the lowest address.
///
/// [`read_bytes`]: Self::read_bytes
/// [`write_bytes`]: Self::write_bytes
pub struct FlatMemory {
    words: Box<[AtomicU64]>,
}

impl FlatMemory {
    /// Creates zero filled memory of `size` bytes, rounded up to a whole
    /// number of doublewords.
    pub fn new(size: usize) -> Self {
        let words = size.div_ceil(size_of::<u64>());
        Self {
            words: (0..words).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Returns the size of the memory in bytes.
    pub fn size(&self) -> u64 {
        (self.words.len() * size_of::<u64>()) as u64
    }

    /// Copies bytes starting at `ra` into `buffer`.
    pub fn read_bytes(&self, ra: Ra, buffer: &mut [u8]) -> Result<(), MemoryError> {
        self.check_range(ra, buffer.len())?;

        for (i, byte) in buffer.iter_mut().enumerate() {
            let address = ra.0 + i as u64;
            let word = self.words[(address / 8) as usize].load(Ordering::Acquire);
            *byte = U64::<BigEndian>::new(word).to_bytes()[(address % 8) as usize];
        }

        Ok(())
    }

    /// Copies `data` into memory starting at `ra`.
    pub fn write_bytes(&self, ra: Ra, data: &[u8]) -> Result<(), MemoryError> {
        self.check_range(ra, data.len())?;

        for (i, &byte) in data.iter().enumerate() {
            let address = ra.0 + i as u64;
            let slot = &self.words[(address / 8) as usize];
            let _ = slot.fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let mut bytes = U64::<BigEndian>::new(word).to_bytes();
                bytes[(address % 8) as usize] = byte;
                Some(U64::<BigEndian>::from_bytes(bytes).get())
            });
        }

        Ok(())
    }

    fn check_range(&self, ra: Ra, len: usize) -> Result<(), MemoryError> {
        match ra.0.checked_add(len as u64) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(MemoryError::OutOfBounds(ra)),
        }
    }

    fn slot(&self, ra: Ra) -> Result<&AtomicU64, MemoryError> {
        if ra.0 % 8 != 0 {
            return Err(MemoryError::Unaligned(ra));
        }

        self.words
            .get((ra.0 / 8) as usize)
            .ok_or(MemoryError::OutOfBounds(ra))
    }
}

impl GuestMemory for FlatMemory {
    fn read_u64(&self, ra: Ra) -> Result<u64, MemoryError> {
        Ok(self.slot(ra)?.load(Ordering::Acquire))
    }

    fn write_u64(&self, ra: Ra, value: u64) -> Result<(), MemoryError> {
        self.slot(ra)?.store(value, Ordering::Release);
        Ok(())
    }

    fn cas_u64(&self, ra: Ra, current: u64, new: u64) -> Result<u64, MemoryError> {
        match self
            .slot(ra)?
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(previous) | Err(previous) => Ok(previous),
        }
    }
}

impl std::fmt::Debug for FlatMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("FlatMemory")
            .field("size", &self.size())
            .finish()
    }
}
