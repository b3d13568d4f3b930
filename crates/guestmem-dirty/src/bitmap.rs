use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt as _,
    path::{Path, PathBuf},
};

use crate::{
    Error,
    source::{copy_from, read_full},
};

/// Storage of a dirty page bitmap.
///
/// The bitmap holds one bit per page, indexed by the absolute page number
/// (`address / page_size`). Bit `n % 8` of byte `n / 8` belongs to page `n`.
pub trait BitmapStore {
    /// Reads bytes at `offset` into `buffer`.
    ///
    /// Returns the number of bytes read, which is less than the length of
    /// `buffer` only when the end of the bitmap is reached.
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Error>;

    /// Writes `data` at `offset`, extending the bitmap if needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), Error>;
}

/// An in-memory dirty bitmap.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirtyBitmap {
    bytes: Vec<u8>,
}

impl DirtyBitmap {
    /// Creates an empty bitmap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bitmap from its raw bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Returns the raw bytes of the bitmap.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Checks if the bit of `page` is set.
    ///
    /// Pages beyond the end of the bitmap are clear.
    pub fn is_set(&self, page: u64) -> bool {
        usize::try_from(page / 8)
            .ok()
            .and_then(|index| self.bytes.get(index))
            .is_some_and(|byte| byte & (1 << (page % 8)) != 0)
    }

    /// Sets or clears the bit of `page`.
    pub fn set(&mut self, page: u64, dirty: bool) {
        let index = (page / 8) as usize;
        if index >= self.bytes.len() {
            self.bytes.resize(index + 1, 0);
        }

        let bit = 1 << (page % 8);
        if dirty {
            self.bytes[index] |= bit;
        }
        else {
            self.bytes[index] &= !bit;
        }
    }

    /// Returns the page numbers of all set bits.
    pub fn dirty_pages(&self) -> impl Iterator<Item = u64> + '_ {
        self.bytes.iter().enumerate().flat_map(|(index, byte)| {
            (0..8)
                .filter(move |bit| byte & (1 << bit) != 0)
                .map(move |bit| index as u64 * 8 + bit)
        })
    }
}

impl BitmapStore for DirtyBitmap {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Error> {
        Ok(copy_from(&self.bytes, offset, buffer))
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), Error> {
        let start = offset as usize;
        let end = start + data.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }

        self.bytes[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// A dirty bitmap stored in a file.
#[derive(Debug)]
pub struct BitmapFile {
    path: PathBuf,
    file: File,
}

impl BitmapFile {
    /// Opens an existing bitmap for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| Error::io("failed to open", path, err))?;

        Ok(Self {
            path: path.to_owned(),
            file,
        })
    }

    /// Creates a bitmap, truncating an existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|err| Error::io("failed to create", path, err))?;

        Ok(Self {
            path: path.to_owned(),
            file,
        })
    }

    /// Returns the path of the bitmap file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BitmapStore for BitmapFile {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Error> {
        read_full(&self.file, &self.path, offset, buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), Error> {
        self.file
            .write_all_at(data, offset)
            .map_err(|err| Error::io("failed to write", &self.path, err))
    }
}

impl<T> BitmapStore for &mut T
where
    T: BitmapStore + ?Sized,
{
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Error> {
        (**self).read_at(offset, buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), Error> {
        (**self).write_at(offset, data)
    }
}

/// Reads the bits of consecutive pages through a window of bitmap bytes.
///
/// Bytes past the end of the store read as zero.
pub(crate) struct BitReader<'a, Store: ?Sized> {
    store: &'a Store,
    window: Vec<u8>,
    window_start: u64,
    window_len: usize,
    truncated: bool,
}

impl<'a, Store> BitReader<'a, Store>
where
    Store: BitmapStore + ?Sized,
{
    pub fn new(store: &'a Store, capacity: usize) -> Self {
        Self {
            store,
            window: vec![0; capacity.max(1)],
            window_start: 0,
            window_len: 0,
            truncated: false,
        }
    }

    /// Returns the bitmap byte holding the bit of `page` and the bit itself.
    pub fn bit(&mut self, page: u64) -> Result<(u8, bool), Error> {
        let index = page / 8;

        if index < self.window_start || index >= self.window_start + self.window_len as u64 {
            self.fill(index)?;
        }

        let byte = self.window[(index - self.window_start) as usize];
        Ok((byte, byte & (1 << (page % 8)) != 0))
    }

    fn fill(&mut self, index: u64) -> Result<(), Error> {
        let count = self.store.read_at(index, &mut self.window)?;

        if count < self.window.len() {
            if !self.truncated {
                tracing::warn!(
                    byte = index + count as u64,
                    "bitmap ends before the scanned range, missing bits read as clear"
                );
                self.truncated = true;
            }

            self.window[count..].fill(0);
        }

        self.window_start = index;
        self.window_len = self.window.len();
        Ok(())
    }
}

/// Writes the bits of consecutive pages, starting at `first_page`.
///
/// Bits outside of the written pages keep their value in the store. Whole
/// bytes are buffered and written with [`BitWriter::flush`].
pub(crate) struct BitWriter<'a, Store: ?Sized> {
    store: &'a mut Store,
    buffer: Vec<u8>,
    buffer_start: u64,
    byte: u8,
    next_page: u64,
}

impl<'a, Store> BitWriter<'a, Store>
where
    Store: BitmapStore + ?Sized,
{
    pub fn new(store: &'a mut Store, first_page: u64) -> Result<Self, Error> {
        let mut writer = Self {
            store,
            buffer: Vec::new(),
            buffer_start: first_page / 8,
            byte: 0,
            next_page: first_page,
        };

        // Keep the bits of the pages preceding the range.
        if first_page % 8 != 0 {
            let keep = (1u8 << (first_page % 8)) - 1;
            writer.byte = writer.existing(first_page / 8)? & keep;
        }

        Ok(writer)
    }

    /// Appends the bit of the next page.
    pub fn push(&mut self, dirty: bool) {
        let bit = self.next_page % 8;
        if dirty {
            self.byte |= 1 << bit;
        }

        self.next_page += 1;
        if bit == 7 {
            self.buffer.push(self.byte);
            self.byte = 0;
        }
    }

    /// Writes the buffered whole bytes.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.store.write_at(self.buffer_start, &self.buffer)?;
        self.buffer_start += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Writes everything, including the trailing partial byte.
    ///
    /// Returns the number of the first page after the written range.
    pub fn finish(mut self) -> Result<u64, Error> {
        self.flush()?;

        let used = self.next_page % 8;
        if used != 0 {
            let written = ((1u16 << used) - 1) as u8;
            let index = self.next_page / 8;

            // The first page may share this byte; its lower bits are
            // already in `self.byte`.
            let byte = (self.existing(index)? & !written) | (self.byte & written);
            self.store.write_at(index, &[byte])?;
        }

        Ok(self.next_page)
    }

    fn existing(&self, index: u64) -> Result<u8, Error> {
        let mut byte = [0u8];
        self.store.read_at(index, &mut byte)?;
        Ok(byte[0])
    }
}
