use std::{
    fs::File,
    os::unix::fs::FileExt as _,
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use crate::Error;

/// A memory snapshot that can be read at arbitrary offsets.
///
/// Offsets are guest physical addresses: byte `n` of the source holds the
/// content of guest address `n`.
pub trait SnapshotSource {
    /// Returns the size of the snapshot in bytes.
    fn len(&self) -> u64;

    /// Checks if the snapshot is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads bytes at `offset` into `buffer`.
    ///
    /// Returns the number of bytes read, which is less than the length of
    /// `buffer` only when the end of the snapshot is reached.
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Error>;
}

impl<T> SnapshotSource for &T
where
    T: SnapshotSource + ?Sized,
{
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Error> {
        (**self).read_at(offset, buffer)
    }
}

impl SnapshotSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Error> {
        Ok(copy_from(self, offset, buffer))
    }
}

impl SnapshotSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Error> {
        Ok(copy_from(self, offset, buffer))
    }
}

/// Copies the bytes of `data` at `offset` into `buffer`, up to the end of
/// `data`.
pub(crate) fn copy_from(data: &[u8], offset: u64, buffer: &mut [u8]) -> usize {
    let Ok(offset) = usize::try_from(offset)
    else {
        return 0;
    };

    let Some(tail) = data.get(offset..)
    else {
        return 0;
    };

    let count = tail.len().min(buffer.len());
    buffer[..count].copy_from_slice(&tail[..count]);
    count
}

enum Backing {
    File { file: File, len: u64 },
    Mapped(Mmap),
}

/// A memory snapshot stored in a file.
///
/// The file is either read with positioned reads, one block at a time, or
/// mapped into memory as a whole.
pub struct Snapshot {
    path: PathBuf,
    backing: Backing,
}

impl Snapshot {
    /// Opens a snapshot for positioned reads.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| Error::io("failed to open", path, err))?;
        let len = file
            .metadata()
            .map_err(|err| Error::io("failed to stat", path, err))?
            .len();

        Ok(Self {
            path: path.to_owned(),
            backing: Backing::File { file, len },
        })
    }

    /// Opens a snapshot and maps it into memory.
    pub fn map(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| Error::io("failed to open", path, err))?;

        // SAFETY: The snapshot is only read. Modifying the file while it is
        // mapped is a usage error of the caller.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|err| Error::io("failed to map", path, err))?;

        Ok(Self {
            path: path.to_owned(),
            backing: Backing::Mapped(mmap),
        })
    }

    /// Returns the path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks if the snapshot is memory mapped.
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("path", &self.path)
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl SnapshotSource for Snapshot {
    fn len(&self) -> u64 {
        match &self.backing {
            Backing::File { len, .. } => *len,
            Backing::Mapped(mmap) => mmap.len() as u64,
        }
    }

    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, Error> {
        match &self.backing {
            Backing::File { file, .. } => read_full(file, &self.path, offset, buffer),
            Backing::Mapped(mmap) => Ok(copy_from(mmap, offset, buffer)),
        }
    }
}

/// Reads from `file` until `buffer` is full or the end of the file is
/// reached.
pub(crate) fn read_full(
    file: &File,
    path: &Path,
    offset: u64,
    buffer: &mut [u8],
) -> Result<usize, Error> {
    let mut total = 0;

    while total < buffer.len() {
        match file.read_at(&mut buffer[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(count) => total += count,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(Error::io("failed to read", path, err)),
        }
    }

    Ok(total)
}
