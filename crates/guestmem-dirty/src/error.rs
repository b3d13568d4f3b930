use std::path::PathBuf;

/// An error that can occur while scanning snapshots or running the
/// workload.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O operation on a file failed.
    #[error("{operation} {}: {source}", path.display())]
    Io {
        /// The operation that failed.
        operation: &'static str,

        /// The file the operation was made on.
        path: PathBuf,

        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The page size is not a power of two of at least 8 bytes.
    #[error("Invalid page size {0:#x}")]
    InvalidPageSize(u64),

    /// The base address is not page aligned.
    #[error("Base address {base:#x} is not aligned to the page size {page_size:#x}")]
    UnalignedBase {
        /// The base address of the scan.
        base: u64,

        /// The page size of the scan.
        page_size: u64,
    },

    /// The block size is not a non-zero multiple of the page size.
    #[error("Block size {block_size:#x} is not a multiple of the page size {page_size:#x}")]
    InvalidBlockSize {
        /// The block size of the scan.
        block_size: u64,

        /// The page size of the scan.
        page_size: u64,
    },

    /// The scanned range does not fit the address space.
    #[error("Range {base:#x}+{size:#x} overflows")]
    RangeOverflow {
        /// The base address of the scan.
        base: u64,

        /// The size of the scan.
        size: u64,
    },

    /// The workload stride cannot hold a marker.
    #[error("Invalid stride {0}")]
    InvalidStride(usize),

    /// The workload has nothing to do.
    #[error("Invalid working set of {bytes} bytes for {workers} workers")]
    InvalidWorkingSet {
        /// The size of the working set in bytes.
        bytes: usize,

        /// The number of workers.
        workers: usize,
    },
}

impl Error {
    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
