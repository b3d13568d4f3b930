use serde::{Deserialize, Serialize};

use crate::Error;

/// The range of guest memory covered by a scan and its granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanGeometry {
    /// First guest address of the scan. Must be page aligned.
    pub base: u64,

    /// Number of bytes to scan.
    pub size: u64,

    /// Number of bytes tracked by one bitmap bit.
    pub page_size: u64,

    /// Number of bytes read from each snapshot at once.
    pub block_size: u64,
}

impl ScanGeometry {
    /// The default page size.
    pub const DEFAULT_PAGE_SIZE: u64 = 4096;

    /// The default block size.
    pub const DEFAULT_BLOCK_SIZE: u64 = 4 << 20;

    /// Creates a geometry with the default page and block sizes.
    pub fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            page_size: Self::DEFAULT_PAGE_SIZE,
            block_size: Self::DEFAULT_BLOCK_SIZE,
        }
    }

    /// Sets the page size.
    ///
    /// The block size grows to the page size if it is smaller.
    pub fn with_page_size(self, page_size: u64) -> Self {
        Self {
            page_size,
            block_size: self.block_size.max(page_size),
            ..self
        }
    }

    /// Sets the block size.
    pub fn with_block_size(self, block_size: u64) -> Self {
        Self { block_size, ..self }
    }

    /// Checks that the geometry describes a scannable range.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.page_size.is_power_of_two() || self.page_size < 8 {
            return Err(Error::InvalidPageSize(self.page_size));
        }

        if self.base % self.page_size != 0 {
            return Err(Error::UnalignedBase {
                base: self.base,
                page_size: self.page_size,
            });
        }

        if self.block_size == 0
            || self.block_size % self.page_size != 0
            || usize::try_from(self.block_size).is_err()
        {
            return Err(Error::InvalidBlockSize {
                block_size: self.block_size,
                page_size: self.page_size,
            });
        }

        if self
            .page_count()
            .checked_mul(self.page_size)
            .and_then(|span| self.base.checked_add(span))
            .is_none()
        {
            return Err(Error::RangeOverflow {
                base: self.base,
                size: self.size,
            });
        }

        Ok(())
    }

    /// Returns the first address after the range.
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// Returns the first address after the last page of the range.
    ///
    /// A trailing partial page extends the scan to its page boundary.
    pub fn scan_end(&self) -> u64 {
        self.base
            .saturating_add(self.page_count().saturating_mul(self.page_size))
    }

    /// Returns the page number of the first page.
    pub fn first_page(&self) -> u64 {
        self.base / self.page_size
    }

    /// Returns the number of pages in the range, counting a trailing
    /// partial page.
    pub fn page_count(&self) -> u64 {
        self.size.div_ceil(self.page_size)
    }

    /// Returns the offset of the first bitmap byte of the range and the
    /// bit of the first page within it.
    pub fn bitmap_offset(&self) -> (u64, u8) {
        let first_page = self.first_page();
        (first_page / 8, (first_page % 8) as u8)
    }
}

/// Options of a bitmap check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOptions {
    /// The scanned range.
    pub geometry: ScanGeometry,

    /// Stop at the first page that is dirty but not marked.
    pub stop_on_mismatch: bool,

    /// List pages that are marked but not dirty.
    pub report_over_marked: bool,
}

impl CheckOptions {
    /// Creates options that stop at the first mismatch.
    pub fn new(geometry: ScanGeometry) -> Self {
        Self {
            geometry,
            stop_on_mismatch: true,
            report_over_marked: false,
        }
    }

    /// Sets whether the check stops at the first mismatch.
    pub fn with_stop_on_mismatch(self, stop_on_mismatch: bool) -> Self {
        Self {
            stop_on_mismatch,
            ..self
        }
    }

    /// Sets whether over-marked pages are listed.
    pub fn with_report_over_marked(self, report_over_marked: bool) -> Self {
        Self {
            report_over_marked,
            ..self
        }
    }
}
