use std::{fmt, ops::ControlFlow};

use crate::{BitmapStore, CheckOptions, Error, SnapshotSource, bitmap::BitReader, scan::scan_pages};

/// A page that differs between the snapshots while its bitmap bit is clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inconsistency {
    /// Guest address of the page.
    pub page_address: u64,

    /// First guest address after the page.
    pub page_end: u64,

    /// Guest address of the first differing byte.
    pub byte_address: u64,

    /// Offset of the bitmap byte holding the bit of the page.
    pub bitmap_byte: u64,

    /// Value of that bitmap byte.
    pub bitmap_value: u8,

    /// Position of the bit of the page within the bitmap byte.
    pub bit: u8,
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bitmap_value == 0 {
            write!(
                f,
                "page at addr {:#x} is dirty, but byte {:#x} of bitmap is clear",
                self.byte_address, self.bitmap_byte
            )
        }
        else {
            write!(
                f,
                "page at addr {:#x} is dirty, but bit {} of byte {:#x} ({:#x}) of bitmap is clear",
                self.byte_address, self.bit, self.bitmap_byte, self.bitmap_value
            )
        }
    }
}

/// A page marked in the bitmap whose content is identical in both
/// snapshots.
///
/// Over-marking is conservative and does not make a bitmap inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverMarked {
    /// Guest address of the page.
    pub page_address: u64,

    /// Offset of the bitmap byte holding the bit of the page.
    pub bitmap_byte: u64,

    /// Position of the bit of the page within the bitmap byte.
    pub bit: u8,
}

impl fmt::Display for OverMarked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page at addr {:#x} is clean, but bit {} of byte {:#x} of bitmap is set",
            self.page_address, self.bit, self.bitmap_byte
        )
    }
}

/// The outcome of [`check`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// Number of scanned pages that differ between the snapshots.
    pub dirty_pages: u64,

    /// Number of scanned pages.
    pub pages_scanned: u64,

    /// Dirty pages whose bit is clear.
    pub missed: Vec<Inconsistency>,

    /// Number of clean pages whose bit is set.
    pub over_marked: u64,

    /// Clean pages whose bit is set, if requested.
    pub over_marked_pages: Vec<OverMarked>,
}

impl CheckReport {
    /// Checks if every dirty page is marked in the bitmap.
    pub fn is_consistent(&self) -> bool {
        self.missed.is_empty()
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for missed in &self.missed {
            writeln!(f, "{missed}")?;
            writeln!(
                f,
                "inconsistent dirty bitmap within {:#x} to {:#x}",
                missed.page_address, missed.page_end
            )?;
        }

        for over_marked in &self.over_marked_pages {
            writeln!(f, "{over_marked}")?;
        }

        if self.over_marked != 0 {
            writeln!(f, "{} clean pages are marked dirty.", self.over_marked)?;
        }

        if self.is_consistent() {
            write!(
                f,
                "no inconsistencies found. found {} dirty pages.",
                self.dirty_pages
            )
        }
        else {
            write!(
                f,
                "found {} inconsistencies in {} pages. found {} dirty pages.",
                self.missed.len(),
                self.pages_scanned,
                self.dirty_pages
            )
        }
    }
}

/// Verifies that every page differing between `a` and `b` is marked in
/// `bitmap`.
///
/// With [`CheckOptions::stop_on_mismatch`], the scan ends at the first
/// page that is dirty but not marked.
pub fn check<A, B, Store>(
    a: &A,
    b: &B,
    bitmap: &Store,
    options: &CheckOptions,
) -> Result<CheckReport, Error>
where
    A: SnapshotSource + ?Sized,
    B: SnapshotSource + ?Sized,
    Store: BitmapStore + ?Sized,
{
    let geometry = &options.geometry;
    geometry.validate()?;

    // Bitmap bytes covering one block, plus one for an unaligned start.
    let window = (geometry.block_size / geometry.page_size / 8 + 1) as usize;
    let mut reader = BitReader::new(bitmap, window);
    let mut report = CheckReport::default();

    let pages_scanned = scan_pages(a, b, geometry, |page| {
        let (bitmap_value, marked) = reader.bit(page.number)?;

        match (page.first_difference(), marked) {
            (Some(offset), false) => {
                report.dirty_pages += 1;
                report.missed.push(Inconsistency {
                    page_address: page.address,
                    page_end: page.end(),
                    byte_address: page.address + offset as u64,
                    bitmap_byte: page.number / 8,
                    bitmap_value,
                    bit: (page.number % 8) as u8,
                });

                tracing::debug!(address = page.address, "dirty page not marked");

                if options.stop_on_mismatch {
                    return Ok(ControlFlow::Break(()));
                }
            }
            (Some(_), true) => report.dirty_pages += 1,
            (None, true) => {
                report.over_marked += 1;
                if options.report_over_marked {
                    report.over_marked_pages.push(OverMarked {
                        page_address: page.address,
                        bitmap_byte: page.number / 8,
                        bit: (page.number % 8) as u8,
                    });
                }
            }
            (None, false) => {}
        }

        Ok(ControlFlow::Continue(()))
    })?;

    report.pages_scanned = pages_scanned;
    Ok(report)
}
