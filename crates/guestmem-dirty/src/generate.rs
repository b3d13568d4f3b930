use std::{fmt, ops::ControlFlow};

use crate::{
    BitmapStore, Error, ScanGeometry, SnapshotSource, bitmap::BitWriter, scan::scan_pages,
};

/// The outcome of [`generate`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerateReport {
    /// Number of pages that differ between the snapshots.
    pub dirty_pages: u64,

    /// Number of pages written to the bitmap.
    pub pages_scanned: u64,
}

impl fmt::Display for GenerateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "generated bitmap for {} pages. found {} dirty pages.",
            self.pages_scanned, self.dirty_pages
        )
    }
}

/// Writes the dirty bitmap of the range described by `geometry`.
///
/// The bit of every scanned page is written, set if any byte of the page
/// differs between `a` and `b`, and clear otherwise. Bits of pages outside
/// the range are preserved.
pub fn generate<A, B, Store>(
    a: &A,
    b: &B,
    bitmap: &mut Store,
    geometry: &ScanGeometry,
) -> Result<GenerateReport, Error>
where
    A: SnapshotSource + ?Sized,
    B: SnapshotSource + ?Sized,
    Store: BitmapStore + ?Sized,
{
    geometry.validate()?;

    let pages_per_block = geometry.block_size / geometry.page_size;
    let mut writer = BitWriter::new(bitmap, geometry.first_page())?;
    let mut dirty_pages = 0;
    let mut block_pages = 0;

    let pages_scanned = scan_pages(a, b, geometry, |page| {
        let dirty = page.a != page.b;
        if dirty {
            dirty_pages += 1;
        }

        writer.push(dirty);

        block_pages += 1;
        if block_pages == pages_per_block {
            writer.flush()?;
            block_pages = 0;
        }

        Ok(ControlFlow::Continue(()))
    })?;

    writer.finish()?;

    tracing::debug!(pages_scanned, dirty_pages, "bitmap generated");

    Ok(GenerateReport {
        dirty_pages,
        pages_scanned,
    })
}
