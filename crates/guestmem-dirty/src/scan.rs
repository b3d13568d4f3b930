use std::ops::ControlFlow;

use crate::{Error, ScanGeometry, SnapshotSource};

/// A page of both snapshots.
pub(crate) struct Page<'a> {
    /// Absolute page number.
    pub number: u64,

    /// Guest address of the first byte.
    pub address: u64,

    pub a: &'a [u8],
    pub b: &'a [u8],
}

impl Page<'_> {
    /// Returns the offset of the first byte that differs between the
    /// snapshots.
    pub fn first_difference(&self) -> Option<usize> {
        if self.a == self.b {
            return None;
        }

        self.a.iter().zip(self.b).position(|(a, b)| a != b)
    }

    /// Returns the first address after the page.
    pub fn end(&self) -> u64 {
        self.address + self.a.len() as u64
    }
}

/// Streams both snapshots block by block and visits every page of the
/// range once, in address order.
///
/// A trailing partial page is scanned up to its page boundary. The scan
/// ends early when a snapshot ends first, and the last page is visited
/// with the bytes available.
///
/// Returns the number of visited pages.
pub(crate) fn scan_pages<A, B>(
    a: &A,
    b: &B,
    geometry: &ScanGeometry,
    mut visit: impl FnMut(Page<'_>) -> Result<ControlFlow<()>, Error>,
) -> Result<u64, Error>
where
    A: SnapshotSource + ?Sized,
    B: SnapshotSource + ?Sized,
{
    if a.len() != b.len() {
        tracing::warn!(a = a.len(), b = b.len(), "snapshot sizes differ");
    }

    let page_size = geometry.page_size as usize;
    let end = geometry.scan_end();
    let buffer_size = geometry.block_size.min(end - geometry.base) as usize;

    let mut a_buffer = vec![0u8; buffer_size];
    let mut b_buffer = vec![0u8; buffer_size];

    let mut position = geometry.base;
    let mut pages = 0;

    while position < end {
        let len = (end - position).min(geometry.block_size) as usize;

        let a_len = a.read_at(position, &mut a_buffer[..len])?;
        let b_len = b.read_at(position, &mut b_buffer[..len])?;
        let available = a_len.min(b_len);

        tracing::debug!(position, len = available, "scanning block");

        for (index, (a_page, b_page)) in a_buffer[..available]
            .chunks(page_size)
            .zip(b_buffer[..available].chunks(page_size))
            .enumerate()
        {
            let address = position + (index * page_size) as u64;
            pages += 1;

            let page = Page {
                number: address / geometry.page_size,
                address,
                a: a_page,
                b: b_page,
            };

            if visit(page)?.is_break() {
                return Ok(pages);
            }
        }

        if available < len {
            let snapshot_end = position + available as u64;
            if snapshot_end < geometry.end() {
                tracing::warn!(end = snapshot_end, "snapshot ends before the scanned range");
            }
            break;
        }

        position += len as u64;
    }

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visited(a: &[u8], b: &[u8], geometry: ScanGeometry) -> Vec<(u64, u64, usize)> {
        let mut pages = Vec::new();
        let count = scan_pages(a, b, &geometry, |page| {
            pages.push((page.number, page.address, page.a.len()));
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();

        assert_eq!(count as usize, pages.len());
        pages
    }

    #[test]
    fn pages_in_order_across_blocks() {
        let data = vec![0u8; 0x5000];
        let geometry = ScanGeometry::new(0x1000, 0x3800).with_block_size(0x2000);

        assert_eq!(
            visited(&data, &data, geometry),
            [
                (1, 0x1000, 0x1000),
                (2, 0x2000, 0x1000),
                (3, 0x3000, 0x1000),
                (4, 0x4000, 0x1000),
            ]
        );
    }

    #[test]
    fn trailing_partial_page_is_scanned_to_its_boundary() {
        let data = vec![0u8; 0x2000];
        let geometry = ScanGeometry::new(0, 0x1800);

        assert_eq!(geometry.scan_end(), 0x2000);
        assert_eq!(
            visited(&data, &data, geometry),
            [(0, 0, 0x1000), (1, 0x1000, 0x1000)]
        );
    }

    #[test]
    fn trailing_partial_page_is_clamped_by_the_snapshot() {
        let data = vec![0u8; 0x1900];
        let geometry = ScanGeometry::new(0, 0x1800);

        assert_eq!(
            visited(&data, &data, geometry),
            [(0, 0, 0x1000), (1, 0x1000, 0x900)]
        );
    }

    #[test]
    fn stops_at_the_shorter_snapshot() {
        let a = vec![0u8; 0x3000];
        let b = vec![0u8; 0x1800];
        let geometry = ScanGeometry::new(0, 0x4000).with_block_size(0x1000);

        assert_eq!(
            visited(&a, &b, geometry),
            [(0, 0, 0x1000), (1, 0x1000, 0x800)]
        );
    }

    #[test]
    fn finds_the_first_difference() {
        let a = [0u8; 16];
        let mut b = [0u8; 16];
        b[9] = 1;
        b[12] = 1;

        let page = Page {
            number: 0,
            address: 0x100,
            a: &a,
            b: &b,
        };

        assert_eq!(page.first_difference(), Some(9));
        assert_eq!(page.end(), 0x110);
    }

    #[test]
    fn break_stops_the_scan() {
        let data = vec![0u8; 0x4000];
        let geometry = ScanGeometry::new(0, 0x4000);

        let count = scan_pages(&data, &data, &geometry, |page| {
            Ok(if page.number == 1 {
                ControlFlow::Break(())
            }
            else {
                ControlFlow::Continue(())
            })
        })
        .unwrap();

        assert_eq!(count, 2);
    }
}
