//! Dirty page bitmap generation and verification.
//!
//! Dirty page logging reports which guest pages were written during an
//! interval, one bit per page. Given a snapshot of guest memory taken at
//! the start of the interval and one taken at its end, [`generate`] derives
//! the bitmap the log should have produced and [`check`] verifies that a
//! logged bitmap marks every page whose content changed.
//!
//! Snapshots are streamed in bounded blocks through [`SnapshotSource`], so
//! guests of any size can be checked. Bitmaps are accessed through
//! [`BitmapStore`].
//!
//! The [`workload`] module provides the guest side: workers that dirty
//! their working set on every pass and detect pages that were lost.

mod bitmap;
mod check;
mod error;
mod generate;
mod geometry;
mod scan;
mod source;
pub mod workload;

pub use self::{
    bitmap::{BitmapFile, BitmapStore, DirtyBitmap},
    check::{CheckReport, Inconsistency, OverMarked, check},
    error::Error,
    generate::{GenerateReport, generate},
    geometry::{CheckOptions, ScanGeometry},
    source::{Snapshot, SnapshotSource},
};
