//! Memory workload producing dirty page traffic.
//!
//! Each worker owns a working set and stamps a marker every `stride` bytes.
//! A marker is three doublewords: the worker id, the offset of the marker
//! and the number of the pass that last wrote it. Every pass verifies the
//! markers written by the previous one and rewrites the pass number, so
//! every page holding a marker is dirtied on each pass and any page lost
//! or restored stale (e.g. by a migration with an incomplete dirty log) is
//! detected.

use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Size of a marker in bytes.
pub const MARKER_SIZE: usize = 24;

/// Maximum number of workers.
pub const MAX_WORKERS: usize = 256;

/// A marker field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerField {
    /// The worker id.
    Id,

    /// The offset of the marker.
    Offset,

    /// The pass number.
    Pass,
}

impl fmt::Display for MarkerField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id => f.write_str("id"),
            Self::Offset => f.write_str("offset marker"),
            Self::Pass => f.write_str("pass marker"),
        }
    }
}

/// A marker that does not hold the expected value.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("worker {worker}, addr {offset:#x}, {field}: expected: {expected:#x}, got: {found:#x}")]
pub struct Corruption {
    /// The worker that found the corruption.
    pub worker: u64,

    /// Offset of the marker within the working set.
    pub offset: usize,

    /// The corrupted field.
    pub field: MarkerField,

    /// The expected value.
    pub expected: u64,

    /// The value found.
    pub found: u64,
}

/// A worker stamping and verifying markers over its working set.
pub struct Worker {
    id: u64,
    stride: usize,
    markers: usize,
    words: Box<[AtomicU64]>,
    pass: u64,
}

impl Worker {
    /// Creates a worker with a working set of `bytes` bytes and stamps the
    /// initial markers.
    ///
    /// `stride` must be a multiple of 8 holding at least one marker.
    pub fn new(id: u64, bytes: usize, stride: usize) -> Result<Self, Error> {
        if stride < MARKER_SIZE || stride % 8 != 0 {
            return Err(Error::InvalidStride(stride));
        }

        if bytes == 0 {
            return Err(Error::InvalidWorkingSet { bytes, workers: 1 });
        }

        // The last marker may extend past the end of the working set.
        let markers = bytes.div_ceil(stride);
        let words = ((markers - 1) * stride + MARKER_SIZE) / 8;

        let worker = Self {
            id,
            stride,
            markers,
            words: (0..words).map(|_| AtomicU64::new(0)).collect(),
            pass: 0,
        };

        for offset in worker.offsets() {
            let index = offset / 8;
            worker.words[index].store(id, Ordering::Relaxed);
            worker.words[index + 1].store(offset as u64, Ordering::Relaxed);
            worker.words[index + 2].store(u64::MAX, Ordering::Relaxed);
        }

        Ok(worker)
    }

    /// Returns the id of the worker.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the number of completed passes.
    pub fn passes(&self) -> u64 {
        self.pass
    }

    /// Returns the number of markers.
    pub fn markers(&self) -> usize {
        self.markers
    }

    /// Verifies every marker and stamps the current pass number.
    ///
    /// Stops at the first corrupted marker.
    pub fn run_pass(&mut self) -> Result<(), Corruption> {
        let previous = self.pass.wrapping_sub(1);

        for offset in self.offsets() {
            let index = offset / 8;

            self.verify(offset, MarkerField::Id, self.id)?;
            self.verify(offset, MarkerField::Offset, offset as u64)?;
            self.verify(offset, MarkerField::Pass, previous)?;

            self.words[index + 2].store(self.pass, Ordering::Relaxed);
        }

        self.pass += 1;
        Ok(())
    }

    fn offsets(&self) -> impl Iterator<Item = usize> + use<> {
        (0..self.markers).map({
            let stride = self.stride;
            move |marker| marker * stride
        })
    }

    fn verify(&self, offset: usize, field: MarkerField, expected: u64) -> Result<(), Corruption> {
        let index = offset / 8
            + match field {
                MarkerField::Id => 0,
                MarkerField::Offset => 1,
                MarkerField::Pass => 2,
            };

        let found = self.words[index].load(Ordering::Relaxed);
        if found != expected {
            return Err(Corruption {
                worker: self.id,
                offset,
                field,
                expected,
                found,
            });
        }

        Ok(())
    }
}

/// Configuration of a workload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Total size of the working set in bytes, split evenly across workers.
    pub working_set: usize,

    /// Number of workers.
    pub workers: usize,

    /// Distance between markers in bytes.
    pub stride: usize,

    /// Number of passes each worker makes. Unlimited if `None`.
    pub passes: Option<u64>,
}

impl WorkloadConfig {
    /// The default stride.
    pub const DEFAULT_STRIDE: usize = 4096;
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            working_set: 0,
            workers: 1,
            stride: Self::DEFAULT_STRIDE,
            passes: None,
        }
    }
}

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOutcome {
    /// The id of the worker.
    pub id: u64,

    /// Number of completed passes.
    pub passes: u64,

    /// The corruption that stopped the worker, if any.
    pub corruption: Option<Corruption>,
}

/// Runs the workload until `stop` is raised, every worker completed its
/// passes, or a worker found a corruption.
///
/// A corruption raises `stop` for the remaining workers.
pub fn run_workload(config: &WorkloadConfig, stop: &AtomicBool) -> Result<Vec<WorkerOutcome>, Error> {
    if config.workers == 0 || config.workers > MAX_WORKERS {
        return Err(Error::InvalidWorkingSet {
            bytes: config.working_set,
            workers: config.workers,
        });
    }

    let bytes = config.working_set / config.workers;
    let workers = (0..config.workers)
        .map(|id| Worker::new(id as u64, bytes, config.stride))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| match err {
            Error::InvalidWorkingSet { .. } => Error::InvalidWorkingSet {
                bytes: config.working_set,
                workers: config.workers,
            },
            err => err,
        })?;

    let outcomes = std::thread::scope(|scope| {
        let handles = workers
            .into_iter()
            .map(|mut worker| {
                scope.spawn(move || {
                    tracing::info!(id = worker.id(), bytes, "starting worker");

                    let corruption = loop {
                        if stop.load(Ordering::Relaxed)
                            || config.passes.is_some_and(|passes| worker.passes() >= passes)
                        {
                            break None;
                        }

                        if let Err(corruption) = worker.run_pass() {
                            tracing::error!(%corruption, "marker corrupted");
                            stop.store(true, Ordering::Relaxed);
                            break Some(corruption);
                        }
                    };

                    WorkerOutcome {
                        id: worker.id(),
                        passes: worker.passes(),
                        corruption,
                    }
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(outcome) => outcome,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect::<Vec<_>>()
    });

    Ok(outcomes)
}
