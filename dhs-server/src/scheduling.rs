//! Runs region-bound work on the host's threading model.
//!
//! A [`RegionWorkUnit`] runs exactly once, on the thread that currently owns its region, and
//! never concurrently with another unit of the same region. Its completion is invoked exactly
//! once as well: with the job's result, or with the reason the unit never ran.

pub mod pooled;
pub mod regionized;

use std::any::Any;
use std::hash::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;

use dhs_core::LodChunkKey;
use dhs_core::RegionPos;
use dhs_protocol::CodecError;
use log::error;
use log::trace;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub use pooled::PooledScheduler;
pub use regionized::RegionOwnerTable;
pub use regionized::RegionizedScheduler;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError {
    #[error("region {0} is not loaded")]
    RegionUnavailable(RegionPos),
    #[error("scheduler queue is full")]
    Saturated,
    #[error("work unit has been cancelled")]
    Cancelled,
    #[error("world data error: {0}")]
    World(String),
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<CodecError> for WorkError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value.to_string())
    }
}

/// Final state of a unit as seen through its [`WorkHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkStatus {
    Completed,
    Failed(WorkError),
    Cancelled,
}

pub type Job<T> = Box<dyn FnOnce() -> Result<T, WorkError> + Send>;
pub type Completion<T> = Box<dyn FnOnce(Result<T, WorkError>) + Send>;

/// Work bound to the region containing `key`.
pub struct RegionWorkUnit<T> {
    pub key: LodChunkKey,
    job: Job<T>,
    completion: Completion<T>,
}

impl<T> RegionWorkUnit<T> {
    pub fn new<J, C>(key: LodChunkKey, job: J, completion: C) -> Self
    where
        J: FnOnce() -> Result<T, WorkError> + Send + 'static,
        C: FnOnce(Result<T, WorkError>) + Send + 'static,
    {
        Self {
            key,
            job: Box::new(job),
            completion: Box::new(completion),
        }
    }
}

/// The submitter's view of a unit.
#[derive(Debug)]
pub struct WorkHandle {
    cancel: CancellationToken,
    status: oneshot::Receiver<WorkStatus>,
}

impl WorkHandle {
    /// Prevents the job from starting. A result of a job that is already running is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits until the unit's completion has been invoked.
    pub async fn finished(self) -> WorkStatus {
        self.status.await.unwrap_or(WorkStatus::Cancelled)
    }
}

/// Accepts region-bound work.
pub trait RegionScheduler<T>: Send + Sync {
    fn submit(&self, unit: RegionWorkUnit<T>) -> WorkHandle;
}

/// A submitted unit travelling through a scheduler's queues.
pub(crate) struct Scheduled<T> {
    unit: RegionWorkUnit<T>,
    cancel: CancellationToken,
    status: oneshot::Sender<WorkStatus>,
    /// number of times this unit has been passed on to another owner
    hops: usize,
}

impl<T> Scheduled<T> {
    pub(crate) fn new(unit: RegionWorkUnit<T>) -> (Self, WorkHandle) {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = oneshot::channel();
        let scheduled = Self {
            unit,
            cancel: cancel.clone(),
            status: status_tx,
            hops: 0,
        };
        (
            scheduled,
            WorkHandle {
                cancel,
                status: status_rx,
            },
        )
    }

    pub(crate) fn key(&self) -> LodChunkKey {
        self.unit.key
    }

    pub(crate) fn region(&self, region_shift: u8) -> RegionPos {
        RegionPos::for_key(self.unit.key, region_shift)
    }

    /// Runs the job on the current thread and completes the unit.
    pub(crate) fn run(self) {
        if self.cancel.is_cancelled() {
            self.complete(Err(WorkError::Cancelled));
            return;
        }
        let key = self.unit.key;
        let job = self.unit.job;
        let result = match catch_unwind(AssertUnwindSafe(job)) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("job for {key} panicked: {message}");
                Err(WorkError::World(format!("job panicked: {message}")))
            }
        };
        // a cancellation during the run discards the result
        let result = if self.cancel.is_cancelled() {
            Err(WorkError::Cancelled)
        } else {
            result
        };
        Self::finish(self.unit.completion, self.status, key, result);
    }

    /// Completes the unit without running its job.
    pub(crate) fn reject(self, error: WorkError) {
        self.complete(Err(error));
    }

    /// Marks another ownership transfer; returns `false` once `max_hops` is exceeded.
    pub(crate) fn hop(&mut self, max_hops: usize) -> bool {
        self.hops += 1;
        self.hops <= max_hops
    }

    fn complete(self, result: Result<T, WorkError>) {
        Self::finish(self.unit.completion, self.status, self.unit.key, result);
    }

    fn finish(
        completion: Completion<T>,
        status: oneshot::Sender<WorkStatus>,
        key: LodChunkKey,
        result: Result<T, WorkError>,
    ) {
        let final_status = match &result {
            Ok(_) => WorkStatus::Completed,
            Err(WorkError::Cancelled) => WorkStatus::Cancelled,
            Err(err) => WorkStatus::Failed(err.clone()),
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| completion(result))) {
            error!(
                "completion for {key} panicked: {}",
                panic_message(panic.as_ref())
            );
        }
        // the handle may have been dropped already
        if status.send(final_status).is_err() {
            trace!("nobody waits for {key}");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Picks one of `count` slots for a region. Stable for the lifetime of the process.
pub(crate) fn slot_for(region: RegionPos, count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    region.hash(&mut hasher);
    let count = u64::try_from(count.max(1)).unwrap_or(1);
    usize::try_from(hasher.finish() % count).unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use dhs_core::DetailLevel;
    use dhs_core::DimensionId;
    use dhs_core::SectionPos;

    use super::*;

    pub(crate) const TIMEOUT: Duration = Duration::from_secs(5);

    pub(crate) fn key(dimension: u16, x: i32, z: i32) -> LodChunkKey {
        let section = SectionPos::new(DetailLevel::MIN, x, z).unwrap();
        LodChunkKey::new(DimensionId(dimension), section)
    }

    /// A unit whose completion reports `(tag, result)` into `sender`.
    pub(crate) fn tagged_unit<T: Send + 'static>(
        key: LodChunkKey,
        tag: u32,
        job: impl FnOnce() -> Result<T, WorkError> + Send + 'static,
        sender: &mpsc::Sender<(u32, Result<T, WorkError>)>,
    ) -> RegionWorkUnit<T> {
        let sender = sender.clone();
        RegionWorkUnit::new(key, job, move |result| {
            sender.send((tag, result)).unwrap();
        })
    }

    #[tokio::test]
    async fn cancelled_units_never_run() {
        let (sender, receiver) = mpsc::channel();
        let job = || -> Result<u32, WorkError> { panic!("must not run") };
        let unit = tagged_unit(key(0, 0, 0), 1, job, &sender);
        let (scheduled, handle) = Scheduled::new(unit);
        handle.cancel();
        scheduled.run();
        assert_eq!(
            receiver.recv_timeout(TIMEOUT).unwrap(),
            (1, Err(WorkError::Cancelled))
        );
        assert_eq!(handle.finished().await, WorkStatus::Cancelled);
    }

    #[tokio::test]
    async fn panics_become_world_errors() {
        let (sender, receiver) = mpsc::channel();
        let job = || -> Result<u32, WorkError> { panic!("boom") };
        let unit = tagged_unit(key(0, 0, 0), 1, job, &sender);
        let (scheduled, handle) = Scheduled::new(unit);
        scheduled.run();
        let (_tag, result) = receiver.recv_timeout(TIMEOUT).unwrap();
        assert!(matches!(result, Err(WorkError::World(message)) if message.contains("boom")));
        assert!(matches!(
            handle.finished().await,
            WorkStatus::Failed(WorkError::World(_))
        ));
    }

    #[test]
    fn slots_are_stable() {
        let region = RegionPos::for_key(key(0, 3, -9), 3);
        let slot = slot_for(region, 7);
        assert!(slot < 7);
        assert_eq!(slot_for(region, 7), slot);
        assert_eq!(slot_for(region, 1), 0);
    }
}
