//! The traditional model: any worker may read any region.
//!
//! Each region is pinned to one worker by hash, so units of the same region run in submission
//! order on a single thread.

use std::io;
use std::thread;

use log::debug;
use log::warn;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::RegionScheduler;
use super::RegionWorkUnit;
use super::Scheduled;
use super::WorkError;
use super::WorkHandle;
use super::slot_for;

pub struct PooledScheduler<T> {
    workers: Vec<mpsc::Sender<Scheduled<T>>>,
    region_shift: u8,
}

impl<T: Send + 'static> PooledScheduler<T> {
    /// Spawns `threads` workers with a queue of `queue_capacity` units each.
    ///
    /// Workers exit once the scheduler has been dropped and their queue has drained.
    pub fn new(threads: usize, queue_capacity: usize, region_shift: u8) -> io::Result<Self> {
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads.max(1) {
            let (sender, mut receiver) = mpsc::channel::<Scheduled<T>>(queue_capacity.max(1));
            thread::Builder::new()
                .name(format!("dhs-pool-{index}"))
                .spawn(move || {
                    while let Some(unit) = receiver.blocking_recv() {
                        unit.run();
                    }
                    debug!("pool worker {index} stopped");
                })?;
            workers.push(sender);
        }
        Ok(Self {
            workers,
            region_shift,
        })
    }
}

impl<T: Send + 'static> RegionScheduler<T> for PooledScheduler<T> {
    fn submit(&self, unit: RegionWorkUnit<T>) -> WorkHandle {
        let (scheduled, handle) = Scheduled::new(unit);
        let region = scheduled.region(self.region_shift);
        let index = slot_for(region, self.workers.len());
        let Some(worker) = self.workers.get(index) else {
            scheduled.reject(WorkError::RegionUnavailable(region));
            return handle;
        };
        match worker.try_send(scheduled) {
            Ok(()) => {}
            Err(TrySendError::Full(scheduled)) => {
                debug!("pool worker {index} is saturated; rejecting {}", scheduled.key());
                scheduled.reject(WorkError::Saturated);
            }
            Err(TrySendError::Closed(scheduled)) => {
                warn!("pool worker {index} is gone; rejecting {}", scheduled.key());
                scheduled.reject(WorkError::RegionUnavailable(region));
            }
        }
        handle
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::mpsc as std_mpsc;

    use dhs_core::RegionPos;
    use rand::Rng;

    use super::*;
    use crate::scheduling::WorkStatus;
    use crate::scheduling::tests::TIMEOUT;
    use crate::scheduling::tests::key;
    use crate::scheduling::tests::tagged_unit;

    #[test]
    fn same_region_keeps_submission_order() {
        let scheduler = PooledScheduler::new(4, 256, 3).unwrap();
        let (sender, receiver) = std_mpsc::channel();
        // all of these share region <0, 0>: 128 blocks per region, 64 per section
        let keys = [key(0, 0, 0), key(0, 1, 0), key(0, 0, 1), key(0, 1, 1)];
        for tag in 0..100_u32 {
            let unit_key = *keys.get(usize::try_from(tag).unwrap() % keys.len()).unwrap();
            let thread_name = move || Ok(thread::current().name().map(str::to_owned));
            drop(scheduler.submit(tagged_unit(unit_key, tag, thread_name, &sender)));
        }
        let mut threads = Vec::new();
        for expected in 0..100 {
            let (tag, result) = receiver.recv_timeout(TIMEOUT).unwrap();
            assert_eq!(tag, expected);
            threads.push(result.unwrap());
        }
        threads.dedup();
        assert_eq!(threads.len(), 1, "one region must stay on one worker");
    }

    #[test]
    fn random_regions_keep_their_own_order() {
        let mut rng = rand::rng();
        let scheduler = PooledScheduler::new(3, 1024, 1).unwrap();
        let (sender, receiver) = std_mpsc::channel();
        let mut submitted: HashMap<RegionPos, Vec<u32>> = HashMap::new();
        for tag in 0..500_u32 {
            let unit_key = key(
                rng.random_range(0..2),
                rng.random_range(-8..8),
                rng.random_range(-8..8),
            );
            submitted
                .entry(RegionPos::for_key(unit_key, 1))
                .or_default()
                .push(tag);
            let job = move || Ok(RegionPos::for_key(unit_key, 1));
            drop(scheduler.submit(tagged_unit(unit_key, tag, job, &sender)));
        }

        let mut completed: HashMap<RegionPos, Vec<u32>> = HashMap::new();
        for _ in 0..500 {
            let (tag, result) = receiver.recv_timeout(TIMEOUT).unwrap();
            completed.entry(result.unwrap()).or_default().push(tag);
        }
        assert_eq!(completed, submitted);
    }

    #[test]
    fn full_queue_is_saturated() {
        let scheduler = PooledScheduler::new(1, 1, 3).unwrap();
        let (sender, receiver) = std_mpsc::channel();
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        let (started_tx, started_rx) = std_mpsc::channel::<()>();

        let blocker = move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
            Ok(())
        };
        drop(scheduler.submit(tagged_unit(key(0, 0, 0), 0, blocker, &sender)));
        started_rx.recv_timeout(TIMEOUT).unwrap();

        // one unit fits into the queue, the next one doesn't
        drop(scheduler.submit(tagged_unit(key(0, 0, 0), 1, || Ok(()), &sender)));
        drop(scheduler.submit(tagged_unit(key(0, 0, 0), 2, || Ok(()), &sender)));
        assert_eq!(
            receiver.recv_timeout(TIMEOUT).unwrap(),
            (2, Err(WorkError::Saturated))
        );

        gate_tx.send(()).unwrap();
        assert_eq!(receiver.recv_timeout(TIMEOUT).unwrap(), (0, Ok(())));
        assert_eq!(receiver.recv_timeout(TIMEOUT).unwrap(), (1, Ok(())));
    }

    #[tokio::test]
    async fn worker_survives_panics() {
        let scheduler = PooledScheduler::new(1, 8, 3).unwrap();
        let (sender, receiver) = std_mpsc::channel();
        let panicking = scheduler.submit(tagged_unit(
            key(0, 0, 0),
            0,
            || -> Result<(), WorkError> { panic!("broken world") },
            &sender,
        ));
        let healthy = scheduler.submit(tagged_unit(key(0, 0, 0), 1, || Ok(()), &sender));

        assert!(matches!(
            panicking.finished().await,
            WorkStatus::Failed(WorkError::World(_))
        ));
        assert_eq!(healthy.finished().await, WorkStatus::Completed);
        assert!(matches!(
            receiver.recv_timeout(TIMEOUT).unwrap(),
            (0, Err(WorkError::World(_)))
        ));
        assert_eq!(receiver.recv_timeout(TIMEOUT).unwrap(), (1, Ok(())));
    }
}
