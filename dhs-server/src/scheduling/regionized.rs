//! The regionized model: every region is owned by exactly one executor thread at a time and
//! ownership may move while work is queued.

use std::collections::HashMap;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::thread;

use dhs_core::DimensionId;
use dhs_core::RegionPos;
use log::debug;
use log::trace;
use log::warn;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::RegionScheduler;
use super::RegionWorkUnit;
use super::Scheduled;
use super::WorkError;
use super::WorkHandle;
use super::slot_for;

/// Upper bound of ownership transfers a single unit will follow.
pub const MAX_HOPS: usize = 8;

#[derive(Default)]
struct Owners {
    regions: HashMap<RegionPos, usize>,
    removed_dimensions: HashSet<DimensionId>,
}

/// Maps regions to the id of their owning executor.
///
/// This is the host-facing side of the regionized model: the host assigns regions as they
/// load and unassigns them as they unload.
pub struct RegionOwnerTable {
    owners: RwLock<Owners>,
    owner_count: usize,
}

impl RegionOwnerTable {
    #[must_use]
    pub fn new(owner_count: usize) -> Self {
        Self {
            owners: RwLock::default(),
            owner_count: owner_count.max(1),
        }
    }

    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.owner_count
    }

    /// Moves `region` to `owner`. Fails for unknown owners and removed dimensions.
    pub fn assign(&self, region: RegionPos, owner: usize) -> bool {
        if owner >= self.owner_count {
            return false;
        }
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        if owners.removed_dimensions.contains(&region.dimension) {
            return false;
        }
        if let Some(previous) = owners.regions.insert(region, owner) {
            if previous != owner {
                debug!("region {region} moved from owner {previous} to {owner}");
            }
        }
        true
    }

    /// Marks `region` as unloaded and returns its previous owner.
    pub fn unassign(&self, region: RegionPos) -> Option<usize> {
        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .regions
            .remove(&region)
    }

    /// Drops all regions of `dimension` and refuses any further assignment to it.
    pub fn remove_dimension(&self, dimension: DimensionId) -> usize {
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        owners.removed_dimensions.insert(dimension);
        let before = owners.regions.len();
        owners
            .regions
            .retain(|region, _owner| region.dimension != dimension);
        let removed = before - owners.regions.len();
        debug!("dimension {dimension} removed along with {removed} regions");
        removed
    }

    /// Reverts [`Self::remove_dimension`].
    pub fn add_dimension(&self, dimension: DimensionId) {
        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .removed_dimensions
            .remove(&dimension);
    }

    #[must_use]
    pub fn owner_of(&self, region: RegionPos) -> Option<usize> {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .regions
            .get(&region)
            .copied()
    }

    /// Looks up the owner; with `adopt` an unassigned region of a live dimension gets a hashed
    /// owner.
    fn resolve(&self, region: RegionPos, adopt: bool) -> Option<usize> {
        if let Some(owner) = self.owner_of(region) {
            return Some(owner);
        }
        if !adopt {
            return None;
        }
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        if owners.removed_dimensions.contains(&region.dimension) {
            return None;
        }
        let owner = *owners
            .regions
            .entry(region)
            .or_insert_with(|| slot_for(region, self.owner_count));
        trace!("region {region} adopted by owner {owner}");
        Some(owner)
    }
}

struct Shared<T> {
    senders: Vec<mpsc::Sender<Scheduled<T>>>,
    table: Arc<RegionOwnerTable>,
    region_shift: u8,
    auto_assign: bool,
}

impl<T: Send + 'static> Shared<T> {
    fn dispatch(&self, owner: usize, scheduled: Scheduled<T>) {
        let region = scheduled.region(self.region_shift);
        let Some(sender) = self.senders.get(owner) else {
            scheduled.reject(WorkError::RegionUnavailable(region));
            return;
        };
        match sender.try_send(scheduled) {
            Ok(()) => {}
            Err(TrySendError::Full(scheduled)) => {
                debug!("owner {owner} is saturated; rejecting {}", scheduled.key());
                scheduled.reject(WorkError::Saturated);
            }
            Err(TrySendError::Closed(scheduled)) => {
                warn!("owner {owner} is gone; rejecting {}", scheduled.key());
                scheduled.reject(WorkError::RegionUnavailable(region));
            }
        }
    }

    /// Runs the unit if `owner` still owns its region, otherwise passes it on.
    fn run_or_forward(&self, owner: usize, mut scheduled: Scheduled<T>) {
        let region = scheduled.region(self.region_shift);
        match self.table.resolve(region, self.auto_assign) {
            Some(current) if current == owner => scheduled.run(),
            Some(current) => {
                if scheduled.hop(MAX_HOPS) {
                    trace!("forwarding {} from owner {owner} to {current}", scheduled.key());
                    self.dispatch(current, scheduled);
                } else {
                    warn!("{} changed owners too often", scheduled.key());
                    scheduled.reject(WorkError::RegionUnavailable(region));
                }
            }
            None => scheduled.reject(WorkError::RegionUnavailable(region)),
        }
    }
}

pub struct RegionizedScheduler<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> RegionizedScheduler<T> {
    /// Spawns one executor per owner of `table`.
    ///
    /// With `auto_assign` regions that nobody owns are adopted on first use instead of being
    /// reported as unavailable.
    pub fn new(
        table: Arc<RegionOwnerTable>,
        queue_capacity: usize,
        region_shift: u8,
        auto_assign: bool,
    ) -> io::Result<Self> {
        let owner_count = table.owner_count();
        let mut senders = Vec::with_capacity(owner_count);
        let mut receivers = Vec::with_capacity(owner_count);
        for _ in 0..owner_count {
            let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
            senders.push(sender);
            receivers.push(receiver);
        }
        let shared = Arc::new(Shared {
            senders,
            table,
            region_shift,
            auto_assign,
        });

        for (owner, mut receiver) in receivers.into_iter().enumerate() {
            let weak = Arc::downgrade(&shared);
            thread::Builder::new()
                .name(format!("dhs-region-{owner}"))
                .spawn(move || {
                    while let Some(scheduled) = receiver.blocking_recv() {
                        if let Some(shared) = weak.upgrade() {
                            shared.run_or_forward(owner, scheduled);
                        } else {
                            // the scheduler is gone; nobody can own anything anymore
                            let region = scheduled.region(region_shift);
                            scheduled.reject(WorkError::RegionUnavailable(region));
                        }
                    }
                    debug!("region owner {owner} stopped");
                })?;
        }
        Ok(Self { shared })
    }

    #[must_use]
    pub fn table(&self) -> &Arc<RegionOwnerTable> {
        &self.shared.table
    }
}

impl<T: Send + 'static> RegionScheduler<T> for RegionizedScheduler<T> {
    fn submit(&self, unit: RegionWorkUnit<T>) -> WorkHandle {
        let (scheduled, handle) = Scheduled::new(unit);
        let region = scheduled.region(self.shared.region_shift);
        match self.shared.table.resolve(region, self.shared.auto_assign) {
            Some(owner) => self.shared.dispatch(owner, scheduled),
            None => {
                debug!("no owner for {region}; rejecting {}", scheduled.key());
                scheduled.reject(WorkError::RegionUnavailable(region));
            }
        }
        handle
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use glam::I64Vec2;

    use super::*;
    use crate::scheduling::WorkStatus;
    use crate::scheduling::tests::TIMEOUT;
    use crate::scheduling::tests::key;
    use crate::scheduling::tests::tagged_unit;

    fn region(dimension: u16, x: i64, z: i64) -> RegionPos {
        RegionPos::new(DimensionId(dimension), I64Vec2::new(x, z))
    }

    fn thread_name() -> Result<Option<String>, WorkError> {
        Ok(thread::current().name().map(str::to_owned))
    }

    #[tokio::test]
    async fn unowned_region_is_unavailable() {
        let table = Arc::new(RegionOwnerTable::new(2));
        let scheduler = RegionizedScheduler::new(table, 16, 3, false).unwrap();
        let (sender, receiver) = std_mpsc::channel();
        let handle = scheduler.submit(tagged_unit(key(0, 0, 0), 0, thread_name, &sender));
        assert_eq!(
            handle.finished().await,
            WorkStatus::Failed(WorkError::RegionUnavailable(region(0, 0, 0)))
        );
        assert_eq!(
            receiver.recv_timeout(TIMEOUT).unwrap(),
            (0, Err(WorkError::RegionUnavailable(region(0, 0, 0))))
        );
    }

    #[test]
    fn runs_on_assigned_owner() {
        let table = Arc::new(RegionOwnerTable::new(3));
        assert!(table.assign(region(0, 1, 0), 2));
        assert!(!table.assign(region(0, 1, 0), 3), "owner 3 does not exist");
        let scheduler = RegionizedScheduler::new(Arc::clone(&table), 16, 3, false).unwrap();
        let (sender, receiver) = std_mpsc::channel();
        // section x = 2 at full resolution starts at block 128, which is region 1
        drop(scheduler.submit(tagged_unit(key(0, 2, 0), 7, thread_name, &sender)));
        assert_eq!(
            receiver.recv_timeout(TIMEOUT).unwrap(),
            (7, Ok(Some("dhs-region-2".to_owned())))
        );

        assert_eq!(table.unassign(region(0, 1, 0)), Some(2));
        drop(scheduler.submit(tagged_unit(key(0, 3, 1), 8, thread_name, &sender)));
        assert_eq!(
            receiver.recv_timeout(TIMEOUT).unwrap(),
            (8, Err(WorkError::RegionUnavailable(region(0, 1, 0))))
        );
    }

    #[test]
    fn same_region_keeps_submission_order() {
        let table = Arc::new(RegionOwnerTable::new(3));
        let scheduler = RegionizedScheduler::new(Arc::clone(&table), 256, 3, true).unwrap();
        let (sender, receiver) = std_mpsc::channel();
        // two sections in region <0, 0> and two in region <2, 0>
        let keys = [key(0, 0, 0), key(0, 4, 0), key(0, 1, 1), key(0, 5, 1)];
        for tag in 0..120_u32 {
            let unit_key = *keys.get(usize::try_from(tag).unwrap() % keys.len()).unwrap();
            let region = move || Ok(RegionPos::for_key(unit_key, 3));
            drop(scheduler.submit(tagged_unit(unit_key, tag, region, &sender)));
        }

        let mut completed: HashMap<RegionPos, Vec<u32>> = HashMap::new();
        for _ in 0..120 {
            let (tag, result) = receiver.recv_timeout(TIMEOUT).unwrap();
            completed.entry(result.unwrap()).or_default().push(tag);
        }
        assert_eq!(completed.len(), 2);
        for tags in completed.values() {
            assert_eq!(tags.len(), 60);
            assert!(tags.is_sorted(), "units of one region ran out of order: {tags:?}");
        }
    }

    #[test]
    fn reassignment_runs_exactly_once_on_new_owner() {
        let table = Arc::new(RegionOwnerTable::new(2));
        let blocked = region(0, 5, 5);
        let moving = region(0, 0, 0);
        assert!(table.assign(blocked, 0));
        assert!(table.assign(moving, 0));
        let scheduler = RegionizedScheduler::new(Arc::clone(&table), 16, 3, false).unwrap();

        let (sender, receiver) = std_mpsc::channel();
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        let (started_tx, started_rx) = std_mpsc::channel::<()>();
        let blocker = move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
            thread_name()
        };
        drop(scheduler.submit(tagged_unit(key(0, 10, 10), 0, blocker, &sender)));
        started_rx.recv_timeout(TIMEOUT).unwrap();

        // queued behind the blocker on owner 0, then the region moves away
        drop(scheduler.submit(tagged_unit(key(0, 0, 0), 1, thread_name, &sender)));
        assert!(table.assign(moving, 1));
        gate_tx.send(()).unwrap();

        let mut results = vec![
            receiver.recv_timeout(TIMEOUT).unwrap(),
            receiver.recv_timeout(TIMEOUT).unwrap(),
        ];
        results.sort_by_key(|(tag, _result)| *tag);
        assert_eq!(
            results,
            vec![
                (0, Ok(Some("dhs-region-0".to_owned()))),
                (1, Ok(Some("dhs-region-1".to_owned()))),
            ]
        );
        assert!(
            receiver.recv_timeout(Duration::from_millis(100)).is_err(),
            "no unit may complete twice"
        );
    }

    #[tokio::test]
    async fn removed_dimension_rejects_work() {
        let table = Arc::new(RegionOwnerTable::new(2));
        assert!(table.assign(region(1, 0, 0), 1));
        assert!(table.assign(region(1, 4, 4), 0));
        let scheduler = RegionizedScheduler::new(Arc::clone(&table), 16, 3, true).unwrap();
        let (sender, _receiver) = std_mpsc::channel();

        assert_eq!(table.remove_dimension(DimensionId(1)), 2);
        assert!(!table.assign(region(1, 0, 0), 0));
        let handle = scheduler.submit(tagged_unit(key(1, 0, 0), 0, thread_name, &sender));
        assert_eq!(
            handle.finished().await,
            WorkStatus::Failed(WorkError::RegionUnavailable(region(1, 0, 0)))
        );

        table.add_dimension(DimensionId(1));
        let handle = scheduler.submit(tagged_unit(key(1, 0, 0), 1, thread_name, &sender));
        assert_eq!(handle.finished().await, WorkStatus::Completed);
    }

    #[tokio::test]
    async fn auto_assign_adopts_regions() {
        let table = Arc::new(RegionOwnerTable::new(4));
        let scheduler = RegionizedScheduler::new(Arc::clone(&table), 16, 3, true).unwrap();
        let (sender, receiver) = std_mpsc::channel();
        let target = region(0, -1, 3);
        assert_eq!(table.owner_of(target), None);

        // section (-1, 6) starts at block (-64, 384): region (-1, 3)
        let handle = scheduler.submit(tagged_unit(key(0, -1, 6), 0, thread_name, &sender));
        assert_eq!(handle.finished().await, WorkStatus::Completed);
        let owner = table.owner_of(target).unwrap();
        let (_tag, name) = receiver.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(name, Ok(Some(format!("dhs-region-{owner}"))));
        assert!(Arc::ptr_eq(scheduler.table(), &table));
    }
}
