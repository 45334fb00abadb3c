use std::ops::Deref;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// `Write` sorts first so a duplicate id keeps its strongest mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Mode {
    Write,
    Read,
}

enum Guard {
    Read(OwnedRwLockReadGuard<LedgerState>),
    Write(OwnedRwLockWriteGuard<LedgerState>),
}

impl Deref for Guard {
    type Target = LedgerState;

    fn deref(&self) -> &LedgerState {
        match self {
            Guard::Read(g) => g,
            Guard::Write(g) => g,
        }
    }
}

/// Ledger guards held together for one validate-then-write sequence.
pub(super) struct LockSet {
    guards: Vec<(Ulid, Guard)>,
}

impl LockSet {
    pub fn get(&self, id: &Ulid) -> Option<&LedgerState> {
        self.guards
            .iter()
            .find(|(gid, _)| gid == id)
            .map(|(_, g)| g.deref())
    }

    /// Only ledgers locked for writing are handed out mutably.
    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut LedgerState> {
        self.guards.iter_mut().find(|(gid, _)| gid == id).and_then(|(_, g)| match g {
            Guard::Write(w) => Some(&mut **w),
            Guard::Read(_) => None,
        })
    }

    pub fn ledgers(&self) -> impl Iterator<Item = &LedgerState> {
        self.guards.iter().map(|(_, g)| g.deref())
    }
}

impl Engine {
    /// Lock every ledger in `plan`, in ascending id order regardless of how
    /// the plan was built, so overlapping lock sets cannot deadlock.
    /// A ledger deleted while we waited for it is `NotFound`.
    pub(super) async fn lock_ledgers(&self, mut plan: Vec<(Ulid, Mode)>) -> Result<LockSet, EngineError> {
        plan.sort();
        plan.dedup_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(plan.len());
        for (id, mode) in plan {
            let handle = self.get_ledger(&id).ok_or(EngineError::NotFound(id))?;
            let guard = match mode {
                Mode::Read => Guard::Read(handle.state.read_owned().await),
                Mode::Write => Guard::Write(handle.state.write_owned().await),
            };
            if !self.ledgers.contains_key(&id) {
                return Err(EngineError::NotFound(id));
            }
            guards.push((id, guard));
        }
        Ok(LockSet { guards })
    }

    /// Locks needed to place or move a booking on `ledger_id`: that ledger
    /// for writing, plus every ledger it can conflict with for reading.
    /// A staff ledger conflicts with its business pool; the pool conflicts
    /// with every staff ledger of the business.
    pub(super) fn booking_lock_plan(
        &self,
        business_id: Ulid,
        ledger_id: Ulid,
    ) -> Result<Vec<(Ulid, Mode)>, EngineError> {
        if ledger_id != business_id {
            return Ok(vec![(ledger_id, Mode::Write), (business_id, Mode::Read)]);
        }
        let bs = self
            .businesses
            .get(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        let mut plan = Vec::with_capacity(bs.staff.len() + 1);
        plan.push((business_id, Mode::Write));
        plan.extend(bs.staff.iter().map(|s| (*s, Mode::Read)));
        Ok(plan)
    }

    /// Lock the plan from `booking_lock_plan`. A pool plan names the staff
    /// set as it was before any lock was held; once the pool's write lock is
    /// ours, no booking on a newer staff member can commit, so a staff set
    /// that still matches the plan is final. Otherwise start over.
    pub(super) async fn lock_for_booking(
        &self,
        business_id: Ulid,
        ledger_id: Ulid,
    ) -> Result<LockSet, EngineError> {
        loop {
            let plan = self.booking_lock_plan(business_id, ledger_id)?;
            let locks = match self.lock_ledgers(plan).await {
                Ok(locks) => locks,
                // A staff member deleted under a pool plan.
                Err(EngineError::NotFound(id)) if id != business_id && id != ledger_id => continue,
                Err(e) => return Err(e),
            };
            if ledger_id != business_id || self.staff_unchanged(business_id, &locks)? {
                return Ok(locks);
            }
            tracing::debug!(business = %business_id, "staff changed while locking pool, retrying");
        }
    }

    fn staff_unchanged(&self, business_id: Ulid, locks: &LockSet) -> Result<bool, EngineError> {
        let bs = self
            .businesses
            .get(&business_id)
            .ok_or(EngineError::NotFound(business_id))?;
        Ok(bs.staff.len() + 1 == locks.guards.len()
            && bs.staff.iter().all(|s| locks.get(s).is_some()))
    }

    /// Read locks on a staff ledger and its business pool.
    pub(super) fn staff_read_plan(&self, staff_id: Ulid, business_id: Ulid) -> Vec<(Ulid, Mode)> {
        vec![(staff_id, Mode::Read), (business_id, Mode::Read)]
    }
}
