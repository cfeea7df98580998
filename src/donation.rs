//! # Priority Donation
//!
//! Prevents priority inversion under the priority scheduler. A thread that
//! blocks on a held lock lends its effective priority to the holder; if the
//! holder is itself blocked on another lock, the donation is forwarded along
//! the `wait_on_lock -> holder` chain, at most `donation_depth` hops.
//!
//! ```text
//!   H (pri 40) ──waits on──► L2 ──held by──► M ──waits on──► L1 ──held by──► Lo
//!                                            40                            40
//! ```
//!
//! A thread's effective priority is the maximum of its base priority and
//! the effective priorities of its donors. Releasing a lock drops the donors
//! that were waiting on it and recomputes.
//!
//! Donation is disabled when the MLFQS scheduler is active.

use crate::scheduler::Scheduler;
use crate::sync::LockId;
use crate::thread::ThreadId;

impl Scheduler {
    /// The running thread is about to block on `lock`: record the wait and
    /// donate along the holder chain.
    pub(crate) fn donate(&mut self, lock: LockId) {
        let donor = self.current();
        self.thread_mut(donor).wait_on_lock = Some(lock);
        if self.config.mlfqs {
            return;
        }

        if let Some(holder) = self.lock_holder(lock) {
            self.add_donor(holder, donor);
        }

        let mut giver = donor;
        for _ in 0..self.config.donation_depth {
            let Some(waiting) = self.thread(giver).wait_on_lock else {
                break;
            };
            let Some(holder) = self.lock_holder(waiting) else {
                break;
            };

            let priority = self.thread(giver).priority;
            if self.thread(holder).priority >= priority {
                break;
            }
            self.thread_mut(holder).priority = priority;
            self.reposition(holder);
            log::debug!("{} donates priority {} to {}", giver, priority, holder);

            giver = holder;
        }
    }

    pub(crate) fn add_donor(&mut self, holder: ThreadId, donor: ThreadId) {
        let donors = &mut self.thread_mut(holder).donors;
        if !donors.contains(&donor) {
            donors.push(donor);
        }
    }

    /// Drop every donor of `holder` that was waiting on `lock`.
    pub(crate) fn remove_donors_for(&mut self, holder: ThreadId, lock: LockId) {
        let donors = core::mem::take(&mut self.thread_mut(holder).donors);
        let kept = donors
            .into_iter()
            .filter(|&d| self.get(d).is_some_and(|t| t.wait_on_lock != Some(lock)))
            .collect();
        self.thread_mut(holder).donors = kept;
    }

    /// Recompute the effective priority of `tid` from its base priority and
    /// its donors.
    pub(crate) fn refresh_priority(&mut self, tid: ThreadId) {
        let thread = self.thread(tid);
        let donated = thread
            .donors
            .iter()
            .filter_map(|&d| self.get(d))
            .map(|d| d.priority)
            .max();
        let priority = donated.map_or(thread.base_priority, |p| p.max(thread.base_priority));

        if priority != thread.priority {
            self.thread_mut(tid).priority = priority;
            self.reposition(tid);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
