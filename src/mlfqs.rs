//! # Multi-Level Feedback Queue Scheduler
//!
//! When selected at boot, priorities are no longer set by threads but
//! derived from how much CPU each thread has used recently and from its
//! niceness:
//!
//! ```text
//! priority   = PRI_MAX - recent_cpu / 4 - nice * 2            (clamped)
//! recent_cpu = (2 * load_avg) / (2 * load_avg + 1) * recent_cpu + nice
//! load_avg   = (59/60) * load_avg + (1/60) * ready_threads
//! ```
//!
//! `recent_cpu` and `load_avg` are [`Fixed`] values. On each tick the
//! running thread's `recent_cpu` grows by one. Once per second the load
//! average is updated first, then every thread's `recent_cpu`; every
//! fourth tick all priorities are recomputed.

use crate::config::{NICE_MAX, NICE_MIN, PRIORITY_RECALC_TICKS, PRI_MAX, PRI_MIN};
use crate::fixed_point::Fixed;
use crate::scheduler::Scheduler;
use crate::thread::{Thread, ThreadStatus};

// ---------------------------------------------------------------------------
// Formulas
// ---------------------------------------------------------------------------

/// `PRI_MAX - recent_cpu / 4 - nice * 2`, truncated and clamped to the
/// priority range.
pub fn compute_priority(recent_cpu: Fixed, nice: i32) -> u8 {
    let p = (Fixed::from_int(PRI_MAX as i32) - recent_cpu / 4 - nice * 2).to_int_trunc();
    p.clamp(PRI_MIN as i32, PRI_MAX as i32) as u8
}

/// One second of exponential decay of the load average towards the number
/// of ready threads.
pub fn next_load_avg(load_avg: Fixed, ready_threads: usize) -> Fixed {
    let decay = Fixed::from_int(59) / 60;
    let gain = Fixed::from_int(1) / 60;
    decay * load_avg + gain * ready_threads as i32
}

/// One second of decay of a thread's recent CPU estimate.
pub fn next_recent_cpu(recent_cpu: Fixed, load_avg: Fixed, nice: i32) -> Fixed {
    let twice = load_avg * 2;
    twice / (twice + 1) * recent_cpu + nice
}

// ---------------------------------------------------------------------------
// Scheduler integration
// ---------------------------------------------------------------------------

impl Scheduler {
    pub(crate) fn mlfqs_priority(&self, thread: &Thread) -> u8 {
        compute_priority(thread.recent_cpu, thread.nice)
    }

    /// Per-tick MLFQS bookkeeping. Called with `ticks` already advanced.
    /// Returns `true` when a recomputation left a ready thread above the
    /// running one.
    pub(crate) fn mlfqs_tick(&mut self) -> bool {
        let cur = self.current();
        if !self.is_idle(cur) {
            let t = self.thread_mut(cur);
            t.recent_cpu = t.recent_cpu + 1;
        }

        if self.ticks % self.config.timer_freq as u64 == 0 {
            self.update_load_avg();
            self.update_recent_cpu();
        }

        if self.ticks % PRIORITY_RECALC_TICKS == 0 {
            self.update_priorities();
            return self.should_preempt();
        }
        false
    }

    fn update_load_avg(&mut self) {
        let running = usize::from(!self.is_idle(self.current()));
        let ready = self.ready_list().len() + running;
        self.load_avg = next_load_avg(self.load_avg, ready);
    }

    fn update_recent_cpu(&mut self) {
        let load_avg = self.load_avg;
        let idle = self.idle();
        for t in self.threads_mut() {
            if Some(t.id) != idle && t.status != ThreadStatus::Dying {
                t.recent_cpu = next_recent_cpu(t.recent_cpu, load_avg, t.nice);
            }
        }
    }

    fn update_priorities(&mut self) {
        let idle = self.idle();
        for t in self.threads_mut() {
            if Some(t.id) != idle && t.status != ThreadStatus::Dying {
                t.base_priority = compute_priority(t.recent_cpu, t.nice);
                t.priority = t.base_priority;
            }
        }
        self.sort_ready();
    }

    /// Set the running thread's nice value and, under MLFQS, its priority.
    ///
    /// # Panics
    /// If `nice` lies outside `NICE_MIN..=NICE_MAX`.
    pub fn set_nice(&mut self, nice: i32) {
        assert!(
            (NICE_MIN..=NICE_MAX).contains(&nice),
            "nice {} outside {}..={}",
            nice,
            NICE_MIN,
            NICE_MAX
        );
        let cur = self.current();
        self.thread_mut(cur).nice = nice;

        if self.config.mlfqs {
            let priority = self.mlfqs_priority(self.thread(cur));
            let t = self.thread_mut(cur);
            t.base_priority = priority;
            t.priority = priority;
        }
    }

    pub fn load_avg(&self) -> Fixed {
        self.load_avg
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KernelConfig, PRI_DEFAULT};
    use proptest::prelude::*;

    fn mlfqs_sched() -> Scheduler {
        let mut s = Scheduler::new(KernelConfig::mlfqs());
        let idle = s.allocate_thread("idle", PRI_MIN).unwrap();
        s.register_idle(idle);
        s
    }

    #[test]
    fn test_fresh_thread_priority() {
        assert_eq!(compute_priority(Fixed::ZERO, 0), PRI_MAX);
        assert_eq!(compute_priority(Fixed::ZERO, 20), PRI_MAX - 40);
        assert_eq!(compute_priority(Fixed::ZERO, -20), PRI_MAX);
        assert_eq!(compute_priority(Fixed::from_int(400), 20), PRI_MIN);
        // 63 - 2.75 truncates to 60.
        assert_eq!(compute_priority(Fixed::from_int(11), 0), 60);
    }

    #[test]
    fn test_load_average_with_one_busy_thread() {
        // A single CPU-bound thread pushes load_avg past 0.5 after 42 s.
        let mut load = Fixed::ZERO;
        let mut crossed = None;
        for second in 1..=60 {
            load = next_load_avg(load, 1);
            if crossed.is_none() && load.scaled_round(100) > 50 {
                crossed = Some(second);
            }
        }
        let crossed = crossed.unwrap();
        assert!((38..=45).contains(&crossed), "crossed 0.5 at {}s", crossed);

        // Ten idle seconds pull it back under 0.5.
        let mut decayed = Fixed::from_int(1) / 2;
        for _ in 0..10 {
            decayed = next_load_avg(decayed, 0);
        }
        assert!(decayed.scaled_round(100) < 50);
    }

    #[test]
    fn test_recent_cpu_decay() {
        // load_avg 1: recent_cpu * 2/3 + nice
        let next = next_recent_cpu(Fixed::from_int(30), Fixed::ONE, 0);
        assert_eq!(next.to_int_round(), 20);
        let next = next_recent_cpu(Fixed::from_int(30), Fixed::ONE, 5);
        assert_eq!(next.to_int_round(), 25);
    }

    #[test]
    fn test_tick_order() {
        let mut s = mlfqs_sched();
        let main = s.current();
        assert_eq!(s.thread(main).priority, PRI_MAX);

        // 100 ticks at 100 Hz: one load average update, 25 priority updates.
        for _ in 0..100 {
            s.ticks += 1;
            s.mlfqs_tick();
        }
        // load_avg = 1/60 since main was running.
        assert_eq!(s.load_avg().scaled_round(100), 2);
        let t = s.thread(main);
        assert!(t.recent_cpu < Fixed::from_int(100));
        assert!(t.recent_cpu > Fixed::from_int(3));
        assert_eq!(t.priority, compute_priority(t.recent_cpu, 0));
        assert!(t.priority < PRI_MAX);

        // The idle thread is never charged.
        let idle = s.idle().unwrap();
        assert_eq!(s.thread(idle).recent_cpu, Fixed::ZERO);
        assert_eq!(s.thread(idle).priority, PRI_MIN);
    }

    #[test]
    fn test_set_nice_recomputes_under_mlfqs() {
        let mut s = mlfqs_sched();
        s.set_nice(10);
        assert_eq!(s.thread(s.current()).priority, PRI_MAX - 20);

        let mut plain = Scheduler::new(KernelConfig::default());
        plain.set_nice(10);
        assert_eq!(plain.thread(plain.current()).priority, PRI_DEFAULT);
        assert_eq!(plain.thread(plain.current()).nice, 10);
    }

    #[test]
    #[should_panic(expected = "nice 21 outside")]
    fn test_nice_range() {
        mlfqs_sched().set_nice(21);
    }

    proptest! {
        #[test]
        fn prop_priority_in_range(cpu in 0i32..10_000, nice in NICE_MIN..=NICE_MAX) {
            let p = compute_priority(Fixed::from_int(cpu), nice);
            prop_assert!((PRI_MIN..=PRI_MAX).contains(&p));
        }

        #[test]
        fn prop_load_avg_bounded(ready in 0usize..64, seconds in 1usize..200) {
            let mut load = Fixed::ZERO;
            for _ in 0..seconds {
                load = next_load_avg(load, ready);
            }
            prop_assert!(load >= Fixed::ZERO);
            prop_assert!(load <= Fixed::from_int(ready as i32) + Fixed::from_raw(1));
        }
    }
}
