//! # Timer
//!
//! Tick counter queries and sleeping in real-time units. Durations are
//! converted to ticks rounding down; a wait shorter than one tick is spun
//! out on the port's busy-wait instead, since the sleep list has tick
//! granularity.

use crate::arch::Port;
use crate::kernel::Kernel;

impl<P: Port> Kernel<P> {
    /// Timer ticks since boot.
    pub fn ticks(&self) -> u64 {
        self.with_state(|s| s.ticks)
    }

    /// Ticks elapsed since `then`, a value returned by [`Kernel::ticks`].
    pub fn elapsed(&self, then: u64) -> u64 {
        self.ticks().saturating_sub(then)
    }

    /// Sleep for approximately `ticks` timer ticks. Zero returns at once.
    pub fn sleep(&self, ticks: u64) {
        if ticks == 0 {
            return;
        }
        let start = self.ticks();
        self.sleep_until(start + ticks);
    }

    /// Sleep for approximately `ms` milliseconds.
    pub fn msleep(&self, ms: u64) {
        self.real_time_sleep(ms, 1_000);
    }

    /// Sleep for approximately `us` microseconds.
    pub fn usleep(&self, us: u64) {
        self.real_time_sleep(us, 1_000_000);
    }

    /// Sleep for approximately `ns` nanoseconds.
    pub fn nsleep(&self, ns: u64) {
        self.real_time_sleep(ns, 1_000_000_000);
    }

    /// Busy-wait approximately `ms` milliseconds with the clock ignored.
    /// Usable with interrupts disabled.
    pub fn mdelay(&self, ms: u64) {
        self.port().busy_wait(ms, 1_000);
    }

    pub fn udelay(&self, us: u64) {
        self.port().busy_wait(us, 1_000_000);
    }

    pub fn ndelay(&self, ns: u64) {
        self.port().busy_wait(ns, 1_000_000_000);
    }

    /// Sleep for `num / denom` seconds.
    fn real_time_sleep(&self, num: u64, denom: u64) {
        let ticks = ticks_for(num, denom, self.config().timer_freq);
        if ticks > 0 {
            self.sleep(ticks);
        } else {
            self.port().busy_wait(num, denom);
        }
    }
}

/// Whole ticks in `num / denom` seconds at `freq` Hz.
fn ticks_for(num: u64, denom: u64, freq: u32) -> u64 {
    num.saturating_mul(freq as u64) / denom
}

#[cfg(test)]
mod tests {
    use super::ticks_for;
    use crate::config::TIMER_FREQ;

    #[test]
    fn test_real_time_conversion_rounds_down() {
        assert_eq!(ticks_for(1_000, 1_000, TIMER_FREQ), 100);
        assert_eq!(ticks_for(15, 1_000, TIMER_FREQ), 1);
        assert_eq!(ticks_for(9, 1_000, TIMER_FREQ), 0);
        assert_eq!(ticks_for(9_999, 1_000_000, TIMER_FREQ), 0);
        assert_eq!(ticks_for(30_000_000, 1_000_000_000, TIMER_FREQ), 3);
        assert_eq!(ticks_for(500, 1_000, 1_000), 500);
    }
}
